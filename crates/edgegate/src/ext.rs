//! Collaborator seams. The gateway consumes these through narrow traits; the
//! default implementations keep the binary self-contained.

use async_trait::async_trait;

use crate::*;

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoInfo {
	pub country: Option<String>,
	pub region: Option<String>,
	pub city: Option<String>,
	pub lat: Option<f64>,
	pub lon: Option<f64>,
}

/// Best-effort IP geolocation. Failure is represented as `None`.
pub trait GeoLookup: Send + Sync {
	fn lookup(&self, ip: &str) -> Option<GeoInfo>;
}

/// A lookup that knows nothing. Used when no geolocation database is wired in.
pub struct NoGeoLookup;

impl GeoLookup for NoGeoLookup {
	fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
		None
	}
}

/// Converts PDF payloads into an image format on request
/// (`?convert=<format>` on a proxied response).
#[async_trait]
pub trait PdfConverter: Send + Sync {
	async fn convert(
		&self,
		body: Bytes,
		content_type: &str,
		format: &str,
		width: Option<u32>,
		height: Option<u32>,
	) -> anyhow::Result<(Bytes, String)>;
}

/// Pass-through converter; returns the payload unchanged.
pub struct NoPdfConverter;

#[async_trait]
impl PdfConverter for NoPdfConverter {
	async fn convert(
		&self,
		body: Bytes,
		content_type: &str,
		_format: &str,
		_width: Option<u32>,
		_height: Option<u32>,
	) -> anyhow::Result<(Bytes, String)> {
		Ok((body, content_type.to_string()))
	}
}

/// Request/connectivity statistics sink.
#[allow(clippy::too_many_arguments)]
pub trait Stats: Send + Sync {
	fn record_request(
		&self,
		ip: &str,
		geo: Option<&GeoInfo>,
		path: &str,
		method: &str,
		user_agent: Option<&str>,
		duration_ms: u64,
		domain: &str,
		target: Option<&str>,
		kind: &str,
	);

	fn record_connectivity(
		&self,
		endpoint: &str,
		conn_ms: u64,
		resp_ms: u64,
		ok: bool,
		err: Option<&str>,
	);
}

pub struct NoStats;

impl Stats for NoStats {
	fn record_request(
		&self,
		_ip: &str,
		_geo: Option<&GeoInfo>,
		_path: &str,
		_method: &str,
		_user_agent: Option<&str>,
		_duration_ms: u64,
		_domain: &str,
		_target: Option<&str>,
		_kind: &str,
	) {
	}

	fn record_connectivity(
		&self,
		_endpoint: &str,
		_conn_ms: u64,
		_resp_ms: u64,
		_ok: bool,
		_err: Option<&str>,
	) {
	}
}
