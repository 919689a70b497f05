mod gateway;
pub mod handler;
pub mod websocket;

pub use gateway::Gateway;

use crate::http::{Response, StatusCode, json_error};

/// The stable error taxonomy. Handlers own their failures: every variant
/// translates to an HTTP response in exactly one place, [`ProxyError::into_response`].
/// Only startup failures propagate to the process exit code.
#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
	#[error("invalid configuration: {0}")]
	ConfigInvalid(String),
	#[error("no route for host")]
	RouteNotFound,
	#[error("upstream unreachable: {0}")]
	UpstreamUnreachable(String),
	#[error("cache entry corrupt: {0}")]
	CacheCorrupt(String),
	#[error("authentication required")]
	AuthRequired,
	#[error("unknown or expired authorization state")]
	AuthStateInvalid,
	#[error("no certificate for requested server name")]
	TlsNoCert,
	#[error("acme challenge failed: {0}")]
	AcmeChallengeFail(String),
	#[error("process spawn failed: {0}")]
	ProcessSpawnFail(String),
	#[error("process health check failed")]
	ProcessHealthFail,
	#[error("request blocked by geolocation policy")]
	GeoBlocked,
	#[error("missing or invalid forwarder target")]
	BadForwarderTarget,
	#[error("request timeout")]
	RequestTimeout,
	#[error("upgrade failed: {0}")]
	UpgradeFailed(String),
	#[error("processing failed: {0}")]
	Processing(#[from] anyhow::Error),
}

impl ProxyError {
	pub fn status(&self) -> StatusCode {
		match self {
			ProxyError::RouteNotFound => StatusCode::NOT_FOUND,
			ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
			ProxyError::AuthRequired => StatusCode::UNAUTHORIZED,
			ProxyError::AuthStateInvalid => StatusCode::BAD_REQUEST,
			ProxyError::BadForwarderTarget => StatusCode::BAD_REQUEST,
			ProxyError::GeoBlocked => StatusCode::FORBIDDEN,
			ProxyError::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
			ProxyError::UpgradeFailed(_) => StatusCode::BAD_GATEWAY,

			ProxyError::ConfigInvalid(_)
			| ProxyError::CacheCorrupt(_)
			| ProxyError::TlsNoCert
			| ProxyError::AcmeChallengeFail(_)
			| ProxyError::ProcessSpawnFail(_)
			| ProxyError::ProcessHealthFail
			| ProxyError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn tag(&self) -> &'static str {
		match self {
			ProxyError::ConfigInvalid(_) => "config_invalid",
			ProxyError::RouteNotFound => "route_not_found",
			ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
			ProxyError::CacheCorrupt(_) => "cache_corrupt",
			ProxyError::AuthRequired => "auth_required",
			ProxyError::AuthStateInvalid => "auth_state_invalid",
			ProxyError::TlsNoCert => "tls_no_cert",
			ProxyError::AcmeChallengeFail(_) => "acme_challenge_fail",
			ProxyError::ProcessSpawnFail(_) => "process_spawn_fail",
			ProxyError::ProcessHealthFail => "process_health_fail",
			ProxyError::GeoBlocked => "geo_blocked",
			ProxyError::BadForwarderTarget => "bad_forwarder_target",
			ProxyError::RequestTimeout => "request_timeout",
			ProxyError::UpgradeFailed(_) => "upgrade_failed",
			ProxyError::Processing(_) => "processing",
		}
	}

	pub fn into_response(self) -> Response {
		let msg = self.to_string();
		json_error(self.status(), self.tag(), &msg)
	}
}
