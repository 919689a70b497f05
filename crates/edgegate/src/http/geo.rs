use ::http::StatusCode;

use crate::ext::GeoInfo;
use crate::http::{Body, Response, header};
use crate::*;

#[cfg(test)]
#[path = "geo_test.rs"]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GeoMode {
	Allow,
	Block,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GeoFilterSerde {
	pub mode: GeoMode,
	#[serde(default)]
	pub countries: Vec<String>,
	#[serde(default)]
	pub regions: Vec<String>,
	#[serde(default)]
	pub cities: Vec<String>,
	#[serde(default)]
	pub blocked_status: Option<u16>,
	#[serde(default)]
	pub redirect_url: Option<String>,
}

/// Geolocation gate. `allow` blocks requests whose geo is outside the set,
/// `block` blocks requests whose geo is inside it. A geo matches the set when
/// any of its country, region or city appears in the corresponding list.
#[derive(Debug, Clone)]
pub struct GeoFilter {
	pub mode: GeoMode,
	countries: Vec<String>,
	regions: Vec<String>,
	cities: Vec<String>,
	blocked_status: StatusCode,
	redirect_url: Option<String>,
}

impl TryFrom<GeoFilterSerde> for GeoFilter {
	type Error = anyhow::Error;

	fn try_from(raw: GeoFilterSerde) -> Result<Self, Self::Error> {
		let lower = |v: Vec<String>| v.into_iter().map(|s| s.to_lowercase()).collect();
		Ok(GeoFilter {
			mode: raw.mode,
			countries: lower(raw.countries),
			regions: lower(raw.regions),
			cities: lower(raw.cities),
			blocked_status: raw
				.blocked_status
				.map(StatusCode::from_u16)
				.transpose()?
				.unwrap_or(StatusCode::FORBIDDEN),
			redirect_url: raw.redirect_url,
		})
	}
}

impl GeoFilter {
	fn in_set(&self, geo: &GeoInfo) -> bool {
		let matches = |value: &Option<String>, set: &[String]| {
			value
				.as_deref()
				.map(|v| set.iter().any(|s| s == &v.to_lowercase()))
				.unwrap_or(false)
		};
		matches(&geo.country, &self.countries)
			|| matches(&geo.region, &self.regions)
			|| matches(&geo.city, &self.cities)
	}

	/// Whether the request must be denied. Lookup is best-effort, so a request
	/// with no geo data passes regardless of mode.
	pub fn blocks(&self, geo: Option<&GeoInfo>) -> bool {
		let Some(geo) = geo else {
			return false;
		};
		match self.mode {
			GeoMode::Allow => !self.in_set(geo),
			GeoMode::Block => self.in_set(geo),
		}
	}

	/// The terminal response for a denied request: a redirect when one is
	/// configured, the configured status (default 403) otherwise.
	pub fn deny_response(&self) -> Response {
		match &self.redirect_url {
			Some(url) => ::http::Response::builder()
				.status(StatusCode::FOUND)
				.header(header::LOCATION, url)
				.body(Body::empty())
				.expect("static response must build"),
			None => crate::http::json_error(
				self.blocked_status,
				"geo_blocked",
				"request blocked by geolocation policy",
			),
		}
	}
}
