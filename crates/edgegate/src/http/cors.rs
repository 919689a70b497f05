use std::str::FromStr;

use ::http::{HeaderValue, Method, StatusCode, header};

use crate::http::{Body, HeaderMap, HeaderName, Response};
use crate::*;

#[cfg(test)]
#[path = "cors_test.rs"]
mod tests;

#[derive(Default, Debug, Clone)]
enum WildcardOrList<T> {
	#[default]
	None,
	Wildcard,
	List(Vec<T>),
}

impl<T: FromStr> TryFrom<Vec<String>> for WildcardOrList<T> {
	type Error = T::Err;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		if value.iter().any(|v| v == "*") {
			Ok(WildcardOrList::Wildcard)
		} else if value.is_empty() {
			Ok(WildcardOrList::None)
		} else {
			let list: Vec<T> = value
				.into_iter()
				.map(|v| T::from_str(&v))
				.collect::<Result<_, _>>()?;
			Ok(WildcardOrList::List(list))
		}
	}
}

impl<T: ToString> WildcardOrList<T> {
	fn to_header_value(&self) -> Option<HeaderValue> {
		match self {
			WildcardOrList::None => None,
			WildcardOrList::Wildcard => Some(HeaderValue::from_static("*")),
			WildcardOrList::List(list) => {
				let value = list
					.iter()
					.map(|item| item.to_string())
					.collect::<Vec<_>>()
					.join(",");
				HeaderValue::from_str(&value).ok()
			},
		}
	}
}

/// Per-route CORS policy. Handles both preflight synthesis and the
/// `Access-Control-*` overlay on actual responses.
#[derive(Debug, Clone)]
pub struct Cors {
	allow_origins: WildcardOrList<String>,
	allow_methods: WildcardOrList<Method>,
	allow_headers: WildcardOrList<HeaderName>,
	expose_headers: WildcardOrList<HeaderName>,
	allow_credentials: bool,
	max_age: Option<HeaderValue>,
	preflight_status: StatusCode,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CorsSerde {
	#[serde(default)]
	pub allow_origins: Vec<String>,
	#[serde(default)]
	pub allow_methods: Vec<String>,
	#[serde(default)]
	pub allow_headers: Vec<String>,
	#[serde(default)]
	pub expose_headers: Vec<String>,
	#[serde(default)]
	pub allow_credentials: bool,
	#[serde(default)]
	pub max_age_seconds: Option<u64>,
	#[serde(default)]
	pub preflight_status: Option<u16>,
}

impl TryFrom<CorsSerde> for Cors {
	type Error = anyhow::Error;

	fn try_from(value: CorsSerde) -> Result<Self, Self::Error> {
		Ok(Cors {
			allow_origins: WildcardOrList::try_from(value.allow_origins)
				.map_err(|_| anyhow::anyhow!("invalid allowOrigins"))?,
			allow_methods: WildcardOrList::try_from(value.allow_methods)?,
			allow_headers: WildcardOrList::try_from(value.allow_headers)?,
			expose_headers: WildcardOrList::try_from(value.expose_headers)?,
			allow_credentials: value.allow_credentials,
			max_age: value
				.max_age_seconds
				.map(|v| HeaderValue::from_str(&v.to_string()))
				.transpose()?,
			preflight_status: value
				.preflight_status
				.map(StatusCode::from_u16)
				.transpose()?
				.unwrap_or(StatusCode::NO_CONTENT),
		})
	}
}

impl Cors {
	/// Echo logic for `Access-Control-Allow-Origin`: a configured wildcard
	/// yields `*`; a configured list (or single literal) echoes the request
	/// origin when it is a member; no configuration echoes the request origin
	/// and falls back to `*` when the request carries none.
	fn allow_origin_value(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
		match &self.allow_origins {
			WildcardOrList::Wildcard => Some(HeaderValue::from_static("*")),
			WildcardOrList::List(allowed) => {
				let origin = origin?;
				let os = origin.as_bytes();
				allowed
					.iter()
					.any(|want| want.as_bytes() == os)
					.then(|| origin.clone())
			},
			WildcardOrList::None => Some(
				origin
					.cloned()
					.unwrap_or_else(|| HeaderValue::from_static("*")),
			),
		}
	}

	/// Synthesize the response for an `OPTIONS` preflight.
	pub fn preflight(&self, request_headers: &HeaderMap) -> Response {
		let origin = request_headers.get(header::ORIGIN);
		let mut rb = ::http::Response::builder().status(self.preflight_status);
		if let Some(o) = self.allow_origin_value(origin) {
			rb = rb.header(header::ACCESS_CONTROL_ALLOW_ORIGIN, o);
		}
		if let Some(h) = self.allow_methods.to_header_value() {
			rb = rb.header(header::ACCESS_CONTROL_ALLOW_METHODS, h);
		}
		if let Some(h) = self.allow_headers.to_header_value() {
			rb = rb.header(header::ACCESS_CONTROL_ALLOW_HEADERS, h);
		} else if let Some(requested) = request_headers.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
			// No configured list: reflect whatever the preflight asked for.
			rb = rb.header(header::ACCESS_CONTROL_ALLOW_HEADERS, requested);
		}
		if self.allow_credentials {
			rb = rb.header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HEADER_TRUE);
		}
		if let Some(h) = &self.max_age {
			rb = rb.header(header::ACCESS_CONTROL_MAX_AGE, h);
		}
		rb.body(Body::empty()).expect("static response must build")
	}

	/// Replace-or-add the `Access-Control-*` headers on an actual response.
	pub fn apply(&self, origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
		if let Some(o) = self.allow_origin_value(origin) {
			headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, o);
		}
		if self.allow_credentials {
			headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HEADER_TRUE);
		}
		if let Some(h) = self.expose_headers.to_header_value() {
			headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, h);
		}
	}

	/// The permissive policy the CORS forwarder falls back to when a route
	/// does not configure one.
	pub fn permissive() -> Cors {
		Cors {
			allow_origins: WildcardOrList::None,
			allow_methods: WildcardOrList::Wildcard,
			allow_headers: WildcardOrList::Wildcard,
			expose_headers: WildcardOrList::None,
			allow_credentials: false,
			max_age: None,
			preflight_status: StatusCode::NO_CONTENT,
		}
	}
}

const HEADER_TRUE: HeaderValue = HeaderValue::from_static("true");
