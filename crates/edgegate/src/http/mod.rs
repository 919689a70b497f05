pub mod cors;
pub mod csp;
pub mod geo;
pub mod oauth2;
pub mod session;
pub mod userid;

pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header};

use crate::*;

pub type Body = axum_core::body::Body;
pub type Request = ::http::Request<Body>;
pub type Response = ::http::Response<Body>;

/// Host of the request: URI authority first (HTTP/2), `Host` header second.
/// The port, if any, is stripped.
pub fn get_host(req: &::http::Request<impl http_body::Body>) -> Option<String> {
	let raw = req
		.uri()
		.authority()
		.map(|a| a.as_str().to_string())
		.or_else(|| {
			req
				.headers()
				.get(header::HOST)
				.and_then(|h| h.to_str().ok())
				.map(|h| h.to_string())
		})?;
	Some(strip_port(&raw).to_string())
}

fn strip_port(host: &str) -> &str {
	// IPv6 literals keep their brackets; only a trailing `:port` is removed.
	match host.rfind(':') {
		Some(idx) if !host[idx..].contains(']') => &host[..idx],
		_ => host,
	}
}

/// Client IP for policy and logging, first of: leftmost `X-Forwarded-For`
/// entry, `X-Real-IP`, `X-Client-IP`, then the transport peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
	if let Some(xff) = headers.get("x-forwarded-for").and_then(|h| h.to_str().ok()) {
		if let Some(first) = xff.split(',').next().map(str::trim) {
			if !first.is_empty() {
				return first.to_string();
			}
		}
	}
	for name in ["x-real-ip", "x-client-ip"] {
		if let Some(ip) = headers.get(name).and_then(|h| h.to_str().ok()) {
			if !ip.trim().is_empty() {
				return ip.trim().to_string();
			}
		}
	}
	match peer {
		Some(addr) => addr.ip().to_string(),
		None => "unknown".to_string(),
	}
}

/// A named cookie from the `Cookie` header, if present.
pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
	for header in headers.get_all(header::COOKIE) {
		let Ok(raw) = header.to_str() else { continue };
		for pair in raw.split(';') {
			let pair = pair.trim();
			if let Some((k, v)) = pair.split_once('=') {
				if k == name {
					return Some(v.to_string());
				}
			}
		}
	}
	None
}

/// Minimal JSON error body used by every terminal error response.
pub fn json_error(status: StatusCode, error: &str, message: &str) -> Response {
	let body = serde_json::json!({ "error": error, "message": message });
	::http::Response::builder()
		.status(status)
		.header(header::CONTENT_TYPE, "application/json")
		.body(Body::from(body.to_string()))
		.expect("static response must build")
}
