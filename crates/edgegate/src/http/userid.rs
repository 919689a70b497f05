use crate::http::{HeaderMap, get_cookie, header};

#[cfg(test)]
#[path = "userid_test.rs"]
mod tests;

/// Derive a privacy-bounded user identity for cache keying. First present of:
/// the route's OAuth2 session cookie, a bearer/api-key token (first 8 chars
/// only), an explicit user header, a generic session cookie. An anonymous
/// request derives nothing; its client IP still keys the cache through the
/// separate user-IP component.
pub fn derive(headers: &HeaderMap, oauth2_cookie: Option<&str>) -> Option<String> {
	if let Some(name) = oauth2_cookie {
		if let Some(sid) = get_cookie(headers, name) {
			return Some(format!("oauth:{sid}"));
		}
	}

	if let Some(auth) = headers
		.get(header::AUTHORIZATION)
		.and_then(|h| h.to_str().ok())
	{
		for scheme in ["Bearer ", "ApiKey "] {
			if let Some(token) = auth.strip_prefix(scheme) {
				let token = token.trim();
				if !token.is_empty() {
					let prefix: String = token.chars().take(8).collect();
					return Some(format!("token:{prefix}"));
				}
			}
		}
	}

	for name in ["x-user-id", "x-user"] {
		if let Some(value) = headers.get(name).and_then(|h| h.to_str().ok()) {
			if !value.is_empty() {
				return Some(format!("header:{value}"));
			}
		}
	}

	for name in ["session", "sessionid", "sid"] {
		if let Some(sid) = get_cookie(headers, name) {
			return Some(format!("session:{sid}"));
		}
	}

	None
}
