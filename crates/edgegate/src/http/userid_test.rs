use super::*;
use crate::http::{HeaderMap, HeaderValue};

fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
	let mut h = HeaderMap::new();
	for (k, v) in pairs {
		h.append(
			crate::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
			HeaderValue::from_str(v).unwrap(),
		);
	}
	h
}

#[test]
fn oauth_cookie_wins() {
	let h = headers(&[
		("cookie", "oauth2_p_r_abcd1234=sid-1; session=other"),
		("authorization", "Bearer tok-123456789"),
	]);
	assert_eq!(
		derive(&h, Some("oauth2_p_r_abcd1234")),
		Some("oauth:sid-1".to_string())
	);
}

#[test]
fn bearer_token_is_prefix_bounded() {
	let h = headers(&[("authorization", "Bearer abcdefghijklmnop")]);
	assert_eq!(derive(&h, None), Some("token:abcdefgh".to_string()));
}

#[test]
fn apikey_scheme_recognized() {
	let h = headers(&[("authorization", "ApiKey shortkey")]);
	assert_eq!(derive(&h, None), Some("token:shortkey".to_string()));
}

#[test]
fn user_headers_after_tokens() {
	let h = headers(&[("x-user-id", "u42")]);
	assert_eq!(derive(&h, None), Some("header:u42".to_string()));
	let h = headers(&[("x-user", "u43")]);
	assert_eq!(derive(&h, None), Some("header:u43".to_string()));
}

#[test]
fn generic_session_cookie_last() {
	let h = headers(&[("cookie", "theme=dark; session=s-9")]);
	assert_eq!(derive(&h, None), Some("session:s-9".to_string()));
}

#[test]
fn anonymous_derives_nothing() {
	let h = HeaderMap::new();
	assert_eq!(derive(&h, None), None);
}
