use super::*;
use crate::http::header;

fn policy(origins: Vec<&str>) -> Cors {
	Cors::try_from(CorsSerde {
		allow_origins: origins.into_iter().map(String::from).collect(),
		allow_methods: vec!["GET".into(), "POST".into()],
		allow_headers: vec!["content-type".into()],
		expose_headers: vec!["x-request-id".into()],
		allow_credentials: true,
		max_age_seconds: Some(600),
		preflight_status: None,
	})
	.expect("policy compiles")
}

fn req_headers(origin: Option<&str>) -> HeaderMap {
	let mut headers = HeaderMap::new();
	if let Some(o) = origin {
		headers.insert(header::ORIGIN, HeaderValue::from_str(o).unwrap());
	}
	headers
}

#[test]
fn preflight_echoes_listed_origin() {
	let cors = policy(vec!["https://app.test"]);
	let resp = cors.preflight(&req_headers(Some("https://app.test")));
	assert_eq!(resp.status(), StatusCode::NO_CONTENT);
	assert_eq!(
		resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
		"https://app.test"
	);
	assert_eq!(
		resp.headers().get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
		"GET,POST"
	);
	assert_eq!(resp.headers().get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "600");
}

#[test]
fn preflight_unlisted_origin_gets_no_allow_origin() {
	let cors = policy(vec!["https://app.test"]);
	let resp = cors.preflight(&req_headers(Some("https://evil.test")));
	assert!(resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}

#[test]
fn wildcard_origin() {
	let cors = policy(vec!["*"]);
	let resp = cors.preflight(&req_headers(Some("https://anything.test")));
	assert_eq!(
		resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
		"*"
	);
}

#[test]
fn unconfigured_origins_echo_request_origin() {
	let cors = Cors::permissive();
	let mut headers = HeaderMap::new();
	cors.apply(
		Some(&HeaderValue::from_static("https://app.test")),
		&mut headers,
	);
	assert_eq!(
		headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
		"https://app.test"
	);

	let mut headers = HeaderMap::new();
	cors.apply(None, &mut headers);
	assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
}

#[test]
fn overlay_sets_credentials_and_expose() {
	let cors = policy(vec!["https://app.test"]);
	let mut headers = HeaderMap::new();
	headers.insert(
		header::ACCESS_CONTROL_ALLOW_ORIGIN,
		HeaderValue::from_static("https://stale.test"),
	);
	cors.apply(
		Some(&HeaderValue::from_static("https://app.test")),
		&mut headers,
	);
	assert_eq!(
		headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
		"https://app.test"
	);
	assert_eq!(
		headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
		"true"
	);
	assert_eq!(
		headers.get(header::ACCESS_CONTROL_EXPOSE_HEADERS).unwrap(),
		"x-request-id"
	);
}

#[test]
fn configured_preflight_status() {
	let cors = Cors::try_from(CorsSerde {
		allow_origins: vec!["*".into()],
		allow_methods: vec![],
		allow_headers: vec![],
		expose_headers: vec![],
		allow_credentials: false,
		max_age_seconds: None,
		preflight_status: Some(200),
	})
	.unwrap();
	let resp = cors.preflight(&req_headers(Some("https://a.test")));
	assert_eq!(resp.status(), StatusCode::OK);
}
