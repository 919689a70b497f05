use super::*;
use crate::types::route::{RouteKind, RouteSerde};

fn rules(pairs: &[(&str, &str)]) -> Vec<(Regex, String)> {
	pairs
		.iter()
		.map(|(p, r)| (Regex::new(p).unwrap(), r.to_string()))
		.collect()
}

#[test]
fn rewrite_first_match_wins() {
	let rules = rules(&[
		("^/api/", "/v1/"),
		// Would also match, but must never apply.
		("^/api/users", "/nope/"),
	]);
	assert_eq!(
		rewrite_path("/api/users", &rules),
		Some("/v1/users".to_string())
	);
}

#[test]
fn rewrite_no_match_is_none() {
	let rules = rules(&[("^/other/", "/x/")]);
	assert_eq!(rewrite_path("/api/users", &rules), None);
}

#[test]
fn upstream_url_applies_rewrite_and_keeps_query() {
	let upstream = Url::parse("http://127.0.0.1:9000").unwrap();
	let url = upstream_url(
		&upstream,
		"/api/users",
		"/users",
		&rules(&[("^/api/", "/v1/")]),
		Some("x=1"),
	)
	.unwrap();
	assert_eq!(url.as_str(), "http://127.0.0.1:9000/v1/users?x=1");
}

#[test]
fn upstream_url_without_rewrite_uses_remainder() {
	let upstream = Url::parse("http://127.0.0.1:9000/base").unwrap();
	let url = upstream_url(&upstream, "/api/users", "/users", &[], None).unwrap();
	assert_eq!(url.as_str(), "http://127.0.0.1:9000/base/users");

	let url = upstream_url(&upstream, "/api", "", &[], None).unwrap();
	assert_eq!(url.as_str(), "http://127.0.0.1:9000/base");
}

#[test]
fn forwarder_target_decodes_base64() {
	// base64("https://example.com/a.pdf")
	let q = "url=aHR0cHM6Ly9leGFtcGxlLmNvbS9hLnBkZg==";
	let target = forwarder_target(Some(q)).expect("decodes");
	assert_eq!(target.as_str(), "https://example.com/a.pdf");
}

#[test]
fn forwarder_target_accepts_target_param() {
	let encoded = base64::engine::general_purpose::STANDARD.encode("https://example.com/b");
	let q = format!("target={encoded}");
	assert_eq!(
		forwarder_target(Some(&q)).unwrap().as_str(),
		"https://example.com/b"
	);
}

#[test]
fn forwarder_target_rejects_garbage() {
	assert!(forwarder_target(None).is_none());
	assert!(forwarder_target(Some("url=!!notbase64!!")).is_none());
	// Decodes but is not a URL.
	let encoded = base64::engine::general_purpose::STANDARD.encode("not a url");
	assert!(forwarder_target(Some(&format!("url={encoded}"))).is_none());
}

#[test]
fn query_param_extraction() {
	assert_eq!(
		query_param(Some("convert=png&w=100"), "convert").as_deref(),
		Some("png")
	);
	assert_eq!(query_param(Some("a=1"), "convert"), None);
	assert_eq!(query_param(None, "convert"), None);
}

#[test]
fn upgrade_detection() {
	let mut headers = HeaderMap::new();
	assert!(!is_upgrade(&headers));
	headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, Upgrade"));
	assert!(!is_upgrade(&headers));
	headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
	assert!(is_upgrade(&headers));
}

fn static_route(root: &Path, spa: bool) -> Route {
	Route::try_from(RouteSerde {
		name: "app".to_string(),
		host: "app.test".to_string(),
		path_prefix: Some("".to_string()),
		kind: RouteKind::Static,
		upstream: None,
		static_root: Some(root.to_path_buf()),
		redirect_to: None,
		rewrite_rules: vec![],
		replace_rules: vec![],
		headers: Default::default(),
		cors: None,
		oauth2: None,
		websocket: None,
		geo_filter: None,
		csp: None,
		spa_fallback: spa,
		public_paths: vec![],
		ssl: false,
	})
	.unwrap()
}

#[tokio::test]
async fn static_spa_fallback() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("index.html"), "<html>app</html>").unwrap();
	let route = static_route(dir.path(), true);

	// No file, no dot, not under /api/ or /static/: the SPA entry point.
	let resp = static_file(&route, "/products/42", "/products/42")
		.await
		.expect("fallback serves index");
	assert_eq!(resp.status(), StatusCode::OK);
	assert!(
		resp
			.headers()
			.get(header::CONTENT_TYPE)
			.unwrap()
			.to_str()
			.unwrap()
			.starts_with("text/html")
	);
	assert_eq!(
		resp.headers().get(header::CACHE_CONTROL).unwrap(),
		"public, max-age=300"
	);

	// Asset-looking requests are not rewritten.
	assert!(static_file(&route, "/logo.png", "/logo.png").await.is_err());
	assert!(static_file(&route, "/api/users", "/api/users").await.is_err());
	assert!(
		static_file(&route, "/static/app.js", "/static/app.js")
			.await
			.is_err()
	);
}

#[tokio::test]
async fn static_serves_existing_assets_with_long_cache() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("app.abc123.js"), "console.log(1)").unwrap();
	let route = static_route(dir.path(), false);

	let resp = static_file(&route, "/app.abc123.js", "/app.abc123.js")
		.await
		.unwrap();
	assert_eq!(resp.status(), StatusCode::OK);
	assert_eq!(
		resp.headers().get(header::CACHE_CONTROL).unwrap(),
		"public, max-age=31536000"
	);
}

#[tokio::test]
async fn static_rejects_traversal() {
	let dir = tempfile::tempdir().unwrap();
	let route = static_route(dir.path(), true);
	assert!(
		static_file(&route, "/../etc/passwd", "/../etc/passwd")
			.await
			.is_err()
	);
}

#[tokio::test]
async fn static_missing_without_fallback_404s() {
	let dir = tempfile::tempdir().unwrap();
	std::fs::write(dir.path().join("index.html"), "x").unwrap();
	let route = static_route(dir.path(), false);
	let err = static_file(&route, "/products/42", "/products/42")
		.await
		.unwrap_err();
	assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[test]
fn redirect_carries_remainder_and_query() {
	let route = Route::try_from(RouteSerde {
		name: "r".to_string(),
		host: "a.test".to_string(),
		path_prefix: Some("/old".to_string()),
		kind: RouteKind::Redirect,
		upstream: None,
		static_root: None,
		redirect_to: Some("https://new.test/root".to_string()),
		rewrite_rules: vec![],
		replace_rules: vec![],
		headers: Default::default(),
		cors: None,
		oauth2: None,
		websocket: None,
		geo_filter: None,
		csp: None,
		spa_fallback: false,
		public_paths: vec![],
		ssl: false,
	})
	.unwrap();

	let resp = redirect(&route, "/things", Some("a=1")).unwrap();
	assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
	assert_eq!(
		resp.headers().get(header::LOCATION).unwrap(),
		"https://new.test/root/things?a=1"
	);
}
