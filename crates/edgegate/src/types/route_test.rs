use super::*;

fn raw(name: &str, host: &str, prefix: Option<&str>, kind: RouteKind) -> RouteSerde {
	RouteSerde {
		name: name.to_string(),
		host: host.to_string(),
		path_prefix: prefix.map(String::from),
		kind,
		upstream: matches!(kind, RouteKind::Proxy).then(|| "http://127.0.0.1:9000".to_string()),
		static_root: matches!(kind, RouteKind::Static).then(|| PathBuf::from("/srv/app")),
		redirect_to: matches!(kind, RouteKind::Redirect).then(|| "https://elsewhere.test".to_string()),
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
	}
}

fn table(routes: Vec<RouteSerde>) -> RouteTable {
	let compiled = routes
		.into_iter()
		.map(Route::try_from)
		.collect::<anyhow::Result<Vec<_>>>()
		.expect("routes compile");
	RouteTable::build(compiled).expect("table builds")
}

#[test]
fn longest_prefix_wins() {
	let t = table(vec![
		raw("root", "a.test", Some(""), RouteKind::Proxy),
		raw("api", "a.test", Some("/api"), RouteKind::Proxy),
		raw("api-v2", "a.test", Some("/api/v2"), RouteKind::Proxy),
	]);

	struct TestCase {
		path: &'static str,
		expected: &'static str,
		remainder: &'static str,
	}
	let cases = vec![
		TestCase {
			path: "/api/v2/users",
			expected: "api-v2",
			remainder: "/users",
		},
		TestCase {
			path: "/api/users",
			expected: "api",
			remainder: "/users",
		},
		TestCase {
			path: "/index.html",
			expected: "root",
			remainder: "/index.html",
		},
	];
	for case in cases {
		let (route, remainder) = t.lookup("a.test", case.path).expect(case.path);
		assert_eq!(route.name, case.expected, "path {}", case.path);
		assert_eq!(remainder, case.remainder, "path {}", case.path);
	}
}

#[test]
fn host_matching_includes_www() {
	let t = table(vec![raw("site", "a.test", Some(""), RouteKind::Proxy)]);
	assert!(t.lookup("a.test", "/").is_some());
	assert!(t.lookup("www.a.test", "/").is_some());
	assert!(t.lookup("b.test", "/").is_none());
	assert!(t.lookup("sub.a.test", "/").is_none());
}

#[test]
fn no_prefix_match_returns_none() {
	let t = table(vec![raw("api", "a.test", Some("/api"), RouteKind::Proxy)]);
	assert!(t.lookup("a.test", "/other").is_none());
}

#[test]
fn duplicate_host_prefix_rejected() {
	let routes = vec![
		raw("one", "a.test", Some("/api"), RouteKind::Proxy),
		raw("two", "a.test", Some("/api"), RouteKind::Proxy),
	]
	.into_iter()
	.map(Route::try_from)
	.collect::<anyhow::Result<Vec<_>>>()
	.unwrap();
	assert!(RouteTable::build(routes).is_err());
}

#[test]
fn kind_requirements_validated() {
	let mut proxy = raw("p", "a.test", None, RouteKind::Proxy);
	proxy.upstream = None;
	assert!(Route::try_from(proxy).is_err());

	let mut redirect = raw("r", "a.test", None, RouteKind::Redirect);
	redirect.redirect_to = None;
	assert!(Route::try_from(redirect).is_err());

	let mut stat = raw("s", "a.test", None, RouteKind::Static);
	stat.static_root = None;
	assert!(Route::try_from(stat).is_err());
}

#[test]
fn invalid_rewrite_pattern_skipped() {
	let mut route = raw("p", "a.test", None, RouteKind::Proxy);
	route.rewrite_rules = vec![
		RewriteRule {
			pattern: "[".to_string(),
			replacement: "/broken/".to_string(),
		},
		RewriteRule {
			pattern: "^/api/".to_string(),
			replacement: "/v1/".to_string(),
		},
	];
	let compiled = Route::try_from(route).expect("compiles despite bad pattern");
	assert_eq!(compiled.rewrite_rules.len(), 1);
	assert_eq!(compiled.rewrite_rules[0].1, "/v1/");
}

#[test]
fn ssl_hosts_deduplicated() {
	let mut a = raw("a", "a.test", Some("/x"), RouteKind::Proxy);
	a.ssl = true;
	let mut b = raw("b", "a.test", Some("/y"), RouteKind::Proxy);
	b.ssl = true;
	let mut c = raw("c", "b.test", None, RouteKind::Proxy);
	c.ssl = true;
	let t = table(vec![a, b, c]);
	assert_eq!(t.ssl_hosts(), vec!["a.test".to_string(), "b.test".to_string()]);
}
