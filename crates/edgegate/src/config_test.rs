use super::*;

const GATEWAY_YAML: &str = r#"
port: 8080
httpsPort: 8443
logLevel: debug
dataDir: /var/lib/edgegate
certDir: /etc/edgegate/certs
letsencrypt:
  email: ops@example.com
  staging: true
cache:
  mruSize: 50
  maxAgeSeconds: 120
csp:
  policy: "default-src 'self'"
routes:
  - name: api
    host: a.test
    pathPrefix: /api
    kind: proxy
    upstream: http://127.0.0.1:9000
    ssl: true
    rewriteRules:
      - pattern: "^/api/"
        replacement: "/v1/"
  - name: app
    host: app.test
    kind: static
    staticRoot: /srv/app
    spaFallback: true
"#;

const PROCESSES_YAML: &str = r#"
pidDir: /var/run/edgegate
logsDir: /var/log/edgegate
processes:
  - id: w1
    command: node
    args: [server.js]
    restartOnExit: true
    healthCheck:
      url: http://127.0.0.1:9000/health
      intervalSeconds: 10
      retries: 2
    schedule:
      cron: "0 3 * * *"
      timezone: America/Los_Angeles
      autoStop: true
      maxDurationSeconds: 3600
"#;

#[test]
fn full_config_parses() {
	let cfg = parse_config(GATEWAY_YAML, Some(PROCESSES_YAML), None, None).unwrap();
	assert_eq!(cfg.bind_http.port(), 8080);
	assert_eq!(cfg.bind_https.port(), 8443);
	assert_eq!(cfg.log_level, "debug");
	assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/edgegate"));
	assert_eq!(cfg.cache.mru_size, 50);
	assert_eq!(cfg.cache.max_age_seconds, 120);
	assert!(cfg.global_csp.is_some());

	let acme = cfg.acme.as_ref().expect("letsencrypt configured");
	assert_eq!(acme.email, "ops@example.com");
	assert!(acme.staging);

	assert_eq!(cfg.pid_dir, Some(PathBuf::from("/var/run/edgegate")));
	assert_eq!(cfg.logs_dir, PathBuf::from("/var/log/edgegate"));
	assert_eq!(cfg.processes.len(), 1);
	let proc = &cfg.processes[0];
	assert_eq!(proc.id, "w1");
	assert!(proc.restart_on_exit);
	assert_eq!(proc.health_check.as_ref().unwrap().retries, 2);
	assert_eq!(
		proc.schedule.as_ref().unwrap().timezone.as_deref(),
		Some("America/Los_Angeles")
	);

	let table = cfg.route_table().unwrap();
	let (route, remainder) = table.lookup("a.test", "/api/users").unwrap();
	assert_eq!(route.name, "api");
	assert_eq!(remainder, "/users");
	assert!(route.ssl);
	assert_eq!(table.ssl_hosts(), vec!["a.test".to_string()]);
}

#[test]
fn defaults_applied() {
	let cfg = parse_config("routes: []", None, None, None).unwrap();
	assert_eq!(cfg.bind_http.port(), DEFAULT_HTTP_PORT);
	assert_eq!(cfg.bind_https.port(), DEFAULT_HTTPS_PORT);
	assert_eq!(cfg.upstream_timeout, DEFAULT_UPSTREAM_TIMEOUT);
	assert_eq!(cfg.cache.mru_size, 100);
	assert!(cfg.acme.is_none());
	assert!(cfg.processes.is_empty());
}

#[test]
fn invalid_route_is_fatal() {
	let yaml = r#"
routes:
  - name: broken
    host: a.test
    kind: proxy
"#;
	assert!(parse_config(yaml, None, None, None).is_err());
}

#[test]
fn unknown_fields_rejected() {
	let yaml = r#"
routes: []
nonsense: true
"#;
	assert!(parse_config(yaml, None, None, None).is_err());
}

#[test]
fn empty_to_none_filters_blanks() {
	assert_eq!(empty_to_none(Some("")), None);
	assert_eq!(empty_to_none(Some("x")), Some("x"));
	assert_eq!(empty_to_none::<&str>(None), None);
}
