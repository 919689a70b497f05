use chrono::Utc;

use super::*;

fn self_signed(host: &str) -> (String, String) {
	let cert = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
	(cert.cert.pem(), cert.key_pair.serialize_pem())
}

fn expired(host: &str) -> (String, String) {
	let mut params = rcgen::CertificateParams::new(vec![host.to_string()]).unwrap();
	params.not_before = rcgen::date_time_ymd(1999, 1, 1);
	params.not_after = rcgen::date_time_ymd(2000, 1, 1);
	let key = rcgen::KeyPair::generate().unwrap();
	let cert = params.self_signed(&key).unwrap();
	(cert.pem(), key.serialize_pem())
}

#[test]
fn entry_from_pems_parses_validity() {
	let (chain, key) = self_signed("a.test");
	let entry = CertEntry::from_pems(
		"a.test",
		chain.as_bytes(),
		key.as_bytes(),
		PathBuf::from("cert.pem"),
		PathBuf::from("key.pem"),
	)
	.expect("entry builds");
	assert!(entry.is_valid());
	assert!(entry.not_after > Utc::now());
}

#[test]
fn expired_entry_reports_invalid() {
	let (chain, key) = expired("old.test");
	let entry = CertEntry::from_pems(
		"old.test",
		chain.as_bytes(),
		key.as_bytes(),
		PathBuf::from("cert.pem"),
		PathBuf::from("key.pem"),
	)
	.expect("entry builds even when expired");
	assert!(!entry.is_valid());
	assert!(entry.expires_within(chrono::Duration::days(30)));
}

#[test]
fn renewal_window() {
	let (chain, key) = self_signed("a.test");
	let entry = CertEntry::from_pems(
		"a.test",
		chain.as_bytes(),
		key.as_bytes(),
		PathBuf::from("cert.pem"),
		PathBuf::from("key.pem"),
	)
	.unwrap();
	// rcgen's default validity is decades out; nowhere near the window.
	assert!(!entry.expires_within(chrono::Duration::days(30)));
}

/// The leaf presented for a host must carry that host in its DNS names.
#[test]
fn leaf_san_covers_host() {
	let (chain, _) = self_signed("sni.test");
	let ders = parse_cert(chain.as_bytes()).unwrap();
	let (_, cert) = x509_parser::parse_x509_certificate(ders[0].as_ref()).unwrap();
	let san = cert
		.subject_alternative_name()
		.unwrap()
		.expect("has SAN")
		.value;
	let names: Vec<String> = san
		.general_names
		.iter()
		.filter_map(|n| match n {
			x509_parser::extensions::GeneralName::DNSName(d) => Some(d.to_string()),
			_ => None,
		})
		.collect();
	assert!(names.contains(&"sni.test".to_string()));
}

#[test]
fn store_swaps_per_host() {
	let store = CertStore::new();
	let (chain, key) = self_signed("a.test");
	let entry = |p: &str| {
		CertEntry::from_pems(
			"a.test",
			chain.as_bytes(),
			key.as_bytes(),
			PathBuf::from(p),
			PathBuf::from("key.pem"),
		)
		.unwrap()
	};
	store.insert(entry("first.pem"));
	assert_eq!(
		store.get("a.test").unwrap().chain_path,
		PathBuf::from("first.pem")
	);
	// Replacement is atomic per host.
	store.insert(entry("renewed.pem"));
	assert_eq!(
		store.get("a.test").unwrap().chain_path,
		PathBuf::from("renewed.pem")
	);
	assert!(store.get("b.test").is_none());

	store.remove("a.test");
	assert!(store.get("a.test").is_none());
}

#[test]
fn server_config_builds_with_resolver() {
	let store = Arc::new(CertStore::new());
	let cfg = server_config(SniResolver::new(store)).expect("config builds");
	assert!(cfg.alpn_protocols.contains(&b"h2".to_vec()));
}
