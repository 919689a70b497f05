use std::collections::HashMap;

use sha2::{Digest, Sha256};

use super::*;

fn compiled(pkce: bool, additional: HashMap<String, String>) -> OAuth2 {
	OAuth2::compile(
		OAuth2Serde {
			provider: "p".to_string(),
			client_id: "CID".to_string(),
			client_secret: Some("secret".to_string()),
			authorization_endpoint: "https://p.test/authorize".to_string(),
			token_endpoint: "https://p.test/token".to_string(),
			callback_path: None,
			logout_path: None,
			scopes: vec!["openid".to_string(), "profile".to_string()],
			pkce,
			base_url: None,
			additional_params: additional,
			subscription_key: None,
		},
		"dash",
		"a.test",
		true,
	)
	.expect("policy compiles")
}

#[test]
fn cookie_name_derivation() {
	let oauth = compiled(false, HashMap::new());
	let digest = hex::encode(Sha256::digest(b"CID"));
	assert_eq!(oauth.cookie_name, format!("oauth2_p_dash_{}", &digest[..8]));
}

#[test]
fn distinct_credentials_distinct_cookies() {
	let a = compiled(false, HashMap::new());
	let mut serde = OAuth2Serde {
		provider: "p".to_string(),
		client_id: "OTHER".to_string(),
		client_secret: None,
		authorization_endpoint: "https://p.test/authorize".to_string(),
		token_endpoint: "https://p.test/token".to_string(),
		callback_path: None,
		logout_path: None,
		scopes: vec![],
		pkce: false,
		base_url: None,
		additional_params: HashMap::new(),
		subscription_key: None,
	};
	let b = OAuth2::compile(serde.clone(), "dash", "a.test", true).unwrap();
	assert_ne!(a.cookie_name, b.cookie_name);
	serde.client_id = "CID".to_string();
	let c = OAuth2::compile(serde, "dash", "a.test", true).unwrap();
	assert_eq!(a.cookie_name, c.cookie_name);
}

#[test]
fn authorize_url_carries_standard_params() {
	let oauth = compiled(true, HashMap::new());
	let url = oauth.authorize_url("STATE123", Some("CHALLENGE"));
	let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
	assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
	assert_eq!(params.get("client_id").map(String::as_str), Some("CID"));
	assert_eq!(params.get("state").map(String::as_str), Some("STATE123"));
	assert_eq!(params.get("scope").map(String::as_str), Some("openid profile"));
	assert_eq!(params.get("code_challenge").map(String::as_str), Some("CHALLENGE"));
	assert_eq!(params.get("code_challenge_method").map(String::as_str), Some("S256"));
	assert_eq!(
		params.get("redirect_uri").map(String::as_str),
		Some("https://a.test/oauth2/callback")
	);
}

#[test]
fn additional_params_cannot_shadow_standard_ones() {
	let mut extra = HashMap::new();
	extra.insert("audience".to_string(), "api".to_string());
	extra.insert("state".to_string(), "forged".to_string());
	let oauth = compiled(false, extra);
	let url = oauth.authorize_url("REAL", None);
	let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
	assert!(pairs.contains(&("audience".to_string(), "api".to_string())));
	let states: Vec<&str> = pairs
		.iter()
		.filter(|(k, _)| k == "state")
		.map(|(_, v)| v.as_str())
		.collect();
	assert_eq!(states, vec!["REAL"]);
}

/// The verifier sent at token exchange must be the SHA-256/base64url
/// pre-image of the challenge sent at authorize time.
#[test]
fn pkce_challenge_agreement() {
	let verifier = pkce_verifier();
	// 32 bytes, base64url unpadded.
	assert_eq!(verifier.len(), 43);
	assert!(!verifier.contains('='));

	let challenge = pkce_challenge(&verifier);
	let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
	assert_eq!(challenge, expected);
}

#[test]
fn minted_values_are_unique() {
	assert_ne!(mint_state(), mint_state());
	assert_ne!(pkce_verifier(), pkce_verifier());
	assert_ne!(mint_session_id(), mint_session_id());
}

#[test]
fn public_paths_pass() {
	assert!(is_public("/health", &["/health".to_string()]));
	assert!(is_public("/docs/intro", &["/docs/".to_string()]));
	assert!(!is_public("/private", &["/health".to_string()]));
}
