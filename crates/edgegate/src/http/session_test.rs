use chrono::Utc;

use super::*;

fn session(expires_at: Option<chrono::DateTime<Utc>>) -> Oauth2Session {
	Oauth2Session {
		access_token: "tok".to_string(),
		refresh_token: None,
		token_type: "Bearer".to_string(),
		scope: None,
		expires_at,
	}
}

#[test]
fn valid_session_round_trips() {
	let store = SessionStore::new();
	store.put_session("sid".into(), session(None));
	assert!(store.session("sid").is_some());
}

#[test]
fn expired_session_evicted_on_access() {
	let store = SessionStore::new();
	store.put_session(
		"sid".into(),
		session(Some(Utc::now() - chrono::Duration::seconds(5))),
	);
	assert!(store.session("sid").is_none());
	// Evicted, not merely filtered.
	assert!(store.session_raw("sid").is_none());
}

#[test]
fn state_is_use_once() {
	let store = SessionStore::new();
	store.put_state(
		"st1".into(),
		AuthState {
			route: "r".into(),
			code_verifier: Some("v".into()),
			created_at: Instant::now(),
		},
	);
	let first = store.take_state("st1");
	assert!(first.is_some());
	assert_eq!(first.unwrap().code_verifier.as_deref(), Some("v"));
	assert!(store.take_state("st1").is_none());
}

#[test]
fn stale_state_discarded() {
	let store = SessionStore::new();
	let old = Instant::now()
		.checked_sub(STATE_TTL + Duration::from_secs(1))
		.expect("clock far enough from boot");
	store.put_state(
		"st2".into(),
		AuthState {
			route: "r".into(),
			code_verifier: None,
			created_at: old,
		},
	);
	assert!(store.take_state("st2").is_none());
}

#[test]
fn sweep_drops_expired_entries() {
	let store = SessionStore::new();
	store.put_session(
		"dead".into(),
		session(Some(Utc::now() - chrono::Duration::seconds(5))),
	);
	store.put_session("live".into(), session(None));
	store.sweep();
	assert!(store.session_raw("dead").is_none());
	assert!(store.session_raw("live").is_some());
}
