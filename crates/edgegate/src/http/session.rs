use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::*;

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

/// How long a pending authorization state (and its PKCE verifier) stays valid.
pub const STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Oauth2Session {
	pub access_token: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<String>,
	pub token_type: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<DateTime<Utc>>,
}

impl Oauth2Session {
	pub fn is_valid(&self) -> bool {
		!self.access_token.is_empty()
			&& self.expires_at.map(|e| e > Utc::now()).unwrap_or(true)
	}
}

/// A pending authorization round-trip, keyed by the `state` parameter.
#[derive(Debug, Clone)]
pub struct AuthState {
	pub route: String,
	pub code_verifier: Option<String>,
	pub created_at: Instant,
}

/// OAuth2 session table plus the state/verifier table for in-flight
/// authorization flows. A given id lives in exactly one of the two maps:
/// a successful callback consumes the state entry and creates the session.
#[derive(Default)]
pub struct SessionStore {
	sessions: Mutex<HashMap<String, Oauth2Session>>,
	states: Mutex<HashMap<String, AuthState>>,
}

impl SessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn put_session(&self, id: String, session: Oauth2Session) {
		self.sessions.lock().unwrap().insert(id, session);
	}

	/// The stored session regardless of validity. Used by the refresh path,
	/// which needs the refresh token of an expired session.
	pub fn session_raw(&self, id: &str) -> Option<Oauth2Session> {
		self.sessions.lock().unwrap().get(id).cloned()
	}

	/// Expired sessions are evicted on first access past their deadline.
	pub fn session(&self, id: &str) -> Option<Oauth2Session> {
		let mut sessions = self.sessions.lock().unwrap();
		match sessions.get(id) {
			Some(s) if s.is_valid() => Some(s.clone()),
			Some(_) => {
				sessions.remove(id);
				None
			},
			None => None,
		}
	}

	pub fn remove_session(&self, id: &str) {
		self.sessions.lock().unwrap().remove(id);
	}

	pub fn put_state(&self, state: String, auth: AuthState) {
		self.states.lock().unwrap().insert(state, auth);
	}

	/// Use-once: a state can be taken exactly once, and only within its TTL.
	pub fn take_state(&self, state: &str) -> Option<AuthState> {
		let mut states = self.states.lock().unwrap();
		let auth = states.remove(state)?;
		if auth.created_at.elapsed() > STATE_TTL {
			return None;
		}
		Some(auth)
	}

	/// Drop expired sessions and stale states. Called periodically.
	pub fn sweep(&self) {
		self
			.sessions
			.lock()
			.unwrap()
			.retain(|_, s| s.is_valid());
		self
			.states
			.lock()
			.unwrap()
			.retain(|_, a| a.created_at.elapsed() <= STATE_TTL);
	}

	/// Background sweeper; one per store.
	pub fn run_sweeper(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(Duration::from_secs(60));
			loop {
				tokio::select! {
					_ = tick.tick() => self.sweep(),
					_ = cancel.cancelled() => return,
				}
			}
		});
	}
}
