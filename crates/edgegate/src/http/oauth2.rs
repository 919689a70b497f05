use std::collections::HashMap;

use ::http::{HeaderValue, StatusCode};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::session::{AuthState, Oauth2Session, SessionStore};
use crate::http::{Body, HeaderMap, Response, get_cookie, header, json_error};
use crate::*;

#[cfg(test)]
#[path = "oauth2_test.rs"]
mod tests;

/// Query parameter names the authorize URL always owns; additional configured
/// params that would collide with these are dropped.
const STANDARD_PARAMS: &[&str] = &[
	"response_type",
	"client_id",
	"redirect_uri",
	"scope",
	"state",
	"code_challenge",
	"code_challenge_method",
];

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubscriptionKey {
	pub header: String,
	pub value: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OAuth2Serde {
	pub provider: String,
	pub client_id: String,
	#[serde(default)]
	pub client_secret: Option<String>,
	pub authorization_endpoint: String,
	pub token_endpoint: String,
	#[serde(default)]
	pub callback_path: Option<String>,
	#[serde(default)]
	pub logout_path: Option<String>,
	#[serde(default)]
	pub scopes: Vec<String>,
	#[serde(default)]
	pub pkce: bool,
	#[serde(default)]
	pub base_url: Option<String>,
	#[serde(default)]
	pub additional_params: HashMap<String, String>,
	#[serde(default)]
	pub subscription_key: Option<SubscriptionKey>,
}

/// Compiled authorization-code + PKCE policy for one route.
#[derive(Debug, Clone)]
pub struct OAuth2 {
	pub provider: String,
	pub client_id: String,
	pub client_secret: Option<String>,
	pub authorization_endpoint: Url,
	pub token_endpoint: Url,
	pub callback_path: String,
	pub logout_path: String,
	pub scopes: Vec<String>,
	pub pkce: bool,
	pub base_url: Option<String>,
	pub additional_params: Vec<(String, String)>,
	pub subscription_key: Option<SubscriptionKey>,
	/// `oauth2_<provider>_<routeTag>_<8-hex-of-sha256(clientId)>`; two routes
	/// with distinct credentials never share a cookie.
	pub cookie_name: String,
	/// Absolute redirect URI registered with the provider.
	pub redirect_uri: String,
	route: String,
}

impl OAuth2 {
	pub fn compile(raw: OAuth2Serde, route: &str, host: &str, ssl: bool) -> anyhow::Result<OAuth2> {
		let callback_path = raw
			.callback_path
			.unwrap_or_else(|| "/oauth2/callback".to_string());
		let scheme = if ssl { "https" } else { "http" };
		let digest = hex::encode(Sha256::digest(raw.client_id.as_bytes()));
		Ok(OAuth2 {
			cookie_name: format!("oauth2_{}_{}_{}", raw.provider, route, &digest[..8]),
			redirect_uri: format!("{scheme}://{host}{callback_path}"),
			provider: raw.provider,
			client_id: raw.client_id,
			client_secret: raw.client_secret,
			authorization_endpoint: Url::parse(&raw.authorization_endpoint)?,
			token_endpoint: Url::parse(&raw.token_endpoint)?,
			callback_path,
			logout_path: raw
				.logout_path
				.unwrap_or_else(|| "/oauth2/logout".to_string()),
			scopes: raw.scopes,
			pkce: raw.pkce,
			base_url: raw.base_url,
			additional_params: raw.additional_params.into_iter().collect(),
			subscription_key: raw.subscription_key,
			route: route.to_string(),
		})
	}

	pub fn authorize_url(&self, state: &str, code_challenge: Option<&str>) -> Url {
		let mut url = self.authorization_endpoint.clone();
		{
			let mut q = url.query_pairs_mut();
			q.append_pair("response_type", "code");
			q.append_pair("client_id", &self.client_id);
			q.append_pair("redirect_uri", &self.redirect_uri);
			if !self.scopes.is_empty() {
				q.append_pair("scope", &self.scopes.join(" "));
			}
			q.append_pair("state", state);
			if let Some(challenge) = code_challenge {
				q.append_pair("code_challenge", challenge);
				q.append_pair("code_challenge_method", "S256");
			}
			for (k, v) in &self.additional_params {
				if STANDARD_PARAMS.contains(&k.as_str()) {
					continue;
				}
				q.append_pair(k, v);
			}
		}
		url
	}

	/// Exchange an authorization code for tokens.
	pub async fn exchange_code(
		&self,
		client: &reqwest::Client,
		code: &str,
		code_verifier: Option<&str>,
	) -> anyhow::Result<Oauth2Session> {
		let mut form: Vec<(&str, &str)> = vec![
			("grant_type", "authorization_code"),
			("code", code),
			("redirect_uri", &self.redirect_uri),
			("client_id", &self.client_id),
		];
		if let Some(secret) = &self.client_secret {
			form.push(("client_secret", secret));
		}
		if let Some(verifier) = code_verifier {
			form.push(("code_verifier", verifier));
		}
		self.token_request(client, &form).await
	}

	/// Refresh an expired session with its refresh token.
	pub async fn refresh(
		&self,
		client: &reqwest::Client,
		refresh_token: &str,
	) -> anyhow::Result<Oauth2Session> {
		let mut form: Vec<(&str, &str)> = vec![
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token),
			("client_id", &self.client_id),
		];
		if let Some(secret) = &self.client_secret {
			form.push(("client_secret", secret));
		}
		self.token_request(client, &form).await
	}

	async fn token_request(
		&self,
		client: &reqwest::Client,
		form: &[(&str, &str)],
	) -> anyhow::Result<Oauth2Session> {
		let resp = client
			.post(self.token_endpoint.clone())
			.header(header::ACCEPT, "application/json")
			.form(form)
			.send()
			.await
			.context("token endpoint unreachable")?;
		let status = resp.status();
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			anyhow::bail!("token endpoint returned {status}: {body}");
		}
		let token: TokenResponse = resp.json().await.context("invalid token response")?;
		Ok(Oauth2Session {
			access_token: token.access_token,
			refresh_token: token.refresh_token,
			token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
			scope: token.scope,
			expires_at: token
				.expires_in
				.map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64)),
		})
	}
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	scope: Option<String>,
	#[serde(default)]
	expires_in: Option<u64>,
}

pub fn mint_state() -> String {
	let mut bytes = [0u8; 16];
	rand::rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

pub fn mint_session_id() -> String {
	let mut bytes = [0u8; 16];
	rand::rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

/// 32-byte verifier, base64url without padding (RFC 7636 §4.1).
pub fn pkce_verifier() -> String {
	let mut bytes = [0u8; 32];
	rand::rng().fill_bytes(&mut bytes);
	URL_SAFE_NO_PAD.encode(bytes)
}

/// S256: base64url(sha256(verifier)).
pub fn pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Outcome of the OAuth2 middleware step.
pub enum Gate {
	/// Continue down the chain, optionally with the authenticated session
	/// (forwarded upstream as `X-OAuth2-*`).
	Pass(Option<Oauth2Session>),
	/// The gate produced the response (redirect, callback result, error).
	Terminal(Box<Response>),
}

/// Run the OAuth2 gate for a protected route.
#[allow(clippy::too_many_arguments)]
pub async fn gate(
	oauth: &OAuth2,
	store: &SessionStore,
	client: &reqwest::Client,
	headers: &HeaderMap,
	path: &str,
	query: Option<&str>,
	public_paths: &[String],
	ssl: bool,
) -> Gate {
	if is_public(path, public_paths) {
		return Gate::Pass(None);
	}

	let session_id = get_cookie(headers, &oauth.cookie_name);

	if path == oauth.callback_path {
		return Gate::Terminal(Box::new(
			handle_callback(oauth, store, client, query, session_id, ssl).await,
		));
	}
	if path == oauth.logout_path {
		if let Some(sid) = &session_id {
			store.remove_session(sid);
		}
		let target = oauth.base_url.as_deref().unwrap_or("/");
		return Gate::Terminal(Box::new(redirect_with_cookie(
			target,
			clear_cookie(&oauth.cookie_name, ssl),
		)));
	}

	if let Some(sid) = &session_id {
		// Hold the raw record first: a refresh needs the token that
		// expiry-eviction discards.
		let expired = store.session_raw(sid).filter(|s| !s.is_valid());
		// Evicts an expired session on access.
		if let Some(session) = store.session(sid) {
			return Gate::Pass(Some(session));
		}
		if let Some(expired) = expired {
			if let Some(refreshed) = try_refresh(oauth, store, client, sid, &expired).await {
				return Gate::Pass(Some(refreshed));
			}
		}
	}

	// No valid session: start the authorization round-trip.
	let state = mint_state();
	let (verifier, challenge) = if oauth.pkce {
		let v = pkce_verifier();
		let c = pkce_challenge(&v);
		(Some(v), Some(c))
	} else {
		(None, None)
	};
	store.put_state(
		state.clone(),
		AuthState {
			route: oauth.route.clone(),
			code_verifier: verifier,
			created_at: Instant::now(),
		},
	);
	let authorize = oauth.authorize_url(&state, challenge.as_deref());

	if wants_json(headers) {
		let body = serde_json::json!({
			"error": "auth_required",
			"message": "authentication required",
			"authorizeUrl": authorize.as_str(),
		});
		let resp = ::http::Response::builder()
			.status(StatusCode::UNAUTHORIZED)
			.header(header::CONTENT_TYPE, "application/json")
			.body(Body::from(body.to_string()))
			.expect("static response must build");
		return Gate::Terminal(Box::new(resp));
	}
	Gate::Terminal(Box::new(redirect(authorize.as_str())))
}

async fn handle_callback(
	oauth: &OAuth2,
	store: &SessionStore,
	client: &reqwest::Client,
	query: Option<&str>,
	session_id: Option<String>,
	ssl: bool,
) -> Response {
	let params: HashMap<String, String> = query
		.map(|q| {
			url::form_urlencoded::parse(q.as_bytes())
				.into_owned()
				.collect()
		})
		.unwrap_or_default();

	if let Some(err) = params.get("error") {
		let description = params
			.get("error_description")
			.map(String::as_str)
			.unwrap_or("");
		warn!(provider = %oauth.provider, error = %err, "authorization failed at provider");
		let mut resp = error_page(
			StatusCode::BAD_REQUEST,
			&format!("Authorization failed: {err} {description}"),
		);
		resp.headers_mut().append(
			header::SET_COOKIE,
			clear_cookie(&oauth.cookie_name, ssl),
		);
		return resp;
	}

	let (Some(code), Some(state)) = (params.get("code"), params.get("state")) else {
		return error_page(StatusCode::BAD_REQUEST, "Missing code or state");
	};

	let Some(auth_state) = store.take_state(state) else {
		return error_page(StatusCode::BAD_REQUEST, "Unknown or expired authorization state");
	};

	match oauth
		.exchange_code(client, code, auth_state.code_verifier.as_deref())
		.await
	{
		Ok(session) => {
			let sid = session_id.unwrap_or_else(mint_session_id);
			store.put_session(sid.clone(), session);
			let target = oauth.base_url.as_deref().unwrap_or("/");
			let cookie = format!(
				"{}={}; Path=/; HttpOnly; SameSite=Lax{}",
				oauth.cookie_name,
				sid,
				if ssl { "; Secure" } else { "" }
			);
			redirect_with_cookie(
				target,
				HeaderValue::from_str(&cookie).expect("cookie value must be valid"),
			)
		},
		Err(e) => {
			warn!(provider = %oauth.provider, "token exchange failed: {e:#}");
			json_error(
				StatusCode::BAD_GATEWAY,
				"token_exchange_failed",
				"could not exchange authorization code",
			)
		},
	}
}

/// Try to refresh an expired-but-refreshable session in place.
pub async fn try_refresh(
	oauth: &OAuth2,
	store: &SessionStore,
	client: &reqwest::Client,
	session_id: &str,
	expired: &Oauth2Session,
) -> Option<Oauth2Session> {
	let refresh_token = expired.refresh_token.as_deref()?;
	match oauth.refresh(client, refresh_token).await {
		Ok(session) => {
			store.put_session(session_id.to_string(), session.clone());
			Some(session)
		},
		Err(e) => {
			debug!(provider = %oauth.provider, "session refresh failed: {e:#}");
			store.remove_session(session_id);
			None
		},
	}
}

fn is_public(path: &str, public_paths: &[String]) -> bool {
	public_paths
		.iter()
		.any(|p| path == p || (p.ends_with('/') && path.starts_with(p.as_str())))
}

fn wants_json(headers: &HeaderMap) -> bool {
	headers
		.get(header::ACCEPT)
		.and_then(|h| h.to_str().ok())
		.map(|accept| accept.contains("application/json") && !accept.contains("text/html"))
		.unwrap_or(false)
}

fn redirect(location: &str) -> Response {
	::http::Response::builder()
		.status(StatusCode::FOUND)
		.header(header::LOCATION, location)
		.body(Body::empty())
		.expect("static response must build")
}

fn redirect_with_cookie(location: &str, cookie: HeaderValue) -> Response {
	let mut resp = redirect(location);
	resp.headers_mut().append(header::SET_COOKIE, cookie);
	resp
}

fn clear_cookie(name: &str, ssl: bool) -> HeaderValue {
	let value = format!(
		"{}=; Path=/; HttpOnly; Max-Age=0{}",
		name,
		if ssl { "; Secure" } else { "" }
	);
	HeaderValue::from_str(&value).expect("cookie value must be valid")
}

fn error_page(status: StatusCode, message: &str) -> Response {
	let body = format!(
		"<!doctype html><html><head><title>Authentication error</title></head>\
		 <body><h1>Authentication error</h1><p>{message}</p></body></html>"
	);
	::http::Response::builder()
		.status(status)
		.header(header::CONTENT_TYPE, "text/html; charset=utf-8")
		.body(Body::from(body))
		.expect("static response must build")
}
