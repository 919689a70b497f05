use ::http::header;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use futures_util::TryStreamExt;
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use regex::Regex;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::cache::{CacheEntry, ResponseCache};
use crate::ext::GeoInfo;
use crate::http::cors::Cors;
use crate::http::oauth2::Gate;
use crate::http::session::Oauth2Session;
use crate::http::{
	Body, HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, csp, get_host,
	oauth2, userid,
};
use crate::proxy::{ProxyError, websocket};
use crate::types::route::{Route, RouteKind};
use crate::*;

#[cfg(test)]
#[path = "handler_test.rs"]
mod tests;

// Hop-by-hop headers, removed in both directions (RFC 7230 §6.1).
static HOP_HEADERS: [HeaderName; 9] = [
	header::CONNECTION,
	HeaderName::from_static("proxy-connection"),
	HeaderName::from_static("keep-alive"),
	header::PROXY_AUTHENTICATE,
	header::PROXY_AUTHORIZATION,
	header::TE,
	header::TRAILER,
	header::TRANSFER_ENCODING,
	header::UPGRADE,
];

/// Response content types eligible for the replace-rules body transform.
const REPLACEABLE_TYPES: [&str; 3] = ["text/html", "application/json", "text/javascript"];

/// Per-request context captured for the statistics sink.
#[derive(Default)]
pub(crate) struct RequestLog {
	pub(crate) client_ip: String,
	pub(crate) geo: Option<GeoInfo>,
	pub(crate) host: String,
	pub(crate) path: String,
	pub(crate) method: String,
	pub(crate) user_agent: Option<String>,
	pub(crate) target: Option<String>,
	pub(crate) kind: &'static str,
}

/// Entry point shared by both listeners.
pub async fn handle(
	inputs: Arc<ProxyInputs>,
	secure: bool,
	peer: SocketAddr,
	req: ::http::Request<Incoming>,
) -> Response {
	let start = Instant::now();
	let mut log = RequestLog {
		method: req.method().to_string(),
		path: req.uri().path().to_string(),
		user_agent: req
			.headers()
			.get(header::USER_AGENT)
			.and_then(|h| h.to_str().ok())
			.map(String::from),
		..Default::default()
	};

	let result = handle_internal(&inputs, secure, peer, req, &mut log).await;
	let resp = result.unwrap_or_else(|err| {
		debug!(host = %log.host, path = %log.path, "request failed: {err}");
		err.into_response()
	});

	inputs.stats.record_request(
		&log.client_ip,
		log.geo.as_ref(),
		&log.path,
		&log.method,
		log.user_agent.as_deref(),
		start.elapsed().as_millis() as u64,
		&log.host,
		log.target.as_deref(),
		log.kind,
	);
	resp
}

async fn handle_internal(
	inputs: &Arc<ProxyInputs>,
	secure: bool,
	peer: SocketAddr,
	req: ::http::Request<Incoming>,
	log: &mut RequestLog,
) -> Result<Response, ProxyError> {
	let req = req.map(Body::new);

	let host = get_host(&req).ok_or(ProxyError::RouteNotFound)?;
	log.host = host.clone();
	let path = req.uri().path().to_string();
	let query = req.uri().query().map(String::from);

	// Route lookup against the snapshot current at request start; a reload
	// mid-flight does not affect this request.
	let table = inputs.routes.load_full();
	let (route, remainder) = table
		.lookup(&host, &path)
		.map(|(r, rem)| (r, rem.to_string()))
		.ok_or(ProxyError::RouteNotFound)?;
	log.kind = route.kind.as_str();

	// Middleware chain, fixed order. Each step may produce the terminal
	// response; none of them touches the request body.
	let client_ip = crate::http::client_ip(req.headers(), Some(peer));
	log.client_ip = client_ip.clone();

	let geo = inputs.geo.lookup(&client_ip);
	log.geo = geo.clone();

	if let Some(filter) = &route.geo_filter {
		if filter.blocks(geo.as_ref()) {
			info!(host = %host, ip = %client_ip, "geo policy denied request");
			return Ok(finish(filter.deny_response(), &route, inputs, None));
		}
	}

	if req.method() == Method::OPTIONS {
		if let Some(cors) = &route.cors {
			return Ok(finish(cors.preflight(req.headers()), &route, inputs, None));
		}
	}

	let mut session = None;
	if let Some(oauth) = &route.oauth2 {
		let gate = oauth2::gate(
			oauth,
			&inputs.sessions,
			&inputs.upstream,
			req.headers(),
			&path,
			query.as_deref(),
			&route.public_paths,
			route.ssl,
		)
		.await;
		match gate {
			Gate::Pass(s) => session = s,
			Gate::Terminal(resp) => return Ok(finish(*resp, &route, inputs, None)),
		}
	}

	let origin = req.headers().get(header::ORIGIN).cloned();

	let resp = match route.kind {
		RouteKind::Proxy => {
			if is_upgrade(req.headers()) {
				if let Some(ws) = &route.websocket {
					websocket::proxy_upgrade(&route, ws, req, &remainder, log).await?
				} else {
					tunnel_upgrade(inputs, &route, req, &remainder, &client_ip, &host, secure, log).await?
				}
			} else {
				proxy_request(
					inputs, &route, req, &remainder, &path, &client_ip, &host, secure, &session, log,
				)
				.await?
			}
		},
		RouteKind::CorsForwarder => {
			forwarder(
				inputs,
				&route,
				req,
				query.as_deref(),
				&client_ip,
				&host,
				secure,
				log,
			)
			.await?
		},
		RouteKind::Static => static_file(&route, &remainder, &path).await?,
		RouteKind::Redirect => redirect(&route, &remainder, query.as_deref())?,
	};

	Ok(finish(resp, &route, inputs, origin.as_ref()))
}

/// Final response decoration: the CORS overlay for actual requests and the
/// CSP header planned in the middleware chain.
fn finish(
	mut resp: Response,
	route: &Route,
	inputs: &Arc<ProxyInputs>,
	origin: Option<&HeaderValue>,
) -> Response {
	if route.kind != RouteKind::CorsForwarder {
		if let (Some(cors), Some(origin)) = (&route.cors, origin) {
			cors.apply(Some(origin), resp.headers_mut());
		}
	}
	if let Some(csp) = csp::effective(route.csp.as_ref(), inputs.cfg.global_csp.as_ref()) {
		csp.apply(resp.headers_mut());
	}
	resp
}

fn is_upgrade(headers: &HeaderMap) -> bool {
	headers
		.get(header::CONNECTION)
		.and_then(|h| h.to_str().ok())
		.map(|c| c.to_ascii_lowercase().contains("upgrade"))
		.unwrap_or(false)
		&& headers.contains_key(header::UPGRADE)
}

/// First-match path rewrite: the first rule whose pattern matches the path
/// wins; later rules never apply. `None` means no rule matched.
pub fn rewrite_path(path: &str, rules: &[(Regex, String)]) -> Option<String> {
	for (pattern, replacement) in rules {
		if pattern.is_match(path) {
			return Some(pattern.replace(path, replacement.as_str()).into_owned());
		}
	}
	None
}

/// Target URL for the reverse proxy: upstream base joined with the rewritten
/// path (or the prefix-stripped remainder when no rewrite matched), original
/// query preserved.
pub fn upstream_url(
	upstream: &Url,
	path: &str,
	remainder: &str,
	rules: &[(Regex, String)],
	query: Option<&str>,
) -> Result<Url, ProxyError> {
	let target_path = rewrite_path(path, rules).unwrap_or_else(|| remainder.to_string());
	let joined = join_paths(upstream.path(), &target_path);
	let mut url = upstream.clone();
	url.set_path(&joined);
	url.set_query(query);
	Ok(url)
}

fn join_paths(base: &str, rest: &str) -> String {
	let base = base.trim_end_matches('/');
	let rest = rest.trim_start_matches('/');
	if rest.is_empty() {
		if base.is_empty() {
			"/".to_string()
		} else {
			base.to_string()
		}
	} else {
		format!("{base}/{rest}")
	}
}

/// Request headers forwarded upstream: everything except `Host` and the
/// hop-by-hop set, plus the forwarding triple, the route's header overlay and
/// the OAuth2 session headers.
#[allow(clippy::too_many_arguments)]
fn upstream_headers(
	route: &Route,
	req_headers: &HeaderMap,
	client_ip: &str,
	host: &str,
	secure: bool,
	session: &Option<Oauth2Session>,
) -> HeaderMap {
	let mut headers = req_headers.clone();
	headers.remove(header::HOST);
	for h in HOP_HEADERS.iter() {
		headers.remove(h);
	}

	let xff = match req_headers
		.get("x-forwarded-for")
		.and_then(|h| h.to_str().ok())
	{
		Some(existing) => format!("{existing}, {client_ip}"),
		None => client_ip.to_string(),
	};
	if let Ok(v) = HeaderValue::from_str(&xff) {
		headers.insert("x-forwarded-for", v);
	}
	headers.insert(
		"x-forwarded-proto",
		HeaderValue::from_static(if secure { "https" } else { "http" }),
	);
	if let Ok(v) = HeaderValue::from_str(host) {
		headers.insert("x-forwarded-host", v);
	}

	for (name, value) in &route.header_overlay {
		headers.insert(name.clone(), value.clone());
	}

	if let Some(session) = session {
		if let Ok(v) = HeaderValue::from_str(&session.access_token) {
			headers.insert("x-oauth2-access-token", v);
		}
		if let Ok(v) = HeaderValue::from_str(&session.token_type) {
			headers.insert("x-oauth2-token-type", v);
		}
		if let Some(scope) = &session.scope {
			if let Ok(v) = HeaderValue::from_str(scope) {
				headers.insert("x-oauth2-scope", v);
			}
		}
		if let Some(expires) = &session.expires_at {
			if let Ok(v) = HeaderValue::from_str(&expires.to_rfc3339()) {
				headers.insert("x-oauth2-expires-at", v);
			}
		}
	}
	if let Some(sub) = route.oauth2.as_ref().and_then(|o| o.subscription_key.as_ref()) {
		if let (Ok(name), Ok(value)) = (
			HeaderName::from_bytes(sub.header.as_bytes()),
			HeaderValue::from_str(&sub.value),
		) {
			headers.insert(name, value);
		}
	}
	headers
}

fn map_upstream_error(e: reqwest::Error) -> ProxyError {
	if e.is_timeout() {
		ProxyError::RequestTimeout
	} else {
		ProxyError::UpstreamUnreachable(e.to_string())
	}
}

/// Send a request upstream and wait for the response head, bounded by the
/// per-request deadline. The body keeps streaming past the deadline.
async fn send_upstream(
	inputs: &Arc<ProxyInputs>,
	method: Method,
	url: Url,
	headers: HeaderMap,
	body: Body,
) -> Result<reqwest::Response, ProxyError> {
	let request = inputs
		.upstream
		.request(method, url)
		.headers(headers)
		.body(reqwest::Body::wrap_stream(body.into_data_stream()));
	match tokio::time::timeout(inputs.cfg.upstream_timeout, request.send()).await {
		Ok(Ok(resp)) => Ok(resp),
		Ok(Err(e)) => Err(map_upstream_error(e)),
		Err(_) => Err(ProxyError::RequestTimeout),
	}
}

fn response_headers(upstream: &reqwest::Response) -> HeaderMap {
	let mut headers = upstream.headers().clone();
	for h in HOP_HEADERS.iter() {
		headers.remove(h);
	}
	headers
}

fn build_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
	let mut resp = ::http::Response::new(body);
	*resp.status_mut() = status;
	*resp.headers_mut() = headers;
	resp
}

/// §reverse proxy: rewrite, forward, stream back. Response bodies are
/// streamed verbatim except for the replace-rules transform and on-demand PDF
/// conversion, both of which need the whole payload.
#[allow(clippy::too_many_arguments)]
async fn proxy_request(
	inputs: &Arc<ProxyInputs>,
	route: &Route,
	req: Request,
	remainder: &str,
	path: &str,
	client_ip: &str,
	host: &str,
	secure: bool,
	session: &Option<Oauth2Session>,
	log: &mut RequestLog,
) -> Result<Response, ProxyError> {
	let upstream = route
		.upstream
		.as_ref()
		.ok_or_else(|| ProxyError::ConfigInvalid("proxy route without upstream".into()))?;
	let query = req.uri().query();
	let url = upstream_url(upstream, path, remainder, &route.rewrite_rules, query)?;
	log.target = Some(url.to_string());

	let method = req.method().clone();
	let headers = upstream_headers(route, req.headers(), client_ip, host, secure, session);
	let convert = query_param(query, "convert");
	let resp = send_upstream(inputs, method, url, headers, req.into_body()).await?;

	// Upstream errors (non-2xx statuses) are forwarded verbatim.
	let status = resp.status();
	let mut headers = response_headers(&resp);
	match transform_body(inputs, route, convert.as_deref(), &mut headers, resp).await? {
		UpstreamBody::Buffered(raw) => Ok(build_response(status, headers, Body::from(raw))),
		UpstreamBody::Streamed(resp) => Ok(build_response(
			status,
			headers,
			Body::from_stream(resp.bytes_stream()),
		)),
	}
}

/// An upstream response body after the transform step: buffered when a
/// transform had to consume it, streamed through otherwise.
enum UpstreamBody {
	Buffered(Bytes),
	Streamed(reqwest::Response),
}

/// Response-body handling shared by the proxy and CORS-forwarder handlers:
/// the replace-rules transform for eligible content types and on-demand PDF
/// conversion, both of which need the whole payload; anything else streams.
async fn transform_body(
	inputs: &Arc<ProxyInputs>,
	route: &Route,
	convert: Option<&str>,
	headers: &mut HeaderMap,
	resp: reqwest::Response,
) -> Result<UpstreamBody, ProxyError> {
	let content_type = headers
		.get(header::CONTENT_TYPE)
		.and_then(|h| h.to_str().ok())
		.map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string())
		.unwrap_or_default();

	if !route.replace_rules.is_empty() && REPLACEABLE_TYPES.contains(&content_type.as_str()) {
		let raw = resp.bytes().await.map_err(map_upstream_error)?;
		let mut text = String::from_utf8_lossy(&raw).into_owned();
		for (pattern, replacement) in &route.replace_rules {
			text = pattern.replace_all(&text, replacement.as_str()).into_owned();
		}
		headers.remove(header::CONTENT_LENGTH);
		return Ok(UpstreamBody::Buffered(Bytes::from(text)));
	}

	if content_type == "application/pdf" {
		if let Some(format) = convert {
			let raw = resp.bytes().await.map_err(map_upstream_error)?;
			let (converted, new_type) = inputs
				.pdf
				.convert(raw, &content_type, format, None, None)
				.await
				.map_err(ProxyError::Processing)?;
			headers.remove(header::CONTENT_LENGTH);
			if let Ok(v) = HeaderValue::from_str(&new_type) {
				headers.insert(header::CONTENT_TYPE, v);
			}
			return Ok(UpstreamBody::Buffered(converted));
		}
	}

	Ok(UpstreamBody::Streamed(resp))
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
	let query = query?;
	url::form_urlencoded::parse(query.as_bytes())
		.find(|(k, _)| k == name)
		.map(|(_, v)| v.into_owned())
}

/// Raw byte tunnel for generic HTTP upgrades on proxy routes without a
/// frame-aware WebSocket policy.
#[allow(clippy::too_many_arguments)]
async fn tunnel_upgrade(
	inputs: &Arc<ProxyInputs>,
	route: &Route,
	mut req: Request,
	remainder: &str,
	client_ip: &str,
	host: &str,
	secure: bool,
	log: &mut RequestLog,
) -> Result<Response, ProxyError> {
	let upstream = route
		.upstream
		.as_ref()
		.ok_or_else(|| ProxyError::ConfigInvalid("proxy route without upstream".into()))?;
	let path = req.uri().path().to_string();
	let query = req.uri().query().map(String::from);
	let url = upstream_url(
		upstream,
		&path,
		remainder,
		&route.rewrite_rules,
		query.as_deref(),
	)?;
	log.target = Some(url.to_string());

	let client_upgrade = req
		.extensions_mut()
		.remove::<OnUpgrade>()
		.ok_or_else(|| ProxyError::UpgradeFailed("no upgrade extension".into()))?;

	// Keep the upgrade-relevant headers that upstream_headers strips.
	let upgrade_header = req.headers().get(header::UPGRADE).cloned();
	let mut headers = upstream_headers(route, req.headers(), client_ip, host, secure, &None);
	if let Some(u) = &upgrade_header {
		headers.insert(header::UPGRADE, u.clone());
		headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
	}

	let upstream_resp = inputs
		.upstream
		.request(req.method().clone(), url)
		.headers(headers)
		.version(::http::Version::HTTP_11)
		.send()
		.await
		.map_err(map_upstream_error)?;

	if upstream_resp.status() != StatusCode::SWITCHING_PROTOCOLS {
		// Upstream declined the upgrade; forward its answer verbatim.
		let status = upstream_resp.status();
		let headers = response_headers(&upstream_resp);
		return Ok(build_response(
			status,
			headers,
			Body::from_stream(upstream_resp.bytes_stream()),
		));
	}

	let mut resp = ::http::Response::new(Body::empty());
	*resp.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
	*resp.headers_mut() = upstream_resp.headers().clone();

	tokio::spawn(async move {
		let upstream_io = match upstream_resp.upgrade().await {
			Ok(io) => io,
			Err(e) => {
				warn!("upstream upgrade failed: {e}");
				return;
			},
		};
		let client_io = match client_upgrade.await {
			Ok(io) => io,
			Err(e) => {
				warn!("client upgrade failed: {e}");
				return;
			},
		};
		let mut client_io = TokioIo::new(client_io);
		let mut upstream_io = upstream_io;
		if let Err(e) = tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
			debug!("upgrade tunnel closed: {e}");
		}
	});
	Ok(resp)
}

/// §CORS forwarder: proxy to an arbitrary base64-encoded target with cache
/// consultation for GETs and a CORS overlay on every response.
#[allow(clippy::too_many_arguments)]
async fn forwarder(
	inputs: &Arc<ProxyInputs>,
	route: &Route,
	req: Request,
	query: Option<&str>,
	client_ip: &str,
	host: &str,
	secure: bool,
	log: &mut RequestLog,
) -> Result<Response, ProxyError> {
	let target = forwarder_target(query).ok_or(ProxyError::BadForwarderTarget)?;
	log.target = Some(target.to_string());

	let cors = route.cors.clone().unwrap_or_else(Cors::permissive);
	let origin = req.headers().get(header::ORIGIN).cloned();
	let cookie_name = route.oauth2.as_ref().map(|o| o.cookie_name.as_str());
	let user_id = userid::derive(req.headers(), cookie_name).unwrap_or_default();

	let method = req.method().clone();
	let cacheable = method == Method::GET;
	let key = ResponseCache::key(method.as_str(), target.as_str(), &user_id, client_ip);

	if cacheable {
		if let Some(entry) = inputs.cache.get(&key).await {
			debug!(target = %target, "forwarder cache hit");
			let mut resp = cached_response(&entry)?;
			cors.apply(origin.as_ref(), resp.headers_mut());
			return Ok(resp);
		}
	}

	let convert = query_param(query, "convert");
	let headers = upstream_headers(route, req.headers(), client_ip, host, secure, &None);
	let resp = send_upstream(inputs, method, target.clone(), headers, req.into_body()).await?;
	let status = resp.status();
	let mut headers = response_headers(&resp);

	// Same response handling as the proxy (replace rules, PDF conversion);
	// conversion runs before the payload is cached.
	let body = transform_body(inputs, route, convert.as_deref(), &mut headers, resp).await?;
	let mut out = match body {
		UpstreamBody::Streamed(resp) if !(cacheable && status.is_success()) => {
			build_response(status, headers, Body::from_stream(resp.bytes_stream()))
		},
		body => {
			let raw = match body {
				UpstreamBody::Buffered(raw) => raw,
				UpstreamBody::Streamed(resp) => resp.bytes().await.map_err(map_upstream_error)?,
			};
			if cacheable && status.is_success() {
				let entry = CacheEntry {
					status: status.as_u16(),
					headers: headers
						.iter()
						.filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
						.collect(),
					body: raw.clone(),
					content_type: headers
						.get(header::CONTENT_TYPE)
						.and_then(|h| h.to_str().ok())
						.map(String::from),
					user_id: (!user_id.is_empty()).then(|| user_id.clone()),
					user_ip: Some(client_ip.to_string()),
					timestamp: 0,
				};
				inputs.cache.set(&key, entry).await;
			}
			headers.remove(header::CONTENT_LENGTH);
			build_response(status, headers, Body::from(raw))
		},
	};

	cors.apply(origin.as_ref(), out.headers_mut());
	Ok(out)
}

/// Decode the forwarder target from the base64 `url` or `target` query
/// parameter.
fn forwarder_target(query: Option<&str>) -> Option<Url> {
	let encoded = query_param(query, "url").or_else(|| query_param(query, "target"))?;
	let decoded = BASE64
		.decode(encoded.as_bytes())
		.or_else(|_| BASE64_URL.decode(encoded.as_bytes()))
		.ok()?;
	let target = String::from_utf8(decoded).ok()?;
	Url::parse(&target).ok().filter(|u| u.host().is_some())
}

fn cached_response(entry: &CacheEntry) -> Result<Response, ProxyError> {
	let status = StatusCode::from_u16(entry.status)
		.map_err(|e| ProxyError::CacheCorrupt(e.to_string()))?;
	let mut headers = HeaderMap::new();
	for (k, v) in &entry.headers {
		if let (Ok(name), Ok(value)) = (
			HeaderName::from_bytes(k.as_bytes()),
			HeaderValue::from_str(v),
		) {
			headers.insert(name, value);
		}
	}
	headers.remove(header::CONTENT_LENGTH);
	Ok(build_response(status, headers, Body::from(entry.body.clone())))
}

/// §static origin with SPA fallback.
async fn static_file(route: &Route, remainder: &str, path: &str) -> Result<Response, ProxyError> {
	let root = route
		.static_root
		.as_ref()
		.ok_or_else(|| ProxyError::ConfigInvalid("static route without staticRoot".into()))?;

	let rel = remainder.trim_start_matches('/');
	if rel.split('/').any(|seg| seg == "..") {
		return Err(ProxyError::RouteNotFound);
	}

	let mut file = root.join(rel);
	if rel.is_empty() || file.is_dir() {
		file = file.join("index.html");
	}

	if !matches!(tokio::fs::metadata(&file).await.map(|m| m.is_file()), Ok(true)) {
		// Asset requests (dotted names, /api/, /static/) are never rewritten
		// to the SPA entry point.
		let eligible = route.spa_fallback
			&& !path.starts_with("/api/")
			&& !path.starts_with("/static/")
			&& !path.contains('.');
		if !eligible {
			return Err(ProxyError::RouteNotFound);
		}
		file = root.join("index.html");
		if !matches!(tokio::fs::metadata(&file).await.map(|m| m.is_file()), Ok(true)) {
			return Err(ProxyError::RouteNotFound);
		}
	}

	let mime = mime_guess::from_path(&file).first_or_octet_stream();
	let is_html = mime == mime_guess::mime::TEXT_HTML;
	let cache_control = if is_html {
		"public, max-age=300"
	} else {
		"public, max-age=31536000"
	};

	let opened = tokio::fs::File::open(&file)
		.await
		.map_err(|e| ProxyError::Processing(e.into()))?;
	let stream = ReaderStream::new(opened).map_err(axum_core::Error::new);

	let mut resp = ::http::Response::new(Body::from_stream(stream));
	resp.headers_mut().insert(
		header::CONTENT_TYPE,
		HeaderValue::from_str(mime.as_ref()).unwrap_or(HeaderValue::from_static(
			"application/octet-stream",
		)),
	);
	resp.headers_mut().insert(
		header::CACHE_CONTROL,
		HeaderValue::from_static(cache_control),
	);
	Ok(resp)
}

/// §301 redirect with the remainder and query carried over.
fn redirect(route: &Route, remainder: &str, query: Option<&str>) -> Result<Response, ProxyError> {
	let base = route
		.redirect_to
		.as_deref()
		.ok_or_else(|| ProxyError::ConfigInvalid("redirect route without redirectTo".into()))?;
	let mut location = base.trim_end_matches('/').to_string();
	let rest = remainder.trim_start_matches('/');
	if !rest.is_empty() {
		location.push('/');
		location.push_str(rest);
	}
	if let Some(q) = query {
		location.push('?');
		location.push_str(q);
	}
	let resp = ::http::Response::builder()
		.status(StatusCode::MOVED_PERMANENTLY)
		.header(header::LOCATION, location)
		.body(Body::empty())
		.map_err(|e| ProxyError::Processing(e.into()))?;
	Ok(resp)
}
