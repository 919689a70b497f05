use ::http::header;
use futures_util::{SinkExt, StreamExt};
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message, Role};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use crate::http::{Body, HeaderValue, Request, Response, StatusCode};
use crate::proxy::ProxyError;
use crate::proxy::handler::upstream_url;
use crate::types::route::Route;
use crate::*;

type UpstreamWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebsocketSerde {
	#[serde(default)]
	pub max_retries: Option<u32>,
	#[serde(default)]
	pub retry_delay_seconds: Option<u64>,
	#[serde(default)]
	pub ping_interval_seconds: Option<u64>,
	#[serde(default)]
	pub connection_timeout_seconds: Option<u64>,
}

/// Frame-aware WebSocket proxying policy for a route.
#[derive(Debug, Clone)]
pub struct WebsocketPolicy {
	pub max_retries: u32,
	pub retry_delay: Duration,
	/// Zero disables keepalive pings.
	pub ping_interval: Duration,
	pub connection_timeout: Duration,
}

impl From<WebsocketSerde> for WebsocketPolicy {
	fn from(raw: WebsocketSerde) -> Self {
		WebsocketPolicy {
			max_retries: raw.max_retries.unwrap_or(3),
			retry_delay: Duration::from_secs(raw.retry_delay_seconds.unwrap_or(1)),
			ping_interval: Duration::from_secs(raw.ping_interval_seconds.unwrap_or(0)),
			connection_timeout: Duration::from_secs(raw.connection_timeout_seconds.unwrap_or(30)),
		}
	}
}

fn ws_url(upstream: &Url) -> Result<Url, ProxyError> {
	let mut url = upstream.clone();
	let scheme = match url.scheme() {
		"http" | "ws" => "ws",
		"https" | "wss" => "wss",
		other => {
			return Err(ProxyError::ConfigInvalid(format!(
				"websocket upstream with scheme {other:?}"
			)));
		},
	};
	url
		.set_scheme(scheme)
		.map_err(|_| ProxyError::ConfigInvalid("invalid websocket upstream".into()))?;
	Ok(url)
}

async fn connect_upstream(
	url: &Url,
	req_headers: &::http::HeaderMap,
	policy: &WebsocketPolicy,
) -> Result<UpstreamWs, ProxyError> {
	let mut request = url
		.as_str()
		.into_client_request()
		.map_err(|e| ProxyError::UpgradeFailed(e.to_string()))?;
	// Carry credentials and subprotocol negotiation through to the upstream.
	for name in [
		header::AUTHORIZATION,
		header::COOKIE,
		header::SEC_WEBSOCKET_PROTOCOL,
	] {
		if let Some(v) = req_headers.get(&name) {
			request.headers_mut().insert(name, v.clone());
		}
	}

	let connect = connect_async(request);
	match tokio::time::timeout(policy.connection_timeout, connect).await {
		Ok(Ok((ws, _resp))) => Ok(ws),
		Ok(Err(e)) => Err(ProxyError::UpstreamUnreachable(e.to_string())),
		Err(_) => Err(ProxyError::RequestTimeout),
	}
}

/// Upgrade the client connection and relay frames to the upstream WebSocket,
/// reconnecting on abnormal upstream closures.
pub(crate) async fn proxy_upgrade(
	route: &Route,
	policy: &WebsocketPolicy,
	mut req: Request,
	remainder: &str,
	log: &mut super::handler::RequestLog,
) -> Result<Response, ProxyError> {
	let upstream = route
		.upstream
		.as_ref()
		.ok_or_else(|| ProxyError::ConfigInvalid("websocket route without upstream".into()))?;
	let path = req.uri().path().to_string();
	let query = req.uri().query().map(String::from);
	let url = ws_url(upstream)?;
	let url = upstream_url(&url, &path, remainder, &route.rewrite_rules, query.as_deref())?;
	log.target = Some(url.to_string());

	let key = req
		.headers()
		.get(header::SEC_WEBSOCKET_KEY)
		.ok_or_else(|| ProxyError::UpgradeFailed("missing Sec-WebSocket-Key".into()))?
		.clone();
	let client_upgrade = req
		.extensions_mut()
		.remove::<OnUpgrade>()
		.ok_or_else(|| ProxyError::UpgradeFailed("no upgrade extension".into()))?;

	// Open the upstream leg first so a dead upstream turns into a proper
	// error response instead of a half-open client socket.
	let upstream_ws = connect_upstream(&url, req.headers(), policy).await?;

	let accept = derive_accept_key(key.as_bytes());
	let resp = ::http::Response::builder()
		.status(StatusCode::SWITCHING_PROTOCOLS)
		.header(header::CONNECTION, "Upgrade")
		.header(header::UPGRADE, "websocket")
		.header(
			header::SEC_WEBSOCKET_ACCEPT,
			HeaderValue::from_str(&accept).map_err(|e| ProxyError::UpgradeFailed(e.to_string()))?,
		)
		.body(Body::empty())
		.map_err(|e| ProxyError::Processing(e.into()))?;

	let policy = policy.clone();
	let req_headers = req.headers().clone();
	tokio::spawn(async move {
		let upgraded = match client_upgrade.await {
			Ok(io) => io,
			Err(e) => {
				warn!("client websocket upgrade failed: {e}");
				return;
			},
		};
		let client_ws =
			WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
		relay(client_ws, upstream_ws, url, req_headers, policy).await;
	});
	Ok(resp)
}

/// A 1000 (normal) close from upstream ends the relay; anything else is an
/// abnormal closure that the reconnect policy applies to.
fn is_normal_close(frame: &Option<CloseFrame>) -> bool {
	matches!(
		frame,
		Some(CloseFrame {
			code: CloseCode::Normal,
			..
		})
	)
}

async fn relay(
	client: WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>,
	upstream: UpstreamWs,
	url: Url,
	req_headers: ::http::HeaderMap,
	policy: WebsocketPolicy,
) {
	let (mut client_tx, mut client_rx) = client.split();
	let mut upstream_ws = upstream;
	let mut retries = 0u32;

	// A zero ping interval disables the keepalive timer entirely.
	let ping_period = if policy.ping_interval.is_zero() {
		Duration::from_secs(3600 * 24 * 365)
	} else {
		policy.ping_interval
	};
	let mut ping = tokio::time::interval(ping_period);
	ping.tick().await;

	loop {
		let (mut upstream_tx, mut upstream_rx) = upstream_ws.split();
		// Pump frames until the upstream leg needs re-establishing; client
		// disconnect ends the relay outright.
		'pump: loop {
			tokio::select! {
				msg = client_rx.next() => {
					match msg {
						Some(Ok(m)) => {
							if m.is_close() {
								let _ = upstream_tx.send(m).await;
								return;
							}
							if upstream_tx.send(m).await.is_err() {
								break 'pump;
							}
						},
						// Client went away: cancellation, close the upstream leg.
						Some(Err(_)) | None => {
							let _ = upstream_tx.send(Message::Close(None)).await;
							return;
						},
					}
				}
				msg = upstream_rx.next() => {
					match msg {
						Some(Ok(Message::Close(frame))) => {
							// A clean shutdown is forwarded and ends the relay;
							// non-1000 closes are re-established transparently.
							if is_normal_close(&frame) {
								let _ = client_tx.send(Message::Close(frame)).await;
								return;
							}
							break 'pump;
						},
						Some(Ok(m)) => {
							if client_tx.send(m).await.is_err() {
								return;
							}
						},
						Some(Err(_)) | None => break 'pump,
					}
				}
				_ = ping.tick() => {
					if !policy.ping_interval.is_zero()
						&& upstream_tx.send(Message::Ping(Bytes::new())).await.is_err()
					{
						break 'pump;
					}
				}
			}
		}

		if retries >= policy.max_retries {
			debug!(url = %url, "websocket upstream gone, retries exhausted");
			let _ = client_tx.send(Message::Close(None)).await;
			return;
		}
		retries += 1;
		tokio::time::sleep(policy.retry_delay).await;
		info!(url = %url, attempt = retries, "reconnecting websocket upstream");
		match connect_upstream(&url, &req_headers, &policy).await {
			Ok(ws) => upstream_ws = ws,
			Err(e) => {
				debug!(url = %url, "websocket reconnect failed: {e}");
				let _ = client_tx.send(Message::Close(None)).await;
				return;
			},
		}
	}
}
