use std::convert::Infallible;

use futures_util::pin_mut;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::http::{Body, Response, StatusCode, header};
use crate::proxy::handler;
use crate::*;

/// The two listeners. The plaintext side always serves ACME HTTP-01
/// challenges; the TLS side resolves certificates per SNI.
pub struct Gateway {
	inputs: Arc<ProxyInputs>,
	tls: Arc<ServerConfig>,
	cancel: CancellationToken,
	http: TcpListener,
	https: TcpListener,
}

impl Gateway {
	/// Bind both sockets; a bind failure is a startup failure.
	pub async fn bind(
		inputs: Arc<ProxyInputs>,
		tls: Arc<ServerConfig>,
		cancel: CancellationToken,
	) -> anyhow::Result<Gateway> {
		let http = TcpListener::bind(inputs.cfg.bind_http)
			.await
			.with_context(|| format!("bind {}", inputs.cfg.bind_http))?;
		let https = TcpListener::bind(inputs.cfg.bind_https)
			.await
			.with_context(|| format!("bind {}", inputs.cfg.bind_https))?;
		info!(http = %inputs.cfg.bind_http, https = %inputs.cfg.bind_https, "listeners bound");
		Ok(Gateway {
			inputs,
			tls,
			cancel,
			http,
			https,
		})
	}

	pub fn spawn(self) {
		let Gateway {
			inputs,
			tls,
			cancel,
			http,
			https,
		} = self;
		tokio::spawn(accept_loop(
			http,
			inputs.clone(),
			None,
			cancel.clone(),
		));
		tokio::spawn(accept_loop(
			https,
			inputs,
			Some(TlsAcceptor::from(tls)),
			cancel,
		));
	}
}

async fn accept_loop(
	listener: TcpListener,
	inputs: Arc<ProxyInputs>,
	tls: Option<TlsAcceptor>,
	cancel: CancellationToken,
) {
	loop {
		let (stream, peer) = tokio::select! {
			res = listener.accept() => match res {
				Ok(conn) => conn,
				Err(e) => {
					warn!("accept failed: {e}");
					continue;
				},
			},
			_ = cancel.cancelled() => return,
		};
		let inputs = inputs.clone();
		let tls = tls.clone();
		let cancel = cancel.clone();
		tokio::spawn(async move {
			match tls {
				Some(acceptor) => match acceptor.accept(stream).await {
					Ok(stream) => serve_connection(stream, inputs, peer, true, cancel).await,
					// Includes SNI misses: no inventory entry refuses the handshake.
					Err(e) => debug!(peer = %peer, "tls handshake failed: {e}"),
				},
				None => serve_connection(stream, inputs, peer, false, cancel).await,
			}
		});
	}
}

async fn serve_connection<S>(
	stream: S,
	inputs: Arc<ProxyInputs>,
	peer: SocketAddr,
	secure: bool,
	cancel: CancellationToken,
) where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
	let service = service_fn(move |req: ::http::Request<Incoming>| {
		let inputs = inputs.clone();
		async move {
			if !secure {
				if let Some(resp) = acme_challenge(&inputs, &req).await {
					return Ok::<_, Infallible>(resp);
				}
			}
			Ok(handler::handle(inputs, secure, peer, req).await)
		}
	});

	let builder = auto::Builder::new(TokioExecutor::new());
	let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
	pin_mut!(conn);
	tokio::select! {
		res = conn.as_mut() => {
			if let Err(e) = res {
				debug!(peer = %peer, "connection closed: {e}");
			}
		}
		_ = cancel.cancelled() => {
			conn.as_mut().graceful_shutdown();
			let _ = conn.await;
		}
	}
}

/// The plaintext listener always answers `/.well-known/acme-challenge/*`
/// from the challenge directory, ahead of any route.
async fn acme_challenge(
	inputs: &Arc<ProxyInputs>,
	req: &::http::Request<Incoming>,
) -> Option<Response> {
	let token = req
		.uri()
		.path()
		.strip_prefix("/.well-known/acme-challenge/")?;
	if token.is_empty() || token.contains('/') || token.contains("..") {
		return None;
	}
	let path = inputs
		.cfg
		.challenge_dir
		.join(".well-known")
		.join("acme-challenge")
		.join(token);
	let resp = match tokio::fs::read(&path).await {
		Ok(proof) => ::http::Response::builder()
			.status(StatusCode::OK)
			.header(header::CONTENT_TYPE, "text/plain")
			.body(Body::from(proof))
			.expect("static response must build"),
		Err(_) => ::http::Response::builder()
			.status(StatusCode::NOT_FOUND)
			.body(Body::empty())
			.expect("static response must build"),
	};
	Some(resp)
}
