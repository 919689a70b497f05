use arc_swap::ArcSwap;
use edgegate_core::signal;
use tokio_util::sync::CancellationToken;

use crate::cache::ResponseCache;
use crate::ext::{NoGeoLookup, NoPdfConverter, NoStats};
use crate::http::session::SessionStore;
use crate::process::{Supervisor, scheduler};
use crate::proxy::Gateway;
use crate::tls::acme::CertManager;
use crate::tls::{CertStore, SniResolver};
use crate::*;

/// Construct every subsystem and start the listeners. No process-global
/// state: the cache, cert manager, session store and supervisor are values
/// owned here and shared by `Arc`.
pub async fn run(cfg: Arc<Config>) -> anyhow::Result<Bound> {
	// rustls wants a process-wide default provider before any config is built.
	let _ = rustls::crypto::ring::default_provider().install_default();

	let shutdown = signal::Shutdown::new();
	let cancel = CancellationToken::new();

	let sessions = Arc::new(SessionStore::new());
	sessions.clone().run_sweeper(cancel.child_token());

	let cache = Arc::new(ResponseCache::new(cfg.data_dir.join("cache"), &cfg.cache));
	cache.clone().run_sweeper(cancel.child_token());

	let certs = Arc::new(CertStore::new());

	let upstream = reqwest::Client::builder()
		.redirect(reqwest::redirect::Policy::none())
		.connect_timeout(Duration::from_secs(10))
		.build()
		.context("building upstream client")?;

	let table = cfg.route_table().context("invalid route configuration")?;
	let stats: Arc<dyn ext::Stats> = Arc::new(NoStats);
	let inputs = Arc::new(ProxyInputs {
		cfg: cfg.clone(),
		routes: ArcSwap::from_pointee(table),
		certs: certs.clone(),
		sessions,
		cache,
		upstream,
		geo: Arc::new(NoGeoLookup),
		pdf: Arc::new(NoPdfConverter),
		stats: stats.clone(),
	});

	// Listeners first: the plaintext side must be serving ACME challenges
	// before any certificate order goes out.
	let tls_config = Arc::new(tls::server_config(SniResolver::new(certs.clone()))?);
	let gateway = Gateway::bind(inputs.clone(), tls_config, cancel.child_token()).await?;
	gateway.spawn();

	let cert_manager = Arc::new(CertManager::new(
		certs.clone(),
		cfg.cert_dir.clone(),
		cfg.acme.clone(),
	));
	let ssl_hosts = inputs.routes.load().ssl_hosts();
	if !ssl_hosts.is_empty() {
		let mgr = cert_manager.clone();
		tokio::spawn(async move {
			mgr.ensure_all(&ssl_hosts).await;
		});
	}
	cert_manager
		.clone()
		.run_renewal(inputs.clone(), cancel.child_token());

	let supervisor = Supervisor::new(
		cfg.pid_dir.clone(),
		cfg.logs_dir.clone(),
		&cfg.data_dir,
		stats,
		cancel.child_token(),
	);
	supervisor.start_all(cfg.processes.clone()).await;
	tokio::spawn(scheduler::run(supervisor.clone(), cancel.child_token()));

	reload::watch(inputs.clone(), supervisor.clone(), cancel.child_token());

	Ok(Bound {
		shutdown,
		cancel,
		supervisor,
	})
}

pub struct Bound {
	pub shutdown: signal::Shutdown,
	cancel: CancellationToken,
	supervisor: Arc<Supervisor>,
}

impl Bound {
	pub async fn wait_termination(self) -> anyhow::Result<()> {
		self.shutdown.wait().await;
		// Detach before cancelling: children keep running, PID files stay.
		self.supervisor.detach_all();
		self.cancel.cancel();
		// Give in-flight connections a short quiescence window.
		tokio::time::sleep(Duration::from_millis(250)).await;
		Ok(())
	}
}
