use std::collections::HashMap;

use acme_v2::persist::{Persist, PersistKey, PersistKind};
use acme_v2::{Directory, DirectoryUrl, create_p384_key};

use crate::tls::{CertEntry, CertStore};
use crate::*;

/// Certificates are renewed once they are within this window of expiry.
const RENEW_WINDOW_DAYS: i64 = 30;
/// Poll interval handed to the ACME library for challenge/finalize polling.
const ACME_POLL_MS: u64 = 5000;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LetsEncryptSerde {
	pub email: String,
	#[serde(default)]
	pub staging: bool,
}

#[derive(Debug, Clone)]
pub struct AcmeSettings {
	pub email: String,
	pub staging: bool,
	pub challenge_dir: PathBuf,
}

/// Account-key persistence for the ACME library: the account private key
/// lives at `<certDir>/accounts/account.key`; order-scoped keys and
/// certificates stay in memory because we write the final PEMs ourselves.
#[derive(Clone)]
struct AccountPersist {
	account_key: PathBuf,
	scratch: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl AccountPersist {
	fn new(cert_dir: &Path) -> AccountPersist {
		AccountPersist {
			account_key: cert_dir.join("accounts").join("account.key"),
			scratch: Arc::new(Mutex::new(HashMap::new())),
		}
	}
}

impl Persist for AccountPersist {
	fn put(&self, key: &PersistKey, value: &[u8]) -> acme_v2::Result<()> {
		if let PersistKind::AccountPrivateKey = key.kind {
			if let Some(parent) = self.account_key.parent() {
				std::fs::create_dir_all(parent)?;
			}
			std::fs::write(&self.account_key, value)?;
			return Ok(());
		}
		self
			.scratch
			.lock()
			.unwrap()
			.insert(key.to_string(), value.to_vec());
		Ok(())
	}

	fn get(&self, key: &PersistKey) -> acme_v2::Result<Option<Vec<u8>>> {
		if let PersistKind::AccountPrivateKey = key.kind {
			return match std::fs::read(&self.account_key) {
				Ok(pem) => Ok(Some(pem)),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
				Err(e) => Err(e.into()),
			};
		}
		Ok(self.scratch.lock().unwrap().get(&key.to_string()).cloned())
	}
}

/// Certificate manager: loads per-host PEMs from disk, and when ACME is
/// configured, orders new certificates over HTTP-01 when missing or expired
/// and renews on a daily tick.
pub struct CertManager {
	store: Arc<CertStore>,
	cert_dir: PathBuf,
	acme: Option<AcmeSettings>,
}

impl CertManager {
	pub fn new(store: Arc<CertStore>, cert_dir: PathBuf, acme: Option<AcmeSettings>) -> CertManager {
		CertManager {
			store,
			cert_dir,
			acme,
		}
	}

	fn host_dir(&self, host: &str) -> PathBuf {
		self.cert_dir.join(host)
	}

	/// Load the host's certificate from disk, ordering a fresh one when the
	/// files are missing or the chain is expired.
	pub async fn ensure_host(&self, host: &str) -> anyhow::Result<()> {
		let dir = self.host_dir(host);
		let chain_path = dir.join("cert.pem");
		let key_path = dir.join("key.pem");

		if let (Ok(chain), Ok(key)) = (
			tokio::fs::read(&chain_path).await,
			tokio::fs::read(&key_path).await,
		) {
			match CertEntry::from_pems(host, &chain, &key, chain_path.clone(), key_path.clone()) {
				Ok(entry) if entry.is_valid() => {
					info!(host, not_after = %entry.not_after, "loaded certificate");
					self.store.insert(entry);
					return Ok(());
				},
				Ok(entry) => {
					info!(host, not_after = %entry.not_after, "certificate on disk expired");
				},
				Err(e) => {
					warn!(host, "unreadable certificate on disk: {e}");
				},
			}
		}

		self.obtain_certificate(host).await
	}

	/// Order a certificate via ACME HTTP-01, write the PEMs and swap the
	/// inventory entry.
	pub async fn obtain_certificate(&self, host: &str) -> anyhow::Result<()> {
		let settings = self
			.acme
			.clone()
			.ok_or_else(|| anyhow::anyhow!("no letsencrypt configuration, cannot order for {host}"))?;
		let cert_dir = self.cert_dir.clone();
		let host_owned = host.to_string();
		let (chain_pem, key_pem) = tokio::task::spawn_blocking(move || {
			order_blocking(&settings, &cert_dir, &host_owned)
		})
		.await
		.context("acme task panicked")??;

		let dir = self.host_dir(host);
		tokio::fs::create_dir_all(&dir).await?;
		let chain_path = dir.join("cert.pem");
		let key_path = dir.join("key.pem");
		tokio::fs::write(&chain_path, &chain_pem).await?;
		tokio::fs::write(&key_path, &key_pem).await?;

		let entry = CertEntry::from_pems(
			host,
			chain_pem.as_bytes(),
			key_pem.as_bytes(),
			chain_path,
			key_path,
		)?;
		info!(host, not_after = %entry.not_after, "obtained certificate");
		self.store.insert(entry);
		Ok(())
	}

	/// Provision every ssl host, logging (not propagating) failures; the
	/// daily renewal tick retries.
	pub async fn ensure_all(&self, hosts: &[String]) {
		for host in hosts {
			if let Err(e) = self.ensure_host(host).await {
				warn!(host, "certificate provisioning failed: {e:#}");
			}
		}
	}

	/// Daily tick: renew every configured ssl host whose certificate is
	/// missing or inside the renewal window.
	pub fn run_renewal(
		self: Arc<Self>,
		inputs: Arc<ProxyInputs>,
		cancel: tokio_util::sync::CancellationToken,
	) {
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(Duration::from_secs(24 * 60 * 60));
			tick.tick().await;
			loop {
				tokio::select! {
					_ = tick.tick() => {},
					_ = cancel.cancelled() => return,
				}
				let hosts = inputs.routes.load().ssl_hosts();
				for host in hosts {
					let due = match self.store.get(&host) {
						Some(entry) => entry.expires_within(chrono::Duration::days(RENEW_WINDOW_DAYS)),
						None => true,
					};
					if !due {
						continue;
					}
					if let Err(e) = self.obtain_certificate(&host).await {
						warn!(host, "certificate renewal failed: {e:#}");
					}
				}
			}
		});
	}
}

/// The blocking ACME order flow: register (or reuse) the account, run the
/// HTTP-01 challenge with the token served by the plaintext listener, then
/// finalize with a fresh P-384 key.
fn order_blocking(
	settings: &AcmeSettings,
	cert_dir: &Path,
	host: &str,
) -> anyhow::Result<(String, String)> {
	let url = if settings.staging {
		DirectoryUrl::LetsEncryptStaging
	} else {
		DirectoryUrl::LetsEncrypt
	};
	let persist = AccountPersist::new(cert_dir);
	let dir = Directory::from_url(persist, url).context("acme directory")?;
	let account = dir.account(&settings.email).context("acme account")?;

	let mut order = account.new_order(host, &[]).context("acme new order")?;
	let order_csr = loop {
		if let Some(csr) = order.confirm_validations() {
			break csr;
		}
		let auths = order.authorizations().context("acme authorizations")?;
		let auth = auths
			.first()
			.ok_or_else(|| anyhow::anyhow!("order has no authorizations"))?;
		let challenge = auth.http_challenge();
		let token = challenge.http_token();
		let proof = challenge.http_proof();

		let token_dir = settings
			.challenge_dir
			.join(".well-known")
			.join("acme-challenge");
		std::fs::create_dir_all(&token_dir)?;
		let token_path = token_dir.join(token);
		std::fs::write(&token_path, proof)?;
		debug!(host, token, "published http-01 challenge");

		let validated = challenge.validate(ACME_POLL_MS);
		let _ = std::fs::remove_file(&token_path);
		validated.map_err(|e| anyhow::anyhow!("http-01 validation failed for {host}: {e}"))?;
		order.refresh().context("acme order refresh")?;
	};

	let pkey = create_p384_key();
	let cert_order = order_csr
		.finalize_pkey(pkey, ACME_POLL_MS)
		.context("acme finalize")?;
	let cert = cert_order
		.download_and_save_cert()
		.context("acme download certificate")?;
	Ok((cert.certificate().to_string(), cert.private_key().to_string()))
}
