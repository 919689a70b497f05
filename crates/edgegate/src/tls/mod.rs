pub mod acme;

use std::collections::HashMap;
use std::io::Cursor;

use anyhow::anyhow;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use rustls::ServerConfig;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::Item;

use crate::*;

#[cfg(test)]
#[path = "tls_test.rs"]
mod tests;

pub fn provider() -> Arc<CryptoProvider> {
	Arc::new(rustls::crypto::ring::default_provider())
}

pub fn parse_cert(mut cert: &[u8]) -> anyhow::Result<Vec<CertificateDer<'static>>> {
	let mut reader = std::io::BufReader::new(Cursor::new(&mut cert));
	let parsed: Result<Vec<_>, _> = rustls_pemfile::read_all(&mut reader).collect();
	parsed?
		.into_iter()
		.map(|p| {
			let Item::X509Certificate(der) = p else {
				return Err(anyhow!("no certificate"));
			};
			Ok(der)
		})
		.collect::<Result<Vec<_>, _>>()
}

pub fn parse_key(mut key: &[u8]) -> anyhow::Result<PrivateKeyDer<'static>> {
	let mut reader = std::io::BufReader::new(Cursor::new(&mut key));
	let parsed = rustls_pemfile::read_one(&mut reader)?;
	let parsed = parsed.ok_or_else(|| anyhow!("no key"))?;
	match parsed {
		Item::Pkcs8Key(c) => Ok(PrivateKeyDer::Pkcs8(c)),
		Item::Pkcs1Key(c) => Ok(PrivateKeyDer::Pkcs1(c)),
		Item::Sec1Key(c) => Ok(PrivateKeyDer::Sec1(c)),
		_ => Err(anyhow!("unsupported key")),
	}
}

/// `notAfter` of the leaf certificate.
pub fn not_after(leaf: &CertificateDer) -> anyhow::Result<DateTime<Utc>> {
	let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
		.map_err(|e| anyhow!("invalid certificate: {e}"))?;
	let ts = cert.validity().not_after.timestamp();
	DateTime::from_timestamp(ts, 0).ok_or_else(|| anyhow!("certificate notAfter out of range"))
}

/// One host's certificate. Owned by the cert manager; replaced wholesale on
/// renewal.
pub struct CertEntry {
	pub host: String,
	pub chain_path: PathBuf,
	pub key_path: PathBuf,
	pub not_after: DateTime<Utc>,
	certified: Arc<CertifiedKey>,
}

impl Debug for CertEntry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CertEntry")
			.field("host", &self.host)
			.field("not_after", &self.not_after)
			.finish()
	}
}

impl CertEntry {
	pub fn from_pems(
		host: &str,
		chain_pem: &[u8],
		key_pem: &[u8],
		chain_path: PathBuf,
		key_path: PathBuf,
	) -> anyhow::Result<CertEntry> {
		let chain = parse_cert(chain_pem)?;
		let leaf = chain.first().ok_or_else(|| anyhow!("empty chain"))?;
		let not_after = not_after(leaf)?;
		let key = parse_key(key_pem)?;
		let signing_key = provider()
			.key_provider
			.load_private_key(key)
			.map_err(|e| anyhow!("unusable private key: {e}"))?;
		Ok(CertEntry {
			host: host.to_string(),
			chain_path,
			key_path,
			not_after,
			certified: Arc::new(CertifiedKey::new(chain, signing_key)),
		})
	}

	pub fn is_valid(&self) -> bool {
		self.not_after > Utc::now()
	}

	pub fn expires_within(&self, window: chrono::Duration) -> bool {
		self.not_after - Utc::now() < window
	}
}

/// Certificate inventory, swapped atomically per host on renewal.
#[derive(Default)]
pub struct CertStore {
	inventory: ArcSwap<HashMap<String, Arc<CertEntry>>>,
}

impl CertStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, entry: CertEntry) {
		let mut next = HashMap::clone(&self.inventory.load());
		next.insert(entry.host.clone(), Arc::new(entry));
		self.inventory.store(Arc::new(next));
	}

	pub fn remove(&self, host: &str) {
		let mut next = HashMap::clone(&self.inventory.load());
		next.remove(host);
		self.inventory.store(Arc::new(next));
	}

	pub fn get(&self, host: &str) -> Option<Arc<CertEntry>> {
		self.inventory.load().get(host).cloned()
	}

	pub fn hosts(&self) -> Vec<String> {
		self.inventory.load().keys().cloned().collect()
	}
}

/// SNI resolver over the inventory. An unknown or expired host yields no
/// certificate, which refuses the handshake.
pub struct SniResolver {
	store: Arc<CertStore>,
}

impl SniResolver {
	pub fn new(store: Arc<CertStore>) -> Arc<SniResolver> {
		Arc::new(SniResolver { store })
	}
}

impl Debug for SniResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SniResolver").finish()
	}
}

impl ResolvesServerCert for SniResolver {
	fn resolve(&self, client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
		let name = client_hello.server_name()?;
		let entry = self.store.get(name)?;
		if !entry.is_valid() {
			debug!(host = name, "certificate expired, refusing handshake");
			return None;
		}
		Some(entry.certified.clone())
	}
}

pub fn server_config(resolver: Arc<SniResolver>) -> anyhow::Result<ServerConfig> {
	let mut cfg = ServerConfig::builder_with_provider(provider())
		.with_safe_default_protocol_versions()?
		.with_no_client_auth()
		.with_cert_resolver(resolver);
	cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
	Ok(cfg)
}
