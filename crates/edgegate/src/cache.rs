use std::num::NonZeroUsize;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use lru::LruCache;
use sha2::{Digest, Sha256};
use url::Url;

use crate::*;

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CacheConfig {
	#[serde(default = "default_mru_size")]
	pub mru_size: usize,
	#[serde(default = "default_max_age")]
	pub max_age_seconds: u64,
}

impl Default for CacheConfig {
	fn default() -> Self {
		CacheConfig {
			mru_size: default_mru_size(),
			max_age_seconds: default_max_age(),
		}
	}
}

fn default_mru_size() -> usize {
	100
}

fn default_max_age() -> u64 {
	300
}

/// Immutable once written. The body is binary-safe: base64 inside the JSON
/// disk wrapper, raw bytes in memory.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
	pub status: u16,
	pub headers: Vec<(String, String)>,
	#[serde(with = "body_base64")]
	pub body: Bytes,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_ip: Option<String>,
	/// Unix seconds at write time.
	pub timestamp: u64,
}

mod body_base64 {
	use super::*;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(body: &Bytes, ser: S) -> Result<S::Ok, S::Error> {
		ser.serialize_str(&BASE64.encode(body))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Bytes, D::Error> {
		let raw = String::deserialize(de)?;
		BASE64
			.decode(raw)
			.map(Bytes::from)
			.map_err(serde::de::Error::custom)
	}
}

/// Two-tier response cache: a bounded in-memory MRU over one-file-per-key
/// JSON entries on disk. Both tiers are authoritative; the disk tier survives
/// restarts and re-warms the MRU on hit.
pub struct ResponseCache {
	dir: PathBuf,
	max_age: Duration,
	mru: Mutex<LruCache<String, Arc<CacheEntry>>>,
}

impl ResponseCache {
	pub fn new(dir: PathBuf, cfg: &CacheConfig) -> ResponseCache {
		let cap = NonZeroUsize::new(cfg.mru_size.max(1)).expect("max(1) is non-zero");
		ResponseCache {
			dir,
			max_age: Duration::from_secs(cfg.max_age_seconds),
			mru: Mutex::new(LruCache::new(cap)),
		}
	}

	/// Cache key: sha256 over method, origin+path (query stripped), user id
	/// and user IP. The query string never influences the key.
	pub fn key(method: &str, target: &str, user_id: &str, user_ip: &str) -> String {
		let clean = match Url::parse(target) {
			Ok(mut url) => {
				url.set_query(None);
				url.set_fragment(None);
				url.to_string()
			},
			Err(_) => target
				.split_once('?')
				.map(|(base, _)| base.to_string())
				.unwrap_or_else(|| target.to_string()),
		};
		let mut hasher = Sha256::new();
		hasher.update(method.as_bytes());
		hasher.update([0]);
		hasher.update(clean.as_bytes());
		hasher.update([0]);
		hasher.update(user_id.as_bytes());
		hasher.update([0]);
		hasher.update(user_ip.as_bytes());
		hex::encode(hasher.finalize())
	}

	fn file(&self, key: &str) -> PathBuf {
		self.dir.join(format!("{key}.json"))
	}

	fn now() -> u64 {
		SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs()
	}

	fn expired(&self, entry: &CacheEntry) -> bool {
		Self::now().saturating_sub(entry.timestamp) > self.max_age.as_secs()
	}

	pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
		{
			let mut mru = self.mru.lock().unwrap();
			if let Some(entry) = mru.get(key) {
				if Self::now().saturating_sub(entry.timestamp) <= self.max_age.as_secs() {
					return Some(entry.clone());
				}
				mru.pop(key);
			}
		}

		let path = self.file(key);
		let entry = match self.read_disk(&path).await {
			Some(entry) => entry,
			None => return None,
		};
		if self.expired(&entry) {
			let _ = tokio::fs::remove_file(&path).await;
			return None;
		}
		let entry = Arc::new(entry);
		self
			.mru
			.lock()
			.unwrap()
			.put(key.to_string(), entry.clone());
		Some(entry)
	}

	/// A reader that opens a file mid-write retries once, then deletes the
	/// entry and reports a miss.
	async fn read_disk(&self, path: &Path) -> Option<CacheEntry> {
		for attempt in 0..2 {
			let raw = tokio::fs::read(path).await.ok()?;
			match serde_json::from_slice::<CacheEntry>(&raw) {
				Ok(entry) => return Some(entry),
				Err(e) if attempt == 0 => {
					trace!(path = %path.display(), "torn cache read, retrying: {e}");
					tokio::time::sleep(Duration::from_millis(10)).await;
				},
				Err(e) => {
					warn!(path = %path.display(), "corrupt cache entry dropped: {e}");
					let _ = tokio::fs::remove_file(path).await;
				},
			}
		}
		None
	}

	/// MRU insertion happens before the disk write so a concurrent `get`
	/// observes the value as soon as `set` returns.
	pub async fn set(&self, key: &str, mut entry: CacheEntry) {
		if entry.timestamp == 0 {
			entry.timestamp = Self::now();
		}
		let entry = Arc::new(entry);
		self
			.mru
			.lock()
			.unwrap()
			.put(key.to_string(), entry.clone());

		if let Err(e) = self.write_disk(key, &entry).await {
			warn!(key, "cache disk write failed: {e}");
		}
	}

	async fn write_disk(&self, key: &str, entry: &CacheEntry) -> anyhow::Result<()> {
		tokio::fs::create_dir_all(&self.dir).await?;
		let raw = serde_json::to_vec(entry)?;
		tokio::fs::write(self.file(key), raw).await?;
		Ok(())
	}

	/// Sweep both tiers, removing expired entries. Called hourly.
	pub async fn cleanup(&self) {
		{
			let mut mru = self.mru.lock().unwrap();
			let expired: Vec<String> = mru
				.iter()
				.filter(|(_, e)| Self::now().saturating_sub(e.timestamp) > self.max_age.as_secs())
				.map(|(k, _)| k.clone())
				.collect();
			for key in expired {
				mru.pop(&key);
			}
		}

		let Ok(mut dir) = tokio::fs::read_dir(&self.dir).await else {
			return;
		};
		while let Ok(Some(f)) = dir.next_entry().await {
			let path = f.path();
			if path.extension().and_then(|e| e.to_str()) != Some("json") {
				continue;
			}
			if let Some(entry) = self.read_disk(&path).await {
				if self.expired(&entry) {
					let _ = tokio::fs::remove_file(&path).await;
				}
			}
		}
	}

	/// Hourly background sweep.
	pub fn run_sweeper(self: Arc<Self>, cancel: tokio_util::sync::CancellationToken) {
		tokio::spawn(async move {
			let mut tick = tokio::time::interval(Duration::from_secs(60 * 60));
			tick.tick().await; // immediate first tick is a no-op
			loop {
				tokio::select! {
					_ = tick.tick() => self.cleanup().await,
					_ = cancel.cancelled() => return,
				}
			}
		});
	}
}
