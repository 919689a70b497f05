use std::env;
use std::str::FromStr;

use crate::cache::CacheConfig;
use crate::http::csp::Csp;
use crate::process::ProcessConfig;
use crate::tls::acme::{AcmeSettings, LetsEncryptSerde};
use crate::types::route::{Route, RouteSerde, RouteTable};
use crate::*;

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

const DEFAULT_HTTP_PORT: u16 = 80;
const DEFAULT_HTTPS_PORT: u16 = 443;
const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Validated runtime configuration, assembled from the two YAML files and the
/// environment overrides.
#[derive(Debug)]
pub struct Config {
	pub bind_http: SocketAddr,
	pub bind_https: SocketAddr,
	pub log_level: String,
	pub log_file: Option<PathBuf>,
	pub data_dir: PathBuf,
	pub cert_dir: PathBuf,
	pub challenge_dir: PathBuf,
	pub pid_dir: Option<PathBuf>,
	pub logs_dir: PathBuf,
	pub acme: Option<AcmeSettings>,
	pub cache: CacheConfig,
	pub global_csp: Option<Csp>,
	pub upstream_timeout: Duration,
	pub routes: Vec<RouteSerde>,
	pub processes: Vec<ProcessConfig>,
	pub config_path: Option<PathBuf>,
	pub processes_path: Option<PathBuf>,
}

impl Config {
	/// Compile and validate the route table. `ConfigInvalid` here is fatal at
	/// startup; reload catches it and keeps the previous snapshot.
	pub fn route_table(&self) -> anyhow::Result<RouteTable> {
		let routes = self
			.routes
			.iter()
			.cloned()
			.map(Route::try_from)
			.collect::<anyhow::Result<Vec<_>>>()?;
		RouteTable::build(routes)
	}
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RawConfig {
	pub port: Option<u16>,
	pub https_port: Option<u16>,
	pub bind_address: Option<IpAddr>,
	pub log_level: Option<String>,
	pub log_file: Option<PathBuf>,
	pub data_dir: Option<PathBuf>,
	pub cert_dir: Option<PathBuf>,
	pub challenge_dir: Option<PathBuf>,
	pub letsencrypt: Option<LetsEncryptSerde>,
	pub cache: Option<CacheConfig>,
	pub csp: Option<Csp>,
	pub upstream_timeout_seconds: Option<u64>,
	pub routes: Vec<RouteSerde>,
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct RawProcessesConfig {
	pub pid_dir: Option<PathBuf>,
	pub logs_dir: Option<PathBuf>,
	pub processes: Vec<ProcessConfig>,
}

/// Parse the gateway config and (optionally) the process table, resolving
/// the recognized environment overrides: `PORT`, `HTTPS_PORT`,
/// `LETSENCRYPT_EMAIL`, `LETSENCRYPT_STAGING`, `CERT_DIR`, `LOG_LEVEL`,
/// `LOG_FILE`.
pub fn parse_config(
	contents: &str,
	processes_contents: Option<&str>,
	config_path: Option<PathBuf>,
	processes_path: Option<PathBuf>,
) -> anyhow::Result<Config> {
	let raw: RawConfig = serde_yaml::from_str(contents).context("invalid gateway config")?;
	let raw_procs: RawProcessesConfig = match processes_contents {
		Some(c) => serde_yaml::from_str(c).context("invalid processes config")?,
		None => RawProcessesConfig::default(),
	};

	let bind_addr = raw
		.bind_address
		.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
	let port = parse::<u16>("PORT")?
		.or(raw.port)
		.unwrap_or(DEFAULT_HTTP_PORT);
	let https_port = parse::<u16>("HTTPS_PORT")?
		.or(raw.https_port)
		.unwrap_or(DEFAULT_HTTPS_PORT);

	let cert_dir = parse::<PathBuf>("CERT_DIR")?
		.or(raw.cert_dir)
		.unwrap_or_else(|| PathBuf::from("./certs"));
	let challenge_dir = raw.challenge_dir.unwrap_or_else(|| PathBuf::from("."));

	let le_email = empty_to_none(parse::<String>("LETSENCRYPT_EMAIL")?)
		.or_else(|| raw.letsencrypt.as_ref().map(|l| l.email.clone()));
	let le_staging = parse::<bool>("LETSENCRYPT_STAGING")?
		.or(raw.letsencrypt.as_ref().map(|l| l.staging))
		.unwrap_or(false);
	let acme = le_email.map(|email| AcmeSettings {
		email,
		staging: le_staging,
		challenge_dir: challenge_dir.clone(),
	});

	// Route-level uniqueness and per-kind requirements are enforced by
	// route_table(); do it once here so startup fails before binding.
	let config = Config {
		bind_http: SocketAddr::new(bind_addr, port),
		bind_https: SocketAddr::new(bind_addr, https_port),
		log_level: parse::<String>("LOG_LEVEL")?
			.or(raw.log_level)
			.unwrap_or_else(|| "info".to_string()),
		log_file: parse::<PathBuf>("LOG_FILE")?.or(raw.log_file),
		data_dir: raw.data_dir.unwrap_or_else(|| PathBuf::from("./data")),
		cert_dir,
		challenge_dir,
		pid_dir: raw_procs.pid_dir,
		logs_dir: raw_procs
			.logs_dir
			.unwrap_or_else(|| PathBuf::from("./logs")),
		acme,
		cache: raw.cache.unwrap_or_default(),
		global_csp: raw.csp,
		upstream_timeout: raw
			.upstream_timeout_seconds
			.map(Duration::from_secs)
			.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT),
		routes: raw.routes,
		processes: raw_procs.processes,
		config_path,
		processes_path,
	};
	config.route_table()?;
	Ok(config)
}

/// Read both YAML files and parse. The reload watcher goes through here too.
pub async fn load(
	config_path: &Path,
	processes_path: Option<&Path>,
) -> anyhow::Result<Config> {
	let contents = tokio::fs::read_to_string(config_path)
		.await
		.with_context(|| format!("read {}", config_path.display()))?;
	let processes = match processes_path {
		Some(p) => Some(
			tokio::fs::read_to_string(p)
				.await
				.with_context(|| format!("read {}", p.display()))?,
		),
		None => None,
	};
	parse_config(
		&contents,
		processes.as_deref(),
		Some(config_path.to_path_buf()),
		processes_path.map(Path::to_path_buf),
	)
}

fn parse<T: FromStr>(env: &str) -> anyhow::Result<Option<T>>
where
	<T as FromStr>::Err: ToString,
{
	match env::var(env) {
		Ok(val) => val
			.parse()
			.map(Some)
			.map_err(|e: <T as FromStr>::Err| {
				anyhow::anyhow!("invalid env var {}={} ({})", env, val, e.to_string())
			}),
		Err(_) => Ok(None),
	}
}

pub fn empty_to_none<A: AsRef<str>>(inp: Option<A>) -> Option<A> {
	if let Some(inner) = &inp {
		if inner.as_ref().is_empty() {
			return None;
		}
	}
	inp
}
