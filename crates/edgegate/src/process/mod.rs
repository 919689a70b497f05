pub mod scheduler;

use std::collections::{HashMap, HashSet};
use std::process::Stdio;

use chrono::{DateTime, Utc};
use rand::Rng;
use regex::Regex;
use tokio::io::AsyncBufReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::proxy::ProxyError;
use crate::*;

#[cfg(test)]
#[path = "process_test.rs"]
mod tests;

/// Grace period between SIGTERM and SIGKILL on user stop.
const STOP_GRACE: Duration = Duration::from_secs(2);
/// Liveness poll cadence for reconnected PIDs we do not own.
const RECONNECT_POLL: Duration = Duration::from_secs(1);
/// Health probe timeout.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Environment names the gateway owns; they are not inherited by children.
const INTERNAL_ENV: [&str; 7] = [
	"PORT",
	"HTTPS_PORT",
	"LETSENCRYPT_EMAIL",
	"LETSENCRYPT_STAGING",
	"CERT_DIR",
	"LOG_LEVEL",
	"LOG_FILE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvPolicy {
	#[default]
	Fail,
	Warn,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HealthCheck {
	pub url: String,
	#[serde(default = "default_health_interval")]
	pub interval_seconds: u64,
	#[serde(default = "default_health_retries")]
	pub retries: u32,
}

fn default_health_interval() -> u64 {
	30
}

fn default_health_retries() -> u32 {
	3
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Schedule {
	pub cron: String,
	#[serde(default)]
	pub timezone: Option<String>,
	#[serde(default)]
	pub auto_stop: bool,
	#[serde(default)]
	pub max_duration_seconds: Option<u64>,
	#[serde(default = "default_true")]
	pub skip_if_running: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProcessConfig {
	pub id: String,
	#[serde(default)]
	pub name: Option<String>,
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub cwd: Option<PathBuf>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	#[serde(default)]
	pub required_env: Vec<String>,
	#[serde(default)]
	pub env_policy: EnvPolicy,
	#[serde(default = "default_true")]
	pub enabled: bool,
	#[serde(default)]
	pub pid_file: Option<PathBuf>,
	#[serde(default)]
	pub restart_on_exit: bool,
	#[serde(default = "default_restart_delay")]
	pub restart_delay_seconds: u64,
	#[serde(default = "default_max_restarts")]
	pub max_restarts: u32,
	#[serde(default)]
	pub health_check: Option<HealthCheck>,
	#[serde(default)]
	pub schedule: Option<Schedule>,
}

fn default_restart_delay() -> u64 {
	2
}

fn default_max_restarts() -> u32 {
	5
}

impl ProcessConfig {
	pub fn display_name(&self) -> &str {
		self.name.as_deref().unwrap_or(&self.id)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessState {
	Spawning,
	Running,
	Reconnected,
	Stopped,
	Terminated,
	Removed,
}

/// Mutable per-process state, guarded by the entry mutex.
#[derive(Debug)]
struct Runtime {
	pid: Option<u32>,
	state: ProcessState,
	started_at: Option<DateTime<Utc>>,
	restart_count: u32,
	last_restart_at: Option<DateTime<Utc>>,
	health_failures: u32,
	stopped_by_user: bool,
	/// Cancels the current incarnation's monitor/health/poll tasks.
	cancel: CancellationToken,
}

pub struct Entry {
	pub config: ProcessConfig,
	runtime: Mutex<Runtime>,
}

/// Point-in-time view of a managed process, for inspection and tests.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
	pub id: String,
	pub state: ProcessState,
	pub pid: Option<u32>,
	pub restart_count: u32,
	pub health_failures: u32,
	pub stopped_by_user: bool,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoppedSet {
	stopped_processes: Vec<String>,
	timestamp: i64,
}

/// The process supervisor. Spawns detached workers, reconnects to PIDs left
/// behind by a previous supervisor, health-checks, restarts and detaches on
/// shutdown without killing children.
pub struct Supervisor {
	pid_dir: Option<PathBuf>,
	logs_dir: PathBuf,
	stopped_path: PathBuf,
	http: reqwest::Client,
	stats: Arc<dyn crate::ext::Stats>,
	table: Mutex<HashMap<String, Arc<Entry>>>,
	stopped: Mutex<HashSet<String>>,
	cancel: CancellationToken,
	log_tx: tokio::sync::broadcast::Sender<(String, String)>,
}

impl Supervisor {
	pub fn new(
		pid_dir: Option<PathBuf>,
		logs_dir: PathBuf,
		data_dir: &Path,
		stats: Arc<dyn crate::ext::Stats>,
		cancel: CancellationToken,
	) -> Arc<Supervisor> {
		let stopped_path = data_dir.join("stopped-processes.json");
		let stopped = load_stopped(&stopped_path);
		let (log_tx, _) = tokio::sync::broadcast::channel(256);
		Arc::new(Supervisor {
			pid_dir,
			logs_dir,
			stopped_path,
			http: reqwest::Client::new(),
			stats,
			table: Mutex::new(HashMap::new()),
			stopped: Mutex::new(stopped),
			cancel,
			log_tx,
		})
	}

	/// Incremental log lines as `(process id, formatted line)`, the seam the
	/// management surface subscribes through.
	pub fn subscribe_logs(&self) -> tokio::sync::broadcast::Receiver<(String, String)> {
		self.log_tx.subscribe()
	}

	/// PID file resolution: explicit `pidFile`, then `<pidDir>/<id>.pid`,
	/// then `/tmp/<id>.pid`.
	pub fn pid_file(&self, cfg: &ProcessConfig) -> PathBuf {
		if let Some(path) = &cfg.pid_file {
			return path.clone();
		}
		match &self.pid_dir {
			Some(dir) => dir.join(format!("{}.pid", cfg.id)),
			None => PathBuf::from(format!("/tmp/{}.pid", cfg.id)),
		}
	}

	pub fn log_file(&self, id: &str) -> PathBuf {
		self.logs_dir.join("processes").join(format!("{id}.log"))
	}

	pub fn status(&self, id: &str) -> Option<ProcessStatus> {
		let entry = self.table.lock().unwrap().get(id).cloned()?;
		let rt = entry.runtime.lock().unwrap();
		Some(ProcessStatus {
			id: id.to_string(),
			state: rt.state,
			pid: rt.pid,
			restart_count: rt.restart_count,
			health_failures: rt.health_failures,
			stopped_by_user: rt.stopped_by_user,
		})
	}

	pub fn is_running(&self, id: &str) -> bool {
		matches!(
			self.status(id).map(|s| s.state),
			Some(ProcessState::Running | ProcessState::Reconnected)
		)
	}

	pub fn entries(&self) -> Vec<Arc<Entry>> {
		self.table.lock().unwrap().values().cloned().collect()
	}

	fn register(&self, config: ProcessConfig) -> Arc<Entry> {
		let stopped = self.stopped.lock().unwrap().contains(&config.id);
		let entry = Arc::new(Entry {
			runtime: Mutex::new(Runtime {
				pid: None,
				state: if stopped {
					ProcessState::Stopped
				} else {
					ProcessState::Spawning
				},
				started_at: None,
				restart_count: 0,
				last_restart_at: None,
				health_failures: 0,
				stopped_by_user: stopped,
				cancel: self.cancel.child_token(),
			}),
			config,
		});
		self
			.table
			.lock()
			.unwrap()
			.insert(entry.config.id.clone(), entry.clone());
		entry
	}

	/// Bring up the full process table at supervisor start: reconnect to
	/// live PIDs, spawn the rest. A persisted user-stop is honored unless
	/// reconnect discovers a live PID, which clears it.
	pub async fn start_all(self: &Arc<Self>, configs: Vec<ProcessConfig>) {
		for config in configs {
			if !config.enabled {
				continue;
			}
			let entry = self.register(config);
			self.start_managed(&entry, false).await;
		}
	}

	/// Start one entry. `explicit` start (operator or scheduler) clears a
	/// persisted user-stop; implicit start never overrides it.
	pub async fn start_managed(self: &Arc<Self>, entry: &Arc<Entry>, explicit: bool) {
		if explicit {
			self.clear_stopped(&entry.config.id).await;
			let mut rt = entry.runtime.lock().unwrap();
			rt.stopped_by_user = false;
		}
		if self.is_running(&entry.config.id) {
			return;
		}
		if self.reconnect(entry).await {
			return;
		}
		{
			let rt = entry.runtime.lock().unwrap();
			if rt.stopped_by_user {
				debug!(id = %entry.config.id, "previously stopped by user, not spawning");
				return;
			}
		}
		if let Err(e) = self.spawn_process(entry).await {
			warn!(id = %entry.config.id, "spawn failed: {e}");
			// Spawn failure never enters Running.
			entry.runtime.lock().unwrap().state = ProcessState::Terminated;
		}
	}

	pub async fn start(self: &Arc<Self>, id: &str) {
		let entry = self.table.lock().unwrap().get(id).cloned();
		if let Some(entry) = entry {
			self.start_managed(&entry, true).await;
		}
	}

	/// Reconnect to a PID file left by a previous supervisor. A garbage or
	/// dead PID deletes the file and reports false so the caller spawns.
	async fn reconnect(self: &Arc<Self>, entry: &Arc<Entry>) -> bool {
		let pid_path = self.pid_file(&entry.config);
		let Ok(raw) = tokio::fs::read_to_string(&pid_path).await else {
			return false;
		};
		let Ok(pid) = raw.trim().parse::<u32>() else {
			warn!(id = %entry.config.id, path = %pid_path.display(), "garbage pid file removed");
			let _ = tokio::fs::remove_file(&pid_path).await;
			return false;
		};
		if !alive(pid) {
			debug!(id = %entry.config.id, pid, "stale pid file removed");
			let _ = tokio::fs::remove_file(&pid_path).await;
			return false;
		}

		info!(id = %entry.config.id, pid, "reconnected to running process");
		let cancel = {
			let mut rt = entry.runtime.lock().unwrap();
			rt.pid = Some(pid);
			rt.state = ProcessState::Reconnected;
			rt.started_at = Some(Utc::now());
			// A discovered live PID clears persisted stopped-status.
			rt.stopped_by_user = false;
			rt.cancel = self.cancel.child_token();
			rt.cancel.clone()
		};
		self.clear_stopped(&entry.config.id).await;

		let sup = self.clone();
		let entry = entry.clone();
		self.spawn_log_tail(&entry, cancel.clone());
		tokio::spawn(async move {
			sup.poll_reconnected(entry, pid, cancel).await;
		});
		true
	}

	/// Reconnected workers have no stdio pipe to pump; their log updates come
	/// from watching the log file itself.
	fn spawn_log_tail(&self, entry: &Arc<Entry>, cancel: CancellationToken) {
		let path = self.log_file(&entry.config.id);
		let id = entry.config.id.clone();
		let tx = self.log_tx.clone();
		tokio::spawn(tail_log(path, id, tx, cancel));
	}

	/// No signal handler is available for a PID we did not spawn: poll
	/// `kill(pid, 0)` at 1 Hz until it dies or the token cancels.
	async fn poll_reconnected(
		self: Arc<Self>,
		entry: Arc<Entry>,
		pid: u32,
		cancel: CancellationToken,
	) {
		let mut tick = tokio::time::interval(RECONNECT_POLL);
		loop {
			tokio::select! {
				_ = tick.tick() => {},
				_ = cancel.cancelled() => return,
			}
			if !alive(pid) {
				info!(id = %entry.config.id, pid, "reconnected process exited");
				self.handle_exit(&entry).await;
				return;
			}
		}
	}

	async fn spawn_process(self: &Arc<Self>, entry: &Arc<Entry>) -> Result<(), ProxyError> {
		let cfg = &entry.config;
		{
			let mut rt = entry.runtime.lock().unwrap();
			rt.state = ProcessState::Spawning;
			rt.health_failures = 0;
			rt.cancel = self.cancel.child_token();
		}

		let env = build_env(cfg).map_err(ProxyError::ProcessSpawnFail)?;

		let mut cmd = Command::new(&cfg.command);
		cmd
			.args(&cfg.args)
			.env_clear()
			.envs(&env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
		if let Some(cwd) = &cfg.cwd {
			cmd.current_dir(cwd);
		}
		// Detached: the child gets its own process group so it outlives the
		// supervisor on detach.
		#[cfg(unix)]
		cmd.process_group(0);

		let mut child = cmd
			.spawn()
			.map_err(|e| ProxyError::ProcessSpawnFail(format!("{}: {e}", cfg.command)))?;
		let pid = child
			.id()
			.ok_or_else(|| ProxyError::ProcessSpawnFail("child exited immediately".into()))?;

		let pid_path = self.pid_file(cfg);
		if let Some(parent) = pid_path.parent() {
			let _ = tokio::fs::create_dir_all(parent).await;
		}
		if let Err(e) = tokio::fs::write(&pid_path, pid.to_string()).await {
			warn!(id = %cfg.id, "failed writing pid file: {e}");
		}

		let cancel = {
			let mut rt = entry.runtime.lock().unwrap();
			rt.pid = Some(pid);
			rt.state = ProcessState::Running;
			rt.started_at = Some(Utc::now());
			rt.cancel.clone()
		};
		info!(id = %cfg.id, pid, "process started");

		self.spawn_log_pumps(entry, &mut child);

		if let Some(hc) = cfg.health_check.clone() {
			let sup = self.clone();
			let entry = entry.clone();
			let token = cancel.clone();
			tokio::spawn(async move {
				sup.health_loop(entry, hc, token).await;
			});
		}

		let sup = self.clone();
		let entry = entry.clone();
		tokio::spawn(async move {
			sup.monitor(entry, child, cancel).await;
		});
		Ok(())
	}

	/// Wait on an owned child. Cancellation means detach: the future drops
	/// the handle without signaling (kill_on_drop is off) and the PID file
	/// stays for the next supervisor to reconnect.
	async fn monitor(self: Arc<Self>, entry: Arc<Entry>, mut child: Child, cancel: CancellationToken) {
		tokio::select! {
			status = child.wait() => {
				debug!(id = %entry.config.id, ?status, "process exited");
				self.handle_exit(&entry).await;
			}
			_ = cancel.cancelled() => {}
		}
	}

	/// Shared exit path for owned and reconnected processes: terminal state,
	/// PID file removal, and the auto-restart decision.
	fn handle_exit<'a>(
		self: &'a Arc<Self>,
		entry: &'a Arc<Entry>,
	) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
		Box::pin(async move {
		let cfg = &entry.config;
		let restart = {
			let mut rt = entry.runtime.lock().unwrap();
			rt.pid = None;
			if rt.stopped_by_user {
				rt.state = ProcessState::Stopped;
				false
			} else {
				rt.state = ProcessState::Terminated;
				if cfg.restart_on_exit && rt.restart_count < cfg.max_restarts {
					rt.restart_count += 1;
					rt.last_restart_at = Some(Utc::now());
					true
				} else {
					if cfg.restart_on_exit {
						warn!(id = %cfg.id, "restart limit reached, giving up until config reload");
					}
					false
				}
			}
		};
		let _ = tokio::fs::remove_file(self.pid_file(cfg)).await;

		if !restart {
			return;
		}
		let delay = Duration::from_secs(cfg.restart_delay_seconds);
		let sup = self.clone();
		let entry = entry.clone();
		let cancel = self.cancel.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(delay) => {},
				_ = cancel.cancelled() => return,
			}
			{
				let rt = entry.runtime.lock().unwrap();
				if rt.stopped_by_user {
					return;
				}
			}
			info!(id = %entry.config.id, "restarting process");
			if let Err(e) = sup.spawn_process(&entry).await {
				warn!(id = %entry.config.id, "restart failed: {e}");
			}
		});
		})
	}

	/// Health checks: `retries` consecutive failures kill the process with
	/// SIGKILL; the monitor then applies the restart policy.
	async fn health_loop(self: Arc<Self>, entry: Arc<Entry>, hc: HealthCheck, cancel: CancellationToken) {
		let mut tick = tokio::time::interval(Duration::from_secs(hc.interval_seconds.max(1)));
		tick.tick().await;
		loop {
			tokio::select! {
				_ = tick.tick() => {},
				_ = cancel.cancelled() => return,
			}
			let probe_start = Instant::now();
			let result = self
				.http
				.get(&hc.url)
				.timeout(HEALTH_TIMEOUT)
				.send()
				.await;
			let elapsed = probe_start.elapsed().as_millis() as u64;
			let err = result.as_ref().err().map(|e| e.to_string());
			let ok = result.map(|r| r.status().is_success()).unwrap_or(false);
			self
				.stats
				.record_connectivity(&hc.url, elapsed, elapsed, ok, err.as_deref());

			let kill_pid = {
				let mut rt = entry.runtime.lock().unwrap();
				if ok {
					rt.health_failures = 0;
					None
				} else {
					rt.health_failures += 1;
					debug!(id = %entry.config.id, failures = rt.health_failures, "health check failed");
					(rt.health_failures >= hc.retries).then_some(rt.pid).flatten()
				}
			};
			if let Some(pid) = kill_pid {
				warn!(id = %entry.config.id, pid, "health checks exhausted, killing process");
				signal(pid, Sig::Kill);
				return;
			}
		}
	}

	fn spawn_log_pumps(&self, entry: &Arc<Entry>, child: &mut Child) {
		let log_path = self.log_file(&entry.config.id);
		if let Some(parent) = log_path.parent() {
			let _ = std::fs::create_dir_all(parent);
		}
		if let Some(stdout) = child.stdout.take() {
			tokio::spawn(pump_stream(
				stdout,
				"[STDOUT]",
				log_path.clone(),
				entry.config.id.clone(),
				self.log_tx.clone(),
			));
		}
		if let Some(stderr) = child.stderr.take() {
			tokio::spawn(pump_stream(
				stderr,
				"[STDERR]",
				log_path,
				entry.config.id.clone(),
				self.log_tx.clone(),
			));
		}
	}

	/// Graceful user stop: SIGTERM, a short grace period, then SIGKILL. The
	/// id is persisted to the stopped set so the stop survives a supervisor
	/// restart.
	pub async fn stop(self: &Arc<Self>, id: &str) {
		let entry = self.table.lock().unwrap().get(id).cloned();
		if let Some(entry) = entry {
			self.stop_internal(&entry, true).await;
		}
	}

	/// Stop without persisting user intent (scheduler auto-stop, config
	/// replacement).
	pub async fn stop_transient(self: &Arc<Self>, id: &str) {
		let entry = self.table.lock().unwrap().get(id).cloned();
		if let Some(entry) = entry {
			self.stop_internal(&entry, false).await;
		}
	}

	async fn stop_internal(self: &Arc<Self>, entry: &Arc<Entry>, persist: bool) {
		let pid = {
			let mut rt = entry.runtime.lock().unwrap();
			rt.stopped_by_user = true;
			rt.state = ProcessState::Stopped;
			rt.cancel.cancel();
			rt.pid.take()
		};
		if persist {
			self.mark_stopped(&entry.config.id).await;
		}

		if let Some(pid) = pid {
			signal(pid, Sig::Term);
			let deadline = Instant::now() + STOP_GRACE;
			while alive(pid) && Instant::now() < deadline {
				tokio::time::sleep(Duration::from_millis(100)).await;
			}
			if alive(pid) {
				warn!(id = %entry.config.id, pid, "process ignored SIGTERM, killing");
				signal(pid, Sig::Kill);
			}
		}
		let _ = tokio::fs::remove_file(self.pid_file(&entry.config)).await;
		info!(id = %entry.config.id, "process stopped");
	}

	/// Detach everything for supervisor shutdown: cancel watchers and
	/// monitors, kill nothing, leave PID files for reconnect.
	pub fn detach_all(&self) {
		info!("detaching from managed processes");
		self.cancel.cancel();
	}

	/// Remove an entry dropped from config: detach (do not kill), leave the
	/// PID file intact.
	pub async fn remove(self: &Arc<Self>, id: &str) {
		let entry = self.table.lock().unwrap().remove(id);
		if let Some(entry) = entry {
			let mut rt = entry.runtime.lock().unwrap();
			rt.state = ProcessState::Removed;
			rt.cancel.cancel();
			info!(id, "process removed from config, detached");
		}
	}

	/// Apply a reloaded process table: removed ids detach, new ids start,
	/// changed ids are stopped and respawned with the new config.
	pub async fn apply_config(self: &Arc<Self>, configs: Vec<ProcessConfig>) {
		let existing: HashMap<String, Arc<Entry>> = self.table.lock().unwrap().clone();
		let new_ids: HashSet<&str> = configs.iter().map(|c| c.id.as_str()).collect();

		for id in existing.keys() {
			if !new_ids.contains(id.as_str()) {
				self.remove(id).await;
			}
		}

		for config in configs {
			if !config.enabled {
				// Disabled entries detach like removed ones; a later
				// enabled=true toggle re-registers but does not clear a
				// persisted user-stop.
				if existing.contains_key(&config.id) {
					self.remove(&config.id).await;
				}
				continue;
			}
			match existing.get(&config.id) {
				Some(entry) if entry.config == config => {},
				Some(entry) => {
					info!(id = %config.id, "process config changed, restarting");
					self.stop_internal(entry, false).await;
					// The replacement is a fresh entry; a persisted user-stop
					// from before the reload still holds.
					let new_entry = self.register(config);
					self.start_managed(&new_entry, false).await;
				},
				None => {
					let entry = self.register(config);
					self.start_managed(&entry, false).await;
				},
			}
		}
	}

	async fn mark_stopped(&self, id: &str) {
		{
			self.stopped.lock().unwrap().insert(id.to_string());
		}
		self.persist_stopped().await;
	}

	async fn clear_stopped(&self, id: &str) {
		let changed = { self.stopped.lock().unwrap().remove(id) };
		if changed {
			self.persist_stopped().await;
		}
	}

	async fn persist_stopped(&self) {
		let set = {
			let stopped = self.stopped.lock().unwrap();
			let mut ids: Vec<String> = stopped.iter().cloned().collect();
			ids.sort();
			StoppedSet {
				stopped_processes: ids,
				timestamp: Utc::now().timestamp(),
			}
		};
		if let Some(parent) = self.stopped_path.parent() {
			let _ = tokio::fs::create_dir_all(parent).await;
		}
		match serde_json::to_vec_pretty(&set) {
			Ok(raw) => {
				if let Err(e) = tokio::fs::write(&self.stopped_path, raw).await {
					warn!("failed persisting stopped set: {e}");
				}
			},
			Err(e) => warn!("failed serializing stopped set: {e}"),
		}
	}
}

fn load_stopped(path: &Path) -> HashSet<String> {
	match std::fs::read(path) {
		Ok(raw) => match serde_json::from_slice::<StoppedSet>(&raw) {
			Ok(set) => set.stopped_processes.into_iter().collect(),
			Err(e) => {
				warn!(path = %path.display(), "unreadable stopped set ignored: {e}");
				HashSet::new()
			},
		},
		Err(_) => HashSet::new(),
	}
}

/// Follow appended lines in a log file, driven by a filesystem watcher.
async fn tail_log(
	path: PathBuf,
	id: String,
	tx: tokio::sync::broadcast::Sender<(String, String)>,
	cancel: CancellationToken,
) {
	use notify::{RecursiveMode, Watcher};
	use tokio::io::{AsyncReadExt, AsyncSeekExt};

	let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
	let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
		if res.is_ok() {
			let _ = event_tx.send(());
		}
	}) {
		Ok(w) => w,
		Err(e) => {
			debug!(id, "log tail watcher unavailable: {e}");
			return;
		},
	};
	if watcher.watch(&path, RecursiveMode::NonRecursive).is_err() {
		// The previous supervisor never produced a log file; nothing to follow.
		debug!(id, path = %path.display(), "no log file to tail");
		return;
	}

	let mut pos = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
	loop {
		tokio::select! {
			ev = event_rx.recv() => {
				if ev.is_none() {
					return;
				}
			},
			_ = cancel.cancelled() => return,
		}
		let Ok(mut file) = tokio::fs::File::open(&path).await else {
			continue;
		};
		let len = file.metadata().await.map(|m| m.len()).unwrap_or(0);
		if len < pos {
			// Truncated or rotated; start over.
			pos = 0;
		}
		if len == pos {
			continue;
		}
		if file.seek(std::io::SeekFrom::Start(pos)).await.is_err() {
			continue;
		}
		let mut fresh = String::new();
		if file.read_to_string(&mut fresh).await.is_err() {
			continue;
		}
		pos = len;
		for line in fresh.lines() {
			let _ = tx.send((id.clone(), line.to_string()));
		}
	}
}

async fn pump_stream(
	stream: impl tokio::io::AsyncRead + Unpin,
	tag: &'static str,
	log_path: PathBuf,
	id: String,
	tx: tokio::sync::broadcast::Sender<(String, String)>,
) {
	use tokio::io::AsyncWriteExt;

	let mut lines = tokio::io::BufReader::new(stream).lines();
	let mut file = match tokio::fs::OpenOptions::new()
		.create(true)
		.append(true)
		.open(&log_path)
		.await
	{
		Ok(f) => Some(f),
		Err(e) => {
			warn!(id = %id, "cannot open process log: {e}");
			None
		},
	};
	while let Ok(Some(line)) = lines.next_line().await {
		let stamped = format!(
			"[{}] {tag} {line}\n",
			Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
		);
		if let Some(f) = file.as_mut() {
			let _ = f.write_all(stamped.as_bytes()).await;
		}
		let _ = tx.send((id.clone(), stamped));
	}
}

enum Sig {
	Term,
	Kill,
}

#[cfg(unix)]
fn signal(pid: u32, sig: Sig) {
	use nix::sys::signal::{Signal, kill};
	use nix::unistd::Pid;
	let sig = match sig {
		Sig::Term => Signal::SIGTERM,
		Sig::Kill => Signal::SIGKILL,
	};
	let _ = kill(Pid::from_raw(pid as i32), sig);
}

#[cfg(not(unix))]
fn signal(_pid: u32, _sig: Sig) {}

/// `kill(pid, 0)` liveness probe.
#[cfg(unix)]
pub fn alive(pid: u32) -> bool {
	use nix::sys::signal::kill;
	use nix::unistd::Pid;
	kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn alive(_pid: u32) -> bool {
	false
}

/// `${VAR}` substitution over a child env value. Recognized names: the
/// process specials, then any parent environment variable; unknown names
/// expand to the empty string.
pub fn expand_env(value: &str, ctx: &HashMap<String, String>) -> String {
	static VAR: once_cell::sync::Lazy<Regex> =
		once_cell::sync::Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());
	VAR
		.replace_all(value, |caps: &regex::Captures| {
			ctx.get(&caps[1]).cloned().unwrap_or_default()
		})
		.into_owned()
}

/// The child environment: parent env minus gateway-internal names, overlaid
/// with the configured env after substitution, plus the supervisor markers.
pub fn build_env(cfg: &ProcessConfig) -> Result<HashMap<String, String>, String> {
	let mut merged: HashMap<String, String> = std::env::vars()
		.filter(|(k, _)| !INTERNAL_ENV.contains(&k.as_str()) && !k.starts_with("PROXY_"))
		.collect();

	let mut ctx = merged.clone();
	ctx.insert("PROCESS_ID".into(), cfg.id.clone());
	ctx.insert("PROCESS_NAME".into(), cfg.display_name().to_string());
	ctx.insert("PID".into(), std::process::id().to_string());
	ctx.insert("TIMESTAMP".into(), Utc::now().timestamp().to_string());
	ctx.insert("RANDOM".into(), rand::rng().random::<u32>().to_string());

	for (k, v) in &cfg.env {
		merged.insert(k.clone(), expand_env(v, &ctx));
	}
	merged.insert("PROXY_PROCESS_ID".into(), cfg.id.clone());
	merged.insert("PROXY_PROCESS_NAME".into(), cfg.display_name().to_string());

	let missing: Vec<&str> = cfg
		.required_env
		.iter()
		.filter(|k| merged.get(k.as_str()).map(|v| v.is_empty()).unwrap_or(true))
		.map(String::as_str)
		.collect();
	if !missing.is_empty() {
		match cfg.env_policy {
			EnvPolicy::Fail => {
				return Err(format!(
					"process {}: missing required env: {}",
					cfg.id,
					missing.join(", ")
				));
			},
			EnvPolicy::Warn => {
				warn!(id = %cfg.id, "missing required env: {}", missing.join(", "));
			},
		}
	}
	Ok(merged)
}
