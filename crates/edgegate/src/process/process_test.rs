use super::*;
use crate::ext::NoStats;

fn test_config(id: &str, command: &str, args: &[&str]) -> ProcessConfig {
	ProcessConfig {
		id: id.to_string(),
		name: None,
		command: command.to_string(),
		args: args.iter().map(|s| s.to_string()).collect(),
		cwd: None,
		env: HashMap::new(),
		required_env: vec![],
		env_policy: EnvPolicy::Fail,
		enabled: true,
		pid_file: None,
		restart_on_exit: false,
		restart_delay_seconds: 1,
		max_restarts: 1,
		health_check: None,
		schedule: None,
	}
}

fn supervisor(dir: &Path) -> Arc<Supervisor> {
	Supervisor::new(
		Some(dir.join("pids")),
		dir.join("logs"),
		dir,
		Arc::new(NoStats),
		tokio_util::sync::CancellationToken::new(),
	)
}

#[test]
fn env_substitution() {
	let mut ctx = HashMap::new();
	ctx.insert("PROCESS_ID".to_string(), "w1".to_string());
	ctx.insert("HOME".to_string(), "/home/u".to_string());
	assert_eq!(expand_env("${PROCESS_ID}-suffix", &ctx), "w1-suffix");
	assert_eq!(expand_env("${HOME}/bin", &ctx), "/home/u/bin");
	assert_eq!(expand_env("${UNKNOWN_VAR}", &ctx), "");
	assert_eq!(expand_env("plain", &ctx), "plain");
}

#[test]
fn build_env_adds_supervisor_markers() {
	let mut cfg = test_config("w1", "true", &[]);
	cfg.env.insert("GREETING".to_string(), "hi-${PROCESS_ID}".to_string());
	let env = build_env(&cfg).unwrap();
	assert_eq!(env.get("PROXY_PROCESS_ID").map(String::as_str), Some("w1"));
	assert_eq!(env.get("PROXY_PROCESS_NAME").map(String::as_str), Some("w1"));
	assert_eq!(env.get("GREETING").map(String::as_str), Some("hi-w1"));
}

#[test]
fn required_env_policy() {
	let mut cfg = test_config("w1", "true", &[]);
	cfg.required_env = vec!["DEFINITELY_NOT_SET_ANYWHERE_12345".to_string()];
	assert!(build_env(&cfg).is_err());

	cfg.env_policy = EnvPolicy::Warn;
	assert!(build_env(&cfg).is_ok());
}

#[tokio::test]
async fn pid_file_resolution_order() {
	let dir = tempfile::tempdir().unwrap();
	let sup = supervisor(dir.path());

	let mut cfg = test_config("w1", "true", &[]);
	assert_eq!(sup.pid_file(&cfg), dir.path().join("pids").join("w1.pid"));

	cfg.pid_file = Some(PathBuf::from("/var/run/custom.pid"));
	assert_eq!(sup.pid_file(&cfg), PathBuf::from("/var/run/custom.pid"));

	let no_dir = Supervisor::new(
		None,
		dir.path().join("logs"),
		dir.path(),
		Arc::new(NoStats),
		tokio_util::sync::CancellationToken::new(),
	);
	cfg.pid_file = None;
	assert_eq!(no_dir.pid_file(&cfg), PathBuf::from("/tmp/w1.pid"));
}

#[tokio::test]
async fn stopped_set_round_trips() {
	let dir = tempfile::tempdir().unwrap();
	{
		let sup = supervisor(dir.path());
		sup.mark_stopped("w1").await;
	}
	let raw = std::fs::read_to_string(dir.path().join("stopped-processes.json")).unwrap();
	let set: StoppedSet = serde_json::from_str(&raw).unwrap();
	assert_eq!(set.stopped_processes, vec!["w1".to_string()]);
	assert!(set.timestamp > 0);

	let sup = supervisor(dir.path());
	assert!(sup.stopped.lock().unwrap().contains("w1"));
}

/// §reconnect: a PID file holding a live PID attaches without re-exec.
#[tokio::test]
async fn reconnects_to_live_pid() {
	let dir = tempfile::tempdir().unwrap();
	let sup = supervisor(dir.path());

	// Our own PID is guaranteed alive; the configured command does not even
	// exist, so a spawn attempt would fail loudly.
	let cfg = test_config("w1", "/nonexistent/never-runs", &[]);
	let pid_path = sup.pid_file(&cfg);
	std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
	std::fs::write(&pid_path, std::process::id().to_string()).unwrap();

	sup.start_all(vec![cfg]).await;
	let status = sup.status("w1").expect("registered");
	assert_eq!(status.state, ProcessState::Reconnected);
	assert_eq!(status.pid, Some(std::process::id()));
	assert_eq!(status.restart_count, 0);
	assert!(!status.stopped_by_user);
	sup.detach_all();
}

#[tokio::test]
async fn garbage_pid_file_is_deleted() {
	let dir = tempfile::tempdir().unwrap();
	let sup = supervisor(dir.path());
	let cfg = test_config("w1", "/nonexistent/never-runs", &[]);
	let pid_path = sup.pid_file(&cfg);
	std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
	std::fs::write(&pid_path, "not-a-pid").unwrap();

	sup.start_all(vec![cfg]).await;
	assert!(!pid_path.exists());
}

/// §user-stop persistence: with no live PID to reconnect to, a previously
/// stopped id stays Stopped and is not spawned.
#[tokio::test]
async fn user_stop_survives_restart() {
	let dir = tempfile::tempdir().unwrap();
	{
		let sup = supervisor(dir.path());
		sup.mark_stopped("w1").await;
	}

	let sup = supervisor(dir.path());
	sup.start_all(vec![test_config("w1", "sleep", &["30"])]).await;
	let status = sup.status("w1").expect("registered");
	assert_eq!(status.state, ProcessState::Stopped);
	assert!(status.stopped_by_user);
	assert_eq!(status.pid, None);
}

/// A live PID discovered by reconnect clears persisted stopped-status.
#[tokio::test]
async fn reconnect_clears_stopped_status() {
	let dir = tempfile::tempdir().unwrap();
	{
		let sup = supervisor(dir.path());
		sup.mark_stopped("w1").await;
	}

	let sup = supervisor(dir.path());
	let cfg = test_config("w1", "/nonexistent/never-runs", &[]);
	let pid_path = sup.pid_file(&cfg);
	std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
	std::fs::write(&pid_path, std::process::id().to_string()).unwrap();

	sup.start_all(vec![cfg]).await;
	let status = sup.status("w1").unwrap();
	assert_eq!(status.state, ProcessState::Reconnected);
	assert!(!status.stopped_by_user);
	assert!(!sup.stopped.lock().unwrap().contains("w1"));
	sup.detach_all();
}

#[cfg(unix)]
#[tokio::test]
async fn spawn_and_graceful_stop() {
	let dir = tempfile::tempdir().unwrap();
	let sup = supervisor(dir.path());
	let cfg = test_config("w1", "sleep", &["30"]);
	let pid_path = sup.pid_file(&cfg);

	sup.start_all(vec![cfg]).await;
	let status = sup.status("w1").expect("registered");
	assert_eq!(status.state, ProcessState::Running);
	let pid = status.pid.expect("has pid");
	assert!(alive(pid));
	assert_eq!(
		std::fs::read_to_string(&pid_path).unwrap().trim(),
		pid.to_string()
	);

	sup.stop("w1").await;
	let status = sup.status("w1").unwrap();
	assert_eq!(status.state, ProcessState::Stopped);
	assert!(status.stopped_by_user);
	assert!(!pid_path.exists());
	assert!(sup.stopped.lock().unwrap().contains("w1"));
}

#[tokio::test]
async fn disabled_processes_not_started() {
	let dir = tempfile::tempdir().unwrap();
	let sup = supervisor(dir.path());
	let mut cfg = test_config("w1", "sleep", &["30"]);
	cfg.enabled = false;
	sup.start_all(vec![cfg]).await;
	assert!(sup.status("w1").is_none());
}
