use std::collections::HashSet;

use notify::{RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;

use crate::process::Supervisor;
use crate::*;

/// Quiet period after the last filesystem event before a reload is applied.
const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKind {
	Gateway,
	Processes,
}

/// Watch both config files and apply debounced reloads: the route table is
/// swapped atomically, the process table is diffed into targeted
/// start/detach calls. A reload that fails to parse is logged and the
/// previous snapshot stays live. Reloads are serialized by construction
/// (single task).
pub fn watch(inputs: Arc<ProxyInputs>, supervisor: Arc<Supervisor>, cancel: CancellationToken) {
	let Some(config_path) = inputs.cfg.config_path.clone() else {
		debug!("no config file on disk, reload watcher disabled");
		return;
	};
	let processes_path = inputs.cfg.processes_path.clone();

	let watched: Vec<PathBuf> = [Some(config_path.clone()), processes_path.clone()]
		.into_iter()
		.flatten()
		.collect();

	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ConfigKind>();
	let classify: Vec<(PathBuf, ConfigKind)> = watched
		.iter()
		.map(|p| {
			let kind = if Some(p) == processes_path.as_ref() {
				ConfigKind::Processes
			} else {
				ConfigKind::Gateway
			};
			(p.canonicalize().unwrap_or_else(|_| p.clone()), kind)
		})
		.collect();

	let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
		let Ok(event) = res else { return };
		for path in &event.paths {
			let canonical = path.canonicalize().unwrap_or_else(|_| path.clone());
			for (watched, kind) in &classify {
				if &canonical == watched || path == watched {
					let _ = tx.send(*kind);
				}
			}
		}
	}) {
		Ok(w) => w,
		Err(e) => {
			warn!("config watcher unavailable: {e}");
			return;
		},
	};

	// Watch parent directories: editors and deploy tools replace files by
	// rename, which drops a watch registered on the file itself.
	let mut dirs: HashSet<PathBuf> = HashSet::new();
	for path in &watched {
		let dir = path
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.map(Path::to_path_buf)
			.unwrap_or_else(|| PathBuf::from("."));
		dirs.insert(dir);
	}
	for dir in dirs {
		if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
			warn!(dir = %dir.display(), "cannot watch config dir: {e}");
		}
	}

	tokio::spawn(async move {
		// Keep the watcher alive for the life of the task.
		let _watcher = watcher;
		loop {
			let first = tokio::select! {
				ev = rx.recv() => match ev {
					Some(kind) => kind,
					None => return,
				},
				_ = cancel.cancelled() => return,
			};
			let mut kinds = HashSet::from([first]);
			// Debounce: keep absorbing events until the files go quiet.
			loop {
				match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
					Ok(Some(kind)) => {
						kinds.insert(kind);
					},
					Ok(None) => return,
					Err(_) => break,
				}
			}

			info!(?kinds, "config changed, reloading");
			let loaded = config::load(&config_path, processes_path.as_deref()).await;
			let new_cfg = match loaded {
				Ok(cfg) => cfg,
				Err(e) => {
					warn!("reload rejected, keeping previous config: {e:#}");
					continue;
				},
			};

			if kinds.contains(&ConfigKind::Gateway) {
				match new_cfg.route_table() {
					Ok(table) => {
						inputs.routes.store(Arc::new(table));
						info!("route table swapped");
					},
					Err(e) => warn!("reload rejected, keeping previous routes: {e:#}"),
				}
			}
			if kinds.contains(&ConfigKind::Processes) {
				supervisor.apply_config(new_cfg.processes).await;
			}
		}
	});
}
