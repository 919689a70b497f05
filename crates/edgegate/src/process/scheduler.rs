use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use tokio_util::sync::CancellationToken;

use crate::process::Supervisor;
use crate::*;

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod tests;

/// The cron crate wants a seconds field; configured expressions use the
/// classic five fields.
pub fn parse_cron(expr: &str) -> Result<CronSchedule, cron::error::Error> {
	let fields = expr.split_whitespace().count();
	if fields == 5 {
		CronSchedule::from_str(&format!("0 {expr}"))
	} else {
		CronSchedule::from_str(expr)
	}
}

pub fn parse_tz(tz: Option<&str>) -> Tz {
	match tz {
		Some(name) => match name.parse() {
			Ok(tz) => tz,
			Err(_) => {
				warn!(tz = name, "unknown timezone, falling back to UTC");
				chrono_tz::UTC
			},
		},
		None => chrono_tz::UTC,
	}
}

/// Whether the schedule fires in the window `(after, until]`, evaluated in
/// the configured timezone.
pub fn fires_between(
	schedule: &CronSchedule,
	tz: Tz,
	after: DateTime<Utc>,
	until: DateTime<Utc>,
) -> bool {
	schedule
		.after(&after.with_timezone(&tz))
		.next()
		.map(|t| t.with_timezone(&Utc) <= until)
		.unwrap_or(false)
}

/// Schedule evaluator: one tick per minute. Triggers are at-least-once; a
/// missed minute during a long stall fires on the next tick.
pub async fn run(sup: Arc<Supervisor>, cancel: CancellationToken) {
	let mut last = Utc::now();
	let mut tick = tokio::time::interval(Duration::from_secs(60));
	tick.tick().await;
	loop {
		tokio::select! {
			_ = tick.tick() => {},
			_ = cancel.cancelled() => return,
		}
		let now = Utc::now();
		for entry in sup.entries() {
			let Some(schedule) = &entry.config.schedule else {
				continue;
			};
			let cron = match parse_cron(&schedule.cron) {
				Ok(c) => c,
				Err(e) => {
					warn!(id = %entry.config.id, cron = %schedule.cron, "invalid cron expression: {e}");
					continue;
				},
			};
			let tz = parse_tz(schedule.timezone.as_deref());
			if !fires_between(&cron, tz, last, now) {
				continue;
			}

			let id = entry.config.id.clone();
			if schedule.skip_if_running && sup.is_running(&id) {
				debug!(id = %id, "schedule fired but process already running");
				continue;
			}
			info!(id = %id, "schedule fired, starting process");
			sup.start_managed(&entry, false).await;

			if schedule.auto_stop {
				if let Some(secs) = schedule.max_duration_seconds {
					let sup = sup.clone();
					let cancel = cancel.clone();
					tokio::spawn(async move {
						tokio::select! {
							_ = tokio::time::sleep(Duration::from_secs(secs)) => {},
							_ = cancel.cancelled() => return,
						}
						info!(id = %id, "max duration reached, stopping scheduled process");
						sup.stop_transient(&id).await;
					});
				}
			}
		}
		last = now;
	}
}
