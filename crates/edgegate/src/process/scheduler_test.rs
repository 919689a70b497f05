use chrono::TimeZone;

use super::*;

#[test]
fn five_field_expressions_accepted() {
	assert!(parse_cron("0 3 * * *").is_ok());
	assert!(parse_cron("*/5 * * * *").is_ok());
	// Six fields pass through unchanged.
	assert!(parse_cron("30 0 3 * * *").is_ok());
	assert!(parse_cron("not a cron").is_err());
}

#[test]
fn unknown_timezone_falls_back_to_utc() {
	assert_eq!(parse_tz(Some("Not/AZone")), chrono_tz::UTC);
	assert_eq!(parse_tz(None), chrono_tz::UTC);
	assert_eq!(
		parse_tz(Some("America/New_York")),
		chrono_tz::America::New_York
	);
}

#[test]
fn fires_inside_window() {
	let cron = parse_cron("0 12 * * *").unwrap();
	let after = Utc.with_ymd_and_hms(2026, 1, 5, 11, 59, 0).unwrap();
	let until = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 30).unwrap();
	assert!(fires_between(&cron, chrono_tz::UTC, after, until));
}

#[test]
fn does_not_fire_outside_window() {
	let cron = parse_cron("0 12 * * *").unwrap();
	let after = Utc.with_ymd_and_hms(2026, 1, 5, 12, 1, 0).unwrap();
	let until = Utc.with_ymd_and_hms(2026, 1, 5, 13, 0, 0).unwrap();
	assert!(!fires_between(&cron, chrono_tz::UTC, after, until));
}

/// Noon in New York in January is 17:00 UTC.
#[test]
fn timezone_shifts_fire_time() {
	let cron = parse_cron("0 12 * * *").unwrap();
	let tz = chrono_tz::America::New_York;

	let after = Utc.with_ymd_and_hms(2026, 1, 5, 16, 59, 0).unwrap();
	let until = Utc.with_ymd_and_hms(2026, 1, 5, 17, 0, 30).unwrap();
	assert!(fires_between(&cron, tz, after, until));

	let after = Utc.with_ymd_and_hms(2026, 1, 5, 11, 59, 0).unwrap();
	let until = Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 30).unwrap();
	assert!(!fires_between(&cron, tz, after, until));
}
