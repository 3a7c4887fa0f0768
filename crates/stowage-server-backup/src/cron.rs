// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cron expression parsing and next-run calculation.
//!
//! Expressions have exactly six fields: seconds, minutes, hours,
//! day-of-month, month and day-of-week. Five-field Unix expressions and the
//! seven-field form with a year are rejected rather than reinterpreted.
//!
//! Numeric days of the week follow the usual 0-6 numbering with Sunday as 0
//! (7 is also Sunday). The `cron` crate counts 1-7 from Sunday, so the sixth
//! field is shifted before parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{BackupError, Result};

const FIELD_COUNT: usize = 6;

/// Parse and validate a six-field cron expression.
pub fn parse_cron(expression: &str) -> Result<Schedule> {
	let invalid = |reason: String| BackupError::InvalidCronExpression {
		expression: expression.to_string(),
		reason,
	};

	let fields = expression.split_whitespace().count();
	if fields != FIELD_COUNT {
		return Err(invalid(format!(
			"expected {FIELD_COUNT} fields (sec min hour dom month dow), got {fields}"
		)));
	}

	let shifted = expression
		.split_whitespace()
		.enumerate()
		.map(|(i, field)| {
			if i == FIELD_COUNT - 1 {
				shift_day_of_week(field)
			} else {
				field.to_string()
			}
		})
		.collect::<Vec<_>>()
		.join(" ");

	Schedule::from_str(&shifted).map_err(|e| invalid(e.to_string()))
}

fn shift_day_of_week(field: &str) -> String {
	field.split(',').map(shift_day_part).collect::<Vec<_>>().join(",")
}

/// Sunday-as-0 day number to the crate's Sunday-as-1.
fn crate_day(day: u32) -> u32 {
	if day == 7 {
		1
	} else {
		day + 1
	}
}

fn shift_day_part(part: &str) -> String {
	let (base, step) = match part.split_once('/') {
		Some((base, step)) => (base, Some(step)),
		None => (part, None),
	};
	let day = |v: &str| v.parse::<u32>().ok().filter(|d| *d <= 7);
	let with_step = |base: String| match step {
		Some(step) => format!("{base}/{step}"),
		None => base,
	};

	if let Some((lo, hi)) = base.split_once('-') {
		return match (day(lo), day(hi)) {
			(Some(0), Some(7)) => with_step("1-7".to_string()),
			// Ranges ending on Sunday-as-7 wrap, so spell them out.
			(Some(lo), Some(7)) => {
				let step = step.and_then(|s| s.parse::<usize>().ok()).unwrap_or(1).max(1);
				(lo..=7)
					.step_by(step)
					.map(|d| crate_day(d).to_string())
					.collect::<Vec<_>>()
					.join(",")
			}
			(Some(lo), Some(hi)) => with_step(format!("{}-{}", crate_day(lo), crate_day(hi))),
			_ => part.to_string(),
		};
	}

	match day(base) {
		Some(d) => with_step(crate_day(d).to_string()),
		None => part.to_string(),
	}
}

/// The first firing strictly after `after`.
pub fn next_run_after(schedule: &Schedule, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
	schedule.after(&after).next().ok_or_else(|| {
		BackupError::Internal("cron schedule has no upcoming run".to_string())
	})
}

/// Validate `expression` and compute its next firing after `now`.
pub fn next_run_for(expression: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
	let schedule = parse_cron(expression)?;
	next_run_after(&schedule, now)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Datelike, TimeZone, Weekday};
	use proptest::prelude::*;

	#[test]
	fn daily_at_two() {
		let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		let next = next_run_for("0 0 2 * * *", now).unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
	}

	#[test]
	fn daily_at_two_after_it_passed() {
		let now = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
		let next = next_run_for("0 0 2 * * *", now).unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap());
	}

	#[test]
	fn every_fifteen_seconds() {
		let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 7).unwrap();
		let next = next_run_for("*/15 * * * * *", now).unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 15).unwrap());
	}

	#[test]
	fn rejects_wrong_field_counts() {
		for expr in ["0 2 * * *", "0 0 2 * * * 2024", "", "   "] {
			let err = parse_cron(expr).unwrap_err();
			assert!(
				matches!(err, BackupError::InvalidCronExpression { .. }),
				"{expr:?} gave {err}"
			);
		}
	}

	#[test]
	fn rejects_garbage() {
		for expr in ["a b c d e f", "61 * * * * *", "0 0 25 * * *"] {
			assert!(matches!(
				parse_cron(expr),
				Err(BackupError::InvalidCronExpression { .. })
			));
		}
	}

	#[test]
	fn sunday_is_zero() {
		let monday = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
		let next = next_run_for("0 0 0 * * 0", monday).unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap());
		assert_eq!(next.weekday(), Weekday::Sun);
	}

	#[test]
	fn seven_is_also_sunday() {
		let monday = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
		assert_eq!(
			next_run_for("0 0 0 * * 7", monday).unwrap(),
			next_run_for("0 0 0 * * 0", monday).unwrap()
		);
	}

	#[test]
	fn monday_is_one() {
		let monday = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
		let next = next_run_for("0 0 2 * * 1", monday).unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
		assert_eq!(next.weekday(), Weekday::Mon);
	}

	#[test]
	fn weekday_range_skips_the_weekend() {
		let saturday = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap();
		let next = next_run_for("0 0 9 * * 1-5", saturday).unwrap();
		assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap());

		let friday = Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap();
		let days: Vec<Weekday> = parse_cron("0 0 9 * * 1-5")
			.unwrap()
			.after(&friday)
			.take(6)
			.map(|t| t.weekday())
			.collect();
		assert_eq!(
			days,
			[
				Weekday::Fri,
				Weekday::Mon,
				Weekday::Tue,
				Weekday::Wed,
				Weekday::Thu,
				Weekday::Fri
			]
		);
	}

	#[test]
	fn range_ending_on_seven_wraps_to_sunday() {
		let thursday = Utc.with_ymd_and_hms(2024, 1, 4, 12, 0, 0).unwrap();
		let days: Vec<Weekday> = parse_cron("0 0 0 * * 5-7")
			.unwrap()
			.after(&thursday)
			.take(3)
			.map(|t| t.weekday())
			.collect();
		assert_eq!(days, [Weekday::Fri, Weekday::Sat, Weekday::Sun]);
	}

	#[test]
	fn day_lists_steps_and_names() {
		assert_eq!(shift_day_of_week("0,3,6"), "1,4,7");
		assert_eq!(shift_day_of_week("1-5/2"), "2-6/2");
		assert_eq!(shift_day_of_week("*"), "*");
		assert_eq!(shift_day_of_week("?"), "?");
		assert_eq!(shift_day_of_week("Mon-Fri"), "Mon-Fri");
		assert_eq!(shift_day_of_week("0-7"), "1-7");
		assert!(parse_cron("0 0 0 * * 8").is_err());
	}

	proptest! {
		#[test]
		fn next_run_is_strictly_in_the_future(
			sec in 0u32..60,
			min in 0u32..60,
			hour in 0u32..24,
			offset_secs in 0i64..(10 * 365 * 24 * 3600),
		) {
			let expr = format!("{sec} {min} {hour} * * *");
			let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
				+ chrono::Duration::seconds(offset_secs);
			let next = next_run_for(&expr, now).unwrap();
			prop_assert!(next > now);
			prop_assert!(next - now <= chrono::Duration::days(1));
		}

		#[test]
		fn step_expressions_are_accepted(step in 1u32..30) {
			let expr = format!("0 */{step} * * * *");
			prop_assert!(parse_cron(&expr).is_ok());
		}
	}
}
