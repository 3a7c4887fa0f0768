// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Timestamp encoding for persisted rows.
//!
//! Rows are written as RFC3339. Older stores wrote `YYYY-MM-DD HH:MM:SS` with
//! an optional `±HH:MM` offset, so reads accept all three shapes. A value
//! without an offset is taken as UTC.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};

use crate::CoreError;

const OFFSET_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";
const NAIVE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, CoreError> {
	let value = value.trim();

	if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
		return Ok(dt.with_timezone(&Utc));
	}
	if let Ok(dt) = DateTime::<FixedOffset>::parse_from_str(value, OFFSET_FORMAT) {
		return Ok(dt.with_timezone(&Utc));
	}
	if let Ok(naive) = NaiveDateTime::parse_from_str(value, NAIVE_FORMAT) {
		return Ok(naive.and_utc());
	}

	Err(CoreError::InvalidTimestamp(value.to_string()))
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
	value.to_rfc3339_opts(SecondsFormat::Secs, true)
}
