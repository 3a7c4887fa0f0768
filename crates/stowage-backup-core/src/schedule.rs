// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted backup schedules.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(pub Uuid);

impl ScheduleId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for ScheduleId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ScheduleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ScheduleId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s)
			.map(Self)
			.map_err(|e| CoreError::InvalidId(format!("{s}: {e}")))
	}
}

/// Cron policy for one connection. At most one row exists per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSchedule {
	pub id: ScheduleId,
	pub connection_id: String,
	/// Six fields: seconds, minutes, hours, day-of-month, month, day-of-week.
	pub cron_expression: String,
	/// 0 keeps backups forever.
	pub retention_days: u32,
	pub enabled: bool,
	pub next_run_time: Option<DateTime<Utc>>,
	pub last_run_time: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl BackupSchedule {
	pub fn new(
		connection_id: impl Into<String>,
		cron_expression: impl Into<String>,
		retention_days: u32,
		next_run_time: Option<DateTime<Utc>>,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			id: ScheduleId::new(),
			connection_id: connection_id.into(),
			cron_expression: cron_expression.into(),
			retention_days,
			enabled: true,
			next_run_time,
			last_run_time: None,
			created_at: now,
			updated_at: now,
		}
	}

	/// True when the persisted next run lies before `now`.
	pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
		self.next_run_time.is_some_and(|next| next < now)
	}
}
