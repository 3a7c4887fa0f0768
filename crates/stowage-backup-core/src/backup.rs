// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backup records and artifact naming.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, ScheduleId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupId(pub Uuid);

impl BackupId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for BackupId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for BackupId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for BackupId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s)
			.map(Self)
			.map_err(|e| CoreError::InvalidId(format!("{s}: {e}")))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
	/// Transient; never the state of a record handed back after a run.
	InProgress,
	Completed,
	Failed,
}

impl BackupStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::InProgress => "in_progress",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	pub fn is_terminal(&self) -> bool {
		!matches!(self, Self::InProgress)
	}
}

impl fmt::Display for BackupStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for BackupStatus {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"in_progress" => Ok(Self::InProgress),
			"completed" | "success" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			_ => Err(CoreError::UnknownStatus(s.to_string())),
		}
	}
}

/// One backup attempt and its artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
	pub id: BackupId,
	pub connection_id: String,
	pub schedule_id: Option<ScheduleId>,
	pub status: BackupStatus,
	pub path: String,
	pub size: u64,
	pub s3_object_key: Option<String>,
	pub scheduled_time: Option<DateTime<Utc>>,
	pub started_time: DateTime<Utc>,
	pub completed_time: Option<DateTime<Utc>>,
	pub error_message: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl BackupRecord {
	pub fn start(
		connection_id: impl Into<String>,
		schedule_id: Option<ScheduleId>,
		path: impl Into<String>,
		scheduled_time: Option<DateTime<Utc>>,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			id: BackupId::new(),
			connection_id: connection_id.into(),
			schedule_id,
			status: BackupStatus::InProgress,
			path: path.into(),
			size: 0,
			s3_object_key: None,
			scheduled_time,
			started_time: now,
			completed_time: None,
			error_message: None,
			created_at: now,
		}
	}

	pub fn mark_completed(&mut self, size: u64, at: DateTime<Utc>) {
		self.status = BackupStatus::Completed;
		self.size = size;
		self.completed_time = Some(at);
		self.error_message = None;
	}

	pub fn mark_failed(&mut self, error: impl Into<String>, at: DateTime<Utc>) {
		self.status = BackupStatus::Failed;
		self.completed_time = Some(at);
		self.error_message = Some(error.into());
	}

	pub fn duration_secs(&self) -> Option<f64> {
		self
			.completed_time
			.map(|done| (done - self.started_time).num_milliseconds() as f64 / 1000.0)
	}
}

/// `<database>_<YYYYMMDDHHMMSS>.sql`, used for every engine.
pub fn artifact_file_name(database_name: &str, at: DateTime<Utc>) -> String {
	let safe: String = database_name
		.chars()
		.map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
		.collect();
	format!("{}_{}.sql", safe, at.format("%Y%m%d%H%M%S"))
}
