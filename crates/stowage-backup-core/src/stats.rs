// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Listing and aggregate views over backup history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BackupRecord;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBackupsQuery {
	pub user_id: String,
	pub limit: Option<i64>,
	pub offset: Option<i64>,
	pub search: Option<String>,
}

impl ListBackupsQuery {
	pub fn effective_limit(&self) -> i64 {
		match self.limit {
			Some(l) if l > 0 => l.min(MAX_PAGE_SIZE),
			_ => DEFAULT_PAGE_SIZE,
		}
	}

	pub fn effective_offset(&self) -> i64 {
		self.offset.unwrap_or(0).max(0)
	}

	/// Lower-cased `%term%` pattern, or `None` for an empty search.
	pub fn search_pattern(&self) -> Option<String> {
		self
			.search
			.as_deref()
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(|s| format!("%{}%", s.to_lowercase()))
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupListItem {
	#[serde(flatten)]
	pub record: BackupRecord,
	pub database_type: String,
	pub connection_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPage {
	pub items: Vec<BackupListItem>,
	pub total: i64,
	pub limit: i64,
	pub offset: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupStats {
	pub total_backups: i64,
	pub total_size: i64,
	pub average_size: f64,
	pub average_duration_secs: f64,
	/// Percentage of completed backups, 0 to 100.
	pub success_rate: f64,
	pub last_backup_time: Option<DateTime<Utc>>,
}
