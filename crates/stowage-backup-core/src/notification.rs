// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dashboard notifications and the failure payload shared by every channel.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{format_timestamp, CoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for NotificationId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for NotificationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for NotificationId {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Uuid::parse_str(s)
			.map(Self)
			.map_err(|e| CoreError::InvalidId(format!("{s}: {e}")))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
	BackupFailed,
}

impl NotificationKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::BackupFailed => "backup_failed",
		}
	}
}

impl FromStr for NotificationKind {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"backup_failed" => Ok(Self::BackupFailed),
			_ => Err(CoreError::UnknownStatus(s.to_string())),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
	Unread,
	Read,
}

impl NotificationStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Unread => "unread",
			Self::Read => "read",
		}
	}
}

impl FromStr for NotificationStatus {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"unread" => Ok(Self::Unread),
			"read" => Ok(Self::Read),
			_ => Err(CoreError::UnknownStatus(s.to_string())),
		}
	}
}

/// Structured context attached to every failure alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureMetadata {
	pub connection_id: String,
	pub database_name: String,
	pub database_type: String,
	pub error: String,
	/// RFC3339.
	pub timestamp: String,
}

impl FailureMetadata {
	pub fn new(
		connection_id: impl Into<String>,
		database_name: impl Into<String>,
		database_type: impl Into<String>,
		error: impl Into<String>,
		at: DateTime<Utc>,
	) -> Self {
		Self {
			connection_id: connection_id.into(),
			database_name: database_name.into(),
			database_type: database_type.into(),
			error: error.into(),
			timestamp: format_timestamp(&at),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
	pub id: NotificationId,
	pub user_id: String,
	pub title: String,
	pub message: String,
	pub kind: NotificationKind,
	pub status: NotificationStatus,
	pub metadata: serde_json::Value,
	pub created_at: DateTime<Utc>,
}

impl Notification {
	pub fn backup_failed(user_id: impl Into<String>, metadata: &FailureMetadata) -> Self {
		Self {
			id: NotificationId::new(),
			user_id: user_id.into(),
			title: "Backup Failed".to_string(),
			message: format!(
				"Backup failed for database '{}': {}",
				metadata.database_name, metadata.error
			),
			kind: NotificationKind::BackupFailed,
			status: NotificationStatus::Unread,
			metadata: serde_json::to_value(metadata).unwrap_or(serde_json::Value::Null),
			created_at: Utc::now(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn backup_failed_notification_shape() {
		let at = Utc.with_ymd_and_hms(2024, 1, 2, 2, 0, 0).unwrap();
		let meta = FailureMetadata::new("c1", "orders", "postgresql", "exit status 1", at);
		let n = Notification::backup_failed("u1", &meta);

		assert_eq!(n.title, "Backup Failed");
		assert_eq!(n.message, "Backup failed for database 'orders': exit status 1");
		assert_eq!(n.status, NotificationStatus::Unread);
		assert_eq!(n.metadata["connection_id"], "c1");
		assert_eq!(n.metadata["database_type"], "postgresql");
		assert_eq!(n.metadata["timestamp"], "2024-01-02T02:00:00Z");
	}
}
