// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite persistence for Stowage.
//!
//! Each store is a trait with a SQLite implementation so the engine can be
//! exercised against in-memory databases or fakes.

pub mod backup;
pub mod connection;
pub mod error;
pub mod migrations;
pub mod notification;
pub mod pool;
pub mod schedule;
pub mod settings;
pub mod testing;

pub use backup::{BackupRepository, SqliteBackupRepository};
pub use connection::{ConnectionRegistry, SqliteConnectionRegistry};
pub use error::{DbError, Result};
pub use migrations::run_migrations;
pub use notification::{NotificationRepository, SqliteNotificationRepository};
pub use pool::create_pool;
pub use schedule::{ScheduleRepository, SqliteScheduleRepository};
pub use settings::{SettingsStore, SqliteSettingsStore};

use chrono::{DateTime, Utc};
use stowage_backup_core::parse_timestamp;

pub(crate) fn parse_opt_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
	value
		.filter(|v| !v.trim().is_empty())
		.map(|v| parse_timestamp(&v))
		.transpose()
		.map_err(DbError::from)
}
