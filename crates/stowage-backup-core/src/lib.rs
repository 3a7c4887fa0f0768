// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Stowage backup engine.
//!
//! Shared between persistence, the engine and the server binary. Nothing in
//! here performs I/O.

pub mod backup;
pub mod connection;
pub mod engine;
pub mod error;
pub mod notification;
pub mod schedule;
pub mod settings;
pub mod stats;
pub mod time;

pub use backup::{artifact_file_name, BackupId, BackupRecord, BackupStatus};
pub use connection::{ConnectionProfile, SshSettings};
pub use engine::EngineKind;
pub use error::{CoreError, Result};
pub use notification::{
	FailureMetadata, Notification, NotificationId, NotificationKind, NotificationStatus,
};
pub use schedule::{BackupSchedule, ScheduleId};
pub use settings::{NotificationPreferences, OffsiteSettings, SmtpSettings, UserSettings};
pub use stats::{BackupListItem, BackupPage, BackupStats, ListBackupsQuery};
pub use time::{format_timestamp, parse_timestamp};
