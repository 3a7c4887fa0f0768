// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The Stowage backup engine.
//!
//! [`ScheduleManager`] turns persisted schedules into timers and drives each
//! firing through [`BackupExecutor`], [`RetentionManager`] and the
//! [`NotificationDispatcher`]. The executor resolves dump tools with the
//! [`BinaryLocator`], reaches private databases through SSH tunnels and can
//! copy finished artifacts off-site with the [`OffsiteUploader`].

pub mod command;
pub mod cron;
pub mod error;
pub mod executor;
pub mod locator;
pub mod manager;
pub mod notify;
pub mod offsite;
pub mod retention;
pub mod tunnel;

pub use command::{strategy_for, DumpCommand, DumpStrategy, DumpTarget};
pub use self::cron::{next_run_after, next_run_for, parse_cron};
pub use error::{BackupError, Result};
pub use executor::{BackupExecutor, RunOrigin};
pub use locator::{BinaryLocator, Platform};
pub use manager::ScheduleManager;
pub use notify::{
	AlertTransport, FailureEvent, LiveTransport, NotificationDispatcher, NotificationWorker,
	NotifyError,
};
pub use offsite::{OffsiteError, OffsiteUploader, S3Target};
pub use retention::{CleanupReport, RetentionManager};
pub use tunnel::{SshTunnelOpener, Tunnel, TunnelError, TunnelOpener};
