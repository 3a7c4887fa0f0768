// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections for stowage-server.

pub mod backup;
pub mod database;
pub mod logging;
pub mod notifications;
pub mod offsite;
pub mod tools;
pub mod tunnel;

pub use backup::{BackupConfig, BackupConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use notifications::{NotificationsConfig, NotificationsConfigLayer};
pub use offsite::{OffsiteConfig, OffsiteConfigLayer};
pub use tools::{ToolsConfig, ToolsConfigLayer};
pub use tunnel::{HostKeyPolicy, TunnelConfig, TunnelConfigLayer};
