// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Artifact directory and dump execution limits.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_SCHEDULE_SYNC_SECS: u64 = 30;

fn default_dir() -> PathBuf {
	PathBuf::from("./backups")
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct BackupConfigLayer {
	pub dir: Option<PathBuf>,
	/// Kill the dump tool after this many seconds. Unset means no limit.
	pub dump_timeout_secs: Option<u64>,
	/// How often a running server re-reads schedules changed elsewhere.
	pub schedule_sync_secs: Option<u64>,
}

impl BackupConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.dir.is_some() {
			self.dir = other.dir;
		}
		if other.dump_timeout_secs.is_some() {
			self.dump_timeout_secs = other.dump_timeout_secs;
		}
		if other.schedule_sync_secs.is_some() {
			self.schedule_sync_secs = other.schedule_sync_secs;
		}
	}

	pub fn finalize(self) -> BackupConfig {
		BackupConfig {
			dir: self.dir.unwrap_or_else(default_dir),
			dump_timeout: self
				.dump_timeout_secs
				.filter(|s| *s > 0)
				.map(Duration::from_secs),
			schedule_sync_interval: Duration::from_secs(
				self
					.schedule_sync_secs
					.filter(|s| *s > 0)
					.unwrap_or(DEFAULT_SCHEDULE_SYNC_SECS),
			),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupConfig {
	pub dir: PathBuf,
	pub dump_timeout: Option<Duration>,
	pub schedule_sync_interval: Duration,
}

impl Default for BackupConfig {
	fn default() -> Self {
		BackupConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = BackupConfig::default();
		assert_eq!(config.dir, PathBuf::from("./backups"));
		assert!(config.dump_timeout.is_none());
		assert_eq!(config.schedule_sync_interval, Duration::from_secs(30));
	}

	#[test]
	fn zero_timeout_means_unlimited() {
		let config = BackupConfigLayer {
			dump_timeout_secs: Some(0),
			..Default::default()
		}
		.finalize();
		assert!(config.dump_timeout.is_none());
	}

	#[test]
	fn parses_from_toml() {
		let layer: BackupConfigLayer = toml::from_str(
			r#"
dir = "/srv/backups"
dump_timeout_secs = 3600
schedule_sync_secs = 5
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.dir, PathBuf::from("/srv/backups"));
		assert_eq!(config.dump_timeout, Some(Duration::from_secs(3600)));
		assert_eq!(config.schedule_sync_interval, Duration::from_secs(5));
	}
}
