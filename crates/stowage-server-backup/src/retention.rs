// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use stowage_server_db::BackupRepository;
use tracing::{debug, info, instrument, warn};

/// What one cleanup pass did. Failures are counted, never returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
	pub expired: usize,
	pub files_removed: usize,
	pub records_removed: usize,
	pub failures: usize,
}

pub struct RetentionManager {
	backups: Arc<dyn BackupRepository>,
}

impl RetentionManager {
	pub fn new(backups: Arc<dyn BackupRepository>) -> Self {
		Self { backups }
	}

	/// Delete artifacts and records of `connection_id` that completed more
	/// than `retention_days` before `now`. Zero days keeps everything.
	#[instrument(skip(self, now))]
	pub async fn cleanup(
		&self,
		connection_id: &str,
		retention_days: u32,
		now: DateTime<Utc>,
	) -> CleanupReport {
		let mut report = CleanupReport::default();
		if retention_days == 0 {
			return report;
		}

		let cutoff = now - Duration::days(i64::from(retention_days));
		let expired = match self.backups.list_expired(connection_id, cutoff).await {
			Ok(expired) => expired,
			Err(e) => {
				warn!(error = %e, "failed to list expired backups");
				report.failures += 1;
				return report;
			}
		};
		report.expired = expired.len();

		for record in expired {
			match remove_artifact(Path::new(&record.path)).await {
				Ok(true) => report.files_removed += 1,
				Ok(false) => debug!(backup_id = %record.id, path = %record.path, "artifact already gone"),
				Err(e) => {
					warn!(backup_id = %record.id, path = %record.path, error = %e, "failed to delete artifact");
					report.failures += 1;
				}
			}

			match self.backups.delete_backup(record.id).await {
				Ok(true) => report.records_removed += 1,
				Ok(false) => debug!(backup_id = %record.id, "backup record already deleted"),
				Err(e) => {
					warn!(backup_id = %record.id, error = %e, "failed to delete backup record");
					report.failures += 1;
				}
			}
		}

		if report.expired > 0 {
			info!(
				cutoff = %cutoff,
				expired = report.expired,
				files_removed = report.files_removed,
				records_removed = report.records_removed,
				failures = report.failures,
				"retention cleanup finished"
			);
		}
		report
	}
}

/// `Ok(false)` when nothing was there. mongodump artifacts are directories.
pub(crate) async fn remove_artifact(path: &Path) -> std::io::Result<bool> {
	if path.as_os_str().is_empty() {
		return Ok(false);
	}
	let meta = match tokio::fs::symlink_metadata(path).await {
		Ok(meta) => meta,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
		Err(e) => return Err(e),
	};
	if meta.is_dir() {
		tokio::fs::remove_dir_all(path).await?;
	} else {
		tokio::fs::remove_file(path).await?;
	}
	Ok(true)
}
