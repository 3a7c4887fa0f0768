// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backup record persistence, listing and statistics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use stowage_backup_core::{
	format_timestamp, parse_timestamp, BackupId, BackupListItem, BackupPage, BackupRecord,
	BackupStats, BackupStatus, ListBackupsQuery, ScheduleId,
};
use tracing::{instrument, warn};

use crate::error::{DbError, Result};
use crate::parse_opt_timestamp;

#[async_trait]
pub trait BackupRepository: Send + Sync {
	async fn insert_backup(&self, record: &BackupRecord) -> Result<()>;

	/// Writes the terminal state: status, size, completion time and error.
	async fn finish_backup(&self, record: &BackupRecord) -> Result<()>;

	async fn set_object_key(&self, id: BackupId, object_key: &str) -> Result<()>;

	async fn get_backup(&self, id: BackupId) -> Result<Option<BackupRecord>>;

	/// Records of a connection whose completion time is strictly before `cutoff`.
	async fn list_expired(
		&self,
		connection_id: &str,
		cutoff: DateTime<Utc>,
	) -> Result<Vec<BackupRecord>>;

	async fn delete_backup(&self, id: BackupId) -> Result<bool>;

	async fn list_backups(&self, query: &ListBackupsQuery) -> Result<BackupPage>;

	async fn stats(&self, user_id: &str) -> Result<BackupStats>;
}

#[derive(Clone)]
pub struct SqliteBackupRepository {
	pool: SqlitePool,
}

impl SqliteBackupRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[derive(sqlx::FromRow)]
struct BackupRow {
	id: String,
	connection_id: String,
	schedule_id: Option<String>,
	status: String,
	path: String,
	size: i64,
	s3_object_key: Option<String>,
	scheduled_time: Option<String>,
	started_time: String,
	completed_time: Option<String>,
	error_message: Option<String>,
	created_at: String,
}

impl TryFrom<BackupRow> for BackupRecord {
	type Error = DbError;

	fn try_from(row: BackupRow) -> Result<Self> {
		Ok(BackupRecord {
			id: row.id.parse::<BackupId>()?,
			connection_id: row.connection_id,
			schedule_id: row
				.schedule_id
				.map(|s| s.parse::<ScheduleId>())
				.transpose()?,
			status: row.status.parse::<BackupStatus>()?,
			path: row.path,
			size: u64::try_from(row.size).unwrap_or(0),
			s3_object_key: row.s3_object_key,
			scheduled_time: parse_opt_timestamp(row.scheduled_time)?,
			started_time: parse_timestamp(&row.started_time)?,
			completed_time: parse_opt_timestamp(row.completed_time)?,
			error_message: row.error_message,
			created_at: parse_timestamp(&row.created_at)?,
		})
	}
}

#[derive(sqlx::FromRow)]
struct BackupListRow {
	#[sqlx(flatten)]
	backup: BackupRow,
	database_type: String,
	connection_name: String,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
	status: String,
	size: i64,
	started_time: String,
	completed_time: Option<String>,
}

const BACKUP_COLUMNS: &str = r#"
	b.id, b.connection_id, b.schedule_id, b.status, b.path, b.size, b.s3_object_key,
	b.scheduled_time, b.started_time, b.completed_time, b.error_message, b.created_at
"#;

#[async_trait]
impl BackupRepository for SqliteBackupRepository {
	#[instrument(skip(self, record), fields(backup_id = %record.id, connection_id = %record.connection_id))]
	async fn insert_backup(&self, record: &BackupRecord) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO backups (
				id, connection_id, schedule_id, status, path, size, s3_object_key,
				scheduled_time, started_time, completed_time, error_message, created_at
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(record.id.to_string())
		.bind(&record.connection_id)
		.bind(record.schedule_id.map(|id| id.to_string()))
		.bind(record.status.as_str())
		.bind(&record.path)
		.bind(i64::try_from(record.size).unwrap_or(i64::MAX))
		.bind(&record.s3_object_key)
		.bind(record.scheduled_time.as_ref().map(format_timestamp))
		.bind(format_timestamp(&record.started_time))
		.bind(record.completed_time.as_ref().map(format_timestamp))
		.bind(&record.error_message)
		.bind(format_timestamp(&record.created_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self, record), fields(backup_id = %record.id, status = %record.status))]
	async fn finish_backup(&self, record: &BackupRecord) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE backups
			SET status = ?, size = ?, completed_time = ?, error_message = ?
			WHERE id = ?
			"#,
		)
		.bind(record.status.as_str())
		.bind(i64::try_from(record.size).unwrap_or(i64::MAX))
		.bind(record.completed_time.as_ref().map(format_timestamp))
		.bind(&record.error_message)
		.bind(record.id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("backup {}", record.id)));
		}
		Ok(())
	}

	#[instrument(skip(self), fields(backup_id = %id))]
	async fn set_object_key(&self, id: BackupId, object_key: &str) -> Result<()> {
		sqlx::query("UPDATE backups SET s3_object_key = ? WHERE id = ?")
			.bind(object_key)
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(backup_id = %id))]
	async fn get_backup(&self, id: BackupId) -> Result<Option<BackupRecord>> {
		let row: Option<BackupRow> =
			sqlx::query_as(&format!("SELECT {BACKUP_COLUMNS} FROM backups b WHERE b.id = ?"))
				.bind(id.to_string())
				.fetch_optional(&self.pool)
				.await?;

		row.map(TryInto::try_into).transpose()
	}

	// Stored timestamps may mix RFC3339 and the older space-separated form,
	// which do not order correctly as text, so the cutoff is applied here.
	#[instrument(skip(self), fields(cutoff = %cutoff))]
	async fn list_expired(
		&self,
		connection_id: &str,
		cutoff: DateTime<Utc>,
	) -> Result<Vec<BackupRecord>> {
		let rows: Vec<BackupRow> = sqlx::query_as(&format!(
			"SELECT {BACKUP_COLUMNS} FROM backups b \
			 WHERE b.connection_id = ? AND b.completed_time IS NOT NULL"
		))
		.bind(connection_id)
		.fetch_all(&self.pool)
		.await?;

		let mut expired = Vec::new();
		for row in rows {
			let id = row.id.clone();
			let record: BackupRecord = match row.try_into() {
				Ok(record) => record,
				Err(e) => {
					warn!(backup_id = %id, error = %e, "skipping unreadable backup row");
					continue;
				}
			};
			if record.completed_time.is_some_and(|done| done < cutoff) {
				expired.push(record);
			}
		}
		Ok(expired)
	}

	#[instrument(skip(self), fields(backup_id = %id))]
	async fn delete_backup(&self, id: BackupId) -> Result<bool> {
		let result = sqlx::query("DELETE FROM backups WHERE id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	#[instrument(skip(self, query), fields(user_id = %query.user_id))]
	async fn list_backups(&self, query: &ListBackupsQuery) -> Result<BackupPage> {
		let limit = query.effective_limit();
		let offset = query.effective_offset();
		let pattern = query.search_pattern();

		let filter = r#"
			FROM backups b
			JOIN connections c ON c.id = b.connection_id
			WHERE c.user_id = ?
			  AND (? IS NULL OR LOWER(b.path) LIKE ? OR LOWER(b.status) LIKE ?)
		"#;

		let (total,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) {filter}"))
			.bind(&query.user_id)
			.bind(&pattern)
			.bind(&pattern)
			.bind(&pattern)
			.fetch_one(&self.pool)
			.await?;

		let rows: Vec<BackupListRow> = sqlx::query_as(&format!(
			"SELECT {BACKUP_COLUMNS}, c.type AS database_type, c.name AS connection_name {filter} \
			 ORDER BY b.created_at DESC LIMIT ? OFFSET ?"
		))
		.bind(&query.user_id)
		.bind(&pattern)
		.bind(&pattern)
		.bind(&pattern)
		.bind(limit)
		.bind(offset)
		.fetch_all(&self.pool)
		.await?;

		let items = rows
			.into_iter()
			.map(|row| {
				Ok(BackupListItem {
					record: row.backup.try_into()?,
					database_type: row.database_type,
					connection_name: row.connection_name,
				})
			})
			.collect::<Result<Vec<_>>>()?;

		Ok(BackupPage {
			items,
			total,
			limit,
			offset,
		})
	}

	#[instrument(skip(self))]
	async fn stats(&self, user_id: &str) -> Result<BackupStats> {
		let rows: Vec<StatsRow> = sqlx::query_as(
			r#"
			SELECT b.status, b.size, b.started_time, b.completed_time
			FROM backups b
			JOIN connections c ON c.id = b.connection_id
			WHERE c.user_id = ?
			"#,
		)
		.bind(user_id)
		.fetch_all(&self.pool)
		.await?;

		let mut stats = BackupStats {
			total_backups: rows.len() as i64,
			..Default::default()
		};
		if rows.is_empty() {
			return Ok(stats);
		}

		let mut completed = 0i64;
		let mut durations = Vec::new();
		for row in rows {
			stats.total_size += row.size;
			if row.status.parse::<BackupStatus>()? == BackupStatus::Completed {
				completed += 1;
			}
			let started = parse_timestamp(&row.started_time)?;
			if let Some(done) = parse_opt_timestamp(row.completed_time)? {
				durations.push((done - started).num_milliseconds() as f64 / 1000.0);
				if stats.last_backup_time.map_or(true, |last| done > last) {
					stats.last_backup_time = Some(done);
				}
			}
		}

		stats.average_size = stats.total_size as f64 / stats.total_backups as f64;
		stats.success_rate = completed as f64 * 100.0 / stats.total_backups as f64;
		if !durations.is_empty() {
			stats.average_duration_secs = durations.iter().sum::<f64>() / durations.len() as f64;
		}
		Ok(stats)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{insert_connection_row, migrated_pool};
	use chrono::{Duration, TimeZone};

	async fn setup() -> SqliteBackupRepository {
		let pool = migrated_pool().await.unwrap();
		insert_connection_row(&pool, "u1", "conn-1").await.unwrap();
		insert_connection_row(&pool, "u2", "conn-2").await.unwrap();
		SqliteBackupRepository::new(pool)
	}

	fn completed(conn: &str, path: &str, done: DateTime<Utc>, size: u64) -> BackupRecord {
		let mut r = BackupRecord::start(conn, None, path, None, done - Duration::seconds(10));
		r.mark_completed(size, done);
		r
	}

	#[tokio::test]
	async fn in_progress_then_finished() {
		let repo = setup().await;
		let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		let mut record = BackupRecord::start("conn-1", None, "/b/app.sql", None, now);
		repo.insert_backup(&record).await.unwrap();
		assert_eq!(
			repo.get_backup(record.id).await.unwrap().unwrap().status,
			BackupStatus::InProgress
		);

		record.mark_failed("pg_dump: connection refused", now + Duration::seconds(2));
		repo.finish_backup(&record).await.unwrap();

		let loaded = repo.get_backup(record.id).await.unwrap().unwrap();
		assert_eq!(loaded.status, BackupStatus::Failed);
		assert_eq!(loaded.error_message.as_deref(), Some("pg_dump: connection refused"));
		assert_eq!(loaded.completed_time, Some(now + Duration::seconds(2)));
	}

	#[tokio::test]
	async fn expired_uses_strict_cutoff() {
		let repo = setup().await;
		let cutoff = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
		let old = completed("conn-1", "/b/old.sql", cutoff - Duration::seconds(1), 1);
		let edge = completed("conn-1", "/b/edge.sql", cutoff, 1);
		let other = completed("conn-2", "/b/other.sql", cutoff - Duration::days(3), 1);
		let running = BackupRecord::start("conn-1", None, "/b/run.sql", None, cutoff - Duration::days(9));
		for r in [&old, &edge, &other, &running] {
			repo.insert_backup(r).await.unwrap();
		}

		let expired = repo.list_expired("conn-1", cutoff).await.unwrap();
		assert_eq!(expired.len(), 1);
		assert_eq!(expired[0].id, old.id);

		assert!(repo.delete_backup(old.id).await.unwrap());
		assert!(!repo.delete_backup(old.id).await.unwrap());
	}

	#[tokio::test]
	async fn unreadable_row_does_not_hide_expired_ones() {
		let repo = setup().await;
		let cutoff = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
		let old = completed("conn-1", "/b/old.sql", cutoff - Duration::days(2), 1);
		let corrupt = completed("conn-1", "/b/corrupt.sql", cutoff - Duration::days(3), 1);
		repo.insert_backup(&old).await.unwrap();
		repo.insert_backup(&corrupt).await.unwrap();
		sqlx::query("UPDATE backups SET completed_time = 'yesterday-ish' WHERE id = ?")
			.bind(corrupt.id.to_string())
			.execute(&repo.pool)
			.await
			.unwrap();

		let expired = repo.list_expired("conn-1", cutoff).await.unwrap();
		assert_eq!(expired.len(), 1);
		assert_eq!(expired[0].id, old.id);
	}

	#[tokio::test]
	async fn list_is_scoped_searched_and_paged() {
		let repo = setup().await;
		let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		for i in 0..12 {
			let mut r = completed("conn-1", &format!("/b/app_{i}.sql"), base + Duration::hours(i), 10);
			r.created_at = base + Duration::hours(i);
			repo.insert_backup(&r).await.unwrap();
		}
		let mut failed = BackupRecord::start("conn-1", None, "/b/broken.sql", None, base);
		failed.mark_failed("boom", base);
		repo.insert_backup(&failed).await.unwrap();
		repo
			.insert_backup(&completed("conn-2", "/b/app_other.sql", base, 10))
			.await
			.unwrap();

		let page = repo
			.list_backups(&ListBackupsQuery {
				user_id: "u1".into(),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(page.total, 13);
		assert_eq!(page.items.len(), 10);
		assert_eq!(page.items[0].record.path, "/b/app_11.sql");
		assert_eq!(page.items[0].database_type, "postgresql");

		let searched = repo
			.list_backups(&ListBackupsQuery {
				user_id: "u1".into(),
				search: Some("FAILED".into()),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(searched.total, 1);
		assert_eq!(searched.items[0].record.id, failed.id);
	}

	#[tokio::test]
	async fn stats_aggregate_per_user() {
		let repo = setup().await;
		let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
		repo.insert_backup(&completed("conn-1", "/b/a.sql", base, 100)).await.unwrap();
		repo
			.insert_backup(&completed("conn-1", "/b/b.sql", base + Duration::hours(1), 300))
			.await
			.unwrap();
		let mut failed = BackupRecord::start("conn-1", None, "/b/c.sql", None, base);
		failed.mark_failed("boom", base + Duration::seconds(10));
		repo.insert_backup(&failed).await.unwrap();

		let stats = repo.stats("u1").await.unwrap();
		assert_eq!(stats.total_backups, 3);
		assert_eq!(stats.total_size, 400);
		assert!((stats.success_rate - 66.666).abs() < 0.01);
		assert!((stats.average_duration_secs - 10.0).abs() < f64::EPSILON);
		assert_eq!(stats.last_backup_time, Some(base + Duration::hours(1)));

		assert_eq!(repo.stats("nobody").await.unwrap(), BackupStats::default());
	}
}
