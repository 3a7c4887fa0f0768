// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backup schedule persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use stowage_backup_core::{format_timestamp, parse_timestamp, BackupSchedule, ScheduleId};
use tracing::instrument;

use crate::error::{DbError, Result};
use crate::parse_opt_timestamp;

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
	async fn get_schedule(&self, id: ScheduleId) -> Result<Option<BackupSchedule>>;

	async fn get_schedule_by_connection(&self, connection_id: &str)
		-> Result<Option<BackupSchedule>>;

	async fn insert_schedule(&self, schedule: &BackupSchedule) -> Result<()>;

	/// Rewrites cron, retention, enabled flag and next run.
	async fn update_schedule(&self, schedule: &BackupSchedule) -> Result<()>;

	async fn set_enabled(&self, id: ScheduleId, enabled: bool, at: DateTime<Utc>) -> Result<()>;

	/// Bookkeeping after a firing. `next_run` was computed from
	/// `cron_expression` and is only stored while the row still carries it.
	async fn record_run(
		&self,
		id: ScheduleId,
		cron_expression: &str,
		last_run: DateTime<Utc>,
		next_run: Option<DateTime<Utc>>,
	) -> Result<()>;

	async fn list_enabled_schedules(&self) -> Result<Vec<BackupSchedule>>;
}

#[derive(Clone)]
pub struct SqliteScheduleRepository {
	pool: SqlitePool,
}

impl SqliteScheduleRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
	id: String,
	connection_id: String,
	enabled: bool,
	cron_expression: String,
	retention_days: i64,
	next_run_time: Option<String>,
	last_run_time: Option<String>,
	created_at: String,
	updated_at: String,
}

impl TryFrom<ScheduleRow> for BackupSchedule {
	type Error = DbError;

	fn try_from(row: ScheduleRow) -> Result<Self> {
		Ok(BackupSchedule {
			id: row.id.parse::<ScheduleId>()?,
			connection_id: row.connection_id,
			cron_expression: row.cron_expression,
			retention_days: u32::try_from(row.retention_days.max(0)).unwrap_or(u32::MAX),
			enabled: row.enabled,
			next_run_time: parse_opt_timestamp(row.next_run_time)?,
			last_run_time: parse_opt_timestamp(row.last_run_time)?,
			created_at: parse_timestamp(&row.created_at)?,
			updated_at: parse_timestamp(&row.updated_at)?,
		})
	}
}

const SELECT_SCHEDULE: &str = r#"
	SELECT id, connection_id, enabled, cron_expression, retention_days,
	       next_run_time, last_run_time, created_at, updated_at
	FROM backup_schedules
"#;

#[async_trait]
impl ScheduleRepository for SqliteScheduleRepository {
	#[instrument(skip(self), fields(schedule_id = %id))]
	async fn get_schedule(&self, id: ScheduleId) -> Result<Option<BackupSchedule>> {
		let row: Option<ScheduleRow> = sqlx::query_as(&format!("{SELECT_SCHEDULE} WHERE id = ?"))
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn get_schedule_by_connection(
		&self,
		connection_id: &str,
	) -> Result<Option<BackupSchedule>> {
		let row: Option<ScheduleRow> =
			sqlx::query_as(&format!("{SELECT_SCHEDULE} WHERE connection_id = ?"))
				.bind(connection_id)
				.fetch_optional(&self.pool)
				.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self, schedule), fields(schedule_id = %schedule.id, connection_id = %schedule.connection_id))]
	async fn insert_schedule(&self, schedule: &BackupSchedule) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO backup_schedules (
				id, connection_id, enabled, cron_expression, retention_days,
				next_run_time, last_run_time, created_at, updated_at
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(schedule.id.to_string())
		.bind(&schedule.connection_id)
		.bind(schedule.enabled)
		.bind(&schedule.cron_expression)
		.bind(i64::from(schedule.retention_days))
		.bind(schedule.next_run_time.as_ref().map(format_timestamp))
		.bind(schedule.last_run_time.as_ref().map(format_timestamp))
		.bind(format_timestamp(&schedule.created_at))
		.bind(format_timestamp(&schedule.updated_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self, schedule), fields(schedule_id = %schedule.id))]
	async fn update_schedule(&self, schedule: &BackupSchedule) -> Result<()> {
		let result = sqlx::query(
			r#"
			UPDATE backup_schedules
			SET cron_expression = ?, retention_days = ?, enabled = ?,
			    next_run_time = ?, updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(&schedule.cron_expression)
		.bind(i64::from(schedule.retention_days))
		.bind(schedule.enabled)
		.bind(schedule.next_run_time.as_ref().map(format_timestamp))
		.bind(format_timestamp(&schedule.updated_at))
		.bind(schedule.id.to_string())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("schedule {}", schedule.id)));
		}
		Ok(())
	}

	#[instrument(skip(self), fields(schedule_id = %id))]
	async fn set_enabled(&self, id: ScheduleId, enabled: bool, at: DateTime<Utc>) -> Result<()> {
		let result =
			sqlx::query("UPDATE backup_schedules SET enabled = ?, updated_at = ? WHERE id = ?")
				.bind(enabled)
				.bind(format_timestamp(&at))
				.bind(id.to_string())
				.execute(&self.pool)
				.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("schedule {id}")));
		}
		Ok(())
	}

	#[instrument(skip(self), fields(schedule_id = %id))]
	async fn record_run(
		&self,
		id: ScheduleId,
		cron_expression: &str,
		last_run: DateTime<Utc>,
		next_run: Option<DateTime<Utc>>,
	) -> Result<()> {
		sqlx::query(
			r#"
			UPDATE backup_schedules
			SET last_run_time = ?,
			    next_run_time = CASE WHEN cron_expression = ? THEN ? ELSE next_run_time END,
			    updated_at = ?
			WHERE id = ?
			"#,
		)
		.bind(format_timestamp(&last_run))
		.bind(cron_expression)
		.bind(next_run.as_ref().map(format_timestamp))
		.bind(format_timestamp(&Utc::now()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn list_enabled_schedules(&self) -> Result<Vec<BackupSchedule>> {
		let rows: Vec<ScheduleRow> = sqlx::query_as(&format!(
			"{SELECT_SCHEDULE} WHERE enabled = 1 ORDER BY created_at"
		))
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}
}
