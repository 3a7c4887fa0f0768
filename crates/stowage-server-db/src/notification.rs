// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Dashboard notification rows.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use stowage_backup_core::{
	format_timestamp, parse_timestamp, Notification, NotificationId, NotificationKind,
	NotificationStatus,
};
use tracing::instrument;

use crate::error::{DbError, Result};

#[async_trait]
pub trait NotificationRepository: Send + Sync {
	async fn create_notification(&self, notification: &Notification) -> Result<()>;

	async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>>;

	/// Returns false when the notification does not exist for this user.
	async fn mark_as_read(&self, user_id: &str, id: NotificationId) -> Result<bool>;
}

#[derive(Clone)]
pub struct SqliteNotificationRepository {
	pool: SqlitePool,
}

impl SqliteNotificationRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
	id: String,
	user_id: String,
	title: String,
	message: String,
	#[sqlx(rename = "type")]
	kind: String,
	status: String,
	metadata: Option<String>,
	created_at: String,
}

impl TryFrom<NotificationRow> for Notification {
	type Error = DbError;

	fn try_from(row: NotificationRow) -> Result<Self> {
		let metadata = match row.metadata.as_deref() {
			Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
			_ => serde_json::Value::Null,
		};
		Ok(Notification {
			id: row.id.parse::<NotificationId>()?,
			user_id: row.user_id,
			title: row.title,
			message: row.message,
			kind: row.kind.parse::<NotificationKind>()?,
			status: row.status.parse::<NotificationStatus>()?,
			metadata,
			created_at: parse_timestamp(&row.created_at)?,
		})
	}
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
	#[instrument(skip(self, notification), fields(user_id = %notification.user_id, notification_id = %notification.id))]
	async fn create_notification(&self, notification: &Notification) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO notifications (id, user_id, title, message, type, status, metadata, created_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(notification.id.to_string())
		.bind(&notification.user_id)
		.bind(&notification.title)
		.bind(&notification.message)
		.bind(notification.kind.as_str())
		.bind(notification.status.as_str())
		.bind(serde_json::to_string(&notification.metadata)?)
		.bind(format_timestamp(&notification.created_at))
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
		let rows: Vec<NotificationRow> = sqlx::query_as(
			r#"
			SELECT id, user_id, title, message, type, status, metadata, created_at
			FROM notifications
			WHERE user_id = ?
			ORDER BY created_at DESC
			"#,
		)
		.bind(user_id)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self), fields(notification_id = %id))]
	async fn mark_as_read(&self, user_id: &str, id: NotificationId) -> Result<bool> {
		let result = sqlx::query("UPDATE notifications SET status = ? WHERE id = ? AND user_id = ?")
			.bind(NotificationStatus::Read.as_str())
			.bind(id.to_string())
			.bind(user_id)
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::migrated_pool;
	use chrono::Utc;
	use stowage_backup_core::FailureMetadata;

	#[tokio::test]
	async fn create_list_and_mark_read() {
		let repo = SqliteNotificationRepository::new(migrated_pool().await.unwrap());
		let meta = FailureMetadata::new("c1", "orders", "mysql", "exit status 2", Utc::now());
		let n = Notification::backup_failed("u1", &meta);
		repo.create_notification(&n).await.unwrap();

		let listed = repo.list_notifications("u1").await.unwrap();
		assert_eq!(listed.len(), 1);
		assert_eq!(listed[0].status, NotificationStatus::Unread);
		assert_eq!(listed[0].metadata["database_name"], "orders");

		assert!(!repo.mark_as_read("someone-else", n.id).await.unwrap());
		assert!(repo.mark_as_read("u1", n.id).await.unwrap());
		let listed = repo.list_notifications("u1").await.unwrap();
		assert_eq!(listed[0].status, NotificationStatus::Read);
	}
}
