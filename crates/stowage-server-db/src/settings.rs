// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-user notification and off-site storage settings.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use stowage_backup_core::{
	format_timestamp, NotificationPreferences, OffsiteSettings, SmtpSettings, UserSettings,
};
use tracing::instrument;

use crate::error::Result;

/// Secrets come back still encrypted.
#[async_trait]
pub trait SettingsStore: Send + Sync {
	async fn get_settings(&self, user_id: &str) -> Result<Option<UserSettings>>;
}

#[derive(Clone)]
pub struct SqliteSettingsStore {
	pool: SqlitePool,
}

impl SqliteSettingsStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[instrument(skip(self, settings), fields(user_id = %settings.user_id))]
	pub async fn save_settings(&self, settings: &UserSettings) -> Result<()> {
		let n = &settings.notifications;
		let s3 = &settings.offsite;
		sqlx::query(
			r#"
			INSERT OR REPLACE INTO user_settings (
				user_id, notify_dashboard, notify_email, notify_webhook, webhook_url, email,
				smtp_host, smtp_port, smtp_username, smtp_password,
				s3_enabled, s3_endpoint, s3_region, s3_bucket, s3_access_key, s3_secret_key,
				s3_path_prefix, s3_use_ssl, updated_at
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&settings.user_id)
		.bind(n.notify_dashboard)
		.bind(n.notify_email)
		.bind(n.notify_webhook)
		.bind(&n.webhook_url)
		.bind(&n.email)
		.bind(&n.smtp.host)
		.bind(n.smtp.port.map(i64::from))
		.bind(&n.smtp.username)
		.bind(&n.smtp.password_encrypted)
		.bind(s3.enabled)
		.bind(&s3.endpoint)
		.bind(&s3.region)
		.bind(&s3.bucket)
		.bind(&s3.access_key)
		.bind(&s3.secret_key_encrypted)
		.bind(&s3.path_prefix)
		.bind(s3.use_ssl)
		.bind(format_timestamp(&Utc::now()))
		.execute(&self.pool)
		.await?;

		Ok(())
	}
}

#[derive(sqlx::FromRow)]
struct SettingsRow {
	user_id: String,
	notify_dashboard: bool,
	notify_email: bool,
	notify_webhook: bool,
	webhook_url: Option<String>,
	email: Option<String>,
	smtp_host: Option<String>,
	smtp_port: Option<i64>,
	smtp_username: Option<String>,
	smtp_password: Option<String>,
	s3_enabled: bool,
	s3_endpoint: Option<String>,
	s3_region: Option<String>,
	s3_bucket: Option<String>,
	s3_access_key: Option<String>,
	s3_secret_key: Option<String>,
	s3_path_prefix: Option<String>,
	s3_use_ssl: bool,
}

impl From<SettingsRow> for UserSettings {
	fn from(row: SettingsRow) -> Self {
		UserSettings {
			user_id: row.user_id,
			notifications: NotificationPreferences {
				notify_dashboard: row.notify_dashboard,
				notify_email: row.notify_email,
				notify_webhook: row.notify_webhook,
				webhook_url: row.webhook_url,
				email: row.email,
				smtp: SmtpSettings {
					host: row.smtp_host,
					port: row.smtp_port.and_then(|p| u16::try_from(p).ok()),
					username: row.smtp_username,
					password_encrypted: row.smtp_password,
				},
			},
			offsite: OffsiteSettings {
				enabled: row.s3_enabled,
				endpoint: row.s3_endpoint,
				region: row.s3_region,
				bucket: row.s3_bucket,
				access_key: row.s3_access_key,
				secret_key_encrypted: row.s3_secret_key,
				path_prefix: row.s3_path_prefix,
				use_ssl: row.s3_use_ssl,
			},
		}
	}
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
	#[instrument(skip(self))]
	async fn get_settings(&self, user_id: &str) -> Result<Option<UserSettings>> {
		let row: Option<SettingsRow> = sqlx::query_as(
			r#"
			SELECT user_id, notify_dashboard, notify_email, notify_webhook, webhook_url, email,
			       smtp_host, smtp_port, smtp_username, smtp_password,
			       s3_enabled, s3_endpoint, s3_region, s3_bucket, s3_access_key, s3_secret_key,
			       s3_path_prefix, s3_use_ssl
			FROM user_settings
			WHERE user_id = ?
			"#,
		)
		.bind(user_id)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(Into::into))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{insert_user, migrated_pool};

	#[tokio::test]
	async fn save_and_load() {
		let pool = migrated_pool().await.unwrap();
		insert_user(&pool, "u1").await.unwrap();
		let store = SqliteSettingsStore::new(pool);

		let mut settings = UserSettings {
			user_id: "u1".into(),
			..Default::default()
		};
		settings.notifications.notify_webhook = true;
		settings.notifications.webhook_url = Some("https://hooks.example.com/a".into());
		settings.notifications.smtp.port = Some(465);
		settings.offsite.enabled = true;
		settings.offsite.bucket = Some("backups".into());
		store.save_settings(&settings).await.unwrap();

		let loaded = store.get_settings("u1").await.unwrap().unwrap();
		assert!(loaded.notifications.notify_webhook);
		assert_eq!(loaded.notifications.smtp.port, Some(465));
		assert_eq!(loaded.offsite.bucket.as_deref(), Some("backups"));
		assert!(store.get_settings("u2").await.unwrap().is_none());
	}
}
