// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read access to stored connection profiles.
//!
//! Credentials are stored encrypted and decrypted on the way out so callers
//! only ever see [`ConnectionProfile`] with plaintext wrapped in `Secret`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use stowage_backup_core::{format_timestamp, ConnectionProfile, SshSettings};
use stowage_common_secret::{SecretCipher, SecretString};
use tracing::instrument;

use crate::error::{DbError, Result};

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
	async fn get_connection(&self, id: &str) -> Result<Option<ConnectionProfile>>;
}

#[derive(Clone)]
pub struct SqliteConnectionRegistry {
	pool: SqlitePool,
	cipher: Arc<dyn SecretCipher>,
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
	id: String,
	user_id: String,
	name: String,
	#[sqlx(rename = "type")]
	engine_type: String,
	host: String,
	port: i64,
	username: String,
	password: String,
	database_name: String,
	ssh_enabled: bool,
	ssh_host: Option<String>,
	ssh_port: Option<i64>,
	ssh_username: Option<String>,
	ssh_password: Option<String>,
	ssh_private_key: Option<String>,
}

impl SqliteConnectionRegistry {
	pub fn new(pool: SqlitePool, cipher: Arc<dyn SecretCipher>) -> Self {
		Self { pool, cipher }
	}

	fn open(&self, sealed: Option<&str>) -> Result<Option<SecretString>> {
		match sealed {
			Some(s) if !s.is_empty() => Ok(Some(self.cipher.decrypt(s)?)),
			_ => Ok(None),
		}
	}

	fn seal(&self, secret: Option<&SecretString>) -> Result<Option<String>> {
		match secret {
			Some(s) if !s.expose().is_empty() => Ok(Some(self.cipher.encrypt(s.expose())?)),
			_ => Ok(None),
		}
	}

	fn into_profile(&self, row: ConnectionRow) -> Result<ConnectionProfile> {
		let port = u16::try_from(row.port)
			.map_err(|_| DbError::Internal(format!("connection {} has invalid port {}", row.id, row.port)))?;

		let ssh = if row.ssh_enabled {
			Some(SshSettings {
				host: row.ssh_host.unwrap_or_default(),
				port: row
					.ssh_port
					.and_then(|p| u16::try_from(p).ok())
					.unwrap_or(22),
				username: row.ssh_username.unwrap_or_default(),
				password: self.open(row.ssh_password.as_deref())?,
				private_key: self.open(row.ssh_private_key.as_deref())?,
			})
		} else {
			None
		};

		Ok(ConnectionProfile {
			password: self.open(Some(row.password.as_str()))?.unwrap_or_else(|| SecretString::from("")),
			id: row.id,
			user_id: row.user_id,
			name: row.name,
			engine_type: row.engine_type,
			host: row.host,
			port,
			username: row.username,
			database_name: row.database_name,
			ssh,
		})
	}

	/// Insert or replace a profile, encrypting its credentials.
	#[instrument(skip(self, profile), fields(connection_id = %profile.id))]
	pub async fn save_connection(&self, profile: &ConnectionProfile) -> Result<()> {
		let now = format_timestamp(&Utc::now());
		sqlx::query("INSERT OR IGNORE INTO users (id, created_at) VALUES (?, ?)")
			.bind(&profile.user_id)
			.bind(&now)
			.execute(&self.pool)
			.await?;

		let ssh = profile.ssh.as_ref();
		sqlx::query(
			r#"
			INSERT INTO connections (
				id, user_id, name, type, host, port, username, password, database_name,
				ssh_enabled, ssh_host, ssh_port, ssh_username, ssh_password, ssh_private_key,
				created_at, updated_at
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				name = excluded.name,
				type = excluded.type,
				host = excluded.host,
				port = excluded.port,
				username = excluded.username,
				password = excluded.password,
				database_name = excluded.database_name,
				ssh_enabled = excluded.ssh_enabled,
				ssh_host = excluded.ssh_host,
				ssh_port = excluded.ssh_port,
				ssh_username = excluded.ssh_username,
				ssh_password = excluded.ssh_password,
				ssh_private_key = excluded.ssh_private_key,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&profile.id)
		.bind(&profile.user_id)
		.bind(&profile.name)
		.bind(&profile.engine_type)
		.bind(&profile.host)
		.bind(i64::from(profile.port))
		.bind(&profile.username)
		.bind(self.seal(Some(&profile.password))?.unwrap_or_default())
		.bind(&profile.database_name)
		.bind(ssh.is_some())
		.bind(ssh.map(|s| s.host.clone()))
		.bind(ssh.map(|s| i64::from(s.port)))
		.bind(ssh.map(|s| s.username.clone()))
		.bind(self.seal(ssh.and_then(|s| s.password.as_ref()))?)
		.bind(self.seal(ssh.and_then(|s| s.private_key.as_ref()))?)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}
}

#[async_trait]
impl ConnectionRegistry for SqliteConnectionRegistry {
	#[instrument(skip(self))]
	async fn get_connection(&self, id: &str) -> Result<Option<ConnectionProfile>> {
		let row: Option<ConnectionRow> = sqlx::query_as(
			r#"
			SELECT id, user_id, name, type, host, port, username, password, database_name,
			       ssh_enabled, ssh_host, ssh_port, ssh_username, ssh_password, ssh_private_key
			FROM connections
			WHERE id = ?
			"#,
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;

		row.map(|r| self.into_profile(r)).transpose()
	}
}
