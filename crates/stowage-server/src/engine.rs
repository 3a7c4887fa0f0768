// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Builds the backup engine from resolved configuration.

use std::sync::Arc;

use anyhow::Context;
use stowage_common_secret::{AesGcmCipher, SecretCipher};
use stowage_server_backup::{
	BackupExecutor, BinaryLocator, LiveTransport, NotificationDispatcher, NotificationWorker,
	OffsiteUploader, RetentionManager, ScheduleManager, SshTunnelOpener,
};
use stowage_server_config::ServerConfig;
use stowage_server_db::{
	create_pool, run_migrations, SqliteBackupRepository, SqliteConnectionRegistry,
	SqliteNotificationRepository, SqliteScheduleRepository, SqliteSettingsStore,
};

pub struct Engine {
	pub manager: ScheduleManager,
	pub notifier: Arc<NotificationDispatcher>,
	pub backups: Arc<SqliteBackupRepository>,
}

impl Engine {
	pub async fn build(config: &ServerConfig) -> anyhow::Result<Self> {
		let key = config
			.encryption_key
			.as_ref()
			.context("STOWAGE_SERVER_ENCRYPTION_KEY is required to read stored credentials")?;
		let cipher: Arc<dyn SecretCipher> =
			Arc::new(AesGcmCipher::from_hex(key.expose()).context("invalid encryption key")?);

		let pool = create_pool(&config.database.url).await?;
		run_migrations(&pool).await?;

		let connections = Arc::new(SqliteConnectionRegistry::new(pool.clone(), cipher.clone()));
		let backups = Arc::new(SqliteBackupRepository::new(pool.clone()));
		let schedules = Arc::new(SqliteScheduleRepository::new(pool.clone()));
		let settings = Arc::new(SqliteSettingsStore::new(pool.clone()));
		let notifications = Arc::new(SqliteNotificationRepository::new(pool));

		let offsite = Arc::new(OffsiteUploader::new(
			settings.clone(),
			cipher.clone(),
			config.offsite.upload_timeout,
		));
		let executor = BackupExecutor::new(
			connections.clone(),
			backups.clone(),
			BinaryLocator::new(config.tools.clone()),
			Arc::new(SshTunnelOpener::new(config.tunnel.clone())),
			&config.backup,
		)
		.with_offsite(offsite);

		let worker = NotificationWorker::new(
			connections,
			settings,
			notifications,
			cipher,
			Arc::new(LiveTransport::new(config.notifications.webhook_timeout)),
		);
		let notifier = Arc::new(NotificationDispatcher::start(
			worker,
			config.notifications.queue_capacity,
		));

		let manager = ScheduleManager::new(
			schedules,
			Arc::new(executor),
			RetentionManager::new(backups.clone()),
			notifier.clone(),
		);

		Ok(Self {
			manager,
			notifier,
			backups,
		})
	}

	/// Timers first so no new alerts are queued, then drain the alert queue.
	pub async fn shutdown(&self) {
		self.manager.shutdown().await;
		self.notifier.shutdown().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn refuses_to_start_without_encryption_key() {
		let config = ServerConfig::default();
		let err = match Engine::build(&config).await {
			Ok(_) => panic!("engine built without a key"),
			Err(e) => e,
		};
		assert!(err.to_string().contains("STOWAGE_SERVER_ENCRYPTION_KEY"));
	}

	#[tokio::test]
	async fn rejects_malformed_encryption_key() {
		let config = ServerConfig {
			encryption_key: Some("not-hex".into()),
			..Default::default()
		};
		let err = match Engine::build(&config).await {
			Ok(_) => panic!("engine built with a bad key"),
			Err(e) => e,
		};
		assert!(err.to_string().contains("invalid encryption key"));
	}
}
