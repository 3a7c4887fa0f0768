// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Embedded schema migrations, safe to run on every startup.

use sqlx::SqlitePool;

use crate::error::DbError;

const MIGRATIONS: &[(&str, &str)] = &[
	(
		"001_connections_and_settings",
		include_str!("../migrations/001_connections_and_settings.sql"),
	),
	(
		"002_schedules_and_backups",
		include_str!("../migrations/002_schedules_and_backups.sql"),
	),
	(
		"003_notifications",
		include_str!("../migrations/003_notifications.sql"),
	),
	(
		"004_backup_object_key",
		include_str!("../migrations/004_backup_object_key.sql"),
	),
];

fn is_benign(err: &sqlx::Error) -> bool {
	let msg = err.to_string();
	msg.contains("already exists") || msg.contains("duplicate column")
}

#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	for (name, sql) in MIGRATIONS {
		for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
			if let Err(e) = sqlx::query(stmt).execute(pool).await {
				if !is_benign(&e) {
					tracing::error!(migration = %name, error = %e, "migration failed");
					return Err(e.into());
				}
			}
		}
		tracing::debug!(migration = %name, "migration applied");
	}

	Ok(())
}
