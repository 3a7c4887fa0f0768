// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory databases for tests in this and downstream crates.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::DbError;
use crate::migrations::run_migrations;

/// A single-connection in-memory pool. Every connection to `:memory:` is its
/// own database, so the pool is pinned to one that never expires.
pub async fn memory_pool() -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.min_connections(1)
		.idle_timeout(None)
		.max_lifetime(None)
		.connect_with(options)
		.await?;
	Ok(pool)
}

/// [`memory_pool`] with the full schema applied.
pub async fn migrated_pool() -> Result<SqlitePool, DbError> {
	let pool = memory_pool().await?;
	run_migrations(&pool).await?;
	Ok(pool)
}

pub async fn insert_user(pool: &SqlitePool, user_id: &str) -> Result<(), DbError> {
	sqlx::query("INSERT OR IGNORE INTO users (id, created_at) VALUES (?, datetime('now'))")
		.bind(user_id)
		.execute(pool)
		.await?;
	Ok(())
}

/// Seeds a user and a bare postgres connection row with no credentials.
pub async fn insert_connection_row(
	pool: &SqlitePool,
	user_id: &str,
	connection_id: &str,
) -> Result<(), DbError> {
	insert_user(pool, user_id).await?;
	sqlx::query(
		r#"
		INSERT INTO connections (id, user_id, name, type, host, port, database_name, created_at, updated_at)
		VALUES (?, ?, ?, 'postgresql', 'localhost', 5432, 'app', datetime('now'), datetime('now'))
		"#,
	)
	.bind(connection_id)
	.bind(user_id)
	.bind(connection_id)
	.execute(pool)
	.await?;
	Ok(())
}
