// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::PathBuf;

use stowage_backup_core::EngineKind;
use stowage_server_db::DbError;
use thiserror::Error;

use crate::tunnel::TunnelError;

pub type Result<T> = std::result::Result<T, BackupError>;

/// Failures that stop a backup from being scheduled, attempted or completed.
///
/// Peripheral effects (alerts, off-site upload, retention) have their own
/// error types and never surface here.
#[derive(Debug, Error)]
pub enum BackupError {
	#[error("invalid cron expression '{expression}': {reason}")]
	InvalidCronExpression { expression: String, reason: String },

	#[error("no backup schedule for connection {0}")]
	ScheduleNotFound(String),

	#[error("connection not found: {0}")]
	ConnectionNotFound(String),

	#[error("unsupported database type: {0}")]
	UnsupportedEngine(String),

	#[error("{tool} not found for {engine} (searched: {searched})")]
	ToolNotFound {
		engine: EngineKind,
		tool: String,
		searched: String,
	},

	#[error("failed to set up SSH tunnel: {0}")]
	TunnelSetupFailed(#[source] TunnelError),

	#[error("backup failed for {engine} database '{database}' on {host}:{port} - {output}")]
	DumpFailed {
		engine: EngineKind,
		database: String,
		host: String,
		port: u16,
		output: String,
	},

	#[error("failed to stat backup artifact {}: {source}", path.display())]
	ArtifactStatFailed {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("backup not found: {0}")]
	BackupNotFound(String),

	#[error("database error: {0}")]
	Database(#[from] DbError),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

impl BackupError {
	/// The pipeline stage that failed, for callers that report it verbatim.
	pub fn stage(&self) -> &'static str {
		match self {
			Self::InvalidCronExpression { .. } | Self::ScheduleNotFound(_) => "schedule",
			Self::ConnectionNotFound(_) => "connection",
			Self::UnsupportedEngine(_) => "engine",
			Self::ToolNotFound { .. } => "tool",
			Self::TunnelSetupFailed(_) => "tunnel",
			Self::DumpFailed { .. } => "dump",
			Self::ArtifactStatFailed { .. } => "artifact",
			Self::BackupNotFound(_) => "lookup",
			Self::Database(_) | Self::Io(_) | Self::Internal(_) => "internal",
		}
	}
}
