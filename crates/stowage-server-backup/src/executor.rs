// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runs one backup of one connection.
//!
//! Nothing is persisted until the connection, its engine and the dump tool
//! have all been resolved. From then on the attempt is recorded: inserted as
//! `in_progress`, then finished as `completed` or `failed` before
//! [`BackupExecutor::execute`] returns. An SSH tunnel, when the profile needs
//! one, lives exactly as long as the dump process.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use stowage_backup_core::{
	artifact_file_name, BackupId, BackupRecord, BackupStatus, ConnectionProfile, EngineKind,
	ScheduleId,
};
use stowage_server_config::BackupConfig;
use stowage_server_db::{BackupRepository, ConnectionRegistry};
use tracing::{debug, error, info, instrument, warn};

use crate::command::{strategy_for, DumpCommand, DumpTarget};
use crate::error::{BackupError, Result};
use crate::locator::BinaryLocator;
use crate::offsite::OffsiteUploader;
use crate::retention::remove_artifact;
use crate::tunnel::TunnelOpener;

/// Where a run came from.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOrigin {
	pub schedule_id: Option<ScheduleId>,
	pub scheduled_time: Option<DateTime<Utc>>,
}

impl RunOrigin {
	pub fn on_demand() -> Self {
		Self::default()
	}

	pub fn scheduled(schedule_id: ScheduleId, scheduled_time: DateTime<Utc>) -> Self {
		Self {
			schedule_id: Some(schedule_id),
			scheduled_time: Some(scheduled_time),
		}
	}
}

pub struct BackupExecutor {
	connections: Arc<dyn ConnectionRegistry>,
	backups: Arc<dyn BackupRepository>,
	locator: BinaryLocator,
	tunnels: Arc<dyn TunnelOpener>,
	offsite: Option<Arc<OffsiteUploader>>,
	backup_dir: PathBuf,
	dump_timeout: Option<Duration>,
	claimed: StdMutex<HashSet<PathBuf>>,
}

const MAX_NAME_SUFFIX: u32 = 1000;

/// An artifact path reserved for one run until dropped.
struct ClaimedPath<'a> {
	claims: &'a StdMutex<HashSet<PathBuf>>,
	path: PathBuf,
}

impl Drop for ClaimedPath<'_> {
	fn drop(&mut self) {
		let mut claims = self
			.claims
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner());
		claims.remove(&self.path);
	}
}

/// `orders_20240101000000.sql` becomes `orders_20240101000000_1.sql`.
fn numbered(name: &str, n: u32) -> String {
	match name.rsplit_once('.') {
		Some((stem, ext)) => format!("{stem}_{n}.{ext}"),
		None => format!("{name}_{n}"),
	}
}

impl BackupExecutor {
	pub fn new(
		connections: Arc<dyn ConnectionRegistry>,
		backups: Arc<dyn BackupRepository>,
		locator: BinaryLocator,
		tunnels: Arc<dyn TunnelOpener>,
		config: &BackupConfig,
	) -> Self {
		Self {
			connections,
			backups,
			locator,
			tunnels,
			offsite: None,
			backup_dir: config.dir.clone(),
			dump_timeout: config.dump_timeout,
			claimed: StdMutex::new(HashSet::new()),
		}
	}

	pub fn with_offsite(mut self, uploader: Arc<OffsiteUploader>) -> Self {
		self.offsite = Some(uploader);
		self
	}

	pub fn backups(&self) -> &Arc<dyn BackupRepository> {
		&self.backups
	}

	pub fn connections(&self) -> &Arc<dyn ConnectionRegistry> {
		&self.connections
	}

	/// On-demand backup.
	pub async fn execute(&self, connection_id: &str) -> Result<BackupRecord> {
		self.execute_with(connection_id, RunOrigin::on_demand()).await
	}

	#[instrument(skip(self, origin), fields(schedule_id = ?origin.schedule_id))]
	pub async fn execute_with(&self, connection_id: &str, origin: RunOrigin) -> Result<BackupRecord> {
		let profile = self
			.connections
			.get_connection(connection_id)
			.await?
			.ok_or_else(|| BackupError::ConnectionNotFound(connection_id.to_string()))?;
		let engine = profile
			.engine()
			.map_err(|_| BackupError::UnsupportedEngine(profile.engine_type.clone()))?;
		let program = self.locator.locate(engine)?;

		tokio::fs::create_dir_all(&self.backup_dir).await?;
		let started = Utc::now();
		let claim = self.claim_output(&profile.database_name, started).await?;
		let output = claim.path.as_path();

		let mut record = BackupRecord::start(
			connection_id,
			origin.schedule_id,
			output.display().to_string(),
			origin.scheduled_time,
			started,
		);
		self.backups.insert_backup(&record).await?;
		debug!(backup_id = %record.id, engine = %engine, path = %output.display(), "backup started");

		let outcome = match self.dump(&profile, engine, &program, output).await {
			Ok(()) => artifact_size(output).await,
			Err(e) => {
				if let Err(cleanup) = remove_artifact(output).await {
					debug!(path = %output.display(), error = %cleanup, "could not remove partial artifact");
				}
				Err(e)
			}
		};

		match outcome {
			Ok(size) => {
				record.mark_completed(size, Utc::now());
				self.backups.finish_backup(&record).await?;
				info!(
					backup_id = %record.id,
					engine = %engine,
					size,
					duration_secs = record.duration_secs().unwrap_or_default(),
					"backup completed"
				);
			}
			Err(e) => {
				record.mark_failed(e.to_string(), Utc::now());
				if let Err(db) = self.backups.finish_backup(&record).await {
					error!(backup_id = %record.id, error = %db, "failed to record backup failure");
				}
				warn!(backup_id = %record.id, engine = %engine, error = %e, "backup failed");
				return Err(e);
			}
		}

		if let Some(uploader) = &self.offsite {
			match uploader.upload_if_enabled(&record, &profile.user_id).await {
				Ok(Some(key)) => match self.backups.set_object_key(record.id, &key).await {
					Ok(()) => record.s3_object_key = Some(key),
					Err(e) => warn!(backup_id = %record.id, error = %e, "failed to store off-site object key"),
				},
				Ok(None) => {}
				Err(e) => warn!(backup_id = %record.id, error = %e, "off-site upload failed"),
			}
		}

		Ok(record)
	}

	/// Pick an artifact path no other run holds and nothing on disk uses,
	/// adding a `_n` suffix when two runs of the same database share a second.
	async fn claim_output(&self, database: &str, started: DateTime<Utc>) -> Result<ClaimedPath<'_>> {
		let base = artifact_file_name(database, started);
		for n in 0..MAX_NAME_SUFFIX {
			let name = if n == 0 { base.clone() } else { numbered(&base, n) };
			let path = self.backup_dir.join(name);
			match tokio::fs::symlink_metadata(&path).await {
				Ok(_) => continue,
				Err(e) if e.kind() == ErrorKind::NotFound => {}
				Err(e) => return Err(e.into()),
			}
			let mut claims = self
				.claimed
				.lock()
				.unwrap_or_else(|poisoned| poisoned.into_inner());
			if claims.insert(path.clone()) {
				return Ok(ClaimedPath {
					claims: &self.claimed,
					path,
				});
			}
		}
		Err(BackupError::Internal(format!("no free artifact name for {base}")))
	}

	/// Run the dump tool, through a tunnel when the profile has SSH settings.
	async fn dump(
		&self,
		profile: &ConnectionProfile,
		engine: EngineKind,
		program: &Path,
		output: &Path,
	) -> Result<()> {
		let tunnel = match &profile.ssh {
			Some(ssh) => Some(
				self
					.tunnels
					.open(ssh, &profile.host, profile.port)
					.await
					.map_err(BackupError::TunnelSetupFailed)?,
			),
			None => None,
		};

		let (host, port) = match &tunnel {
			Some(tunnel) => (
				tunnel.local_addr().ip().to_string(),
				tunnel.local_addr().port(),
			),
			None => (profile.host.clone(), profile.port),
		};
		let target = DumpTarget {
			host: &host,
			port,
			username: &profile.username,
			password: &profile.password,
			database: &profile.database_name,
		};
		let command = strategy_for(engine).build(program, &target, output);
		info!(command = %command, tunneled = tunnel.is_some(), "running dump");

		let result = self.run(&command).await;
		if let Some(tunnel) = tunnel {
			tunnel.shutdown().await;
		}

		result.map_err(|output| BackupError::DumpFailed {
			engine,
			database: profile.database_name.clone(),
			host: profile.host.clone(),
			port: profile.port,
			output,
		})
	}

	/// Combined stdout and stderr on failure, or the spawn/exit error when
	/// the tool printed nothing.
	async fn run(&self, command: &DumpCommand) -> std::result::Result<(), String> {
		let child = command
			.to_command()
			.spawn()
			.map_err(|e| format!("failed to start {}: {e}", command.program().display()))?;

		let waited = match self.dump_timeout {
			Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
				Ok(waited) => waited,
				Err(_) => return Err(format!("timed out after {}s", limit.as_secs_f64())),
			},
			None => child.wait_with_output().await,
		};
		let output = waited.map_err(|e| e.to_string())?;

		if output.status.success() {
			return Ok(());
		}

		let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
		combined.push_str(&String::from_utf8_lossy(&output.stderr));
		let combined = combined.trim();
		if combined.is_empty() {
			Err(output.status.to_string())
		} else {
			Err(combined.to_string())
		}
	}

	/// Artifact of a completed backup, for download.
	pub async fn artifact_path(&self, id: BackupId) -> Result<PathBuf> {
		let record = self
			.backups
			.get_backup(id)
			.await?
			.filter(|r| r.status == BackupStatus::Completed)
			.ok_or_else(|| BackupError::BackupNotFound(id.to_string()))?;
		let path = PathBuf::from(record.path);
		if tokio::fs::metadata(&path).await.is_err() {
			return Err(BackupError::BackupNotFound(id.to_string()));
		}
		Ok(path)
	}
}

/// File size, or the total size of a dump directory.
async fn artifact_size(path: &Path) -> Result<u64> {
	let stat_failed = |source| BackupError::ArtifactStatFailed {
		path: path.to_path_buf(),
		source,
	};
	let meta = tokio::fs::metadata(path).await.map_err(stat_failed)?;
	if !meta.is_dir() {
		return Ok(meta.len());
	}

	let root = path.to_path_buf();
	tokio::task::spawn_blocking(move || {
		walkdir::WalkDir::new(root)
			.into_iter()
			.filter_map(|entry| entry.ok())
			.filter_map(|entry| entry.metadata().ok())
			.filter(|meta| meta.is_file())
			.map(|meta| meta.len())
			.sum::<u64>()
	})
	.await
	.map_err(|e| BackupError::Internal(format!("artifact size task failed: {e}")))
}

#[cfg(all(test, unix))]
pub(crate) mod testing {
	use super::*;
	use std::net::SocketAddr;
	use std::os::unix::fs::PermissionsExt;

	use async_trait::async_trait;
	use stowage_backup_core::SshSettings;
	use stowage_common_secret::{AesGcmCipher, SecretString};
	use stowage_server_config::ToolsConfig;
	use stowage_server_db::testing::migrated_pool;
	use stowage_server_db::{SqliteBackupRepository, SqliteConnectionRegistry};
	use tempfile::TempDir;

	use crate::tunnel::{DirectOpener, Tunnel, TunnelError};

	/// Writes its arguments and `PGPASSWORD` into the last argument.
	pub const RECORDING_TOOL: &str = r#"#!/bin/sh
for last; do :; done
printf '%s ' "$@" > "$last"
printf '\nPGPASSWORD=%s\n' "$PGPASSWORD" >> "$last"
"#;

	pub const FAILING_TOOL: &str = r#"#!/bin/sh
for last; do :; done
printf 'partial' > "$last"
echo "pg_dump: error: connection to server failed: Connection refused" >&2
exit 2
"#;

	#[derive(Default)]
	pub struct FakeTunnels {
		pub opened: std::sync::Mutex<Vec<(String, String, u16, SocketAddr)>>,
		pub fail: bool,
	}

	impl FakeTunnels {
		pub fn opened(&self) -> Vec<(String, String, u16, SocketAddr)> {
			self.opened.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl TunnelOpener for FakeTunnels {
		async fn open(
			&self,
			ssh: &SshSettings,
			remote_host: &str,
			remote_port: u16,
		) -> std::result::Result<Tunnel, TunnelError> {
			if self.fail {
				return Err(TunnelError::AuthFailed {
					user: ssh.username.clone(),
					addr: format!("{}:{}", ssh.host, ssh.port),
				});
			}
			let tunnel = Tunnel::start(Arc::new(DirectOpener::new()), remote_host, remote_port).await?;
			self.opened.lock().unwrap().push((
				ssh.host.clone(),
				remote_host.to_string(),
				remote_port,
				tunnel.local_addr(),
			));
			Ok(tunnel)
		}
	}

	pub struct Fixture {
		pub tmp: TempDir,
		pub pool: sqlx::SqlitePool,
		pub cipher: Arc<AesGcmCipher>,
		pub connections: Arc<SqliteConnectionRegistry>,
		pub backups: Arc<SqliteBackupRepository>,
		pub tunnels: Arc<FakeTunnels>,
	}

	impl Fixture {
		pub async fn new() -> Self {
			Self::with_tunnels(FakeTunnels::default()).await
		}

		pub async fn with_tunnels(tunnels: FakeTunnels) -> Self {
			let tmp = TempDir::new().unwrap();
			std::fs::create_dir_all(tmp.path().join("bin")).unwrap();
			std::fs::create_dir_all(tmp.path().join("empty")).unwrap();
			let pool = migrated_pool().await.unwrap();
			let cipher = Arc::new(AesGcmCipher::generate());
			Self {
				connections: Arc::new(SqliteConnectionRegistry::new(pool.clone(), cipher.clone())),
				backups: Arc::new(SqliteBackupRepository::new(pool.clone())),
				tunnels: Arc::new(tunnels),
				cipher,
				pool,
				tmp,
			}
		}

		pub fn backup_dir(&self) -> PathBuf {
			self.tmp.path().join("backups")
		}

		pub fn install_tool(&self, name: &str, script: &str) {
			let path = self.tmp.path().join("bin").join(name);
			std::fs::write(&path, script).unwrap();
			std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
		}

		pub fn locator(&self) -> BinaryLocator {
			let bin = self.tmp.path().join("bin");
			BinaryLocator::new(ToolsConfig {
				postgresql_bin_dir: Some(bin.clone()),
				mysql_bin_dir: Some(bin.clone()),
				mongodb_bin_dir: Some(bin.clone()),
				redis_bin_dir: Some(bin),
				..Default::default()
			})
			.with_well_known_dirs(Vec::new())
			.with_search_path(self.tmp.path().join("empty").into_os_string())
		}

		pub fn executor_with_timeout(&self, dump_timeout: Option<Duration>) -> BackupExecutor {
			BackupExecutor::new(
				self.connections.clone(),
				self.backups.clone(),
				self.locator(),
				self.tunnels.clone(),
				&BackupConfig {
					dir: self.backup_dir(),
					dump_timeout,
					..Default::default()
				},
			)
		}

		pub fn executor(&self) -> BackupExecutor {
			self.executor_with_timeout(None)
		}

		pub async fn add_connection(&self, id: &str, engine: &str, host: &str, ssh: bool) {
			self.connections
				.save_connection(&ConnectionProfile {
					id: id.into(),
					user_id: "u1".into(),
					name: format!("{id} db"),
					engine_type: engine.into(),
					host: host.into(),
					port: 5432,
					username: "app".into(),
					password: SecretString::from("pw"),
					database_name: "orders".into(),
					ssh: ssh.then(|| SshSettings {
						host: "bastion.example.com".into(),
						port: 22,
						username: "ops".into(),
						password: Some(SecretString::from("bastion-pw")),
						private_key: None,
					}),
				})
				.await
				.unwrap();
		}

		pub async fn record_count(&self) -> i64 {
			self.backups.stats("u1").await.unwrap().total_backups
		}
	}
}
