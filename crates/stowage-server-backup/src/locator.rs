// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolves the dump tool for an engine.
//!
//! Search order, first hit wins:
//! 1. the operator-configured directory for the engine,
//! 2. well-known install directories for the platform (glob-expanded),
//! 3. `PATH`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use stowage_backup_core::EngineKind;
use stowage_server_config::ToolsConfig;
use tracing::{debug, warn};

use crate::error::{BackupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
	Linux,
	MacOs,
	Windows,
	Other,
}

impl Platform {
	pub fn current() -> Self {
		if cfg!(target_os = "linux") {
			Self::Linux
		} else if cfg!(target_os = "macos") {
			Self::MacOs
		} else if cfg!(windows) {
			Self::Windows
		} else {
			Self::Other
		}
	}

	fn executable_name(&self, tool: &str) -> String {
		match self {
			Self::Windows => format!("{tool}.exe"),
			_ => tool.to_string(),
		}
	}

	/// Directory patterns searched after the configured directory.
	pub fn well_known_dirs(&self, engine: EngineKind) -> Vec<&'static str> {
		match self {
			Self::Linux => {
				let mut dirs = vec!["/usr/bin", "/usr/local/bin"];
				match engine {
					EngineKind::Postgresql => {
						dirs.extend(["/usr/lib/postgresql/*/bin", "/opt/postgresql*/bin"])
					}
					EngineKind::Mysql | EngineKind::Mariadb => {
						dirs.extend(["/opt/mysql*/bin", "/opt/mariadb*/bin"])
					}
					EngineKind::Mongodb => dirs.extend(["/opt/mongodb*/bin"]),
					EngineKind::Redis => dirs.extend(["/opt/redis*/bin"]),
				}
				dirs
			}
			Self::MacOs => {
				let mut dirs = vec!["/opt/homebrew/bin", "/usr/local/bin"];
				match engine {
					EngineKind::Postgresql => dirs.extend([
						"/opt/homebrew/opt/postgresql@*/bin",
						"/usr/local/opt/postgresql@*/bin",
						"/Applications/Postgres.app/Contents/Versions/*/bin",
					]),
					EngineKind::Mysql | EngineKind::Mariadb => dirs.extend([
						"/opt/homebrew/opt/mysql@*/bin",
						"/opt/homebrew/opt/mysql-client/bin",
						"/opt/homebrew/opt/mariadb@*/bin",
						"/usr/local/mysql/bin",
					]),
					EngineKind::Mongodb => {
						dirs.extend(["/opt/homebrew/opt/mongodb-database-tools/bin"])
					}
					EngineKind::Redis => dirs.extend(["/opt/homebrew/opt/redis/bin"]),
				}
				dirs
			}
			Self::Windows => match engine {
				EngineKind::Postgresql => vec![r"C:\Program Files\PostgreSQL\*\bin"],
				EngineKind::Mysql => vec![r"C:\Program Files\MySQL\MySQL Server *\bin"],
				EngineKind::Mariadb => vec![
					r"C:\Program Files\MariaDB *\bin",
					r"C:\Program Files\MySQL\MySQL Server *\bin",
				],
				EngineKind::Mongodb => vec![r"C:\Program Files\MongoDB\Tools\*\bin"],
				EngineKind::Redis => vec![r"C:\Program Files\Redis"],
			},
			Self::Other => vec!["/usr/local/bin", "/usr/bin"],
		}
	}
}

#[derive(Debug, Clone)]
pub struct BinaryLocator {
	tools: ToolsConfig,
	platform: Platform,
	well_known_override: Option<Vec<String>>,
	search_path: Option<OsString>,
}

impl BinaryLocator {
	pub fn new(tools: ToolsConfig) -> Self {
		Self {
			tools,
			platform: Platform::current(),
			well_known_override: None,
			search_path: None,
		}
	}

	/// Replace the platform directory patterns.
	pub fn with_well_known_dirs(mut self, dirs: Vec<String>) -> Self {
		self.well_known_override = Some(dirs);
		self
	}

	/// Search this `PATH`-style list instead of the process environment.
	pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
		self.search_path = Some(path.into());
		self
	}

	#[tracing::instrument(skip(self, engine), fields(engine = %engine))]
	pub fn locate(&self, engine: EngineKind) -> Result<PathBuf> {
		let binary = self.platform.executable_name(engine.tool_name());
		let mut searched = Vec::new();

		if let Some(dir) = self.tools.bin_dir(engine) {
			let candidate = dir.join(&binary);
			if is_executable_file(&candidate) {
				debug!(path = %candidate.display(), "found tool in configured directory");
				return Ok(candidate);
			}
			warn!(
				dir = %dir.display(),
				tool = %binary,
				"configured tool directory does not contain the dump tool"
			);
			searched.push(dir.display().to_string());
		}

		let patterns: Vec<String> = match &self.well_known_override {
			Some(dirs) => dirs.clone(),
			None => self
				.platform
				.well_known_dirs(engine)
				.into_iter()
				.map(str::to_string)
				.collect(),
		};
		for pattern in &patterns {
			if let Some(found) = glob_first(pattern, &binary) {
				debug!(path = %found.display(), pattern = %pattern, "found tool in well-known directory");
				return Ok(found);
			}
			searched.push(pattern.clone());
		}

		let from_path = match &self.search_path {
			Some(paths) => {
				let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
				which::which_in(&binary, Some(paths), cwd)
			}
			None => which::which(&binary),
		};
		match from_path {
			Ok(found) => {
				debug!(path = %found.display(), "found tool on search path");
				Ok(found)
			}
			Err(_) => {
				searched.push("PATH".to_string());
				Err(BackupError::ToolNotFound {
					engine,
					tool: binary,
					searched: searched.join(", "),
				})
			}
		}
	}
}

fn glob_first(dir_pattern: &str, binary: &str) -> Option<PathBuf> {
	let pattern = Path::new(dir_pattern).join(binary);
	let pattern = pattern.to_str()?;
	let entries = match glob::glob(pattern) {
		Ok(entries) => entries,
		Err(e) => {
			debug!(pattern = %pattern, error = %e, "skipping malformed tool pattern");
			return None;
		}
	};
	let mut matches: Vec<PathBuf> = entries.filter_map(|entry| entry.ok()).collect();
	matches.sort_by(|a, b| version_key(b).cmp(&version_key(a)).then_with(|| b.cmp(a)));
	matches.into_iter().find(|path| is_executable_file(path))
}

/// Numeric runs in a path, so `postgresql/16` sorts above `postgresql/9.6`.
fn version_key(path: &Path) -> Vec<u64> {
	path.to_string_lossy()
		.split(|c: char| !c.is_ascii_digit())
		.filter(|run| !run.is_empty())
		.filter_map(|run| run.parse().ok())
		.collect()
}

fn is_executable_file(path: &Path) -> bool {
	let Ok(meta) = std::fs::metadata(path) else {
		return false;
	};
	if !meta.is_file() {
		return false;
	}
	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		meta.permissions().mode() & 0o111 != 0
	}
	#[cfg(not(unix))]
	{
		true
	}
}

#[cfg(all(test, unix))]
mod tests {
	use super::*;
	use std::os::unix::fs::PermissionsExt;
	use tempfile::TempDir;

	fn install(dir: &Path, name: &str) -> PathBuf {
		std::fs::create_dir_all(dir).unwrap();
		let path = dir.join(name);
		std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
		std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
		path
	}

	fn isolated(tools: ToolsConfig, empty: &Path) -> BinaryLocator {
		BinaryLocator::new(tools)
			.with_well_known_dirs(Vec::new())
			.with_search_path(empty.as_os_str().to_os_string())
	}

	#[test]
	fn configured_directory_wins() {
		let tmp = TempDir::new().unwrap();
		let configured = install(&tmp.path().join("pg16"), "pg_dump");
		install(&tmp.path().join("path"), "pg_dump");

		let locator = BinaryLocator::new(ToolsConfig {
			postgresql_bin_dir: Some(tmp.path().join("pg16")),
			..Default::default()
		})
		.with_well_known_dirs(Vec::new())
		.with_search_path(tmp.path().join("path").into_os_string());

		assert_eq!(locator.locate(EngineKind::Postgresql).unwrap(), configured);
	}

	#[test]
	fn glob_expands_versioned_directories() {
		let tmp = TempDir::new().unwrap();
		let found = install(&tmp.path().join("opt/mysql-8.0/bin"), "mysqldump");
		let empty = tmp.path().join("empty");
		std::fs::create_dir_all(&empty).unwrap();

		let pattern = format!("{}/opt/mysql*/bin", tmp.path().display());
		let locator = BinaryLocator::new(ToolsConfig::default())
			.with_well_known_dirs(vec![pattern])
			.with_search_path(empty.into_os_string());

		assert_eq!(locator.locate(EngineKind::Mysql).unwrap(), found);
	}

	#[test]
	fn newest_versioned_directory_wins() {
		let tmp = TempDir::new().unwrap();
		for version in ["9.6", "10", "16", "14"] {
			install(&tmp.path().join(format!("postgresql/{version}/bin")), "pg_dump");
		}
		let empty = tmp.path().join("empty");
		std::fs::create_dir_all(&empty).unwrap();

		let pattern = format!("{}/postgresql/*/bin", tmp.path().display());
		let locator = BinaryLocator::new(ToolsConfig::default())
			.with_well_known_dirs(vec![pattern])
			.with_search_path(empty.into_os_string());

		assert_eq!(
			locator.locate(EngineKind::Postgresql).unwrap(),
			tmp.path().join("postgresql/16/bin/pg_dump")
		);
	}

	#[test]
	fn falls_back_to_search_path() {
		let tmp = TempDir::new().unwrap();
		let found = install(&tmp.path().join("bin"), "redis-cli");
		let locator = isolated(ToolsConfig::default(), &tmp.path().join("bin"));
		assert_eq!(locator.locate(EngineKind::Redis).unwrap(), found);
	}

	#[test]
	fn stale_configured_directory_is_skipped() {
		let tmp = TempDir::new().unwrap();
		let found = install(&tmp.path().join("bin"), "mongodump");
		let locator = isolated(
			ToolsConfig {
				mongodb_bin_dir: Some(tmp.path().join("gone")),
				..Default::default()
			},
			&tmp.path().join("bin"),
		);
		assert_eq!(locator.locate(EngineKind::Mongodb).unwrap(), found);
	}

	#[test]
	fn missing_tool_reports_where_it_looked() {
		let tmp = TempDir::new().unwrap();
		let locator = isolated(
			ToolsConfig {
				postgresql_bin_dir: Some(tmp.path().join("pg")),
				..Default::default()
			},
			tmp.path(),
		);
		match locator.locate(EngineKind::Postgresql) {
			Err(BackupError::ToolNotFound { tool, searched, .. }) => {
				assert_eq!(tool, "pg_dump");
				assert!(searched.contains("PATH"));
				assert!(searched.contains("pg"));
			}
			other => panic!("expected ToolNotFound, got {other:?}"),
		}
	}

	#[test]
	fn non_executable_files_are_ignored() {
		let tmp = TempDir::new().unwrap();
		let dir = tmp.path().join("bin");
		std::fs::create_dir_all(&dir).unwrap();
		std::fs::write(dir.join("pg_dump"), "not a program").unwrap();
		let locator = isolated(ToolsConfig::default(), &dir);
		assert!(locator.locate(EngineKind::Postgresql).is_err());
	}

	#[test]
	fn windows_names_carry_exe_suffix() {
		assert_eq!(Platform::Windows.executable_name("pg_dump"), "pg_dump.exe");
		assert_eq!(Platform::Linux.executable_name("pg_dump"), "pg_dump");
		assert!(!Platform::Windows.well_known_dirs(EngineKind::Mariadb).is_empty());
	}
}
