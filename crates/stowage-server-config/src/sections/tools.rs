// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User-configured directories holding vendor dump tools.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use stowage_backup_core::EngineKind;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ToolsConfigLayer {
	pub postgresql_bin_dir: Option<PathBuf>,
	pub mysql_bin_dir: Option<PathBuf>,
	pub mariadb_bin_dir: Option<PathBuf>,
	pub mongodb_bin_dir: Option<PathBuf>,
	pub redis_bin_dir: Option<PathBuf>,
}

impl ToolsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.postgresql_bin_dir.is_some() {
			self.postgresql_bin_dir = other.postgresql_bin_dir;
		}
		if other.mysql_bin_dir.is_some() {
			self.mysql_bin_dir = other.mysql_bin_dir;
		}
		if other.mariadb_bin_dir.is_some() {
			self.mariadb_bin_dir = other.mariadb_bin_dir;
		}
		if other.mongodb_bin_dir.is_some() {
			self.mongodb_bin_dir = other.mongodb_bin_dir;
		}
		if other.redis_bin_dir.is_some() {
			self.redis_bin_dir = other.redis_bin_dir;
		}
	}

	pub fn finalize(self) -> ToolsConfig {
		ToolsConfig {
			postgresql_bin_dir: self.postgresql_bin_dir,
			mysql_bin_dir: self.mysql_bin_dir,
			mariadb_bin_dir: self.mariadb_bin_dir,
			mongodb_bin_dir: self.mongodb_bin_dir,
			redis_bin_dir: self.redis_bin_dir,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolsConfig {
	pub postgresql_bin_dir: Option<PathBuf>,
	pub mysql_bin_dir: Option<PathBuf>,
	pub mariadb_bin_dir: Option<PathBuf>,
	pub mongodb_bin_dir: Option<PathBuf>,
	pub redis_bin_dir: Option<PathBuf>,
}

impl ToolsConfig {
	pub fn bin_dir(&self, engine: EngineKind) -> Option<&Path> {
		match engine {
			EngineKind::Postgresql => self.postgresql_bin_dir.as_deref(),
			EngineKind::Mysql => self.mysql_bin_dir.as_deref(),
			// mariadb installs commonly ship mysqldump under the mysql prefix
			EngineKind::Mariadb => self
				.mariadb_bin_dir
				.as_deref()
				.or(self.mysql_bin_dir.as_deref()),
			EngineKind::Mongodb => self.mongodb_bin_dir.as_deref(),
			EngineKind::Redis => self.redis_bin_dir.as_deref(),
		}
	}

	pub fn configured_count(&self) -> usize {
		EngineKind::ALL
			.iter()
			.filter(|e| self.bin_dir(**e).is_some())
			.count()
	}
}
