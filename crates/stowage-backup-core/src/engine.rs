// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Supported database engines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Closed set of engines the executor knows how to dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
	Postgresql,
	Mysql,
	Mariadb,
	Mongodb,
	Redis,
}

impl EngineKind {
	pub const ALL: [EngineKind; 5] = [
		Self::Postgresql,
		Self::Mysql,
		Self::Mariadb,
		Self::Mongodb,
		Self::Redis,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Postgresql => "postgresql",
			Self::Mysql => "mysql",
			Self::Mariadb => "mariadb",
			Self::Mongodb => "mongodb",
			Self::Redis => "redis",
		}
	}

	/// Name of the vendor dump tool, without platform suffix.
	pub fn tool_name(&self) -> &'static str {
		match self {
			Self::Postgresql => "pg_dump",
			Self::Mysql | Self::Mariadb => "mysqldump",
			Self::Mongodb => "mongodump",
			Self::Redis => "redis-cli",
		}
	}

	pub fn default_port(&self) -> u16 {
		match self {
			Self::Postgresql => 5432,
			Self::Mysql | Self::Mariadb => 3306,
			Self::Mongodb => 27017,
			Self::Redis => 6379,
		}
	}
}

impl fmt::Display for EngineKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EngineKind {
	type Err = CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"postgresql" | "postgres" => Ok(Self::Postgresql),
			"mysql" => Ok(Self::Mysql),
			"mariadb" => Ok(Self::Mariadb),
			"mongodb" | "mongo" => Ok(Self::Mongodb),
			"redis" => Ok(Self::Redis),
			_ => Err(CoreError::UnsupportedEngine(s.to_string())),
		}
	}
}
