// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, TOML files and environment variables.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::env::{env_list, env_parse, env_var};
use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	BackupConfigLayer, DatabaseConfigLayer, HostKeyPolicy, LogFormat, LoggingConfigLayer,
	NotificationsConfigLayer, OffsiteConfigLayer, ToolsConfigLayer, TunnelConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/stowage/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: STOWAGE_SERVER_<SECTION>_<FIELD>. Tool directories also honour
/// the bare `POSTGRESQL_BIN_PATH` style names older deployments set.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(DatabaseConfigLayer {
				url: env_var("STOWAGE_SERVER_DATABASE_URL"),
			}),
			backup: Some(BackupConfigLayer {
				dir: env_var("STOWAGE_SERVER_BACKUP_DIR").map(PathBuf::from),
				dump_timeout_secs: env_parse("STOWAGE_SERVER_BACKUP_DUMP_TIMEOUT_SECS")?,
				schedule_sync_secs: env_parse("STOWAGE_SERVER_BACKUP_SCHEDULE_SYNC_SECS")?,
			}),
			tools: Some(load_tools_from_env()),
			tunnel: Some(load_tunnel_from_env()?),
			notifications: Some(NotificationsConfigLayer {
				queue_capacity: env_parse("STOWAGE_SERVER_NOTIFICATIONS_QUEUE_CAPACITY")?,
				webhook_timeout_secs: env_parse("STOWAGE_SERVER_NOTIFICATIONS_WEBHOOK_TIMEOUT_SECS")?,
			}),
			offsite: Some(OffsiteConfigLayer {
				upload_timeout_secs: env_parse("STOWAGE_SERVER_OFFSITE_UPLOAD_TIMEOUT_SECS")?,
			}),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn tool_dir(primary: &str, legacy: &str) -> Option<PathBuf> {
	env_var(primary).or_else(|| env_var(legacy)).map(PathBuf::from)
}

fn load_tools_from_env() -> ToolsConfigLayer {
	ToolsConfigLayer {
		postgresql_bin_dir: tool_dir("STOWAGE_SERVER_TOOLS_POSTGRESQL_BIN_DIR", "POSTGRESQL_BIN_PATH"),
		mysql_bin_dir: tool_dir("STOWAGE_SERVER_TOOLS_MYSQL_BIN_DIR", "MYSQL_BIN_PATH"),
		mariadb_bin_dir: tool_dir("STOWAGE_SERVER_TOOLS_MARIADB_BIN_DIR", "MARIADB_BIN_PATH"),
		mongodb_bin_dir: tool_dir("STOWAGE_SERVER_TOOLS_MONGODB_BIN_DIR", "MONGODB_BIN_PATH"),
		redis_bin_dir: tool_dir("STOWAGE_SERVER_TOOLS_REDIS_BIN_DIR", "REDIS_BIN_PATH"),
	}
}

fn load_tunnel_from_env() -> Result<TunnelConfigLayer, ConfigError> {
	let host_key_policy = match env_var("STOWAGE_SERVER_TUNNEL_HOST_KEY_POLICY") {
		Some(v) => Some(v.parse::<HostKeyPolicy>().map_err(|message| {
			ConfigError::InvalidValue {
				key: "STOWAGE_SERVER_TUNNEL_HOST_KEY_POLICY".to_string(),
				message,
			}
		})?),
		None => None,
	};

	Ok(TunnelConfigLayer {
		host_key_policy,
		known_fingerprints: env_list("STOWAGE_SERVER_TUNNEL_KNOWN_FINGERPRINTS"),
		connect_timeout_secs: env_parse("STOWAGE_SERVER_TUNNEL_CONNECT_TIMEOUT_SECS")?,
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = match env_var("STOWAGE_SERVER_LOG_FORMAT") {
		Some(v) => Some(v.parse::<LogFormat>().map_err(|message| ConfigError::InvalidValue {
			key: "STOWAGE_SERVER_LOG_FORMAT".to_string(),
			message,
		})?),
		None => None,
	};

	Ok(LoggingConfigLayer {
		level: env_var("STOWAGE_SERVER_LOG_LEVEL"),
		format,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let layer = TomlSource::new("/nonexistent/stowage.toml").load().unwrap();
		assert!(layer.database.is_none());
		assert!(layer.tools.is_none());
	}

	#[test]
	fn test_toml_source_reads_sections() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[tools]
postgresql_bin_dir = "/usr/lib/postgresql/16/bin"

[tunnel]
host_key_policy = "fingerprint"
known_fingerprints = ["SHA256:Zm9v"]
"#
		)
		.unwrap();

		let layer = TomlSource::new(file.path()).load().unwrap();
		let tools = layer.tools.unwrap().finalize();
		assert_eq!(
			tools.postgresql_bin_dir.as_deref(),
			Some(std::path::Path::new("/usr/lib/postgresql/16/bin"))
		);
		assert_eq!(
			layer.tunnel.unwrap().host_key_policy,
			Some(HostKeyPolicy::Fingerprint)
		);
	}

	#[test]
	fn test_toml_source_reports_parse_errors() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[backup\ndir = ").unwrap();
		assert!(matches!(
			TomlSource::new(file.path()).load(),
			Err(ConfigError::TomlParse { .. })
		));
	}
}
