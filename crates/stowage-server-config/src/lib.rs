// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the Stowage server.
//!
//! Defaults, then `/etc/stowage/server.toml` (or an explicit path), then
//! `STOWAGE_SERVER_*` environment variables. The resolved [`ServerConfig`]
//! is built once at startup and handed to each component.
//!
//! ```ignore
//! use stowage_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("artifacts go to {}", config.backup.dir.display());
//! ```

pub mod env;
pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use env::load_secret_env;
pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use stowage_common_secret::SecretString;
use tracing::{debug, info};

const ENCRYPTION_KEY_VAR: &str = "STOWAGE_SERVER_ENCRYPTION_KEY";

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub backup: BackupConfig,
	pub tools: ToolsConfig,
	pub tunnel: TunnelConfig,
	pub notifications: NotificationsConfig,
	pub offsite: OffsiteConfig,
	pub logging: LoggingConfig,
	/// Hex-encoded 32 byte key for credentials at rest. Environment only.
	pub encryption_key: Option<SecretString>,
}

/// Load configuration from all sources with standard precedence.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let encryption_key = load_secret_env(ENCRYPTION_KEY_VAR)?;
	finalize(merged, encryption_key)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(
	layer: ServerConfigLayer,
	encryption_key: Option<SecretString>,
) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		database: layer.database.unwrap_or_default().finalize(),
		backup: layer.backup.unwrap_or_default().finalize(),
		tools: layer.tools.unwrap_or_default().finalize(),
		tunnel: layer.tunnel.unwrap_or_default().finalize(),
		notifications: layer.notifications.unwrap_or_default().finalize(),
		offsite: layer.offsite.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
		encryption_key,
	};

	validate_config(&config)?;

	info!(
		database = %config.database.url,
		backup_dir = %config.backup.dir.display(),
		dump_timeout_secs = config.backup.dump_timeout.map(|d| d.as_secs()),
		schedule_sync_secs = config.backup.schedule_sync_interval.as_secs(),
		tool_dirs = config.tools.configured_count(),
		host_key_policy = %config.tunnel.host_key_policy,
		encryption_key_configured = config.encryption_key.is_some(),
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.tunnel.host_key_policy == HostKeyPolicy::Fingerprint
		&& config.tunnel.known_fingerprints.is_empty()
	{
		return Err(ConfigError::Validation(
			"tunnel.host_key_policy = \"fingerprint\" requires at least one entry in \
			 tunnel.known_fingerprints"
				.to_string(),
		));
	}

	if config.backup.dir.as_os_str().is_empty() {
		return Err(ConfigError::Validation("backup.dir must not be empty".to_string()));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pinned_policy_requires_fingerprints() {
		let layer = ServerConfigLayer {
			tunnel: Some(TunnelConfigLayer {
				host_key_policy: Some(HostKeyPolicy::Fingerprint),
				..Default::default()
			}),
			..Default::default()
		};
		let err = finalize(layer, None).unwrap_err();
		assert!(err.to_string().contains("known_fingerprints"));
	}

	#[test]
	fn defaults_finalize() {
		let config = finalize(ServerConfigLayer::default(), None).unwrap();
		assert_eq!(config.database.url, "sqlite:./stowage.db");
		assert_eq!(config.notifications.queue_capacity, 256);
		assert!(config.encryption_key.is_none());
	}
}
