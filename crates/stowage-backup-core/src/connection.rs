// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Connection profiles as handed out by the connection registry.

use stowage_common_secret::SecretString;

use crate::{CoreError, EngineKind};

/// A resolved connection with decrypted credentials.
///
/// `engine_type` is kept as stored so that rows written by older clients with
/// engines we no longer support surface as [`CoreError::UnsupportedEngine`]
/// at execution time instead of failing the whole registry read.
#[derive(Debug, Clone)]
pub struct ConnectionProfile {
	pub id: String,
	pub user_id: String,
	pub name: String,
	pub engine_type: String,
	pub host: String,
	pub port: u16,
	pub username: String,
	pub password: SecretString,
	pub database_name: String,
	pub ssh: Option<SshSettings>,
}

impl ConnectionProfile {
	pub fn engine(&self) -> Result<EngineKind, CoreError> {
		self.engine_type.parse()
	}
}

/// Bastion parameters. At least one of `password` and `private_key` must be
/// set for a tunnel to open.
#[derive(Debug, Clone)]
pub struct SshSettings {
	pub host: String,
	pub port: u16,
	pub username: String,
	pub password: Option<SecretString>,
	pub private_key: Option<SecretString>,
}

impl SshSettings {
	pub fn has_auth_method(&self) -> bool {
		let present = |s: &Option<SecretString>| s.as_ref().is_some_and(|v| !v.is_blank());
		present(&self.password) || present(&self.private_key)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ssh(password: Option<&str>, key: Option<&str>) -> SshSettings {
		SshSettings {
			host: "bastion".into(),
			port: 22,
			username: "ops".into(),
			password: password.map(SecretString::from),
			private_key: key.map(SecretString::from),
		}
	}

	#[test]
	fn auth_method_detection() {
		assert!(ssh(Some("pw"), None).has_auth_method());
		assert!(ssh(None, Some("-----BEGIN")).has_auth_method());
		assert!(!ssh(None, None).has_auth_method());
		assert!(!ssh(Some(""), Some("  ")).has_auth_method());
	}
}
