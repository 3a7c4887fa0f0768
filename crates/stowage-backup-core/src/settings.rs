// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-user notification and off-site storage preferences.
//!
//! Secret fields hold ciphertext as stored; the engine decrypts them just
//! before use.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserSettings {
	pub user_id: String,
	pub notifications: NotificationPreferences,
	pub offsite: OffsiteSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationPreferences {
	pub notify_dashboard: bool,
	pub notify_email: bool,
	pub notify_webhook: bool,
	pub webhook_url: Option<String>,
	pub email: Option<String>,
	pub smtp: SmtpSettings,
}

impl NotificationPreferences {
	/// Webhook URL when the channel is on and a URL is configured.
	pub fn webhook_target(&self) -> Option<&str> {
		if !self.notify_webhook {
			return None;
		}
		self.webhook_url.as_deref().filter(|u| !u.trim().is_empty())
	}

	/// Recipient address when the channel is on and an address is configured.
	pub fn email_target(&self) -> Option<&str> {
		if !self.notify_email {
			return None;
		}
		self.email.as_deref().filter(|e| !e.trim().is_empty())
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpSettings {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub username: Option<String>,
	#[serde(skip_serializing)]
	pub password_encrypted: Option<String>,
}

impl SmtpSettings {
	pub fn is_complete(&self) -> bool {
		let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
		filled(&self.host)
			&& self.port.is_some_and(|p| p != 0)
			&& filled(&self.username)
			&& filled(&self.password_encrypted)
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OffsiteSettings {
	pub enabled: bool,
	pub endpoint: Option<String>,
	pub region: Option<String>,
	pub bucket: Option<String>,
	pub access_key: Option<String>,
	#[serde(skip_serializing)]
	pub secret_key_encrypted: Option<String>,
	pub path_prefix: Option<String>,
	pub use_ssl: bool,
}
