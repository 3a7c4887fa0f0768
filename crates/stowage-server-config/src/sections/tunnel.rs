// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSH tunnel settings.
//!
//! The default host key policy accepts any key the bastion presents. That
//! keeps ad-hoc bastions working but leaves the tunnel open to
//! man-in-the-middle interception; deployments that can should pin
//! fingerprints with [`HostKeyPolicy::Fingerprint`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
	#[default]
	AcceptAny,
	/// Only keys whose SHA-256 fingerprint is in `known_fingerprints`.
	Fingerprint,
}

impl fmt::Display for HostKeyPolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::AcceptAny => write!(f, "accept_any"),
			Self::Fingerprint => write!(f, "fingerprint"),
		}
	}
}

impl FromStr for HostKeyPolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"accept_any" | "accept-any" | "insecure" => Ok(Self::AcceptAny),
			"fingerprint" | "pinned" => Ok(Self::Fingerprint),
			_ => Err(format!("unknown host key policy: {s}")),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TunnelConfigLayer {
	pub host_key_policy: Option<HostKeyPolicy>,
	pub known_fingerprints: Option<Vec<String>>,
	pub connect_timeout_secs: Option<u64>,
}

impl TunnelConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.host_key_policy.is_some() {
			self.host_key_policy = other.host_key_policy;
		}
		if other.known_fingerprints.is_some() {
			self.known_fingerprints = other.known_fingerprints;
		}
		if other.connect_timeout_secs.is_some() {
			self.connect_timeout_secs = other.connect_timeout_secs;
		}
	}

	pub fn finalize(self) -> TunnelConfig {
		TunnelConfig {
			host_key_policy: self.host_key_policy.unwrap_or_default(),
			known_fingerprints: self.known_fingerprints.unwrap_or_default(),
			connect_timeout: Duration::from_secs(self.connect_timeout_secs.unwrap_or(10)),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct TunnelConfig {
	pub host_key_policy: HostKeyPolicy,
	pub known_fingerprints: Vec<String>,
	pub connect_timeout: Duration,
}

impl Default for TunnelConfig {
	fn default() -> Self {
		TunnelConfigLayer::default().finalize()
	}
}
