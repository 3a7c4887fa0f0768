// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OffsiteConfigLayer {
	pub upload_timeout_secs: Option<u64>,
}

impl OffsiteConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.upload_timeout_secs.is_some() {
			self.upload_timeout_secs = other.upload_timeout_secs;
		}
	}

	pub fn finalize(self) -> OffsiteConfig {
		OffsiteConfig {
			upload_timeout: Duration::from_secs(self.upload_timeout_secs.unwrap_or(300)),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsiteConfig {
	pub upload_timeout: Duration,
}

impl Default for OffsiteConfig {
	fn default() -> Self {
		OffsiteConfigLayer::default().finalize()
	}
}
