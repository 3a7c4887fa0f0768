// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Alert delivery queue settings.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct NotificationsConfigLayer {
	pub queue_capacity: Option<usize>,
	pub webhook_timeout_secs: Option<u64>,
}

impl NotificationsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
		if other.webhook_timeout_secs.is_some() {
			self.webhook_timeout_secs = other.webhook_timeout_secs;
		}
	}

	pub fn finalize(self) -> NotificationsConfig {
		NotificationsConfig {
			queue_capacity: self.queue_capacity.unwrap_or(256).max(1),
			webhook_timeout: Duration::from_secs(self.webhook_timeout_secs.unwrap_or(10)),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationsConfig {
	/// Pending webhook/email deliveries; new alerts are dropped when full.
	pub queue_capacity: usize,
	pub webhook_timeout: Duration,
}

impl Default for NotificationsConfig {
	fn default() -> Self {
		NotificationsConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults() {
		let config = NotificationsConfig::default();
		assert_eq!(config.queue_capacity, 256);
		assert_eq!(config.webhook_timeout, Duration::from_secs(10));
	}

	#[test]
	fn capacity_is_at_least_one() {
		let config = NotificationsConfigLayer {
			queue_capacity: Some(0),
			..Default::default()
		}
		.finalize();
		assert_eq!(config.queue_capacity, 1);
	}
}
