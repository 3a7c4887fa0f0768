// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	BackupConfigLayer, DatabaseConfigLayer, LoggingConfigLayer, NotificationsConfigLayer,
	OffsiteConfigLayer, ToolsConfigLayer, TunnelConfigLayer,
};

/// Server configuration layer; every field is optional so layers can stack.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub backup: Option<BackupConfigLayer>,
	#[serde(default)]
	pub tools: Option<ToolsConfigLayer>,
	#[serde(default)]
	pub tunnel: Option<TunnelConfigLayer>,
	#[serde(default)]
	pub notifications: Option<NotificationsConfigLayer>,
	#[serde(default)]
	pub offsite: Option<OffsiteConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_option(&mut self.backup, other.backup, BackupConfigLayer::merge);
		merge_option(&mut self.tools, other.tools, ToolsConfigLayer::merge);
		merge_option(&mut self.tunnel, other.tunnel, TunnelConfigLayer::merge);
		merge_option(
			&mut self.notifications,
			other.notifications,
			NotificationsConfigLayer::merge,
		);
		merge_option(&mut self.offsite, other.offsite, OffsiteConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T>(target: &mut Option<T>, source: Option<T>, merge_fn: fn(&mut T, T)) {
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}
