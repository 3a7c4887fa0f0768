// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
	#[error("unsupported database engine: {0}")]
	UnsupportedEngine(String),

	#[error("invalid timestamp: {0}")]
	InvalidTimestamp(String),

	#[error("unknown backup status: {0}")]
	UnknownStatus(String),

	#[error("invalid identifier: {0}")]
	InvalidId(String),
}
