// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database configuration.

use serde::Deserialize;

const DEFAULT_URL: &str = "sqlite:./weft.db";

/// Database configuration (runtime, fully resolved).
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
	pub url: String,
	/// How long a writer waits on a locked database before giving up.
	pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfigLayer::default().finalize()
	}
}

/// Database configuration layer (partial, for merging).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub busy_timeout_ms: Option<u64>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.busy_timeout_ms.is_some() {
			self.busy_timeout_ms = other.busy_timeout_ms;
		}
	}

	pub fn finalize(self) -> DatabaseConfig {
		DatabaseConfig {
			url: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
			busy_timeout_ms: self.busy_timeout_ms.unwrap_or(5_000),
		}
	}
}
