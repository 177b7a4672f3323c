// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server key configuration for the secret store.
//!
//! Keys are kept as raw text here; parsing into AES key material happens in
//! `weft-server-secrets` so this crate stays free of crypto dependencies.

use serde::Deserialize;
use weft_common_secret::SecretString;

use crate::error::ConfigError;

/// Resolved secret store configuration.
#[derive(Debug, Clone)]
pub struct SecretsConfig {
	/// Key every secret is sealed under.
	pub app_key: SecretString,
	/// Key the secrets were sealed under before the last rollout, if rotating.
	pub old_app_key: Option<SecretString>,
	pub rotate_on_startup: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfigLayer {
	#[serde(default)]
	pub app_key: Option<SecretString>,
	#[serde(default)]
	pub old_app_key: Option<SecretString>,
	#[serde(default)]
	pub rotate_on_startup: Option<bool>,
}

impl SecretsConfigLayer {
	pub fn merge(&mut self, other: SecretsConfigLayer) {
		if other.app_key.is_some() {
			self.app_key = other.app_key;
		}
		if other.old_app_key.is_some() {
			self.old_app_key = other.old_app_key;
		}
		if other.rotate_on_startup.is_some() {
			self.rotate_on_startup = other.rotate_on_startup;
		}
	}

	pub fn finalize(self) -> Result<SecretsConfig, ConfigError> {
		let app_key = self
			.app_key
			.filter(|k| !k.is_empty())
			.ok_or_else(|| ConfigError::Missing("WEFT_SERVER_APP_KEY".to_string()))?;

		Ok(SecretsConfig {
			app_key,
			old_app_key: self.old_app_key.filter(|k| !k.is_empty()),
			rotate_on_startup: self.rotate_on_startup.unwrap_or(true),
		})
	}
}
