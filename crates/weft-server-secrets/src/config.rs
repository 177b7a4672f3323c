// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parsed server keys.

use weft_server_config::SecretsConfig;

use crate::encryption::ServerKey;
use crate::error::{SecretsError, SecretsResult};

/// The current server key and, during a rollout, the one it replaces.
#[derive(Debug, Clone)]
pub struct ServerKeys {
	pub current: ServerKey,
	pub previous: Option<ServerKey>,
}

impl ServerKeys {
	pub fn new(current: ServerKey, previous: Option<ServerKey>) -> Self {
		Self { current, previous }
	}

	/// Parse the raw keys from server configuration.
	///
	/// # Errors
	/// `SecretsError::Configuration` naming the offending setting; the key
	/// text itself is never included.
	pub fn from_config(config: &SecretsConfig) -> SecretsResult<Self> {
		let current = ServerKey::parse(&config.app_key)
			.map_err(|e| SecretsError::Configuration(format!("WEFT_SERVER_APP_KEY: {e}")))?;
		let previous = config
			.old_app_key
			.as_ref()
			.map(ServerKey::parse)
			.transpose()
			.map_err(|e| SecretsError::Configuration(format!("WEFT_SERVER_OLD_APP_KEY: {e}")))?;

		Ok(Self { current, previous })
	}
}
