// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret store service: validation, sealing and scoping.
//!
//! Values are kept in storage as the base64 of the plaintext, encrypted. A
//! caller that already holds base64 says so with `already_base64`; the value
//! is then checked and sealed as-is.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{info, instrument};
use weft_common_secret::SecretString;
use zeroize::Zeroizing;

use crate::encryption::{open_value, seal_value, ServerKey};
use crate::error::{SecretsError, SecretsResult};
use crate::store::{SecretStore, StoredSecret};
use crate::types::{Caller, ProjectName, Scope, SecretInfo, SecretName};

/// Maximum plaintext size of a secret value (64 KiB).
pub const MAX_SECRET_VALUE_SIZE: usize = 64 * 1024;

pub struct SecretsService<S: SecretStore> {
	store: Arc<S>,
	key: ServerKey,
}

impl<S: SecretStore> SecretsService<S> {
	pub fn new(store: Arc<S>, key: ServerKey) -> Self {
		Self { store, key }
	}

	pub fn store(&self) -> &Arc<S> {
		&self.store
	}

	/// Add a secret to `scope`.
	///
	/// # Errors
	/// Validation errors and `DuplicateName` are returned before anything is
	/// encrypted or written.
	#[instrument(skip(self, value), fields(scope = %scope, name = %name))]
	pub async fn create(
		&self,
		scope: &Scope,
		name: &str,
		value: &SecretString,
		already_base64: bool,
		caller: Caller,
	) -> SecretsResult<SecretInfo> {
		let name = validate_write_name(name, caller)?;
		let payload = encode_payload(&name, value, already_base64)?;

		if self.store.get_secret(scope, &name).await?.is_some() {
			return Err(SecretsError::DuplicateName(name.to_string()));
		}

		let sealed = seal_value(&self.key, &payload)?;
		let stored = self
			.store
			.create_secret(scope, &name, &sealed, self.key.fingerprint())
			.await?;

		info!(secret_type = %stored.secret_type, digest = %stored.digest, "secret created");
		Ok(stored.info())
	}

	/// Replace the value of an existing secret in exactly `scope`.
	#[instrument(skip(self, value), fields(scope = %scope, name = %name))]
	pub async fn update(
		&self,
		scope: &Scope,
		name: &str,
		value: &SecretString,
		already_base64: bool,
		caller: Caller,
	) -> SecretsResult<SecretInfo> {
		let name = validate_write_name(name, caller)?;
		let payload = encode_payload(&name, value, already_base64)?;

		if self.store.get_secret(scope, &name).await?.is_none() {
			return Err(SecretsError::NotFound(name.to_string()));
		}

		let sealed = seal_value(&self.key, &payload)?;
		let stored = self
			.store
			.update_secret(scope, &name, &sealed, self.key.fingerprint())
			.await?;

		info!(digest = %stored.digest, "secret updated");
		Ok(stored.info())
	}

	#[instrument(skip(self), fields(scope = %scope, name = %name))]
	pub async fn delete(&self, scope: &Scope, name: &str, caller: Caller) -> SecretsResult<()> {
		let name = validate_write_name(name, caller)?;
		self.store.delete_secret(scope, &name).await?;
		info!("secret deleted");
		Ok(())
	}

	/// Decrypted value of `name` as seen from `scope`.
	///
	/// # Errors
	/// `NotFound` when absent or only present in another namespace;
	/// `Crypto(AuthenticationFailed)` when sealed under a different key.
	#[instrument(skip(self), fields(scope = %scope, name = %name))]
	pub async fn get(&self, scope: &Scope, name: &str) -> SecretsResult<SecretString> {
		let name = SecretName::new(name)?;
		let stored = self
			.store
			.find_visible_secret(scope, &name)
			.await?
			.ok_or_else(|| SecretsError::NotFound(name.to_string()))?;
		self.reveal(&stored)
	}

	/// Every secret of a project, sorted by name with project-level entries
	/// ahead of namespace entries of the same name.
	#[instrument(skip(self), fields(project = %project))]
	pub async fn list(
		&self,
		project: &ProjectName,
		include_system: bool,
	) -> SecretsResult<Vec<SecretInfo>> {
		let stored = self.store.list_project_secrets(project, include_system).await?;
		Ok(stored.iter().map(StoredSecret::info).collect())
	}

	/// Like [`list`](Self::list) but limited to what `scope` can see.
	#[instrument(skip(self), fields(scope = %scope))]
	pub async fn list_visible(
		&self,
		scope: &Scope,
		include_system: bool,
	) -> SecretsResult<Vec<SecretInfo>> {
		let stored = self.store.list_visible_secrets(scope, include_system).await?;
		Ok(stored.iter().map(StoredSecret::info).collect())
	}

	/// Decrypt a stored secret under the current key.
	pub(crate) fn reveal(&self, stored: &StoredSecret) -> SecretsResult<SecretString> {
		let payload = open_value(&self.key, &stored.encrypted_value)?;
		let raw = Zeroizing::new(STANDARD.decode(payload.as_slice()).map_err(|_| {
			SecretsError::Internal(format!("stored payload of {} is not base64", stored.name))
		})?);
		let text = String::from_utf8(raw.to_vec())
			.map_err(|_| SecretsError::InvalidEncoding(stored.name.clone()))?;
		Ok(SecretString::new(text))
	}
}

fn validate_write_name(name: &str, caller: Caller) -> SecretsResult<SecretName> {
	let name = SecretName::new(name)?;
	if name.is_reserved() && caller == Caller::User {
		return Err(SecretsError::ReservedName(name.to_string()));
	}
	Ok(name)
}

/// The base64 text that gets sealed.
///
/// Pre-encoded values must decode to UTF-8, since reads hand back text.
fn encode_payload(
	name: &SecretName,
	value: &SecretString,
	already_base64: bool,
) -> SecretsResult<Zeroizing<String>> {
	if value.is_empty() {
		return Err(SecretsError::EmptyValue(name.to_string()));
	}

	if already_base64 {
		let decoded = Zeroizing::new(
			STANDARD
				.decode(value.expose())
				.map_err(|_| SecretsError::InvalidEncoding(name.to_string()))?,
		);
		check_size(name, decoded.len())?;
		if std::str::from_utf8(&decoded).is_err() {
			return Err(SecretsError::InvalidEncoding(name.to_string()));
		}
		return Ok(Zeroizing::new(value.expose().clone()));
	}

	check_size(name, value.len())?;
	Ok(Zeroizing::new(STANDARD.encode(value.expose())))
}

fn check_size(name: &SecretName, len: usize) -> SecretsResult<()> {
	if len > MAX_SECRET_VALUE_SIZE {
		return Err(SecretsError::ValueTooLarge {
			name: name.to_string(),
			max: MAX_SECRET_VALUE_SIZE,
		});
	}
	Ok(())
}
