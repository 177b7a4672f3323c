// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read-only access to user secrets for job templating.

use std::collections::BTreeMap;

use tracing::instrument;
use weft_common_secret::SecretString;

use crate::error::{SecretsError, SecretsResult};
use crate::service::SecretsService;
use crate::store::SecretStore;
use crate::types::{Scope, SecretName, SecretType};

pub struct SecretResolver<'a, S: SecretStore> {
	service: &'a SecretsService<S>,
}

impl<'a, S: SecretStore> SecretResolver<'a, S> {
	pub fn new(service: &'a SecretsService<S>) -> Self {
		Self { service }
	}

	/// Plaintext of a user secret visible from `scope`.
	///
	/// # Errors
	/// `InvalidSecretName` when `name` is malformed. `NotFound` when the
	/// secret is missing, lives in a sibling namespace, or is a system secret.
	#[instrument(skip(self), fields(scope = %scope, name = %name))]
	pub async fn resolve(&self, scope: &Scope, name: &str) -> SecretsResult<SecretString> {
		let parsed = SecretName::new(name)?;
		if parsed.is_reserved() {
			return Err(SecretsError::NotFound(parsed.to_string()));
		}
		self.service.get(scope, name).await
	}

	/// Every user secret visible from `scope`, keyed by name.
	#[instrument(skip(self), fields(scope = %scope))]
	pub async fn resolve_all(&self, scope: &Scope) -> SecretsResult<BTreeMap<String, SecretString>> {
		let visible = self
			.service
			.store()
			.list_visible_secrets(scope, false)
			.await?;

		let mut values = BTreeMap::new();
		// Project rows come before namespace rows of the same name, so the
		// namespace value is inserted last and wins.
		for stored in visible.iter().filter(|s| s.secret_type == SecretType::User) {
			values.insert(stored.name.clone(), self.service.reveal(stored)?);
		}
		Ok(values)
	}
}
