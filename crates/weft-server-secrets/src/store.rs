// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret storage with SQLite backend.
//!
//! Translates between validated domain types and `weft-server-db` rows.
//! Values pass through here sealed; this module never encrypts or decrypts.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use tracing::{debug, instrument};
use uuid::Uuid;
use weft_server_db::{
	CreateSecretParams, SecretRepository, SecretRow, ServerKeyRepository, UpdateSecretParams,
};

use crate::encryption::SealedValue;
use crate::error::{SecretsError, SecretsResult};
use crate::types::{ProjectName, Scope, SecretInfo, SecretName, SecretType};

/// A persisted secret, still sealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSecret {
	pub id: String,
	pub project: String,
	pub namespace: Option<String>,
	pub name: String,
	pub encrypted_value: String,
	pub digest: String,
	pub secret_type: SecretType,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl StoredSecret {
	pub fn info(&self) -> SecretInfo {
		SecretInfo {
			name: self.name.clone(),
			digest: self.digest.clone(),
			namespace: self.namespace.clone(),
			secret_type: self.secret_type,
			created_at: self.created_at,
			updated_at: self.updated_at,
		}
	}
}

impl TryFrom<SecretRow> for StoredSecret {
	type Error = SecretsError;

	fn try_from(row: SecretRow) -> SecretsResult<Self> {
		Ok(Self {
			secret_type: row.secret_type.parse()?,
			created_at: parse_timestamp(&row.created_at)?,
			updated_at: parse_timestamp(&row.updated_at)?,
			id: row.id,
			project: row.project_name,
			namespace: row.namespace_name,
			name: row.name,
			encrypted_value: row.encrypted_value,
			digest: row.digest,
		})
	}
}

/// Re-encrypts one stored secret during rotation.
pub type ResealFn<'a> = dyn Fn(&StoredSecret) -> SecretsResult<SealedValue> + Send + Sync + 'a;

#[async_trait]
pub trait SecretStore: Send + Sync {
	/// Insert a secret. `key_fingerprint` identifies the key it was sealed under.
	async fn create_secret(
		&self,
		scope: &Scope,
		name: &SecretName,
		sealed: &SealedValue,
		key_fingerprint: &str,
	) -> SecretsResult<StoredSecret>;

	/// Replace the sealed value of a secret in exactly `scope`.
	async fn update_secret(
		&self,
		scope: &Scope,
		name: &SecretName,
		sealed: &SealedValue,
		key_fingerprint: &str,
	) -> SecretsResult<StoredSecret>;

	async fn delete_secret(&self, scope: &Scope, name: &SecretName) -> SecretsResult<()>;

	/// Exact-scope lookup.
	async fn get_secret(&self, scope: &Scope, name: &SecretName)
		-> SecretsResult<Option<StoredSecret>>;

	/// Lookup following the visibility rule: namespace row, else project row.
	async fn find_visible_secret(
		&self,
		scope: &Scope,
		name: &SecretName,
	) -> SecretsResult<Option<StoredSecret>>;

	async fn list_project_secrets(
		&self,
		project: &ProjectName,
		include_system: bool,
	) -> SecretsResult<Vec<StoredSecret>>;

	async fn list_visible_secrets(
		&self,
		scope: &Scope,
		include_system: bool,
	) -> SecretsResult<Vec<StoredSecret>>;

	/// Fingerprint of the key the project is sealed under, if it has secrets.
	async fn key_fingerprint(&self, project: &ProjectName) -> SecretsResult<Option<String>>;

	async fn projects_with_keys(&self) -> SecretsResult<Vec<ProjectName>>;

	/// Atomically move a project from `expected_fingerprint` to `new_fingerprint`,
	/// rewriting every secret with `reseal`.
	///
	/// # Errors
	/// `RotationConflict` when the project is no longer at `expected_fingerprint`.
	/// Any error from `reseal` is returned as-is with nothing persisted.
	async fn rotate_project_key(
		&self,
		project: &ProjectName,
		expected_fingerprint: &str,
		new_fingerprint: &str,
		reseal: &ResealFn<'_>,
	) -> SecretsResult<usize>;
}

#[derive(Clone)]
pub struct SqliteSecretStore {
	secrets: SecretRepository,
	keys: ServerKeyRepository,
}

impl SqliteSecretStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			secrets: SecretRepository::new(pool.clone()),
			keys: ServerKeyRepository::new(pool),
		}
	}
}

#[async_trait]
impl SecretStore for SqliteSecretStore {
	#[instrument(skip(self, sealed, key_fingerprint), fields(scope = %scope, name = %name))]
	async fn create_secret(
		&self,
		scope: &Scope,
		name: &SecretName,
		sealed: &SealedValue,
		key_fingerprint: &str,
	) -> SecretsResult<StoredSecret> {
		// Round-trip through the stored format so callers see what a read returns.
		let now = parse_timestamp(&format_timestamp(Utc::now()))?;
		let params = CreateSecretParams {
			id: Uuid::new_v4().to_string(),
			project_name: scope.project.to_string(),
			namespace_name: scope.namespace_str().map(str::to_string),
			name: name.to_string(),
			encrypted_value: sealed.encrypted_value.clone(),
			digest: sealed.digest.clone(),
			secret_type: name.secret_type().as_str().to_string(),
			created_at: format_timestamp(now),
		};

		self.secrets.insert_secret(&params, key_fingerprint).await?;
		debug!(secret_id = %params.id, "secret stored");

		Ok(StoredSecret {
			id: params.id,
			project: params.project_name,
			namespace: params.namespace_name,
			name: params.name,
			encrypted_value: params.encrypted_value,
			digest: params.digest,
			secret_type: name.secret_type(),
			created_at: now,
			updated_at: now,
		})
	}

	#[instrument(skip(self, sealed, key_fingerprint), fields(scope = %scope, name = %name))]
	async fn update_secret(
		&self,
		scope: &Scope,
		name: &SecretName,
		sealed: &SealedValue,
		key_fingerprint: &str,
	) -> SecretsResult<StoredSecret> {
		let params = UpdateSecretParams {
			project_name: scope.project.to_string(),
			namespace_name: scope.namespace_str().map(str::to_string),
			name: name.to_string(),
			encrypted_value: sealed.encrypted_value.clone(),
			digest: sealed.digest.clone(),
			secret_type: name.secret_type().as_str().to_string(),
			updated_at: format_timestamp(Utc::now()),
		};

		if self.secrets.update_secret(&params, key_fingerprint).await? == 0 {
			return Err(SecretsError::NotFound(name.to_string()));
		}

		self.get_secret(scope, name)
			.await?
			.ok_or_else(|| SecretsError::NotFound(name.to_string()))
	}

	#[instrument(skip(self), fields(scope = %scope, name = %name))]
	async fn delete_secret(&self, scope: &Scope, name: &SecretName) -> SecretsResult<()> {
		let deleted = self
			.secrets
			.delete_secret(scope.project.as_str(), scope.namespace_str(), name.as_str())
			.await?;
		if deleted == 0 {
			return Err(SecretsError::NotFound(name.to_string()));
		}
		Ok(())
	}

	async fn get_secret(
		&self,
		scope: &Scope,
		name: &SecretName,
	) -> SecretsResult<Option<StoredSecret>> {
		self.secrets
			.get_secret(scope.project.as_str(), scope.namespace_str(), name.as_str())
			.await?
			.map(StoredSecret::try_from)
			.transpose()
	}

	async fn find_visible_secret(
		&self,
		scope: &Scope,
		name: &SecretName,
	) -> SecretsResult<Option<StoredSecret>> {
		self.secrets
			.find_visible_secret(scope.project.as_str(), scope.namespace_str(), name.as_str())
			.await?
			.map(StoredSecret::try_from)
			.transpose()
	}

	async fn list_project_secrets(
		&self,
		project: &ProjectName,
		include_system: bool,
	) -> SecretsResult<Vec<StoredSecret>> {
		self.secrets
			.list_project_secrets(project.as_str(), include_system)
			.await?
			.into_iter()
			.map(StoredSecret::try_from)
			.collect()
	}

	async fn list_visible_secrets(
		&self,
		scope: &Scope,
		include_system: bool,
	) -> SecretsResult<Vec<StoredSecret>> {
		self.secrets
			.list_visible_secrets(scope.project.as_str(), scope.namespace_str(), include_system)
			.await?
			.into_iter()
			.map(StoredSecret::try_from)
			.collect()
	}

	async fn key_fingerprint(&self, project: &ProjectName) -> SecretsResult<Option<String>> {
		Ok(self
			.keys
			.get_server_key(project.as_str())
			.await?
			.map(|row| row.key_digest))
	}

	async fn projects_with_keys(&self) -> SecretsResult<Vec<ProjectName>> {
		self.keys
			.list_server_keys()
			.await?
			.into_iter()
			.map(|row| ProjectName::new(row.project_name))
			.collect()
	}

	#[instrument(skip(self, expected_fingerprint, new_fingerprint, reseal), fields(project = %project))]
	async fn rotate_project_key(
		&self,
		project: &ProjectName,
		expected_fingerprint: &str,
		new_fingerprint: &str,
		reseal: &ResealFn<'_>,
	) -> SecretsResult<usize> {
		let now = format_timestamp(Utc::now());
		let mut tx = self.secrets.begin().await?;

		// Dropping `tx` on any early return rolls everything back.
		let swapped = self
			.keys
			.swap_key_digest_in_tx(
				&mut tx,
				project.as_str(),
				expected_fingerprint,
				new_fingerprint,
				&now,
			)
			.await?;
		if swapped == 0 {
			return Err(SecretsError::RotationConflict(project.to_string()));
		}

		let rows = self
			.secrets
			.list_project_secrets_in_tx(&mut tx, project.as_str())
			.await?;
		let total = rows.len();

		for row in rows {
			let stored = StoredSecret::try_from(row)?;
			let sealed = reseal(&stored)?;
			self.secrets
				.reseal_secret_in_tx(&mut tx, &stored.id, &sealed.encrypted_value, &sealed.digest, &now)
				.await?;
		}

		tx.commit().await.map_err(SecretsError::Database)?;
		debug!(resealed = total, "project key rotated");
		Ok(total)
	}
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> SecretsResult<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| SecretsError::Internal(format!("invalid timestamp {s:?}: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::encryption::{seal_value, ServerKey};
	use crate::testing::create_test_pool;

	fn scope(ns: Option<&str>) -> Scope {
		Scope::parse("proj", ns).unwrap()
	}

	fn name(n: &str) -> SecretName {
		SecretName::new(n).unwrap()
	}

	#[tokio::test]
	async fn create_then_get_returns_same_row() {
		let store = SqliteSecretStore::new(create_test_pool().await);
		let key = ServerKey::generate().unwrap();
		let sealed = seal_value(&key, "dmFsdWU=").unwrap();

		let created = store
			.create_secret(&scope(None), &name("A"), &sealed, key.fingerprint())
			.await
			.unwrap();
		let fetched = store.get_secret(&scope(None), &name("A")).await.unwrap().unwrap();

		assert_eq!(created.id, fetched.id);
		assert_eq!(fetched.digest, sealed.digest);
		assert_eq!(fetched.secret_type, SecretType::User);
		assert_eq!(
			store.key_fingerprint(&scope(None).project).await.unwrap().as_deref(),
			Some(key.fingerprint())
		);
	}

	#[tokio::test]
	async fn update_missing_is_not_found() {
		let store = SqliteSecretStore::new(create_test_pool().await);
		let key = ServerKey::generate().unwrap();
		let sealed = seal_value(&key, "dmFsdWU=").unwrap();

		let err = store
			.update_secret(&scope(None), &name("A"), &sealed, key.fingerprint())
			.await
			.unwrap_err();
		assert!(matches!(err, SecretsError::NotFound(_)));
	}

	#[tokio::test]
	async fn reseal_failure_rolls_back_everything() {
		let store = SqliteSecretStore::new(create_test_pool().await);
		let key = ServerKey::generate().unwrap();
		for n in ["A", "B"] {
			let sealed = seal_value(&key, "dmFsdWU=").unwrap();
			store
				.create_secret(&scope(None), &name(n), &sealed, key.fingerprint())
				.await
				.unwrap();
		}
		let before = store.list_project_secrets(&scope(None).project, true).await.unwrap();

		let failing = |s: &StoredSecret| -> SecretsResult<SealedValue> {
			if s.name == "B" {
				Err(SecretsError::Internal("injected".into()))
			} else {
				Ok(SealedValue {
					encrypted_value: "rewritten".into(),
					digest: "rewritten".into(),
				})
			}
		};
		let err = store
			.rotate_project_key(&scope(None).project, key.fingerprint(), "next", &failing)
			.await
			.unwrap_err();
		assert!(matches!(err, SecretsError::Internal(_)));

		let after = store.list_project_secrets(&scope(None).project, true).await.unwrap();
		assert_eq!(before, after);
		assert_eq!(
			store.key_fingerprint(&scope(None).project).await.unwrap().as_deref(),
			Some(key.fingerprint())
		);
	}

	#[tokio::test]
	async fn stale_expected_fingerprint_is_conflict() {
		let store = SqliteSecretStore::new(create_test_pool().await);
		let key = ServerKey::generate().unwrap();
		let sealed = seal_value(&key, "dmFsdWU=").unwrap();
		store
			.create_secret(&scope(None), &name("A"), &sealed, key.fingerprint())
			.await
			.unwrap();

		let identity = |s: &StoredSecret| -> SecretsResult<SealedValue> {
			Ok(SealedValue {
				encrypted_value: s.encrypted_value.clone(),
				digest: s.digest.clone(),
			})
		};
		let err = store
			.rotate_project_key(&scope(None).project, "not-the-stored-one", "next", &identity)
			.await
			.unwrap_err();
		assert!(matches!(err, SecretsError::RotationConflict(_)));
	}
}
