// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret rows.
//!
//! Every method addresses a secret by `(project_name, namespace_name, name)`.
//! `namespace_name = None` means the project-level scope; exact-scope queries
//! compare with `IS ?` so that `NULL` matches `NULL`.

use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};

use crate::error::{is_unique_constraint_error, DbError, Result};
use crate::server_key::ensure_key_digest_in_tx;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SecretRow {
	pub id: String,
	pub project_name: String,
	pub namespace_name: Option<String>,
	pub name: String,
	pub encrypted_value: String,
	pub digest: String,
	pub secret_type: String,
	pub created_at: String,
	pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct CreateSecretParams {
	pub id: String,
	pub project_name: String,
	pub namespace_name: Option<String>,
	pub name: String,
	pub encrypted_value: String,
	pub digest: String,
	pub secret_type: String,
	pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct UpdateSecretParams {
	pub project_name: String,
	pub namespace_name: Option<String>,
	pub name: String,
	pub encrypted_value: String,
	pub digest: String,
	pub secret_type: String,
	pub updated_at: String,
}

const SECRET_COLUMNS: &str = "id, project_name, namespace_name, name, encrypted_value, digest, secret_type, created_at, updated_at";

#[derive(Clone)]
pub struct SecretRepository {
	pool: SqlitePool,
}

impl SecretRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Insert a secret, recording `key_digest` for the project if it has none yet.
	///
	/// # Errors
	/// `DbError::Conflict` when the name is taken in that scope,
	/// `DbError::KeyMismatch` when the project is sealed under another key.
	#[tracing::instrument(skip(self, params, key_digest), fields(project = %params.project_name, namespace = ?params.namespace_name, name = %params.name))]
	pub async fn insert_secret(&self, params: &CreateSecretParams, key_digest: &str) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		ensure_key_digest_in_tx(&mut tx, &params.project_name, key_digest, &params.created_at).await?;

		let result = sqlx::query(
			r#"
			INSERT INTO secrets (id, project_name, namespace_name, name, encrypted_value, digest, secret_type, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&params.id)
		.bind(&params.project_name)
		.bind(&params.namespace_name)
		.bind(&params.name)
		.bind(&params.encrypted_value)
		.bind(&params.digest)
		.bind(&params.secret_type)
		.bind(&params.created_at)
		.bind(&params.created_at)
		.execute(&mut *tx)
		.await;

		match result {
			Ok(_) => {}
			Err(e) if is_unique_constraint_error(&e) => {
				return Err(DbError::Conflict(params.name.clone()));
			}
			Err(e) => return Err(e.into()),
		}

		tx.commit().await?;
		tracing::debug!(secret_id = %params.id, "secret inserted");
		Ok(())
	}

	/// Replace the ciphertext of a secret in exactly the given scope.
	///
	/// Returns rows affected; 0 means no such secret.
	#[tracing::instrument(skip(self, params, key_digest), fields(project = %params.project_name, namespace = ?params.namespace_name, name = %params.name))]
	pub async fn update_secret(&self, params: &UpdateSecretParams, key_digest: &str) -> Result<u64> {
		let mut tx = self.pool.begin().await?;
		ensure_key_digest_in_tx(&mut tx, &params.project_name, key_digest, &params.updated_at).await?;

		let result = sqlx::query(
			r#"
			UPDATE secrets
			SET encrypted_value = ?, digest = ?, secret_type = ?, updated_at = ?
			WHERE project_name = ? AND namespace_name IS ? AND name = ?
			"#,
		)
		.bind(&params.encrypted_value)
		.bind(&params.digest)
		.bind(&params.secret_type)
		.bind(&params.updated_at)
		.bind(&params.project_name)
		.bind(&params.namespace_name)
		.bind(&params.name)
		.execute(&mut *tx)
		.await?;

		if result.rows_affected() == 0 {
			// Nothing to update; do not leave a key record behind either.
			return Ok(0);
		}

		tx.commit().await?;
		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_secret(
		&self,
		project_name: &str,
		namespace_name: Option<&str>,
		name: &str,
	) -> Result<u64> {
		let result = sqlx::query(
			"DELETE FROM secrets WHERE project_name = ? AND namespace_name IS ? AND name = ?",
		)
		.bind(project_name)
		.bind(namespace_name)
		.bind(name)
		.execute(&self.pool)
		.await?;

		Ok(result.rows_affected())
	}

	/// Fetch a secret stored in exactly this scope.
	#[tracing::instrument(skip(self))]
	pub async fn get_secret(
		&self,
		project_name: &str,
		namespace_name: Option<&str>,
		name: &str,
	) -> Result<Option<SecretRow>> {
		let row = sqlx::query_as::<_, SecretRow>(&format!(
			"SELECT {SECRET_COLUMNS} FROM secrets WHERE project_name = ? AND namespace_name IS ? AND name = ?"
		))
		.bind(project_name)
		.bind(namespace_name)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	/// Fetch the secret a scope sees under `name`: its own namespace row if
	/// present, otherwise the project-level row. Sibling namespaces never match.
	#[tracing::instrument(skip(self))]
	pub async fn find_visible_secret(
		&self,
		project_name: &str,
		namespace_name: Option<&str>,
		name: &str,
	) -> Result<Option<SecretRow>> {
		let row = sqlx::query_as::<_, SecretRow>(&format!(
			r#"
			SELECT {SECRET_COLUMNS} FROM secrets
			WHERE project_name = ? AND name = ?
			  AND (namespace_name IS NULL OR namespace_name = ?)
			ORDER BY namespace_name IS NULL
			LIMIT 1
			"#
		))
		.bind(project_name)
		.bind(name)
		.bind(namespace_name)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	/// All secrets of a project, project-level rows first within each name.
	#[tracing::instrument(skip(self))]
	pub async fn list_project_secrets(
		&self,
		project_name: &str,
		include_system: bool,
	) -> Result<Vec<SecretRow>> {
		let rows = sqlx::query_as::<_, SecretRow>(&format!(
			r#"
			SELECT {SECRET_COLUMNS} FROM secrets
			WHERE project_name = ? AND (? OR secret_type = 'user')
			ORDER BY name, namespace_name
			"#
		))
		.bind(project_name)
		.bind(include_system)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	/// Secrets visible from a scope (project-level plus that namespace).
	#[tracing::instrument(skip(self))]
	pub async fn list_visible_secrets(
		&self,
		project_name: &str,
		namespace_name: Option<&str>,
		include_system: bool,
	) -> Result<Vec<SecretRow>> {
		let rows = sqlx::query_as::<_, SecretRow>(&format!(
			r#"
			SELECT {SECRET_COLUMNS} FROM secrets
			WHERE project_name = ?
			  AND (namespace_name IS NULL OR namespace_name = ?)
			  AND (? OR secret_type = 'user')
			ORDER BY name, namespace_name
			"#
		))
		.bind(project_name)
		.bind(namespace_name)
		.bind(include_system)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	/// Every secret of a project, read inside a rotation transaction.
	pub async fn list_project_secrets_in_tx(
		&self,
		tx: &mut Transaction<'_, Sqlite>,
		project_name: &str,
	) -> Result<Vec<SecretRow>> {
		let rows = sqlx::query_as::<_, SecretRow>(&format!(
			"SELECT {SECRET_COLUMNS} FROM secrets WHERE project_name = ? ORDER BY id"
		))
		.bind(project_name)
		.fetch_all(&mut **tx)
		.await?;

		Ok(rows)
	}

	/// Overwrite one row's ciphertext inside a rotation transaction.
	pub async fn reseal_secret_in_tx(
		&self,
		tx: &mut Transaction<'_, Sqlite>,
		id: &str,
		encrypted_value: &str,
		digest: &str,
		updated_at: &str,
	) -> Result<()> {
		let result = sqlx::query(
			"UPDATE secrets SET encrypted_value = ?, digest = ?, updated_at = ? WHERE id = ?",
		)
		.bind(encrypted_value)
		.bind(digest)
		.bind(updated_at)
		.bind(id)
		.execute(&mut **tx)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("secret {id}")));
		}
		Ok(())
	}

	pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
		Ok(self.pool.begin().await?)
	}
}
