// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-project record of which server key the project's secrets are sealed under.

use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};

use crate::error::{DbError, Result};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ServerKeyRow {
	pub project_name: String,
	pub key_digest: String,
	pub updated_at: String,
}

#[derive(Clone)]
pub struct ServerKeyRepository {
	pool: SqlitePool,
}

impl ServerKeyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_server_key(&self, project_name: &str) -> Result<Option<ServerKeyRow>> {
		let row = sqlx::query_as::<_, ServerKeyRow>(
			"SELECT project_name, key_digest, updated_at FROM server_keys WHERE project_name = ?",
		)
		.bind(project_name)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row)
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_server_keys(&self) -> Result<Vec<ServerKeyRow>> {
		let rows = sqlx::query_as::<_, ServerKeyRow>(
			"SELECT project_name, key_digest, updated_at FROM server_keys ORDER BY project_name",
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	/// Compare-and-swap the project's key digest.
	///
	/// Must be the first write of a rotation transaction: it takes the write
	/// lock, so a racing replica blocks here and then sees zero rows.
	pub async fn swap_key_digest_in_tx(
		&self,
		tx: &mut Transaction<'_, Sqlite>,
		project_name: &str,
		expected_digest: &str,
		new_digest: &str,
		updated_at: &str,
	) -> Result<u64> {
		let result = sqlx::query(
			"UPDATE server_keys SET key_digest = ?, updated_at = ? WHERE project_name = ? AND key_digest = ?",
		)
		.bind(new_digest)
		.bind(updated_at)
		.bind(project_name)
		.bind(expected_digest)
		.execute(&mut **tx)
		.await?;

		Ok(result.rows_affected())
	}
}

/// Record `key_digest` for a project that has none, then require a match.
pub(crate) async fn ensure_key_digest_in_tx(
	tx: &mut Transaction<'_, Sqlite>,
	project_name: &str,
	key_digest: &str,
	now: &str,
) -> Result<()> {
	sqlx::query(
		r#"
		INSERT INTO server_keys (project_name, key_digest, updated_at)
		VALUES (?, ?, ?)
		ON CONFLICT(project_name) DO NOTHING
		"#,
	)
	.bind(project_name)
	.bind(key_digest)
	.bind(now)
	.execute(&mut **tx)
	.await?;

	let (stored,): (String,) =
		sqlx::query_as("SELECT key_digest FROM server_keys WHERE project_name = ?")
			.bind(project_name)
			.fetch_one(&mut **tx)
			.await?;

	if stored != key_digest {
		return Err(DbError::KeyMismatch(project_name.to_string()));
	}
	Ok(())
}
