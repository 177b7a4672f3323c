// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	/// The project's secrets are sealed under a different server key.
	#[error("Server key mismatch for project {0}")]
	KeyMismatch(String),

	#[error("Internal: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub(crate) fn is_unique_constraint_error(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::Database(db_err) => db_err.message().contains("UNIQUE constraint failed"),
		_ => false,
	}
}
