// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

/// Create a SqlitePool with WAL mode and common settings.
///
/// `busy_timeout` bounds how long a writer waits for another replica's
/// transaction (for example a key rotation) before failing.
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid, `DbError::Sqlx` if the
/// connection fails.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str, busy_timeout: Duration) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(busy_timeout)
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

const MIGRATIONS: &[(&str, &str)] = &[
	(
		"001_create_secrets",
		include_str!("../migrations/001_create_secrets.sql"),
	),
	(
		"002_create_server_keys",
		include_str!("../migrations/002_create_server_keys.sql"),
	),
];

/// Apply the schema. Every statement is idempotent, so this runs on each start.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	for (name, sql) in MIGRATIONS {
		for stmt in split_statements(sql) {
			sqlx::query(stmt).execute(pool).await?;
		}
		tracing::debug!(migration = name, "migration applied");
	}
	Ok(())
}

fn split_statements(sql: &str) -> impl Iterator<Item = &str> {
	sql.split(';').map(str::trim).filter(|stmt| {
		stmt.lines()
			.any(|line| !line.trim().is_empty() && !line.trim_start().starts_with("--"))
	})
}
