// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

/// Single-connection in-memory pool with the schema applied.
///
/// Each `:memory:` connection is a separate database, hence one connection.
pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect(":memory:")
		.await
		.unwrap();
	crate::run_migrations(&pool).await.unwrap();
	pool
}
