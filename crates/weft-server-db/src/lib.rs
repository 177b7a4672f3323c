// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database layer for the Weft secret store.
//!
//! Each table has a `*Repository` holding the pool, with inherent async
//! methods. Methods ending in `_in_tx` run inside a caller-owned transaction
//! and never commit.
//!
//! Values are stored exactly as handed in: this crate never sees plaintext.

pub mod error;
pub mod pool;
pub mod secret;
pub mod server_key;

#[cfg(test)]
pub mod testing;

pub use error::{DbError, Result};
pub use pool::{create_pool, run_migrations};
pub use secret::{CreateSecretParams, SecretRepository, SecretRow, UpdateSecretParams};
pub use server_key::{ServerKeyRepository, ServerKeyRow};
pub use sqlx::sqlite::SqlitePool;
pub use sqlx::{Sqlite, Transaction};
