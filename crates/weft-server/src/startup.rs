// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process startup: tracing, database, and the one-shot key rotation check.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weft_server_config::{DatabaseConfig, LoggingConfig, ServerConfig};
use weft_server_db::SqlitePool;
use weft_server_secrets::{KeyRotationCoordinator, RotationReport, ServerKeys, SqliteSecretStore};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.level))
		.with_context(|| format!("invalid log filter {:?}", config.level))?;

	// stdout belongs to command output.
	let json = config
		.json
		.then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));
	let text = (!config.json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

	tracing_subscriber::registry()
		.with(filter)
		.with(json)
		.with(text)
		.try_init()
		.context("failed to install tracing subscriber")?;
	Ok(())
}

/// Open the pool and bring the schema up to date.
pub async fn open_database(config: &DatabaseConfig) -> anyhow::Result<SqlitePool> {
	let pool = weft_server_db::create_pool(
		&config.url,
		Duration::from_millis(config.busy_timeout_ms),
	)
	.await
	.with_context(|| format!("failed to open database {}", config.url))?;

	weft_server_db::run_migrations(&pool)
		.await
		.context("failed to run database migrations")?;
	Ok(pool)
}

/// Everything the commands need once configuration is loaded.
pub struct ServerContext {
	pub config: ServerConfig,
	pub keys: ServerKeys,
	pub store: Arc<SqliteSecretStore>,
}

impl ServerContext {
	pub async fn open(config: ServerConfig) -> anyhow::Result<Self> {
		let keys = ServerKeys::from_config(&config.secrets)?;
		let pool = open_database(&config.database).await?;
		Ok(Self {
			config,
			keys,
			store: Arc::new(SqliteSecretStore::new(pool)),
		})
	}

	/// Rotate every project from the previous key to the current one.
	///
	/// Aborted projects are logged and reported; they never fail the call.
	pub async fn rotate_keys(&self) -> anyhow::Result<Vec<RotationReport>> {
		if self.keys.previous.is_none() {
			tracing::info!("no previous server key configured, skipping key rotation");
		}
		let reports = KeyRotationCoordinator::new(self.store.clone())
			.rotate_all(&self.keys)
			.await
			.context("failed to enumerate projects for key rotation")?;
		Ok(reports)
	}

	/// The startup check: rotate when enabled and a previous key is configured.
	pub async fn startup_rotation(&self) -> anyhow::Result<Vec<RotationReport>> {
		if !self.config.secrets.rotate_on_startup {
			tracing::info!("key rotation on startup disabled");
			return Ok(Vec::new());
		}
		if self.keys.previous.is_none() {
			return Ok(Vec::new());
		}
		self.rotate_keys().await
	}

	/// [`startup_rotation`](Self::startup_rotation) for `start`: failures are
	/// logged and retried on the next start, never fatal.
	pub async fn run_startup_rotation(&self) -> Vec<RotationReport> {
		match self.startup_rotation().await {
			Ok(reports) => {
				for report in &reports {
					tracing::info!(project = %report.project, outcome = %report, "startup key rotation");
				}
				reports
			}
			Err(e) => {
				tracing::error!(error = %format!("{e:#}"), "startup key rotation failed");
				Vec::new()
			}
		}
	}
}
