// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the Weft server.
//!
//! Settings are merged from built-in defaults, `/etc/weft/server.toml` and
//! `WEFT_SERVER_*` environment variables, in that order of precedence.
//! Server keys additionally accept `WEFT_SERVER_APP_KEY_FILE` and
//! `WEFT_SERVER_OLD_APP_KEY_FILE`.
//!
//! ```ignore
//! use weft_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("database at {}", config.database.url);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub secrets: SecretsConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from defaults, the system config file and the environment.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Resolve a merged layer, applying defaults and validation.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let secrets = layer.secrets.unwrap_or_default().finalize()?;
	let logging = layer.logging.unwrap_or_default().finalize();

	if let Some(old) = &secrets.old_app_key {
		if old.expose() == secrets.app_key.expose() {
			return Err(ConfigError::Validation(
				"WEFT_SERVER_OLD_APP_KEY must differ from WEFT_SERVER_APP_KEY".to_string(),
			));
		}
	}

	info!(
		database = %database.url,
		rotation_requested = secrets.old_app_key.is_some(),
		rotate_on_startup = secrets.rotate_on_startup,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		database,
		secrets,
		logging,
	})
}
