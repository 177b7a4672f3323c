// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Loading sensitive settings from the process environment.
//!
//! Server keys are usually mounted as files (Docker secrets, Kubernetes
//! secret volumes), so every lookup honours `VAR_FILE` before `VAR`.

use std::path::{Path, PathBuf};
use std::{env, fs};

use thiserror::Error;
use weft_common_secret::SecretString;

#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Look up `var`, preferring the file named by `{var}_FILE`.
///
/// A single trailing newline is removed from file contents. Returns
/// `Ok(None)` when neither variable is set.
///
/// ```no_run
/// use weft_common_config::load_secret_env;
///
/// if let Some(key) = load_secret_env("WEFT_SERVER_APP_KEY")? {
///     println!("app key configured: {key}"); // prints "[REDACTED]"
/// }
/// # Ok::<(), weft_common_config::SecretEnvError>(())
/// ```
pub fn load_secret_env(var: &str) -> Result<Option<SecretString>, SecretEnvError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path) = env::var(&file_var) {
		if path.is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}
		return read_secret_file(Path::new(&path)).map(Some);
	}

	Ok(env::var(var).ok().map(SecretString::from))
}

/// Read a whole file as a secret, dropping one trailing newline.
pub fn read_secret_file(path: &Path) -> Result<SecretString, SecretEnvError> {
	let mut content = fs::read_to_string(path).map_err(|source| SecretEnvError::Io {
		path: path.to_path_buf(),
		source,
	})?;

	if content.ends_with('\n') {
		content.pop();
	}
	Ok(SecretString::new(content))
}
