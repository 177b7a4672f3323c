// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Configuration primitives shared by the Weft crates.
//!
//! - [`load_secret_env`]: read server keys and other sensitive settings from
//!   `VAR` or from the file named by `VAR_FILE`
//! - [`read_secret_file`]: read a secret value from disk, as the operator CLI
//!   does for `secret set --file`

pub mod env;

pub use weft_common_secret::{Secret, SecretString, REDACTED};

pub use env::{load_secret_env, read_secret_file, SecretEnvError};
