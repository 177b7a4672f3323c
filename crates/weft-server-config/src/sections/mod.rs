// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod database;
mod logging;
mod secrets;

pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
pub use secrets::{SecretsConfig, SecretsConfigLayer};
