// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Encrypted secret store for Weft projects.
//!
//! Secrets belong to a project and optionally a namespace within it. Values
//! are sealed with AES-256-GCM under the server key before they reach the
//! database, and only ever leave this crate as [`SecretString`].
//!
//! # Components
//!
//! - [`encryption`]: AES-256-GCM sealing and tagged HMAC digests
//! - [`SecretsService`]: validation, scoping, create/update/delete/get/list
//! - [`KeyRotationCoordinator`]: per-project re-encryption when the server
//!   key changes
//! - [`SecretResolver`]: plaintext lookup for job templating
//!
//! # Visibility
//!
//! A caller scoped to `(project, namespace)` sees the project-level secrets
//! and its own namespace's secrets. When both define a name, the namespace
//! value wins. Sibling namespaces are never visible.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(SqliteSecretStore::new(pool));
//! let service = SecretsService::new(store, keys.current.clone());
//! let scope = Scope::parse("analytics", Some("team-a"))?;
//! service.create(&scope, "DB_PASSWORD", &value, false, Caller::User).await?;
//! let plain = SecretResolver::new(&service).resolve(&scope, "DB_PASSWORD").await?;
//! ```

pub mod config;
pub mod encryption;
pub mod error;
pub mod resolver;
pub mod rotation;
pub mod service;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::ServerKeys;
pub use encryption::{SealedValue, ServerKey};
pub use error::{CryptoError, SecretsError, SecretsResult};
pub use resolver::SecretResolver;
pub use rotation::{KeyRotationCoordinator, RotationOutcome, RotationReport};
pub use service::{SecretsService, MAX_SECRET_VALUE_SIZE};
pub use store::{SecretStore, SqliteSecretStore, StoredSecret};
pub use types::{
	Caller, NamespaceName, ProjectName, Scope, SecretInfo, SecretName, SecretType, PROJECT_LEVEL_LABEL,
	RESERVED_PREFIX,
};
pub use weft_common_secret::SecretString;
