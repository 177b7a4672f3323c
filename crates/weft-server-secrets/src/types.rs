// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the secret store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SecretsError, SecretsResult};

/// Names starting with this prefix belong to the orchestrator itself.
pub const RESERVED_PREFIX: &str = "_WEFT_";

/// Maximum length of secret, project and namespace names.
pub const MAX_NAME_LEN: usize = 128;

/// Label shown in listings for project-level secrets.
pub const PROJECT_LEVEL_LABEL: &str = "*";

fn validate_scope_part(kind: &str, value: &str) -> SecretsResult<()> {
	if value.is_empty() || value.len() > MAX_NAME_LEN {
		return Err(SecretsError::InvalidScope(format!(
			"{kind} name must be 1-{MAX_NAME_LEN} characters"
		)));
	}
	if !value
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
	{
		return Err(SecretsError::InvalidScope(format!(
			"{kind} name {value:?} may only contain letters, digits, '-', '_' and '.'"
		)));
	}
	Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProjectName(String);

impl ProjectName {
	pub fn new(value: impl Into<String>) -> SecretsResult<Self> {
		let value = value.into();
		validate_scope_part("project", &value)?;
		Ok(Self(value))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceName(String);

impl NamespaceName {
	pub fn new(value: impl Into<String>) -> SecretsResult<Self> {
		let value = value.into();
		validate_scope_part("namespace", &value)?;
		Ok(Self(value))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

macro_rules! string_newtype_impls {
	($ty:ident) => {
		impl fmt::Display for $ty {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl TryFrom<String> for $ty {
			type Error = SecretsError;

			fn try_from(value: String) -> SecretsResult<Self> {
				Self::new(value)
			}
		}

		impl From<$ty> for String {
			fn from(value: $ty) -> String {
				value.0
			}
		}

		impl FromStr for $ty {
			type Err = SecretsError;

			fn from_str(s: &str) -> SecretsResult<Self> {
				Self::new(s)
			}
		}
	};
}

string_newtype_impls!(ProjectName);
string_newtype_impls!(NamespaceName);
string_newtype_impls!(SecretName);

/// Where a secret lives and who may see it.
///
/// A namespace scope sees its own secrets plus the project-level ones,
/// never those of a sibling namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
	pub project: ProjectName,
	pub namespace: Option<NamespaceName>,
}

impl Scope {
	pub fn project(project: ProjectName) -> Self {
		Self {
			project,
			namespace: None,
		}
	}

	pub fn namespace(project: ProjectName, namespace: NamespaceName) -> Self {
		Self {
			project,
			namespace: Some(namespace),
		}
	}

	/// Parse a scope from raw strings, as they arrive from the CLI.
	pub fn parse(project: &str, namespace: Option<&str>) -> SecretsResult<Self> {
		Ok(Self {
			project: ProjectName::new(project)?,
			namespace: namespace.map(NamespaceName::new).transpose()?,
		})
	}

	pub fn namespace_str(&self) -> Option<&str> {
		self.namespace.as_ref().map(NamespaceName::as_str)
	}
}

impl fmt::Display for Scope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.namespace {
			Some(ns) => write!(f, "{}/{}", self.project, ns),
			None => write!(f, "{}/{}", self.project, PROJECT_LEVEL_LABEL),
		}
	}
}

/// Validated secret name: ASCII letters, digits and underscore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretName(String);

impl SecretName {
	pub fn new(value: impl Into<String>) -> SecretsResult<Self> {
		let value = value.into();
		if value.is_empty() || value.len() > MAX_NAME_LEN {
			return Err(SecretsError::InvalidSecretName(format!(
				"name must be 1-{MAX_NAME_LEN} characters"
			)));
		}
		if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
			return Err(SecretsError::InvalidSecretName(format!(
				"{value:?} may only contain letters, digits and '_'"
			)));
		}
		Ok(Self(value))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_reserved(&self) -> bool {
		self.0.starts_with(RESERVED_PREFIX)
	}

	pub fn secret_type(&self) -> SecretType {
		if self.is_reserved() {
			SecretType::System
		} else {
			SecretType::User
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretType {
	User,
	System,
}

impl SecretType {
	pub fn as_str(&self) -> &'static str {
		match self {
			SecretType::User => "user",
			SecretType::System => "system",
		}
	}
}

impl fmt::Display for SecretType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for SecretType {
	type Err = SecretsError;

	fn from_str(s: &str) -> SecretsResult<Self> {
		match s {
			"user" => Ok(SecretType::User),
			"system" => Ok(SecretType::System),
			other => Err(SecretsError::Internal(format!("unknown secret type {other:?}"))),
		}
	}
}

/// Who is asking. Only the orchestrator itself may write reserved names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
	User,
	Internal,
}

/// Listing entry. Carries the digest, never the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretInfo {
	pub name: String,
	pub digest: String,
	pub namespace: Option<String>,
	pub secret_type: SecretType,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl SecretInfo {
	pub fn namespace_label(&self) -> &str {
		self.namespace.as_deref().unwrap_or(PROJECT_LEVEL_LABEL)
	}
}
