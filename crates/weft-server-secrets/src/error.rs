// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the secret store.
//!
//! No variant ever carries a secret value; names and scopes only.

use thiserror::Error;
use weft_server_db::DbError;

pub type SecretsResult<T> = Result<T, SecretsError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
	#[error("authentication failed: wrong key or tampered ciphertext")]
	AuthenticationFailed,

	#[error("malformed key: {0}")]
	MalformedKey(String),

	#[error("malformed ciphertext: {0}")]
	MalformedCiphertext(String),

	#[error("encryption failed: {0}")]
	Encryption(String),
}

#[derive(Debug, Error)]
pub enum SecretsError {
	// =========================================================================
	// Validation Errors
	// =========================================================================
	#[error("invalid secret name: {0}")]
	InvalidSecretName(String),

	#[error("invalid scope: {0}")]
	InvalidScope(String),

	#[error("secret name {0} uses a reserved prefix")]
	ReservedName(String),

	#[error("empty value for secret {0}")]
	EmptyValue(String),

	#[error("value for secret {0} is not base64-encoded UTF-8 text")]
	InvalidEncoding(String),

	#[error("value for secret {name} exceeds {max} bytes")]
	ValueTooLarge { name: String, max: usize },

	// =========================================================================
	// Secret Access Errors
	// =========================================================================
	#[error("secret already exists: {0}")]
	DuplicateName(String),

	#[error("secret not found: {0}")]
	NotFound(String),

	#[error(transparent)]
	Crypto(#[from] CryptoError),

	#[error("project {0} is sealed under a different server key")]
	ServerKeyMismatch(String),

	// =========================================================================
	// Rotation Errors
	// =========================================================================
	#[error("key rotation for project {0} already applied by another process")]
	RotationConflict(String),

	#[error("key rotation for project {project} aborted: {reason}")]
	TransactionAborted { project: String, reason: String },

	// =========================================================================
	// Infrastructure Errors
	// =========================================================================
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("database error: {0}")]
	Database(#[source] sqlx::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

impl From<DbError> for SecretsError {
	fn from(e: DbError) -> Self {
		match e {
			DbError::Sqlx(e) => SecretsError::Database(e),
			DbError::Conflict(name) => SecretsError::DuplicateName(name),
			DbError::NotFound(what) => SecretsError::NotFound(what),
			DbError::KeyMismatch(project) => SecretsError::ServerKeyMismatch(project),
			DbError::Internal(msg) => SecretsError::Internal(msg),
		}
	}
}

impl SecretsError {
	/// Returns true if this error should be logged at error level.
	pub fn is_internal(&self) -> bool {
		matches!(
			self,
			SecretsError::Database(_)
				| SecretsError::Internal(_)
				| SecretsError::Configuration(_)
				| SecretsError::TransactionAborted { .. }
				| SecretsError::ServerKeyMismatch(_)
		)
	}

	/// Rejected input; nothing was read or written.
	pub fn is_validation(&self) -> bool {
		matches!(
			self,
			SecretsError::InvalidSecretName(_)
				| SecretsError::InvalidScope(_)
				| SecretsError::ReservedName(_)
				| SecretsError::EmptyValue(_)
				| SecretsError::InvalidEncoding(_)
				| SecretsError::ValueTooLarge { .. }
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn db_conflict_becomes_duplicate_name() {
		let err: SecretsError = DbError::Conflict("TOKEN".into()).into();
		assert!(matches!(err, SecretsError::DuplicateName(ref n) if n == "TOKEN"));
	}

	#[test]
	fn db_key_mismatch_is_internal() {
		let err: SecretsError = DbError::KeyMismatch("proj".into()).into();
		assert!(matches!(err, SecretsError::ServerKeyMismatch(_)));
		assert!(err.is_internal());
	}

	#[test]
	fn validation_errors_are_classified() {
		assert!(SecretsError::ReservedName("_WEFT_X".into()).is_validation());
		assert!(SecretsError::InvalidEncoding("X".into()).is_validation());
		assert!(!SecretsError::NotFound("X".into()).is_validation());
		assert!(!SecretsError::Crypto(CryptoError::AuthenticationFailed).is_internal());
	}

	#[test]
	fn crypto_errors_display_without_wrapping() {
		let err = SecretsError::from(CryptoError::AuthenticationFailed);
		assert_eq!(
			err.to_string(),
			"authentication failed: wrong key or tampered ciphertext"
		);
	}
}
