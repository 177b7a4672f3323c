// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server key rotation.
//!
//! Each project moves from the previous key to the new one in a single
//! transaction. The transaction opens with a compare-and-swap on the stored
//! key fingerprint, so when several replicas start with the same keys only
//! one of them re-encrypts; the others find the fingerprint already moved
//! and skip.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::config::ServerKeys;
use crate::encryption::{open_value, seal_value, SealedValue, ServerKey};
use crate::error::{SecretsError, SecretsResult};
use crate::store::{SecretStore, StoredSecret};
use crate::types::ProjectName;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
	/// Every secret of the project was re-encrypted under the new key.
	Committed { rotated: usize },
	/// Nothing to do. Not an error.
	Skipped { reason: String },
	/// Rolled back. Retried on the next start.
	Aborted { reason: String },
}

impl RotationOutcome {
	pub fn is_committed(&self) -> bool {
		matches!(self, RotationOutcome::Committed { .. })
	}

	pub fn is_skipped(&self) -> bool {
		matches!(self, RotationOutcome::Skipped { .. })
	}

	pub fn is_aborted(&self) -> bool {
		matches!(self, RotationOutcome::Aborted { .. })
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationReport {
	pub project: ProjectName,
	pub outcome: RotationOutcome,
}

impl fmt::Display for RotationReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.outcome {
			RotationOutcome::Committed { rotated } => {
				write!(f, "{}: rotated {rotated} secret(s)", self.project)
			}
			RotationOutcome::Skipped { reason } => write!(f, "{}: skipped ({reason})", self.project),
			RotationOutcome::Aborted { reason } => write!(f, "{}: aborted ({reason})", self.project),
		}
	}
}

pub struct KeyRotationCoordinator<S: SecretStore> {
	store: Arc<S>,
}

impl<S: SecretStore> KeyRotationCoordinator<S> {
	pub fn new(store: Arc<S>) -> Self {
		Self { store }
	}

	/// Run the rotation for every project that has a stored key fingerprint.
	///
	/// Without a previous key every project is reported as skipped.
	///
	/// # Errors
	/// Only when the set of projects cannot be read. Per-project failures are
	/// reported as [`RotationOutcome::Aborted`].
	#[instrument(skip(self, keys))]
	pub async fn rotate_all(&self, keys: &ServerKeys) -> SecretsResult<Vec<RotationReport>> {
		let projects = self.store.projects_with_keys().await?;
		let mut reports = Vec::with_capacity(projects.len());

		for project in projects {
			let report = match &keys.previous {
				Some(previous) => self.rotate_project(&project, previous, &keys.current).await,
				None => RotationReport {
					project,
					outcome: RotationOutcome::Skipped {
						reason: "no previous key configured".to_string(),
					},
				},
			};
			reports.push(report);
		}

		let committed = reports.iter().filter(|r| r.outcome.is_committed()).count();
		let aborted = reports.iter().filter(|r| r.outcome.is_aborted()).count();
		info!(
			projects = reports.len(),
			committed, aborted, "key rotation pass finished"
		);
		Ok(reports)
	}

	/// Move one project from `previous` to `new`.
	#[instrument(skip(self, previous, new), fields(project = %project))]
	pub async fn rotate_project(
		&self,
		project: &ProjectName,
		previous: &ServerKey,
		new: &ServerKey,
	) -> RotationReport {
		let outcome = self.try_rotate(project, previous, new).await;
		match &outcome {
			RotationOutcome::Committed { rotated } => info!(rotated, "project key rotated"),
			RotationOutcome::Skipped { reason } => debug!(%reason, "project key rotation skipped"),
			RotationOutcome::Aborted { reason } => {
				error!(%reason, "project key rotation aborted, will retry on next start")
			}
		}
		RotationReport {
			project: project.clone(),
			outcome,
		}
	}

	async fn try_rotate(
		&self,
		project: &ProjectName,
		previous: &ServerKey,
		new: &ServerKey,
	) -> RotationOutcome {
		if previous == new {
			return skipped("previous and current keys are identical");
		}

		let stored = match self.store.key_fingerprint(project).await {
			Ok(Some(fp)) => fp,
			Ok(None) => return skipped("no key record"),
			Err(e) => return aborted(project, e),
		};
		if stored == new.fingerprint() {
			return skipped("already sealed under the current key");
		}
		if stored != previous.fingerprint() {
			warn!("stored key fingerprint matches neither configured key");
			return skipped("previous key does not match the stored fingerprint");
		}

		let resealer = |secret: &StoredSecret| reseal(secret, previous, new);
		match self
			.store
			.rotate_project_key(project, previous.fingerprint(), new.fingerprint(), &resealer)
			.await
		{
			Ok(rotated) => RotationOutcome::Committed { rotated },
			Err(SecretsError::RotationConflict(_)) => skipped("rotated concurrently by another process"),
			Err(e) => aborted(project, e),
		}
	}
}

fn reseal(secret: &StoredSecret, previous: &ServerKey, new: &ServerKey) -> SecretsResult<SealedValue> {
	let payload = open_value(previous, &secret.encrypted_value)?;
	let payload = std::str::from_utf8(&payload)
		.map_err(|_| SecretsError::Internal(format!("stored payload of {} is not text", secret.name)))?;
	Ok(seal_value(new, payload)?)
}

fn skipped(reason: &str) -> RotationOutcome {
	RotationOutcome::Skipped {
		reason: reason.to_string(),
	}
}

fn aborted(project: &ProjectName, cause: SecretsError) -> RotationOutcome {
	let err = SecretsError::TransactionAborted {
		project: project.to_string(),
		reason: cause.to_string(),
	};
	RotationOutcome::Aborted {
		reason: err.to_string(),
	}
}
