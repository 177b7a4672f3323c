// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Integration tests for server key rotation.
//!
//! Tests cover:
//! - Rotating a project from one key to the next
//! - Restarting with the same previous key (skip)
//! - Rollback when a secret cannot be opened with the previous key
//! - Two replicas racing on the same database file
//! - Readers and stale writers racing a rotation commit

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use weft_server_db::{create_pool, run_migrations, SqlitePool};
use weft_server_secrets::encryption::seal_value;
use weft_server_secrets::{
	Caller, KeyRotationCoordinator, ProjectName, RotationOutcome, Scope, SecretName, SecretStore,
	SecretString, SecretsError, SecretsService, ServerKey, ServerKeys, SqliteSecretStore,
};

async fn setup_pool() -> (SqlitePool, TempDir) {
	let dir = tempdir().unwrap();
	let url = format!("sqlite:{}", dir.path().join("rotation.db").display());
	let pool = create_pool(&url, Duration::from_secs(5)).await.unwrap();
	run_migrations(&pool).await.unwrap();
	(pool, dir)
}

async fn open_pool(dir: &TempDir) -> SqlitePool {
	let url = format!("sqlite:{}", dir.path().join("rotation.db").display());
	create_pool(&url, Duration::from_secs(5)).await.unwrap()
}

fn project() -> ProjectName {
	ProjectName::new("analytics").unwrap()
}

fn scope() -> Scope {
	Scope::project(project())
}

async fn seed(store: &Arc<SqliteSecretStore>, key: &ServerKey) {
	let svc = SecretsService::new(store.clone(), key.clone());
	svc.create(&scope(), "A", &SecretString::from("v1"), false, Caller::User)
		.await
		.unwrap();
	svc.create(&scope(), "B", &SecretString::from("v2"), false, Caller::User)
		.await
		.unwrap();
}

#[tokio::test]
async fn test_rotation_reencrypts_every_secret() {
	let (pool, _dir) = setup_pool().await;
	let store = Arc::new(SqliteSecretStore::new(pool));
	let k1 = ServerKey::generate().unwrap();
	let k2 = ServerKey::generate().unwrap();
	seed(&store, &k1).await;
	let before = store.list_project_secrets(&project(), true).await.unwrap();

	let coordinator = KeyRotationCoordinator::new(store.clone());
	let report = coordinator.rotate_project(&project(), &k1, &k2).await;
	assert_eq!(report.outcome, RotationOutcome::Committed { rotated: 2 });

	assert_eq!(
		store.key_fingerprint(&project()).await.unwrap().as_deref(),
		Some(k2.fingerprint())
	);

	let after = store.list_project_secrets(&project(), true).await.unwrap();
	for (old, new) in before.iter().zip(after.iter()) {
		assert_eq!(old.id, new.id);
		assert_ne!(old.digest, new.digest);
		assert_ne!(old.encrypted_value, new.encrypted_value);
	}

	let svc = SecretsService::new(store.clone(), k2);
	assert_eq!(svc.get(&scope(), "A").await.unwrap().expose(), "v1");
	assert_eq!(svc.get(&scope(), "B").await.unwrap().expose(), "v2");

	let stale = SecretsService::new(store, k1);
	assert!(matches!(
		stale.get(&scope(), "A").await,
		Err(SecretsError::Crypto(_))
	));
}

#[tokio::test]
async fn test_restart_with_same_previous_key_skips() {
	let (pool, _dir) = setup_pool().await;
	let store = Arc::new(SqliteSecretStore::new(pool));
	let k1 = ServerKey::generate().unwrap();
	let k2 = ServerKey::generate().unwrap();
	seed(&store, &k1).await;

	let keys = ServerKeys::new(k2.clone(), Some(k1.clone()));
	let coordinator = KeyRotationCoordinator::new(store.clone());
	let first = coordinator.rotate_all(&keys).await.unwrap();
	assert!(first[0].outcome.is_committed());
	let snapshot = store.list_project_secrets(&project(), true).await.unwrap();

	// Simulated restart with unchanged configuration.
	let restarted = KeyRotationCoordinator::new(store.clone());
	let second = restarted.rotate_all(&keys).await.unwrap();
	assert_eq!(second.len(), 1);
	assert!(second[0].outcome.is_skipped());

	assert_eq!(
		store.list_project_secrets(&project(), true).await.unwrap(),
		snapshot
	);
}

#[tokio::test]
async fn test_foreign_key_secret_aborts_and_rolls_back() {
	let (pool, _dir) = setup_pool().await;
	let store = Arc::new(SqliteSecretStore::new(pool));
	let k1 = ServerKey::generate().unwrap();
	let k2 = ServerKey::generate().unwrap();
	let k3 = ServerKey::generate().unwrap();
	seed(&store, &k1).await;

	// C is sealed under an unrelated key but recorded against K1.
	let foreign = seal_value(&k3, "djM=").unwrap();
	store
		.create_secret(&scope(), &SecretName::new("C").unwrap(), &foreign, k1.fingerprint())
		.await
		.unwrap();
	let before = store.list_project_secrets(&project(), true).await.unwrap();

	let coordinator = KeyRotationCoordinator::new(store.clone());
	let report = coordinator.rotate_project(&project(), &k1, &k2).await;
	match &report.outcome {
		RotationOutcome::Aborted { reason } => assert!(reason.contains("analytics")),
		other => panic!("expected aborted, got {other:?}"),
	}

	assert_eq!(store.list_project_secrets(&project(), true).await.unwrap(), before);
	assert_eq!(
		store.key_fingerprint(&project()).await.unwrap().as_deref(),
		Some(k1.fingerprint())
	);

	let svc = SecretsService::new(store, k1);
	assert_eq!(svc.get(&scope(), "A").await.unwrap().expose(), "v1");
	assert_eq!(svc.get(&scope(), "B").await.unwrap().expose(), "v2");
}

#[tokio::test]
async fn test_rotation_covers_namespaces_and_system_secrets() {
	let (pool, _dir) = setup_pool().await;
	let store = Arc::new(SqliteSecretStore::new(pool));
	let k1 = ServerKey::generate().unwrap();
	let k2 = ServerKey::generate().unwrap();

	let svc = SecretsService::new(store.clone(), k1.clone());
	let ns = Scope::parse("analytics", Some("team-a")).unwrap();
	svc.create(&ns, "NS_ONLY", &SecretString::from("n"), false, Caller::User)
		.await
		.unwrap();
	svc.create(&scope(), "_WEFT_TOKEN", &SecretString::from("t"), false, Caller::Internal)
		.await
		.unwrap();

	let report = KeyRotationCoordinator::new(store.clone())
		.rotate_project(&project(), &k1, &k2)
		.await;
	assert_eq!(report.outcome, RotationOutcome::Committed { rotated: 2 });

	let svc = SecretsService::new(store, k2);
	assert_eq!(svc.get(&ns, "NS_ONLY").await.unwrap().expose(), "n");
	assert_eq!(svc.get(&scope(), "_WEFT_TOKEN").await.unwrap().expose(), "t");
}

#[tokio::test]
async fn test_other_projects_are_rotated_independently() {
	let (pool, _dir) = setup_pool().await;
	let store = Arc::new(SqliteSecretStore::new(pool));
	let k1 = ServerKey::generate().unwrap();
	let k2 = ServerKey::generate().unwrap();
	let k3 = ServerKey::generate().unwrap();
	seed(&store, &k1).await;

	// "billing" is sealed under a key the operator is not rotating from.
	let billing = Scope::parse("billing", None).unwrap();
	SecretsService::new(store.clone(), k3.clone())
		.create(&billing, "X", &SecretString::from("x"), false, Caller::User)
		.await
		.unwrap();

	let reports = KeyRotationCoordinator::new(store.clone())
		.rotate_all(&ServerKeys::new(k2, Some(k1)))
		.await
		.unwrap();

	let by_project: Vec<(String, bool)> = reports
		.iter()
		.map(|r| (r.project.to_string(), r.outcome.is_committed()))
		.collect();
	assert_eq!(
		by_project,
		vec![("analytics".to_string(), true), ("billing".to_string(), false)]
	);
	assert_eq!(
		store
			.key_fingerprint(&billing.project)
			.await
			.unwrap()
			.as_deref(),
		Some(k3.fingerprint())
	);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_replicas_commit_exactly_once() {
	let (pool, dir) = setup_pool().await;
	let store_a = Arc::new(SqliteSecretStore::new(pool));
	let store_b = Arc::new(SqliteSecretStore::new(open_pool(&dir).await));
	let k1 = ServerKey::generate().unwrap();
	let k2 = ServerKey::generate().unwrap();
	seed(&store_a, &k1).await;

	let replica_a = KeyRotationCoordinator::new(store_a.clone());
	let replica_b = KeyRotationCoordinator::new(store_b);
	let project = project();

	let (a, b) = tokio::join!(
		replica_a.rotate_project(&project, &k1, &k2),
		replica_b.rotate_project(&project, &k1, &k2),
	);

	let committed = [&a, &b]
		.iter()
		.filter(|r| r.outcome.is_committed())
		.count();
	let skipped = [&a, &b].iter().filter(|r| r.outcome.is_skipped()).count();
	assert_eq!(committed, 1, "a = {a:?}, b = {b:?}");
	assert_eq!(skipped, 1, "a = {a:?}, b = {b:?}");

	let svc = SecretsService::new(store_a, k2);
	assert_eq!(svc.get(&scope(), "A").await.unwrap().expose(), "v1");
	assert_eq!(svc.get(&scope(), "B").await.unwrap().expose(), "v2");
}

const BULK: usize = 60;

fn bulk_name(i: usize) -> String {
	format!("S{i:02}")
}

async fn seed_bulk(store: &Arc<SqliteSecretStore>, key: &ServerKey) {
	let svc = SecretsService::new(store.clone(), key.clone());
	for i in 0..BULK {
		svc.create(
			&scope(),
			&bulk_name(i),
			&SecretString::from(format!("v{i:02}")),
			false,
			Caller::User,
		)
		.await
		.unwrap();
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_see_one_key_generation_during_rotation() {
	let (pool, dir) = setup_pool().await;
	let writer_store = Arc::new(SqliteSecretStore::new(pool));
	let reader_store = Arc::new(SqliteSecretStore::new(open_pool(&dir).await));
	let k1 = ServerKey::generate().unwrap();
	let k2 = ServerKey::generate().unwrap();
	seed_bulk(&writer_store, &k1).await;

	let old_digests: HashSet<String> = reader_store
		.list_project_secrets(&project(), true)
		.await
		.unwrap()
		.into_iter()
		.map(|s| s.digest)
		.collect();
	assert_eq!(old_digests.len(), BULK);

	let done = Arc::new(AtomicBool::new(false));
	let rotation = {
		let coordinator = KeyRotationCoordinator::new(writer_store.clone());
		let (k1, k2, done) = (k1.clone(), k2.clone(), done.clone());
		tokio::spawn(async move {
			let report = coordinator.rotate_project(&project(), &k1, &k2).await;
			done.store(true, Ordering::SeqCst);
			report
		})
	};

	let under_k1 = SecretsService::new(reader_store.clone(), k1);
	let under_k2 = SecretsService::new(reader_store.clone(), k2);
	let mut observations = 0;
	let mut finished = false;
	while !finished {
		finished = done.load(Ordering::SeqCst);

		let listing = reader_store
			.list_project_secrets(&project(), true)
			.await
			.unwrap();
		assert_eq!(listing.len(), BULK);
		let old = listing
			.iter()
			.filter(|s| old_digests.contains(&s.digest))
			.count();
		assert!(old == 0 || old == BULK, "mixed listing: {old} of {BULK} under the old key");

		let name = bulk_name(observations % BULK);
		let expected = format!("v{:02}", observations % BULK);
		// The k1 read happens first, so if it misses the commit is visible to the k2 read.
		let value = match under_k1.get(&scope(), &name).await {
			Ok(value) => value,
			Err(_) => under_k2.get(&scope(), &name).await.unwrap(),
		};
		assert_eq!(value.expose(), &expected);

		observations += 1;
		tokio::task::yield_now().await;
	}

	let report = rotation.await.unwrap();
	assert_eq!(report.outcome, RotationOutcome::Committed { rotated: BULK });
	assert!(observations > 0);

	let after = reader_store
		.list_project_secrets(&project(), true)
		.await
		.unwrap();
	assert!(after.iter().all(|s| !old_digests.contains(&s.digest)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stale_update_racing_rotation_never_mixes_keys() {
	let (pool, dir) = setup_pool().await;
	let rotating_store = Arc::new(SqliteSecretStore::new(pool));
	let stale_store = Arc::new(SqliteSecretStore::new(open_pool(&dir).await));
	let k1 = ServerKey::generate().unwrap();
	let k2 = ServerKey::generate().unwrap();
	seed_bulk(&rotating_store, &k1).await;

	let coordinator = KeyRotationCoordinator::new(rotating_store.clone());
	let stale = SecretsService::new(stale_store, k1.clone());
	let target = bulk_name(0);

	let project_id = project();
	let update_scope = scope();
	let changed = SecretString::from("changed");
	let (report, update) = tokio::join!(
		coordinator.rotate_project(&project_id, &k1, &k2),
		stale.update(&update_scope, &target, &changed, false, Caller::User),
	);
	assert!(report.outcome.is_committed(), "{report:?}");

	// The update either landed before the rotation (and was resealed with it)
	// or found the project already moved to the new key.
	let expected_first = match update {
		Ok(_) => "changed".to_string(),
		Err(SecretsError::ServerKeyMismatch(p)) => {
			assert_eq!(p, "analytics");
			"v00".to_string()
		}
		Err(other) => panic!("unexpected update error: {other:?}"),
	};

	assert_eq!(
		rotating_store
			.key_fingerprint(&project())
			.await
			.unwrap()
			.as_deref(),
		Some(k2.fingerprint())
	);
	let current = SecretsService::new(rotating_store.clone(), k2);
	assert_eq!(current.get(&scope(), &target).await.unwrap().expose(), &expected_first);
	for i in 1..BULK {
		assert_eq!(
			current.get(&scope(), &bulk_name(i)).await.unwrap().expose(),
			&format!("v{i:02}")
		);
	}

	// Once rotated, a writer still holding the old key is always refused.
	let err = stale
		.update(&scope(), &target, &SecretString::from("again"), false, Caller::User)
		.await
		.unwrap_err();
	assert!(matches!(err, SecretsError::ServerKeyMismatch(_)));
	assert_eq!(current.get(&scope(), &target).await.unwrap().expose(), &expected_first);
}
