// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Integration tests for the secret store and resolver against a database file.

use std::sync::Arc;
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use weft_server_db::{create_pool, run_migrations};
use weft_server_secrets::{
	Caller, Scope, SecretResolver, SecretStore, SecretString, SecretType, SecretsError,
	SecretsService, ServerKey, SqliteSecretStore,
};

async fn setup_service() -> (SecretsService<SqliteSecretStore>, TempDir) {
	let dir = tempdir().unwrap();
	let url = format!("sqlite:{}", dir.path().join("secrets.db").display());
	let pool = create_pool(&url, Duration::from_secs(5)).await.unwrap();
	run_migrations(&pool).await.unwrap();
	let store = Arc::new(SqliteSecretStore::new(pool));
	(SecretsService::new(store, ServerKey::generate().unwrap()), dir)
}

fn value(v: &str) -> SecretString {
	SecretString::from(v)
}

#[tokio::test]
async fn test_duplicate_name_writes_nothing() {
	let (svc, _dir) = setup_service().await;
	let scope = Scope::parse("proj", Some("ns1")).unwrap();
	let first = svc
		.create(&scope, "TOKEN", &value("one"), false, Caller::User)
		.await
		.unwrap();

	let err = svc
		.create(&scope, "TOKEN", &value("two"), false, Caller::User)
		.await
		.unwrap_err();
	assert!(matches!(err, SecretsError::DuplicateName(_)));

	let listed = svc.list(&scope.project, true).await.unwrap();
	assert_eq!(listed.len(), 1);
	assert_eq!(listed[0].digest, first.digest);
}

#[tokio::test]
async fn test_reserved_name_from_user_writes_nothing() {
	let (svc, _dir) = setup_service().await;
	let scope = Scope::parse("proj", None).unwrap();

	let err = svc
		.create(&scope, "_WEFT_SCHEDULER_TOKEN", &value("x"), false, Caller::User)
		.await
		.unwrap_err();
	assert!(matches!(err, SecretsError::ReservedName(_)));
	assert!(svc.list(&scope.project, true).await.unwrap().is_empty());
	assert_eq!(svc.store().key_fingerprint(&scope.project).await.unwrap(), None);
}

#[tokio::test]
async fn test_list_hides_system_secrets_by_default() {
	let (svc, _dir) = setup_service().await;
	let scope = Scope::parse("proj", None).unwrap();
	svc.create(&scope, "USER_ONE", &value("u"), false, Caller::User)
		.await
		.unwrap();
	svc.create(&scope, "_WEFT_SYSTEM_ONE", &value("s"), false, Caller::Internal)
		.await
		.unwrap();

	let user_only = svc.list(&scope.project, false).await.unwrap();
	assert!(user_only.iter().all(|i| i.secret_type == SecretType::User));
	assert_eq!(user_only.len(), 1);

	let all = svc.list(&scope.project, true).await.unwrap();
	assert!(all.iter().any(|i| i.secret_type == SecretType::System));
}

#[tokio::test]
async fn test_resolve_respects_namespace_isolation() {
	let (svc, _dir) = setup_service().await;
	let ns1 = Scope::parse("proj", Some("ns1")).unwrap();
	let ns2 = Scope::parse("proj", Some("ns2")).unwrap();
	svc.create(&ns2, "ONLY_NS2", &value("hidden"), false, Caller::User)
		.await
		.unwrap();

	let resolver = SecretResolver::new(&svc);
	assert!(matches!(
		resolver.resolve(&ns1, "ONLY_NS2").await,
		Err(SecretsError::NotFound(_))
	));
	assert_eq!(resolver.resolve(&ns2, "ONLY_NS2").await.unwrap().expose(), "hidden");
}

#[tokio::test]
async fn test_projects_are_isolated() {
	let (svc, _dir) = setup_service().await;
	let a = Scope::parse("alpha", None).unwrap();
	let b = Scope::parse("beta", None).unwrap();
	svc.create(&a, "SHARED_NAME", &value("alpha"), false, Caller::User)
		.await
		.unwrap();
	svc.create(&b, "SHARED_NAME", &value("beta"), false, Caller::User)
		.await
		.unwrap();

	assert_eq!(svc.get(&a, "SHARED_NAME").await.unwrap().expose(), "alpha");
	assert_eq!(svc.get(&b, "SHARED_NAME").await.unwrap().expose(), "beta");
	assert_eq!(svc.list(&a.project, false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_values_survive_reopening_the_database() {
	let dir = tempdir().unwrap();
	let url = format!("sqlite:{}", dir.path().join("reopen.db").display());
	let key = ServerKey::generate().unwrap();
	let scope = Scope::parse("proj", None).unwrap();

	{
		let pool = create_pool(&url, Duration::from_secs(5)).await.unwrap();
		run_migrations(&pool).await.unwrap();
		let svc = SecretsService::new(Arc::new(SqliteSecretStore::new(pool.clone())), key.clone());
		svc.create(&scope, "PERSISTED", &value("still here"), false, Caller::User)
			.await
			.unwrap();
		pool.close().await;
	}

	let pool = create_pool(&url, Duration::from_secs(5)).await.unwrap();
	run_migrations(&pool).await.unwrap();
	let svc = SecretsService::new(Arc::new(SqliteSecretStore::new(pool)), key);
	assert_eq!(svc.get(&scope, "PERSISTED").await.unwrap().expose(), "still here");
}
