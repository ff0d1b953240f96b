//! Integration tests for both storage backends
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=memory cargo test` - Run only in-memory tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests
//! - By default, both backends are tested; PostgreSQL tests also need DATABASE_URL

use snip::alias::new_random_string;
use snip::config::StorageBackend;
use snip::storage::{self, MemoryStorage, PostgresStorage, Storage, StorageError};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// PostgreSQL tests share one database; stats deltas need them serialized
static POSTGRES_LOCK: Mutex<()> = Mutex::const_new(());

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true,
    }
}

/// Helper to create in-memory test storage
async fn create_memory_storage() -> Arc<dyn Storage> {
    let storage = MemoryStorage::new(None).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// Helper to create PostgreSQL test storage, holding the database for the test
async fn create_postgres_storage() -> Option<(Arc<dyn Storage>, MutexGuard<'static, ()>)> {
    if !should_test_backend("postgres") {
        return None;
    }
    let db_url = std::env::var("DATABASE_URL").ok()?;
    let guard = POSTGRES_LOCK.lock().await;
    let storage = PostgresStorage::new(&db_url, 5).await.ok()?;
    storage.init().await.ok()?;
    Some((Arc::new(storage), guard))
}

/// Owner ids unlikely to collide with rows left by earlier runs
fn fresh_owner() -> i64 {
    rand::rng().random_range(1..=i64::from(i32::MAX))
}

fn unique_url() -> String {
    format!("https://example.com/{}", new_random_string(16))
}

async fn check_put_get_roundtrip(storage: Arc<dyn Storage>) {
    let owner = fresh_owner();
    let url = unique_url();

    let alias = storage.put(&url, None, owner).await.unwrap();
    assert_eq!(alias.len(), 8);

    let record = storage.get(&alias).await.unwrap();
    assert_eq!(record.original_url, url);
    assert_eq!(record.owner_id, owner);
    assert!(!record.is_deleted);

    let err = storage.get(&new_random_string(20)).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}

async fn check_duplicate_url_conflicts(storage: Arc<dyn Storage>) {
    let owner = fresh_owner();
    let url = unique_url();

    let first = storage.put(&url, None, owner).await.unwrap();
    match storage.put(&url, None, owner).await {
        Err(StorageError::Conflict { alias }) => assert_eq!(alias, first),
        other => panic!("expected conflict, got {other:?}"),
    }

    let listed = storage.get_all(owner, "http://host").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].short_url, format!("http://host/{first}"));
}

async fn check_soft_delete(storage: Arc<dyn Storage>) {
    let owner = fresh_owner();
    let other = fresh_owner();
    let kept = storage.put(&unique_url(), None, owner).await.unwrap();
    let dropped = storage.put(&unique_url(), None, owner).await.unwrap();

    // Another owner cannot delete it
    storage.delete(other, &[dropped.clone()]).await.unwrap();
    assert!(storage.get(&dropped).await.is_ok());

    storage
        .delete(owner, &[dropped.clone(), new_random_string(20)])
        .await
        .unwrap();

    let err = storage.get(&dropped).await.unwrap_err();
    assert!(matches!(err, StorageError::Deleted(_)));
    assert!(err.is_not_found());

    let listed = storage.get_all(owner, "host").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].short_url, format!("host/{kept}"));
}

async fn check_stats_track_live_records(storage: Arc<dyn Storage>) {
    let before = storage.stats().await.unwrap();

    let owner_a = fresh_owner();
    let owner_b = fresh_owner();
    storage.put(&unique_url(), None, owner_a).await.unwrap();
    let gone = storage.put(&unique_url(), None, owner_a).await.unwrap();
    storage.put(&unique_url(), None, owner_b).await.unwrap();
    storage.delete(owner_a, &[gone]).await.unwrap();

    let after = storage.stats().await.unwrap();
    assert_eq!(after.urls, before.urls + 2);
    assert_eq!(after.users, before.users + 2);
}

async fn check_concurrent_duplicate_puts(storage: Arc<dyn Storage>) {
    let owner = fresh_owner();
    let url = unique_url();

    let mut handles = vec![];
    for _ in 0..10 {
        let storage = Arc::clone(&storage);
        let url = url.clone();
        handles.push(tokio::spawn(
            async move { storage.put(&url, None, owner).await },
        ));
    }

    let mut created = vec![];
    let mut conflicts = vec![];
    for handle in handles {
        match handle.await.unwrap() {
            Ok(alias) => created.push(alias),
            Err(StorageError::Conflict { alias }) => conflicts.push(alias),
            Err(e) => panic!("Unexpected error: {:?}", e),
        }
    }

    assert_eq!(created.len(), 1, "Exactly one put should create a record");
    assert_eq!(conflicts.len(), 9);
    assert!(conflicts.iter().all(|alias| *alias == created[0]));
}

#[tokio::test]
async fn test_put_get_roundtrip_memory() {
    if !should_test_backend("memory") {
        return;
    }
    check_put_get_roundtrip(create_memory_storage().await).await;
}

#[tokio::test]
async fn test_duplicate_url_conflicts_memory() {
    if !should_test_backend("memory") {
        return;
    }
    check_duplicate_url_conflicts(create_memory_storage().await).await;
}

#[tokio::test]
async fn test_soft_delete_memory() {
    if !should_test_backend("memory") {
        return;
    }
    check_soft_delete(create_memory_storage().await).await;
}

#[tokio::test]
async fn test_stats_memory() {
    if !should_test_backend("memory") {
        return;
    }
    check_stats_track_live_records(create_memory_storage().await).await;
}

#[tokio::test]
async fn test_concurrent_duplicate_puts_memory() {
    if !should_test_backend("memory") {
        return;
    }
    check_concurrent_duplicate_puts(create_memory_storage().await).await;
}

#[tokio::test]
async fn test_file_backed_store_survives_restart() {
    if !should_test_backend("memory") {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let backend = StorageBackend::Memory {
        file_path: Some(dir.path().join("urls.json")),
    };

    let (kept, dropped) = {
        let storage = storage::connect(&backend).await.unwrap();
        let kept = storage.put("http://kept.example", None, 1).await.unwrap();
        let dropped = storage
            .put("http://dropped.example", Some("abc123"), 1)
            .await
            .unwrap();
        storage.delete(1, &[dropped.clone()]).await.unwrap();
        (kept, dropped)
    };

    let storage = storage::connect(&backend).await.unwrap();
    assert_eq!(
        storage.get(&kept).await.unwrap().original_url,
        "http://kept.example"
    );
    assert!(matches!(
        storage.get(&dropped).await.unwrap_err(),
        StorageError::Deleted(_)
    ));

    // The deleted alias is still taken
    let err = storage
        .put("http://new.example", Some("abc123"), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::AlreadyExists(_)));

    let stats = storage.stats().await.unwrap();
    assert_eq!((stats.urls, stats.users), (1, 1));
}

#[tokio::test]
async fn test_put_get_roundtrip_postgres() {
    let Some((storage, _guard)) = create_postgres_storage().await else {
        return;
    };
    check_put_get_roundtrip(storage).await;
}

#[tokio::test]
async fn test_duplicate_url_conflicts_postgres() {
    let Some((storage, _guard)) = create_postgres_storage().await else {
        return;
    };
    check_duplicate_url_conflicts(storage).await;
}

#[tokio::test]
async fn test_soft_delete_postgres() {
    let Some((storage, _guard)) = create_postgres_storage().await else {
        return;
    };
    check_soft_delete(storage).await;
}

#[tokio::test]
async fn test_stats_postgres() {
    let Some((storage, _guard)) = create_postgres_storage().await else {
        return;
    };
    check_stats_track_live_records(storage).await;
}

#[tokio::test]
async fn test_concurrent_duplicate_puts_postgres() {
    let Some((storage, _guard)) = create_postgres_storage().await else {
        return;
    };
    check_concurrent_duplicate_puts(storage).await;
}

#[tokio::test]
async fn test_custom_alias_reuse_postgres() {
    let Some((storage, _guard)) = create_postgres_storage().await else {
        return;
    };

    let owner = fresh_owner();
    let other = fresh_owner();
    let alias = new_random_string(10);

    storage
        .put(&unique_url(), Some(&alias), owner)
        .await
        .unwrap();

    // Same owner, same alias, different URL: unique violation with no
    // matching URL row, so the unused alias comes back as the conflict
    match storage.put(&unique_url(), Some(&alias), owner).await {
        Err(StorageError::Conflict { alias: reported }) => assert_eq!(reported, alias),
        other => panic!("expected conflict, got {other:?}"),
    }

    // A different owner may hold the same alias as a separate row
    storage
        .put(&unique_url(), Some(&alias), other)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reshorten_after_delete_postgres() {
    let Some((storage, _guard)) = create_postgres_storage().await else {
        return;
    };

    let owner = fresh_owner();
    let url = unique_url();
    let first = storage.put(&url, None, owner).await.unwrap();
    storage.delete(owner, &[first.clone()]).await.unwrap();

    // UNIQUE (owner_id, url) still covers the soft-deleted row
    match storage.put(&url, None, owner).await {
        Err(StorageError::Conflict { alias }) => assert_eq!(alias, first),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(matches!(
        storage.get(&first).await.unwrap_err(),
        StorageError::Deleted(_)
    ));
    assert!(storage.get_all(owner, "host").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reshorten_after_delete_memory() {
    if !should_test_backend("memory") {
        return;
    }
    let storage = create_memory_storage().await;

    let url = unique_url();
    let first = storage.put(&url, None, 1).await.unwrap();
    storage.delete(1, &[first.clone()]).await.unwrap();

    let second = storage.put(&url, None, 1).await.unwrap();
    assert_ne!(second, first);
    assert_eq!(storage.get(&second).await.unwrap().original_url, url);
}

#[tokio::test]
async fn test_healthcheck_postgres() {
    let Some((storage, _guard)) = create_postgres_storage().await else {
        return;
    };
    assert!(storage.healthcheck().await.unwrap());
}
