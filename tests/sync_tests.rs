//! Sync queue behaviour end to end, over HTTP against the fake backend.

mod common;

use std::sync::Arc;

use kinvey::persistence::{is_temp_id, SqliteAdapter};
use kinvey::{DataStore, DataStoreType, KinveyError, PersistenceAdapter, Query, SyncMethod};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_push_after_save_removes_exactly_one_row() {
    let server = common::spawn_backend().await;
    let client = common::client_for(&server, Arc::new(kinvey::MemoryAdapter::new())).await;
    let books = DataStore::collection(&client, "books", DataStoreType::Sync).unwrap();

    books.save(json!({"_id": "a", "title": "Dune"})).await.unwrap();
    books.save(json!({"_id": "b", "title": "Emma"})).await.unwrap();
    assert_eq!(books.pending_sync_count().await.unwrap(), 2);

    let result = client
        .sync_manager()
        .push("books", Some(&["a".to_string()]))
        .await
        .unwrap();
    assert_eq!(result.success.len(), 1);
    assert_eq!(books.pending_sync_count().await.unwrap(), 1);
    assert_eq!(
        server.backend.store.get("books", "a").await.unwrap()["title"],
        "Dune"
    );
}

#[tokio::test]
async fn test_failed_replay_stays_queued_with_error() {
    let server = common::spawn_backend().await;
    let client = common::client_for(&server, Arc::new(kinvey::MemoryAdapter::new())).await;
    let books = DataStore::collection(&client, "books", DataStoreType::Sync).unwrap();

    books.save(json!({"title": "Dune"})).await.unwrap();
    server.backend.fail_next(500);

    let result = books.push().await.unwrap();
    assert!(result.success.is_empty());
    assert!(matches!(
        result.error[0].error,
        KinveyError::Server { status: 500, .. }
    ));

    let pending = books.pending_sync_operations().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].state.method, SyncMethod::Create);
    assert!(pending[0].last_error.as_deref().unwrap().contains("injected failure"));

    // The next push goes through and the temp id is replaced.
    let result = books.push().await.unwrap();
    assert!(result.is_complete());
    let entity = result.success[0].entity.clone().unwrap();
    let server_id = entity["_id"].as_str().unwrap();
    assert!(!is_temp_id(server_id));
    assert_eq!(books.pending_sync_count().await.unwrap(), 0);
    assert_eq!(books.find(None).await.unwrap(), vec![entity.clone()]);
    assert_eq!(server.backend.store.get("books", server_id).await.unwrap(), entity);
}

#[tokio::test]
async fn test_repeated_update_sends_one_request() {
    let server = common::spawn_backend().await;
    let client = common::client_for(&server, Arc::new(kinvey::MemoryAdapter::new())).await;
    let books = DataStore::collection(&client, "books", DataStoreType::Sync).unwrap();

    let doc = json!({"_id": "a", "title": "Dune"});
    books.update(doc.clone()).await.unwrap();
    books.update(doc.clone()).await.unwrap();
    assert_eq!(books.pending_sync_count().await.unwrap(), 1);
    assert_eq!(books.find(None).await.unwrap(), vec![doc]);

    books.push().await.unwrap();
    assert_eq!(server.backend.hits("PUT /appdata/kid_test/books/a"), 1);
}

#[tokio::test]
async fn test_delete_of_missing_remote_entity_counts_as_success() {
    let server = common::spawn_backend().await;
    let client = common::client_for(&server, Arc::new(kinvey::MemoryAdapter::new())).await;
    let books = DataStore::collection(&client, "books", DataStoreType::Sync).unwrap();

    books.save(json!({"_id": "a"})).await.unwrap();
    books.remove_by_id("a").await.unwrap();

    let result = books.push().await.unwrap();
    assert!(result.is_complete());
    assert_eq!(result.success[0].method, SyncMethod::Delete);
    assert_eq!(server.backend.hits("DELETE /appdata/kid_test/books/a"), 1);
}

#[tokio::test]
async fn test_cache_store_pushes_immediately() {
    let server = common::spawn_backend().await;
    let client = common::client_for(&server, Arc::new(kinvey::MemoryAdapter::new())).await;
    let books = DataStore::collection(&client, "books", DataStoreType::Cache).unwrap();

    let saved = books.save(json!({"title": "Dune"})).await.unwrap();
    let id = saved["_id"].as_str().unwrap();
    assert!(!is_temp_id(id));
    assert_eq!(books.pending_sync_count().await.unwrap(), 0);
    assert!(server.backend.store.get("books", id).await.is_ok());

    server.backend.fail_next(503);
    let kept = books.save(json!({"title": "Emma"})).await.unwrap();
    assert!(is_temp_id(kept["_id"].as_str().unwrap()));
    assert_eq!(books.pending_sync_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_pull_merges_remote_entities_on_disk() {
    let dir = TempDir::new().unwrap();
    let server = common::spawn_backend().await;
    server
        .backend
        .seed(
            "books",
            vec![
                json!({"_id": "1", "genre": "sf"}),
                json!({"_id": "2", "genre": "sf"}),
                json!({"_id": "3", "genre": "classic"}),
            ],
        )
        .await;

    let path = dir.path().join("kinvey.sqlite");
    {
        let adapter: Arc<dyn PersistenceAdapter> = Arc::new(SqliteAdapter::open(&path).unwrap());
        let client = common::client_for(&server, adapter).await;
        let books = DataStore::collection(&client, "books", DataStoreType::Sync).unwrap();
        books.save(json!({"_id": "local", "genre": "sf"})).await.unwrap();

        let query = Query::new().equal_to("genre", json!("sf"));
        assert_eq!(books.pull(Some(&query)).await.unwrap(), 2);
    }

    // Local data and the queue survive a restart.
    let adapter: Arc<dyn PersistenceAdapter> = Arc::new(SqliteAdapter::open(&path).unwrap());
    let client = common::client_for(&server, adapter).await;
    let books = DataStore::collection(&client, "books", DataStoreType::Sync).unwrap();
    assert_eq!(books.count(None).await.unwrap(), 3);
    assert_eq!(books.pending_sync_count().await.unwrap(), 1);
}
