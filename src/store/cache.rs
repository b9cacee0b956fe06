use kinvey_query::{Aggregation, Query};
use serde_json::Value;
use tracing::{debug, warn};

use super::local::LocalStore;
use super::network::NetworkStore;
use super::ReadPolicy;
use crate::client::Client;
use crate::error::KinveyResult;
use crate::persistence::document_id;
use crate::sync::{PushResult, SyncOperation, SyncResult};

/// Local-first store that keeps a copy of the collection on the device.
///
/// Writes are applied locally and queued, then pushed right away when
/// automatic sync is on. A failed automatic push leaves the change queued and
/// returns the local entity. Reads follow the store's [`ReadPolicy`];
/// entities fetched from the backend refresh the local copy.
#[derive(Debug, Clone)]
pub struct CacheStore {
    local: LocalStore,
    network: NetworkStore,
    policy: ReadPolicy,
    auto_sync: bool,
}

impl CacheStore {
    pub fn new(client: Client, collection: impl Into<String>) -> KinveyResult<Self> {
        let collection = collection.into();
        let auto_sync = client.config().auto_sync;
        Ok(Self {
            network: NetworkStore::new(client.clone(), collection.clone())?,
            local: LocalStore::new(client, collection)?,
            policy: ReadPolicy::default(),
            auto_sync,
        })
    }

    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_auto_sync(mut self, enabled: bool) -> Self {
        self.auto_sync = enabled;
        self
    }

    pub fn collection(&self) -> &str {
        self.local.collection()
    }

    pub fn read_policy(&self) -> ReadPolicy {
        self.policy
    }

    pub fn client(&self) -> &Client {
        self.local.client()
    }

    async fn fetch(&self, query: Option<&Query>) -> KinveyResult<Vec<Value>> {
        let docs = self.network.find(query).await?;
        self.local.refresh(&docs).await?;
        Ok(docs)
    }

    async fn fetch_by_id(&self, id: &str) -> KinveyResult<Value> {
        let doc = self.network.find_by_id(id).await?;
        self.local.refresh(std::slice::from_ref(&doc)).await?;
        Ok(doc)
    }

    pub async fn find(&self, query: Option<&Query>) -> KinveyResult<Vec<Value>> {
        match self.policy {
            ReadPolicy::ForceLocal => self.local.find(query).await,
            ReadPolicy::ForceNetwork => self.fetch(query).await,
            ReadPolicy::PreferLocal => {
                let docs = self.local.find(query).await?;
                if docs.is_empty() {
                    self.fetch(query).await
                } else {
                    Ok(docs)
                }
            }
            ReadPolicy::PreferNetwork => match self.fetch(query).await {
                Err(e) if e.is_unreachable() => {
                    debug!(error = %e, "Backend unreachable, reading local copy");
                    self.local.find(query).await
                }
                other => other,
            },
        }
    }

    pub async fn find_by_id(&self, id: &str) -> KinveyResult<Value> {
        match self.policy {
            ReadPolicy::ForceLocal => self.local.find_by_id(id).await,
            ReadPolicy::ForceNetwork => self.fetch_by_id(id).await,
            ReadPolicy::PreferLocal => match self.local.find_by_id(id).await {
                Err(e) if e.is_not_found() => self.fetch_by_id(id).await,
                other => other,
            },
            ReadPolicy::PreferNetwork => match self.fetch_by_id(id).await {
                Err(e) if e.is_unreachable() => self.local.find_by_id(id).await,
                other => other,
            },
        }
    }

    pub async fn count(&self, query: Option<&Query>) -> KinveyResult<usize> {
        match self.policy {
            ReadPolicy::ForceLocal | ReadPolicy::PreferLocal => self.local.count(query).await,
            ReadPolicy::ForceNetwork => self.network.count(query).await,
            ReadPolicy::PreferNetwork => match self.network.count(query).await {
                Err(e) if e.is_unreachable() => self.local.count(query).await,
                other => other,
            },
        }
    }

    pub async fn group(&self, aggregation: &Aggregation) -> KinveyResult<Vec<Value>> {
        match self.policy {
            ReadPolicy::ForceLocal | ReadPolicy::PreferLocal => self.local.group(aggregation).await,
            ReadPolicy::ForceNetwork => self.network.group(aggregation).await,
            ReadPolicy::PreferNetwork => match self.network.group(aggregation).await {
                Err(e) if e.is_unreachable() => self.local.group(aggregation).await,
                other => other,
            },
        }
    }

    pub async fn create(&self, doc: Value) -> KinveyResult<Value> {
        let saved = self.local.create(doc).await?;
        Ok(self.settle(saved).await)
    }

    pub async fn update(&self, doc: Value) -> KinveyResult<Value> {
        let saved = self.local.update(doc).await?;
        Ok(self.settle(saved).await)
    }

    pub async fn save(&self, doc: Value) -> KinveyResult<Value> {
        let saved = self.local.save(doc).await?;
        Ok(self.settle(saved).await)
    }

    pub async fn remove(&self, query: Option<&Query>) -> KinveyResult<usize> {
        let ids = self.local.remove(query).await?;
        if !ids.is_empty() {
            self.auto_push(&ids).await;
        }
        Ok(ids.len())
    }

    pub async fn remove_by_id(&self, id: &str) -> KinveyResult<usize> {
        let removed = self.local.remove_by_id(id).await?;
        self.auto_push(&[id.to_string()]).await;
        Ok(removed)
    }

    /// Push a freshly written entity and return the backend's copy when the
    /// push went through.
    async fn settle(&self, saved: Value) -> Value {
        let Some(id) = document_id(&saved).map(str::to_string) else {
            return saved;
        };
        match self.auto_push(&[id]).await {
            Some(result) => result
                .success
                .into_iter()
                .find_map(|s| s.entity)
                .unwrap_or(saved),
            None => saved,
        }
    }

    async fn auto_push(&self, ids: &[String]) -> Option<PushResult> {
        if !self.auto_sync {
            return None;
        }
        match self.local.push(Some(ids)).await {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(
                    collection = self.collection(),
                    error = %e,
                    "Automatic push failed, changes stay queued"
                );
                None
            }
        }
    }

    pub async fn push(&self) -> KinveyResult<PushResult> {
        self.local.push(None).await
    }

    pub async fn pull(&self, query: Option<&Query>) -> KinveyResult<usize> {
        self.local.pull(query).await
    }

    pub async fn sync(&self, query: Option<&Query>) -> KinveyResult<SyncResult> {
        self.local.sync(query).await
    }

    pub async fn pending_sync_count(&self) -> KinveyResult<usize> {
        self.local.pending_sync_count().await
    }

    pub async fn pending_sync_operations(&self) -> KinveyResult<Vec<SyncOperation>> {
        self.local.pending_sync_operations().await
    }

    pub async fn clear_sync(&self, ids: Option<&[String]>) -> KinveyResult<usize> {
        self.local.clear_sync(ids).await
    }

    pub async fn clear(&self, query: Option<&Query>) -> KinveyResult<usize> {
        self.local.clear(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::persistence::{is_temp_id, MemoryAdapter};
    use crate::rack::MockTransport;
    use crate::request::{Method, Response};
    use serde_json::json;
    use std::sync::Arc;

    const BOOKS: &str = "/appdata/kid_app/books";

    async fn store() -> (CacheStore, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let client = Client::with_parts(
            ClientConfig::new("kid_app", "secret").with_api_host("http://api.test"),
            Arc::new(MemoryAdapter::new()),
            transport.clone(),
        )
        .await
        .unwrap();
        (CacheStore::new(client, "books").unwrap(), transport)
    }

    #[tokio::test]
    async fn test_auto_sync_pushes_written_entity() {
        let (store, transport) = store().await;
        transport.respond_with(Method::Post, BOOKS, |_| {
            Response::json(201, json!({"_id": "srv-1", "title": "Dune"}))
        });

        let saved = store.save(json!({"title": "Dune"})).await.unwrap();
        assert_eq!(saved["_id"], "srv-1");
        assert_eq!(store.pending_sync_count().await.unwrap(), 0);

        let local = store.find(None).await.unwrap();
        assert_eq!(local, vec![json!({"_id": "srv-1", "title": "Dune"})]);
    }

    #[tokio::test]
    async fn test_failed_auto_sync_keeps_local_entity_queued() {
        let (store, transport) = store().await;
        transport.respond(
            Method::Post,
            BOOKS,
            Response::json(500, json!({"error": "ServerError"})),
        );

        let saved = store.save(json!({"title": "Dune"})).await.unwrap();
        assert!(is_temp_id(saved["_id"].as_str().unwrap()));

        let pending = store.pending_sync_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].last_error.is_some());
    }

    #[tokio::test]
    async fn test_without_auto_sync_nothing_is_sent() {
        let (store, transport) = store().await;
        let store = store.with_auto_sync(false);

        store.save(json!({"_id": "1", "title": "Dune"})).await.unwrap();
        store.remove_by_id("1").await.unwrap();

        assert!(transport.requests().is_empty());
        let pending = store.pending_sync_operations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].state.method, crate::sync::SyncMethod::Delete);
    }

    #[tokio::test]
    async fn test_network_reads_refresh_local_copy() {
        let (store, transport) = store().await;
        let store = store
            .with_auto_sync(false)
            .with_read_policy(ReadPolicy::ForceNetwork);
        store
            .save(json!({"_id": "2", "title": "local edit"}))
            .await
            .unwrap();
        transport.respond(
            Method::Get,
            BOOKS,
            Response::json(
                200,
                json!([{"_id": "1", "title": "Emma"}, {"_id": "2", "title": "remote"}]),
            ),
        );

        assert_eq!(store.find(None).await.unwrap().len(), 2);

        let local = store.clone().with_read_policy(ReadPolicy::ForceLocal);
        assert_eq!(local.find_by_id("1").await.unwrap()["title"], "Emma");
        // Pending local changes win over the refresh.
        assert_eq!(local.find_by_id("2").await.unwrap()["title"], "local edit");
    }

    #[tokio::test]
    async fn test_prefer_network_falls_back_when_offline() {
        let (store, _transport) = store().await;
        let store = store
            .with_auto_sync(false)
            .with_read_policy(ReadPolicy::PreferNetwork);
        store.save(json!({"_id": "1"})).await.unwrap();

        // No route registered: the mock transport reports a network error.
        assert_eq!(store.find(None).await.unwrap().len(), 1);
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_prefer_local_fetches_missing_entity() {
        let (store, transport) = store().await;
        let store = store.with_read_policy(ReadPolicy::PreferLocal);
        transport.respond(
            Method::Get,
            "/appdata/kid_app/books/9",
            Response::json(200, json!({"_id": "9"})),
        );

        assert_eq!(store.find_by_id("9").await.unwrap(), json!({"_id": "9"}));
        assert_eq!(store.find_by_id("9").await.unwrap(), json!({"_id": "9"}));
        assert_eq!(
            transport.request_count(Method::Get, "/appdata/kid_app/books/9"),
            1
        );
    }

    #[tokio::test]
    async fn test_clear_drops_entities_and_queue_rows() {
        let (store, _transport) = store().await;
        let store = store.with_auto_sync(false);
        store.save(json!({"_id": "1", "genre": "sf"})).await.unwrap();
        store.save(json!({"_id": "2", "genre": "classic"})).await.unwrap();

        let query = Query::new().equal_to("genre", json!("sf"));
        assert_eq!(store.clear(Some(&query)).await.unwrap(), 1);
        assert_eq!(store.pending_sync_count().await.unwrap(), 1);

        assert_eq!(store.clear(None).await.unwrap(), 1);
        assert_eq!(store.pending_sync_count().await.unwrap(), 0);
    }
}
