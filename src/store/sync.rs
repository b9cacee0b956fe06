use kinvey_query::{Aggregation, Query};
use serde_json::Value;

use super::local::LocalStore;
use crate::client::Client;
use crate::error::KinveyResult;
use crate::sync::{PushResult, SyncOperation, SyncResult};

/// Fully offline store. Reads are local; writes stay queued until an
/// explicit [`push`](SyncStore::push) or [`sync`](SyncStore::sync).
#[derive(Debug, Clone)]
pub struct SyncStore {
    local: LocalStore,
}

impl SyncStore {
    pub fn new(client: Client, collection: impl Into<String>) -> KinveyResult<Self> {
        Ok(Self {
            local: LocalStore::new(client, collection.into())?,
        })
    }

    pub fn collection(&self) -> &str {
        self.local.collection()
    }

    pub fn client(&self) -> &Client {
        self.local.client()
    }

    pub async fn find(&self, query: Option<&Query>) -> KinveyResult<Vec<Value>> {
        self.local.find(query).await
    }

    pub async fn find_by_id(&self, id: &str) -> KinveyResult<Value> {
        self.local.find_by_id(id).await
    }

    pub async fn count(&self, query: Option<&Query>) -> KinveyResult<usize> {
        self.local.count(query).await
    }

    pub async fn group(&self, aggregation: &Aggregation) -> KinveyResult<Vec<Value>> {
        self.local.group(aggregation).await
    }

    pub async fn create(&self, doc: Value) -> KinveyResult<Value> {
        self.local.create(doc).await
    }

    pub async fn update(&self, doc: Value) -> KinveyResult<Value> {
        self.local.update(doc).await
    }

    pub async fn save(&self, doc: Value) -> KinveyResult<Value> {
        self.local.save(doc).await
    }

    pub async fn remove(&self, query: Option<&Query>) -> KinveyResult<usize> {
        Ok(self.local.remove(query).await?.len())
    }

    pub async fn remove_by_id(&self, id: &str) -> KinveyResult<usize> {
        self.local.remove_by_id(id).await
    }

    pub async fn push(&self) -> KinveyResult<PushResult> {
        self.local.push(None).await
    }

    /// Push only the pending changes of `ids`.
    pub async fn push_ids(&self, ids: &[String]) -> KinveyResult<PushResult> {
        self.local.push(Some(ids)).await
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
