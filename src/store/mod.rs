//! Data stores.
//!
//! Three flavours share one method surface:
//!
//! - [`NetworkStore`]: every call goes to the backend
//! - [`CacheStore`]: local first, pushes each write right away
//! - [`SyncStore`]: local only until an explicit push
//!
//! [`DataStore::collection`] picks one by [`DataStoreType`].

mod cache;
mod local;
mod network;
mod sync;

pub use cache::CacheStore;
pub use network::NetworkStore;
pub use sync::SyncStore;

use kinvey_query::{Aggregation, Query};
use serde_json::Value;

use crate::client::Client;
use crate::error::{KinveyError, KinveyResult};
use crate::sync::{PushResult, SyncOperation, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataStoreType {
    Network,
    #[default]
    Cache,
    Sync,
}

/// Where a cache store reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
    /// Local storage only.
    #[default]
    ForceLocal,
    /// Backend only; results refresh the local copy.
    ForceNetwork,
    /// Local storage, falling back to the backend on a miss.
    PreferLocal,
    /// Backend, falling back to local storage when it cannot be reached.
    PreferNetwork,
}

#[derive(Debug, Clone)]
pub enum DataStore {
    Network(NetworkStore),
    Cache(CacheStore),
    Sync(SyncStore),
}

macro_rules! dispatch {
    ($self:ident, $store:ident => $call:expr) => {
        match $self {
            DataStore::Network($store) => $call,
            DataStore::Cache($store) => $call,
            DataStore::Sync($store) => $call,
        }
    };
}

macro_rules! local_only {
    ($self:ident, $op:literal, $store:ident => $call:expr) => {
        match $self {
            DataStore::Network(_) => Err(KinveyError::Configuration(format!(
                "{} is not available on a network store",
                $op
            ))),
            DataStore::Cache($store) => $call,
            DataStore::Sync($store) => $call,
        }
    };
}

impl DataStore {
    /// Open `collection` with the store flavour `kind`.
    pub fn collection(client: &Client, collection: &str, kind: DataStoreType) -> KinveyResult<Self> {
        Ok(match kind {
            DataStoreType::Network => DataStore::Network(NetworkStore::new(client.clone(), collection)?),
            DataStoreType::Cache => DataStore::Cache(CacheStore::new(client.clone(), collection)?),
            DataStoreType::Sync => DataStore::Sync(SyncStore::new(client.clone(), collection)?),
        })
    }

    pub fn kind(&self) -> DataStoreType {
        match self {
            DataStore::Network(_) => DataStoreType::Network,
            DataStore::Cache(_) => DataStoreType::Cache,
            DataStore::Sync(_) => DataStoreType::Sync,
        }
    }

    pub fn collection_name(&self) -> &str {
        dispatch!(self, s => s.collection())
    }

    pub async fn find(&self, query: Option<&Query>) -> KinveyResult<Vec<Value>> {
        dispatch!(self, s => s.find(query).await)
    }

    pub async fn find_by_id(&self, id: &str) -> KinveyResult<Value> {
        dispatch!(self, s => s.find_by_id(id).await)
    }

    pub async fn count(&self, query: Option<&Query>) -> KinveyResult<usize> {
        dispatch!(self, s => s.count(query).await)
    }

    pub async fn group(&self, aggregation: &Aggregation) -> KinveyResult<Vec<Value>> {
        dispatch!(self, s => s.group(aggregation).await)
    }

    pub async fn create(&self, doc: Value) -> KinveyResult<Value> {
        dispatch!(self, s => s.create(doc).await)
    }

    pub async fn update(&self, doc: Value) -> KinveyResult<Value> {
        dispatch!(self, s => s.update(doc).await)
    }

    pub async fn save(&self, doc: Value) -> KinveyResult<Value> {
        dispatch!(self, s => s.save(doc).await)
    }

    pub async fn remove(&self, query: Option<&Query>) -> KinveyResult<usize> {
        dispatch!(self, s => s.remove(query).await)
    }

    pub async fn remove_by_id(&self, id: &str) -> KinveyResult<usize> {
        dispatch!(self, s => s.remove_by_id(id).await)
    }

    pub async fn push(&self) -> KinveyResult<PushResult> {
        local_only!(self, "push", s => s.push().await)
    }

    pub async fn pull(&self, query: Option<&Query>) -> KinveyResult<usize> {
        local_only!(self, "pull", s => s.pull(query).await)
    }

    pub async fn sync(&self, query: Option<&Query>) -> KinveyResult<SyncResult> {
        local_only!(self, "sync", s => s.sync(query).await)
    }

    pub async fn pending_sync_count(&self) -> KinveyResult<usize> {
        local_only!(self, "pending_sync_count", s => s.pending_sync_count().await)
    }

    pub async fn pending_sync_operations(&self) -> KinveyResult<Vec<SyncOperation>> {
        local_only!(self, "pending_sync_operations", s => s.pending_sync_operations().await)
    }

    pub async fn clear_sync(&self, ids: Option<&[String]>) -> KinveyResult<usize> {
        local_only!(self, "clear_sync", s => s.clear_sync(ids).await)
    }

    pub async fn clear(&self, query: Option<&Query>) -> KinveyResult<usize> {
        local_only!(self, "clear", s => s.clear(query).await)
    }
}
