//! Offline sync.
//!
//! Local mutations made through cache and sync stores leave one row per
//! entity in the sync queue. [`SyncManager::push`] replays those rows against
//! the backend in FIFO order and [`SyncManager::pull`] copies remote entities
//! into local storage.

pub mod manager;
pub mod queue;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::KinveyError;

pub use manager::SyncManager;
pub use queue::SyncQueue;

/// Local collection holding the pending operations.
pub const SYNC_COLLECTION: &str = "kinvey-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncMethod {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub method: SyncMethod,
}

/// One pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// `<collection>:<entityId>`
    #[serde(rename = "_id")]
    pub id: String,
    pub collection: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    pub state: SyncState,
    /// Queue position. Kept when the row is superseded.
    pub sequence: u64,
    #[serde(rename = "lastError", default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SyncOperation {
    pub fn row_id(collection: &str, entity_id: &str) -> String {
        format!("{}:{}", collection, entity_id)
    }
}

/// A row that was replayed and removed from the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PushSuccess {
    /// Entity id before the push. Temp ids are replaced by the backend id.
    pub entity_id: String,
    pub method: SyncMethod,
    /// The entity as stored by the backend; `None` for deletes.
    pub entity: Option<Value>,
}

/// A row whose replay failed. It stays queued.
#[derive(Debug)]
pub struct PushFailure {
    pub entity_id: String,
    pub method: SyncMethod,
    pub error: KinveyError,
}

#[derive(Debug, Default)]
pub struct PushResult {
    pub success: Vec<PushSuccess>,
    pub error: Vec<PushFailure>,
}

impl PushResult {
    pub fn is_complete(&self) -> bool {
        self.error.is_empty()
    }
}

/// Outcome of push followed by pull.
#[derive(Debug, Default)]
pub struct SyncResult {
    pub push: PushResult,
    /// Entities written locally by the pull.
    pub pulled: usize,
}
