//! In-process adapter.
//!
//! Keeps documents in insertion order. Used by tests and by the fake backend
//! in the integration tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{document_id, PersistenceAdapter};
use crate::error::{KinveyError, KinveyResult};

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    collections: RwLock<BTreeMap<String, Vec<Value>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryAdapter {
    fn engine(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, collection: &str) -> KinveyResult<Option<Vec<Value>>> {
        Ok(self.collections.read().get(collection).cloned())
    }

    async fn read(&self, collection: &str, id: &str) -> KinveyResult<Option<Value>> {
        let collections = self.collections.read();
        let docs = collections
            .get(collection)
            .ok_or_else(|| KinveyError::CollectionNotFound(collection.to_string()))?;
        Ok(docs.iter().find(|d| document_id(d) == Some(id)).cloned())
    }

    async fn write(&self, collection: &str, docs: &[(String, Value)]) -> KinveyResult<()> {
        let mut collections = self.collections.write();
        let stored = collections.entry(collection.to_string()).or_default();
        for (id, doc) in docs {
            match stored.iter_mut().find(|d| document_id(d) == Some(id.as_str())) {
                Some(existing) => *existing = doc.clone(),
                None => stored.push(doc.clone()),
            }
        }
        Ok(())
    }

    async fn remove(&self, collection: &str, ids: &[String]) -> KinveyResult<usize> {
        let mut collections = self.collections.write();
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| KinveyError::CollectionNotFound(collection.to_string()))?;
        let before = stored.len();
        stored.retain(|d| !document_id(d).is_some_and(|id| ids.iter().any(|r| r == id)));
        Ok(before - stored.len())
    }

    async fn collections(&self) -> KinveyResult<Vec<String>> {
        Ok(self.collections.read().keys().cloned().collect())
    }

    async fn destruct(&self) -> KinveyResult<()> {
        self.collections.write().clear();
        Ok(())
    }
}
