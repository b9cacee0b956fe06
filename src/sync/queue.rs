//! Pending-operation bookkeeping.
//!
//! Rows live in the local collection [`SYNC_COLLECTION`] and are read and
//! written through the same persistence adapter as user data.

use std::sync::Arc;

use kinvey_query::Query;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{SyncMethod, SyncOperation, SyncState, SYNC_COLLECTION};
use crate::error::{KinveyError, KinveyResult};
use crate::persistence::{is_temp_id, PersistenceAdapter};

pub struct SyncQueue {
    adapter: Arc<dyn PersistenceAdapter>,
    // Serializes read-modify-write cycles on queue rows.
    write_slot: Mutex<()>,
}

impl SyncQueue {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self {
            adapter,
            write_slot: Mutex::new(()),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.adapter
    }

    /// Record a mutation of `entity_id`, superseding any pending row for it.
    ///
    /// The row keeps its queue position. A pending `Create` stays a `Create`
    /// when updated, and disappears when a temp entity is deleted before it
    /// ever reached the backend.
    pub async fn enqueue(
        &self,
        collection: &str,
        entity_id: &str,
        method: SyncMethod,
    ) -> KinveyResult<()> {
        let _slot = self.write_slot.lock().await;
        let row_id = SyncOperation::row_id(collection, entity_id);

        let existing = match self.adapter.get(SYNC_COLLECTION, &row_id).await {
            Ok(doc) => Some(serde_json::from_value::<SyncOperation>(doc)?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let operation = match existing {
            Some(prior) => {
                let method = match (prior.state.method, method) {
                    (SyncMethod::Create, SyncMethod::Delete) if is_temp_id(entity_id) => {
                        self.adapter.destroy(SYNC_COLLECTION, &row_id).await?;
                        debug!(collection, entity_id, "Dropped pending create of deleted entity");
                        return Ok(());
                    }
                    (SyncMethod::Create, SyncMethod::Update) => SyncMethod::Create,
                    (_, next) => next,
                };
                SyncOperation {
                    state: SyncState { method },
                    last_error: None,
                    ..prior
                }
            }
            None => SyncOperation {
                id: row_id,
                collection: collection.to_string(),
                entity_id: entity_id.to_string(),
                state: SyncState { method },
                sequence: self.next_sequence().await?,
                last_error: None,
            },
        };

        debug!(
            collection,
            entity_id,
            method = ?operation.state.method,
            sequence = operation.sequence,
            "Queued sync operation"
        );
        self.adapter
            .save(SYNC_COLLECTION, serde_json::to_value(&operation)?)
            .await?;
        Ok(())
    }

    /// Record `method` for every id in `entity_ids`, or for none of them.
    /// On failure the rows that were already touched get their prior state back.
    pub async fn enqueue_all(
        &self,
        collection: &str,
        entity_ids: &[String],
        method: SyncMethod,
    ) -> KinveyResult<()> {
        if entity_ids.len() < 2 {
            for id in entity_ids {
                self.enqueue(collection, id, method).await?;
            }
            return Ok(());
        }

        let prior = self.operations(Some(collection), Some(entity_ids)).await?;
        for (done, id) in entity_ids.iter().enumerate() {
            if let Err(e) = self.enqueue(collection, id, method).await {
                self.restore(collection, &entity_ids[..done], prior).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn restore(&self, collection: &str, entity_ids: &[String], prior: Vec<SyncOperation>) {
        if entity_ids.is_empty() {
            return;
        }
        let result = async {
            self.clear(Some(collection), Some(entity_ids)).await?;
            let rows = prior
                .iter()
                .filter(|op| entity_ids.contains(&op.entity_id))
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            if !rows.is_empty() {
                self.adapter.batch(SYNC_COLLECTION, rows).await?;
            }
            Ok::<_, KinveyError>(())
        }
        .await;
        if let Err(e) = result {
            warn!(collection, error = %e, "Could not restore sync queue rows");
        }
    }

    async fn next_sequence(&self) -> KinveyResult<u64> {
        let newest = Query::new().descending("sequence").limit(1);
        let rows = self.adapter.find(SYNC_COLLECTION, Some(&newest)).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("sequence"))
            .and_then(|s| s.as_u64())
            .map_or(1, |s| s + 1))
    }

    fn scope(collection: Option<&str>, ids: Option<&[String]>) -> Query {
        let mut query = Query::new().ascending("sequence");
        if let Some(collection) = collection {
            query = query.equal_to("collection", json!(collection));
        }
        if let Some(ids) = ids {
            query = query.contains("entityId", ids.iter().map(|id| json!(id)).collect());
        }
        query
    }

    /// Pending rows in FIFO order, optionally restricted to one collection
    /// and to some entity ids.
    pub async fn operations(
        &self,
        collection: Option<&str>,
        ids: Option<&[String]>,
    ) -> KinveyResult<Vec<SyncOperation>> {
        let rows = self
            .adapter
            .find(SYNC_COLLECTION, Some(&Self::scope(collection, ids)))
            .await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(KinveyError::from))
            .collect()
    }

    pub async fn count(&self, collection: Option<&str>) -> KinveyResult<usize> {
        self.adapter
            .count(SYNC_COLLECTION, Some(&Self::scope(collection, None)))
            .await
    }

    /// Drop the row of one entity. Returns whether a row existed.
    pub async fn remove(&self, collection: &str, entity_id: &str) -> KinveyResult<bool> {
        let _slot = self.write_slot.lock().await;
        let row_id = SyncOperation::row_id(collection, entity_id);
        match self.adapter.destroy(SYNC_COLLECTION, &row_id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remember why the last replay of `operation` failed.
    pub async fn record_error(&self, operation: &SyncOperation, error: &KinveyError) -> KinveyResult<()> {
        let _slot = self.write_slot.lock().await;
        // The row may have been superseded or removed in the meantime.
        let current = match self.adapter.get(SYNC_COLLECTION, &operation.id).await {
            Ok(doc) => serde_json::from_value::<SyncOperation>(doc)?,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        let updated = SyncOperation {
            last_error: Some(error.to_string()),
            ..current
        };
        self.adapter
            .save(SYNC_COLLECTION, serde_json::to_value(&updated)?)
            .await?;
        Ok(())
    }

    /// Remove pending rows. Returns how many were removed.
    pub async fn clear(&self, collection: Option<&str>, ids: Option<&[String]>) -> KinveyResult<usize> {
        let _slot = self.write_slot.lock().await;
        self.adapter
            .clean(SYNC_COLLECTION, Some(&Self::scope(collection, ids)))
            .await
    }
}
