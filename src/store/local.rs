//! Local-first reads and writes shared by the cache and sync stores.
//!
//! Every write lands in local storage through the cache rack and is then
//! recorded in the sync queue before the call returns. A write whose queue
//! row cannot be recorded is undone.

use kinvey_query::{Aggregation, Query};
use serde_json::Value;
use tracing::{debug, warn};

use super::network::{expect_array, expect_count};
use crate::client::Client;
use crate::error::{KinveyError, KinveyResult};
use crate::persistence::{document_id, is_temp_id, validate_collection};
use crate::request::Request;
use crate::sync::{PushResult, SyncMethod, SyncOperation, SyncResult};

#[derive(Debug, Clone)]
pub(crate) struct LocalStore {
    client: Client,
    collection: String,
}

impl LocalStore {
    pub(crate) fn new(client: Client, collection: String) -> KinveyResult<Self> {
        validate_collection(&collection)?;
        Ok(Self { client, collection })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn collection(&self) -> &str {
        &self.collection
    }

    fn url(&self, id: Option<&str>) -> String {
        self.client.config().data_url(&self.collection, id)
    }

    async fn execute(&self, request: Request) -> KinveyResult<Value> {
        Ok(self.client.execute_local(request).await?.data.into_json())
    }

    pub(crate) async fn find(&self, query: Option<&Query>) -> KinveyResult<Vec<Value>> {
        let mut request = Request::get(self.url(None));
        if let Some(query) = query {
            request = request.with_query(query.clone());
        }
        expect_array(self.execute(request).await?)
    }

    pub(crate) async fn find_by_id(&self, id: &str) -> KinveyResult<Value> {
        self.execute(Request::get(self.url(Some(id)))).await
    }

    pub(crate) async fn count(&self, query: Option<&Query>) -> KinveyResult<usize> {
        let mut request = Request::get(self.url(Some("_count")));
        if let Some(query) = query {
            request = request.with_query(query.clone());
        }
        expect_count(self.execute(request).await?)
    }

    pub(crate) async fn group(&self, aggregation: &Aggregation) -> KinveyResult<Vec<Value>> {
        self.client.adapter().group(&self.collection, aggregation).await
    }

    pub(crate) async fn create(&self, doc: Value) -> KinveyResult<Value> {
        let prior = match document_id(&doc) {
            Some(id) => self.snapshot(id).await?,
            None => Vec::new(),
        };
        let saved = self
            .execute(Request::post(self.url(None)).with_json(doc))
            .await?;
        let id = stored_id(&saved)?;
        self.commit(&[id.clone()], SyncMethod::Create, &[id], prior)
            .await?;
        Ok(saved)
    }

    pub(crate) async fn update(&self, doc: Value) -> KinveyResult<Value> {
        let id = document_id(&doc)
            .ok_or_else(|| KinveyError::Configuration("An entity needs an _id to be updated".to_string()))?
            .to_string();
        let prior = self.snapshot(&id).await?;
        let saved = self
            .execute(Request::put(self.url(Some(&id))).with_json(doc))
            .await?;
        let stored = stored_id(&saved)?;
        self.commit(&[stored.clone()], SyncMethod::Update, &[stored], prior)
            .await?;
        Ok(saved)
    }

    pub(crate) async fn save(&self, doc: Value) -> KinveyResult<Value> {
        if document_id(&doc).is_some() {
            self.update(doc).await
        } else {
            self.create(doc).await
        }
    }

    /// Remove matching local entities and queue their deletion.
    /// Returns the removed ids.
    pub(crate) async fn remove(&self, query: Option<&Query>) -> KinveyResult<Vec<String>> {
        let scope = query.map(Query::without_modifiers);
        let removed = self.find(scope.as_ref()).await?;
        let ids: Vec<String> = removed
            .iter()
            .filter_map(|doc| document_id(doc).map(str::to_string))
            .collect();

        let mut request = Request::delete(self.url(None));
        if let Some(scope) = scope {
            request = request.with_query(scope);
        }
        self.execute(request).await?;

        self.commit(&ids, SyncMethod::Delete, &[], removed).await?;
        Ok(ids)
    }

    /// Remove one entity. An entity missing locally is still deleted on the
    /// backend at the next push, unless it only ever existed locally.
    pub(crate) async fn remove_by_id(&self, id: &str) -> KinveyResult<usize> {
        let prior = self.snapshot(id).await?;
        let removed = match self.execute(Request::delete(self.url(Some(id)))).await {
            Ok(_) => 1,
            Err(e) if e.is_not_found() => 0,
            Err(e) => return Err(e),
        };
        if removed == 0 && is_temp_id(id) {
            return Ok(0);
        }
        self.commit(&[id.to_string()], SyncMethod::Delete, &[], prior)
            .await?;
        Ok(removed)
    }

    async fn matching_ids(&self, query: Option<&Query>) -> KinveyResult<Vec<String>> {
        Ok(self
            .find(query)
            .await?
            .iter()
            .filter_map(|doc| document_id(doc).map(str::to_string))
            .collect())
    }

    /// The stored copy of `id`, if any.
    async fn snapshot(&self, id: &str) -> KinveyResult<Vec<Value>> {
        match self.client.adapter().get(&self.collection, id).await {
            Ok(doc) => Ok(vec![doc]),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Queue `method` for `ids`. When the queue cannot be written, the
    /// documents in `written` are dropped and `prior` is stored again.
    async fn commit(
        &self,
        ids: &[String],
        method: SyncMethod,
        written: &[String],
        prior: Vec<Value>,
    ) -> KinveyResult<()> {
        let queued = self
            .client
            .sync_queue()
            .enqueue_all(&self.collection, ids, method)
            .await;
        if let Err(e) = queued {
            self.rollback(written, prior).await;
            return Err(e);
        }
        Ok(())
    }

    async fn rollback(&self, written: &[String], prior: Vec<Value>) {
        let adapter = self.client.adapter();
        let result = async {
            for id in written {
                match adapter.destroy(&self.collection, id).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
            if !prior.is_empty() {
                adapter.batch(&self.collection, prior).await?;
            }
            Ok::<_, KinveyError>(())
        }
        .await;
        match result {
            Ok(()) => debug!(collection = %self.collection, "Rolled back unqueued local write"),
            Err(e) => warn!(collection = %self.collection, error = %e, "Could not roll back local write"),
        }
    }

    /// Write entities fetched from the backend into local storage, leaving
    /// alone the ones with pending local changes.
    pub(crate) async fn refresh(&self, entities: &[Value]) -> KinveyResult<()> {
        let pending: Vec<String> = self
            .pending_sync_operations()
            .await?
            .into_iter()
            .map(|op| op.entity_id)
            .collect();
        let fresh: Vec<Value> = entities
            .iter()
            .filter(|doc| document_id(doc).map_or(false, |id| !pending.iter().any(|p| p == id)))
            .cloned()
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        debug!(
            collection = %self.collection,
            refreshed = fresh.len(),
            skipped = entities.len() - fresh.len(),
            "Refreshing local copies"
        );
        self.execute(Request::post(self.url(None)).with_json(Value::Array(fresh)))
            .await?;
        Ok(())
    }

    pub(crate) async fn push(&self, ids: Option<&[String]>) -> KinveyResult<PushResult> {
        self.client.sync_manager().push(&self.collection, ids).await
    }

    pub(crate) async fn pull(&self, query: Option<&Query>) -> KinveyResult<usize> {
        self.client.sync_manager().pull(&self.collection, query).await
    }

    pub(crate) async fn sync(&self, query: Option<&Query>) -> KinveyResult<SyncResult> {
        self.client.sync_manager().sync(&self.collection, query).await
    }

    pub(crate) async fn pending_sync_count(&self) -> KinveyResult<usize> {
        self.client.sync_queue().count(Some(&self.collection)).await
    }

    pub(crate) async fn pending_sync_operations(&self) -> KinveyResult<Vec<SyncOperation>> {
        self.client
            .sync_queue()
            .operations(Some(&self.collection), None)
            .await
    }

    pub(crate) async fn clear_sync(&self, ids: Option<&[String]>) -> KinveyResult<usize> {
        self.client
            .sync_queue()
            .clear(Some(&self.collection), ids)
            .await
    }

    /// Drop local entities matching `query` together with their queue rows.
    /// Nothing is sent to the backend.
    pub(crate) async fn clear(&self, query: Option<&Query>) -> KinveyResult<usize> {
        let scope = query.map(Query::without_modifiers);
        let ids = match &scope {
            Some(scope) => Some(self.matching_ids(Some(scope)).await?),
            None => None,
        };

        let mut request = Request::delete(self.url(None));
        if let Some(scope) = scope {
            request = request.with_query(scope);
        }
        let removed = expect_count(self.execute(request).await?)?;
        self.clear_sync(ids.as_deref()).await?;
        Ok(removed)
    }
}

fn stored_id(entity: &Value) -> KinveyResult<String> {
    document_id(entity)
        .map(str::to_string)
        .ok_or_else(|| KinveyError::Database(format!("Stored entity has no _id: {}", entity)))
}
