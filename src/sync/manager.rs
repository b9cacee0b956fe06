//! Push and pull against the backend.

use std::sync::Arc;

use kinvey_query::Query;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{PushFailure, PushResult, PushSuccess, SyncMethod, SyncOperation, SyncQueue, SyncResult};
use crate::auth::AuthRefreshInterceptor;
use crate::config::ClientConfig;
use crate::error::{KinveyError, KinveyResult};
use crate::persistence::is_temp_id;
use crate::request::{AuthType, Request};

pub struct SyncManager {
    config: Arc<ClientConfig>,
    queue: Arc<SyncQueue>,
    network: Arc<AuthRefreshInterceptor>,
}

impl SyncManager {
    pub fn new(
        config: Arc<ClientConfig>,
        queue: Arc<SyncQueue>,
        network: Arc<AuthRefreshInterceptor>,
    ) -> Self {
        Self {
            config,
            queue,
            network,
        }
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    /// Replay the pending rows of `collection` in FIFO order.
    ///
    /// A failed row stays queued with its error recorded and does not stop
    /// the rows after it. Only a queue that cannot be read fails the push.
    pub async fn push(&self, collection: &str, ids: Option<&[String]>) -> KinveyResult<PushResult> {
        let operations = self.queue.operations(Some(collection), ids).await?;
        debug!(collection, pending = operations.len(), "Pushing pending changes");

        let mut result = PushResult::default();
        for operation in operations {
            let outcome = match self.replay(&operation).await {
                Ok(entity) => self
                    .queue
                    .remove(&operation.collection, &operation.entity_id)
                    .await
                    .map(|_| entity),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(entity) => result.success.push(PushSuccess {
                    entity_id: operation.entity_id.clone(),
                    method: operation.state.method,
                    entity,
                }),
                Err(error) => {
                    warn!(
                        collection,
                        entity_id = %operation.entity_id,
                        error = %error,
                        "Sync operation failed"
                    );
                    if let Err(e) = self.queue.record_error(&operation, &error).await {
                        warn!(error = %e, "Could not record sync failure");
                    }
                    result.error.push(PushFailure {
                        entity_id: operation.entity_id.clone(),
                        method: operation.state.method,
                        error,
                    });
                }
            }
        }

        info!(
            collection,
            pushed = result.success.len(),
            failed = result.error.len(),
            "Push finished"
        );
        Ok(result)
    }

    async fn replay(&self, operation: &SyncOperation) -> KinveyResult<Option<Value>> {
        let collection = operation.collection.as_str();
        let entity_id = operation.entity_id.as_str();
        let adapter = self.queue.adapter();

        if operation.state.method == SyncMethod::Delete {
            let request = Request::delete(self.config.data_url(collection, Some(entity_id)))
                .with_auth(AuthType::All);
            return match self.network.execute(request).await {
                Ok(_) => Ok(None),
                // Already gone on the backend.
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            };
        }

        let mut local = adapter
            .get(collection, entity_id)
            .await
            .map_err(|e| e.into_read_error(entity_id))?;

        let temp = is_temp_id(entity_id);
        let request = if temp {
            if let Some(obj) = local.as_object_mut() {
                obj.remove("_id");
            }
            Request::post(self.config.data_url(collection, None))
        } else {
            Request::put(self.config.data_url(collection, Some(entity_id)))
        };
        let request = request.with_auth(AuthType::All).with_json(local);

        let entity = self.network.execute(request).await?.data.into_json();
        if !entity.is_object() {
            return Err(invalid_response(format!(
                "expected the saved entity, got {}",
                entity
            )));
        }

        if temp {
            match adapter.destroy(collection, entity_id).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        let saved = adapter.save(collection, entity).await?;
        debug!(collection, entity_id, "Reconciled local entity with backend");
        Ok(Some(saved))
    }

    /// Fetch remote entities matching `query` and upsert them locally.
    /// Returns the number of entities written.
    pub async fn pull(&self, collection: &str, query: Option<&Query>) -> KinveyResult<usize> {
        let mut request =
            Request::get(self.config.data_url(collection, None)).with_auth(AuthType::All);
        if let Some(query) = query {
            request = request.with_query(query.clone());
        }

        let docs = match self.network.execute(request).await?.data.into_json() {
            Value::Array(docs) => docs,
            other => {
                return Err(invalid_response(format!(
                    "expected an array of entities, got {}",
                    other
                )))
            }
        };

        let count = docs.len();
        if count > 0 {
            self.queue.adapter().batch(collection, docs).await?;
        }
        info!(collection, pulled = count, "Pull finished");
        Ok(count)
    }

    /// Push, then pull.
    pub async fn sync(&self, collection: &str, query: Option<&Query>) -> KinveyResult<SyncResult> {
        let push = self.push(collection, None).await?;
        let pulled = self.pull(collection, query).await?;
        Ok(SyncResult { push, pulled })
    }
}

fn invalid_response(message: String) -> KinveyError {
    KinveyError::Kinvey {
        status: 200,
        name: "InvalidResponse".to_string(),
        message,
        debug: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryAdapter, PersistenceAdapter};
    use crate::rack::{network_rack, MockTransport};
    use crate::request::{Method, Response};
    use crate::session::Session;
    use serde_json::json;

    const BOOKS: &str = "/appdata/kid_app/books";

    struct Fixture {
        adapter: Arc<dyn PersistenceAdapter>,
        transport: Arc<MockTransport>,
        manager: SyncManager,
    }

    async fn fixture() -> Fixture {
        let config = Arc::new(ClientConfig::new("kid_app", "secret").with_api_host("http://api.test"));
        let adapter: Arc<dyn PersistenceAdapter> = Arc::new(MemoryAdapter::new());
        let transport = Arc::new(MockTransport::new());
        let session = Arc::new(Session::load(adapter.clone()).await.unwrap());
        let rack = Arc::new(network_rack(config.clone(), transport.clone()));
        let network = Arc::new(AuthRefreshInterceptor::new(config.clone(), rack, session));
        let queue = Arc::new(SyncQueue::new(adapter.clone()));
        Fixture {
            adapter,
            transport,
            manager: SyncManager::new(config, queue, network),
        }
    }

    #[tokio::test]
    async fn test_push_create_reconciles_temp_id() {
        let f = fixture().await;
        let saved = f.adapter.save("books", json!({"title": "Dune"})).await.unwrap();
        let temp_id = saved["_id"].as_str().unwrap().to_string();
        f.manager
            .queue()
            .enqueue("books", &temp_id, SyncMethod::Create)
            .await
            .unwrap();
        f.transport.respond_with(Method::Post, BOOKS, |request| {
            let mut body = request_json(request);
            assert!(body.get("_id").is_none());
            body["_id"] = json!("server-1");
            Response::json(201, body)
        });

        let result = f.manager.push("books", None).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.success[0].entity_id, temp_id);
        assert_eq!(result.success[0].entity.as_ref().unwrap()["_id"], "server-1");

        assert!(f.adapter.get("books", &temp_id).await.is_err());
        assert_eq!(f.adapter.get("books", "server-1").await.unwrap()["title"], "Dune");
        assert_eq!(f.manager.queue().count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_row_stays_queued_without_blocking_others() {
        let f = fixture().await;
        for id in ["1", "2"] {
            f.adapter
                .save("books", json!({"_id": id, "title": id}))
                .await
                .unwrap();
            f.manager
                .queue()
                .enqueue("books", id, SyncMethod::Update)
                .await
                .unwrap();
        }
        f.transport.respond(
            Method::Put,
            "/appdata/kid_app/books/1",
            Response::json(500, json!({"error": "ServerError", "description": "boom"})),
        );
        f.transport.respond(
            Method::Put,
            "/appdata/kid_app/books/2",
            Response::json(200, json!({"_id": "2", "title": "2"})),
        );

        let result = f.manager.push("books", None).await.unwrap();
        assert_eq!(result.success.len(), 1);
        assert_eq!(result.error.len(), 1);
        assert!(matches!(result.error[0].error, KinveyError::Server { status: 500, .. }));

        let pending = f.manager.queue().operations(None, None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].entity_id, "1");
        assert!(pending[0].last_error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_delete_answered_with_404_counts_as_success() {
        let f = fixture().await;
        f.manager
            .queue()
            .enqueue("books", "gone", SyncMethod::Delete)
            .await
            .unwrap();
        f.transport.respond(
            Method::Delete,
            "/appdata/kid_app/books/gone",
            Response::json(404, json!({"error": "EntityNotFound"})),
        );

        let result = f.manager.push("books", None).await.unwrap();
        assert_eq!(result.success.len(), 1);
        assert_eq!(result.success[0].entity, None);
        assert_eq!(f.manager.queue().count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_local_entity_is_reported() {
        let f = fixture().await;
        f.manager
            .queue()
            .enqueue("books", "ghost", SyncMethod::Update)
            .await
            .unwrap();

        let result = f.manager.push("books", None).await.unwrap();
        assert!(matches!(result.error[0].error, KinveyError::EntityNotFound(_)));
        assert_eq!(f.manager.queue().count(None).await.unwrap(), 1);
        assert!(f.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_pull_upserts_remote_entities() {
        let f = fixture().await;
        f.adapter
            .save("books", json!({"_id": "1", "title": "old"}))
            .await
            .unwrap();
        f.transport.respond(
            Method::Get,
            BOOKS,
            Response::json(200, json!([{"_id": "1", "title": "new"}, {"_id": "2", "title": "Emma"}])),
        );

        let query = Query::new().exists("title", true);
        assert_eq!(f.manager.pull("books", Some(&query)).await.unwrap(), 2);
        assert_eq!(f.adapter.get("books", "1").await.unwrap()["title"], "new");
        assert_eq!(f.adapter.count("books", None).await.unwrap(), 2);
        assert!(f.transport.requests()[0].url.contains("query="));
    }

    fn request_json(request: &Request) -> Value {
        match &request.body {
            crate::request::Body::Raw { bytes, .. } => serde_json::from_slice(bytes).unwrap(),
            other => panic!("unexpected body: {other:?}"),
        }
    }
}
