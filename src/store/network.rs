use kinvey_query::{Aggregation, Query};
use serde_json::Value;
use tracing::debug;

use crate::client::Client;
use crate::error::{KinveyError, KinveyResult};
use crate::persistence::{document_id, validate_collection};
use crate::request::{AuthType, Request};

/// Reads and writes go straight to the backend. Nothing is stored locally.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    client: Client,
    collection: String,
}

impl NetworkStore {
    pub fn new(client: Client, collection: impl Into<String>) -> KinveyResult<Self> {
        let collection = collection.into();
        validate_collection(&collection)?;
        Ok(Self { client, collection })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn url(&self, id: Option<&str>) -> String {
        self.client.config().data_url(&self.collection, id)
    }

    async fn send(&self, request: Request) -> KinveyResult<Value> {
        let request = request.with_auth(AuthType::All);
        debug!(method = %request.method, url = %request.url, "Network store request");
        Ok(self.client.execute_network(request).await?.data.into_json())
    }

    pub async fn find(&self, query: Option<&Query>) -> KinveyResult<Vec<Value>> {
        let mut request = Request::get(self.url(None));
        if let Some(query) = query {
            request = request.with_query(query.clone());
        }
        expect_array(self.send(request).await?)
    }

    pub async fn find_by_id(&self, id: &str) -> KinveyResult<Value> {
        self.send(Request::get(self.url(Some(id)))).await
    }

    pub async fn count(&self, query: Option<&Query>) -> KinveyResult<usize> {
        let mut request = Request::get(self.url(Some("_count")));
        if let Some(query) = query {
            request = request.with_query(query.without_modifiers());
        }
        expect_count(self.send(request).await?)
    }

    pub async fn group(&self, aggregation: &Aggregation) -> KinveyResult<Vec<Value>> {
        let body = aggregation.to_body()?;
        expect_array(
            self.send(Request::post(self.url(Some("_group"))).with_json(body))
                .await?,
        )
    }

    /// Create an entity. The backend assigns the id when `doc` has none.
    pub async fn create(&self, doc: Value) -> KinveyResult<Value> {
        self.send(Request::post(self.url(None)).with_json(doc)).await
    }

    pub async fn update(&self, doc: Value) -> KinveyResult<Value> {
        let id = document_id(&doc)
            .ok_or_else(|| KinveyError::Configuration("An entity needs an _id to be updated".to_string()))?
            .to_string();
        self.send(Request::put(self.url(Some(&id))).with_json(doc)).await
    }

    /// `update` when `doc` carries an `_id`, `create` otherwise.
    pub async fn save(&self, doc: Value) -> KinveyResult<Value> {
        if document_id(&doc).is_some() {
            self.update(doc).await
        } else {
            self.create(doc).await
        }
    }

    /// Remove every entity matching `query`. Returns the removed count.
    pub async fn remove(&self, query: Option<&Query>) -> KinveyResult<usize> {
        let mut request = Request::delete(self.url(None));
        if let Some(query) = query {
            request = request.with_query(query.without_modifiers());
        }
        expect_count(self.send(request).await?)
    }

    pub async fn remove_by_id(&self, id: &str) -> KinveyResult<usize> {
        expect_count(self.send(Request::delete(self.url(Some(id)))).await?)
    }
}

pub(crate) fn expect_array(value: Value) -> KinveyResult<Vec<Value>> {
    match value {
        Value::Array(docs) => Ok(docs),
        other => Err(KinveyError::Kinvey {
            status: 200,
            name: "InvalidResponse".to_string(),
            message: format!("expected an array of entities, got {}", other),
            debug: None,
        }),
    }
}

pub(crate) fn expect_count(value: Value) -> KinveyResult<usize> {
    value
        .get("count")
        .and_then(Value::as_u64)
        .map(|c| c as usize)
        .ok_or_else(|| KinveyError::Kinvey {
            status: 200,
            name: "InvalidResponse".to_string(),
            message: format!("expected a count, got {}", value),
            debug: None,
        })
}
