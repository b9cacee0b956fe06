//! The cache rack: requests answered from the persistence adapter.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Exchange, Middleware, Rack};
use crate::error::{KinveyError, KinveyResult};
use crate::persistence::PersistenceAdapter;
use crate::request::{CollectionPath, Method, Response};

pub const COUNT_SEGMENT: &str = "_count";

pub fn cache_rack(adapter: Arc<dyn PersistenceAdapter>) -> Rack {
    Rack::new("Cache Rack").with(CacheMiddleware::new(adapter))
}

/// Maps a collection request onto the adapter.
///
/// | request                     | adapter call           |
/// |-----------------------------|------------------------|
/// | `GET    /ns/app/c`          | `find(c, query)`       |
/// | `GET    /ns/app/c/_count`   | `count(c, query)`      |
/// | `GET    /ns/app/c/id`       | `get(c, id)`           |
/// | `POST   /ns/app/c`          | `save` or `batch`      |
/// | `PUT    /ns/app/c/id`       | `update(c, doc)`       |
/// | `DELETE /ns/app/c`          | `clean(c, query)`      |
/// | `DELETE /ns/app/c/id`       | `destroy(c, id)`       |
pub struct CacheMiddleware {
    adapter: Arc<dyn PersistenceAdapter>,
}

impl CacheMiddleware {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl Middleware for CacheMiddleware {
    fn name(&self) -> &str {
        "Cache Middleware"
    }

    async fn handle(&self, mut exchange: Exchange) -> KinveyResult<Exchange> {
        let request = &exchange.request;
        let path = CollectionPath::parse(&request.url)?;
        let collection = path.collection.as_str();
        let query = request.query.as_ref();

        let (status, data) = match (request.method, path.id.as_deref()) {
            (Method::Get, None) => (200, Value::Array(self.adapter.find(collection, query).await?)),
            (Method::Get, Some(COUNT_SEGMENT)) => {
                let count = self.adapter.count(collection, query).await?;
                (200, json!({ "count": count }))
            }
            (Method::Get, Some(id)) => {
                let doc = self
                    .adapter
                    .get(collection, id)
                    .await
                    .map_err(|e| e.into_read_error(id))?;
                (200, doc)
            }
            (Method::Post, None) => match request.body.as_json() {
                Some(Value::Array(docs)) => {
                    let saved = self.adapter.batch(collection, docs.clone()).await?;
                    (201, Value::Array(saved))
                }
                Some(doc) => (201, self.adapter.save(collection, doc.clone()).await?),
                None => {
                    return Err(KinveyError::Configuration(
                        "A JSON body is required to save an entity".to_string(),
                    ))
                }
            },
            (Method::Put, Some(id)) | (Method::Patch, Some(id)) => {
                let mut doc = request.body.as_json().cloned().ok_or_else(|| {
                    KinveyError::Configuration("A JSON body is required to update an entity".to_string())
                })?;
                if let Some(obj) = doc.as_object_mut() {
                    obj.insert("_id".to_string(), Value::String(id.to_string()));
                }
                (200, self.adapter.update(collection, doc).await?)
            }
            (Method::Delete, None) => {
                let count = self.adapter.clean(collection, query).await?;
                (200, json!({ "count": count }))
            }
            (Method::Delete, Some(id)) => {
                self.adapter.destroy(collection, id).await?;
                (200, json!({ "count": 1 }))
            }
            (method, _) => {
                return Err(KinveyError::Configuration(format!(
                    "{} is not supported on {}",
                    method, request.url
                )))
            }
        };

        exchange.response = Some(Response::json(status, data));
        Ok(exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryAdapter;
    use crate::request::{Body, Request};
    use kinvey_query::Query;

    const BOOKS: &str = "/appdata/kid_app/books";

    fn rack() -> Rack {
        cache_rack(Arc::new(MemoryAdapter::new()))
    }

    async fn json_of(rack: &Rack, request: Request) -> Value {
        match rack.execute(request).await.unwrap().data {
            Body::Json(value) => value,
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_crud_through_cache_rack() {
        let rack = rack();

        let saved = json_of(&rack, Request::post(BOOKS).with_json(json!({"title": "Dune"}))).await;
        let id = saved["_id"].as_str().unwrap().to_string();

        let fetched = json_of(&rack, Request::get(format!("{}/{}", BOOKS, id))).await;
        assert_eq!(fetched, saved);

        let updated = json_of(
            &rack,
            Request::put(format!("{}/{}", BOOKS, id)).with_json(json!({"title": "Dune Messiah"})),
        )
        .await;
        assert_eq!(updated["_id"], json!(id));

        let count = json_of(&rack, Request::get(format!("{}/_count", BOOKS))).await;
        assert_eq!(count, json!({"count": 1}));

        let removed = json_of(&rack, Request::delete(format!("{}/{}", BOOKS, id))).await;
        assert_eq!(removed, json!({"count": 1}));
    }

    #[tokio::test]
    async fn test_missing_collection_reads_as_missing_entity() {
        let err = rack()
            .execute(Request::get(format!("{}/42", BOOKS)))
            .await
            .unwrap_err();
        assert!(matches!(err, KinveyError::EntityNotFound(ref id) if id == "42"));
    }

    #[tokio::test]
    async fn test_batch_and_clean_with_query() {
        let rack = rack();
        let docs = json!([
            {"_id": "1", "genre": "sf"},
            {"_id": "2", "genre": "sf"},
            {"_id": "3", "genre": "classic"}
        ]);
        json_of(&rack, Request::post(BOOKS).with_json(docs)).await;

        let query = Query::new().equal_to("genre", json!("sf")).limit(1);
        let found = json_of(&rack, Request::get(BOOKS).with_query(query.clone())).await;
        assert_eq!(found.as_array().unwrap().len(), 1);

        let cleaned = json_of(&rack, Request::delete(BOOKS).with_query(query)).await;
        assert_eq!(cleaned, json!({"count": 2}));
    }
}
