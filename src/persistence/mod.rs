//! Persistence adapters.
//!
//! Every embedded engine implements a handful of storage primitives
//! (`load`, `read`, `write`, `remove`, `destruct`). The uniform CRUD and query
//! contract is built once on top of them as provided trait methods, so the
//! local query evaluator and the validation rules behave identically on every
//! engine.

pub mod memory;
pub mod rocks;
pub mod sqlite;

use std::sync::OnceLock;

use async_trait::async_trait;
use kinvey_query::{Aggregation, Query};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{KinveyError, KinveyResult};

pub use memory::MemoryAdapter;
pub use rocks::RocksAdapter;
pub use sqlite::SqliteAdapter;

/// Prefix of client-generated ids not yet confirmed by the backend.
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Generate a fresh temporary id.
pub fn generate_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4().simple())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Reject collection names outside `[A-Za-z0-9-]{1,128}`.
pub fn validate_collection(collection: &str) -> KinveyResult<()> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let valid = PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9-]{1,128}$").ok())
        .as_ref()
        .map(|re| re.is_match(collection))
        .unwrap_or(false);

    if valid {
        Ok(())
    } else {
        Err(KinveyError::InvalidIdentifier(format!(
            "The collection name '{}' must match [A-Za-z0-9-]{{1,128}}",
            collection
        )))
    }
}

/// The `_id` of a stored document.
pub fn document_id(doc: &Value) -> Option<&str> {
    doc.get("_id").and_then(Value::as_str)
}

/// Give `doc` a temporary id when it has none.
fn ensure_id(mut doc: Value) -> KinveyResult<(String, Value)> {
    let Some(obj) = doc.as_object_mut() else {
        return Err(KinveyError::Database(
            "Only JSON objects can be stored".to_string(),
        ));
    };

    let id = match obj.get("_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => generate_temp_id(),
    };
    obj.insert("_id".to_string(), Value::String(id.clone()));
    Ok((id, doc))
}

/// Uniform CRUD and query contract over an embedded storage engine.
///
/// Implementors provide the storage primitives. Callers use the provided
/// methods, which validate collection names before any storage access.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Engine name, for logging.
    fn engine(&self) -> &'static str;

    /// Every document of `collection`, or `None` when it does not exist.
    async fn load(&self, collection: &str) -> KinveyResult<Option<Vec<Value>>>;

    /// One document. Fails with `CollectionNotFound` when the collection is absent.
    async fn read(&self, collection: &str, id: &str) -> KinveyResult<Option<Value>>;

    /// Upsert documents that already carry an `_id`, creating the collection
    /// when needed.
    async fn write(&self, collection: &str, docs: &[(String, Value)]) -> KinveyResult<()>;

    /// Delete documents by id and return how many existed. Fails with
    /// `CollectionNotFound` when the collection is absent.
    async fn remove(&self, collection: &str, ids: &[String]) -> KinveyResult<usize>;

    /// Names of the existing collections.
    async fn collections(&self) -> KinveyResult<Vec<String>>;

    /// Drop the whole local database.
    async fn destruct(&self) -> KinveyResult<()>;

    // ==================== Contract ====================

    async fn get(&self, collection: &str, id: &str) -> KinveyResult<Value> {
        validate_collection(collection)?;
        debug!(engine = self.engine(), collection, id, "get");
        self.read(collection, id)
            .await?
            .ok_or_else(|| KinveyError::EntityNotFound(id.to_string()))
    }

    async fn find(&self, collection: &str, query: Option<&Query>) -> KinveyResult<Vec<Value>> {
        validate_collection(collection)?;
        let docs = self.load(collection).await?.unwrap_or_default();
        debug!(engine = self.engine(), collection, loaded = docs.len(), "find");
        match query {
            Some(query) => Ok(query.process(docs)?),
            None => Ok(docs),
        }
    }

    async fn count(&self, collection: &str, query: Option<&Query>) -> KinveyResult<usize> {
        validate_collection(collection)?;
        let docs = self.load(collection).await?.unwrap_or_default();
        match query {
            Some(query) => Ok(query.without_modifiers().filter_docs(docs)?.len()),
            None => Ok(docs.len()),
        }
    }

    async fn save(&self, collection: &str, doc: Value) -> KinveyResult<Value> {
        validate_collection(collection)?;
        let (id, doc) = ensure_id(doc)?;
        debug!(engine = self.engine(), collection, id = %id, "save");
        self.write(collection, &[(id, doc.clone())]).await?;
        Ok(doc)
    }

    async fn batch(&self, collection: &str, docs: Vec<Value>) -> KinveyResult<Vec<Value>> {
        validate_collection(collection)?;
        let entries = docs
            .into_iter()
            .map(ensure_id)
            .collect::<KinveyResult<Vec<_>>>()?;
        debug!(engine = self.engine(), collection, count = entries.len(), "batch");
        self.write(collection, &entries).await?;
        Ok(entries.into_iter().map(|(_, doc)| doc).collect())
    }

    async fn update(&self, collection: &str, doc: Value) -> KinveyResult<Value> {
        self.save(collection, doc).await
    }

    /// Delete one document and return it.
    async fn destroy(&self, collection: &str, id: &str) -> KinveyResult<Value> {
        validate_collection(collection)?;
        let doc = self
            .read(collection, id)
            .await?
            .ok_or_else(|| KinveyError::EntityNotFound(id.to_string()))?;
        self.remove(collection, &[id.to_string()]).await?;
        debug!(engine = self.engine(), collection, id, "destroy");
        Ok(doc)
    }

    /// Delete every document matching the filter of `query`. Sort, skip and
    /// limit are ignored. Returns the number of removed documents.
    async fn clean(&self, collection: &str, query: Option<&Query>) -> KinveyResult<usize> {
        validate_collection(collection)?;
        let Some(docs) = self.load(collection).await? else {
            return Ok(0);
        };
        let matched = match query {
            Some(query) => query.without_modifiers().filter_docs(docs)?,
            None => docs,
        };
        let ids: Vec<String> = matched
            .iter()
            .filter_map(|doc| document_id(doc).map(str::to_string))
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let removed = self.remove(collection, &ids).await?;
        debug!(engine = self.engine(), collection, removed, "clean");
        Ok(removed)
    }

    async fn group(&self, collection: &str, aggregation: &Aggregation) -> KinveyResult<Vec<Value>> {
        validate_collection(collection)?;
        let docs = self.load(collection).await?.unwrap_or_default();
        Ok(aggregation.group(docs)?)
    }
}
