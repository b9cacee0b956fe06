//! RocksDB-backed adapter: one column family per collection.
//!
//! Creating or dropping a column family needs exclusive access to the DB
//! handle. Those schema upgrades run one at a time through a FIFO upgrade
//! queue; document reads and writes only take the shared lock once the column
//! family exists.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use rocksdb::{IteratorMode, Options, WriteBatch, DB};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::PersistenceAdapter;
use crate::error::{KinveyError, KinveyResult};

const DEFAULT_CF: &str = "default";

pub struct RocksAdapter {
    path: PathBuf,
    db: RwLock<DB>,
    upgrades: Mutex<()>,
}

impl std::fmt::Debug for RocksAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksAdapter").field("path", &self.path).finish()
    }
}

impl RocksAdapter {
    pub fn open<P: AsRef<Path>>(path: P) -> KinveyResult<Self> {
        let path = path.as_ref().to_path_buf();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_keep_log_file_num(2);

        let cf_names = DB::list_cf(&opts, &path).unwrap_or_else(|_| vec![DEFAULT_CF.to_string()]);
        let db = DB::open_cf(&opts, &path, cf_names)
            .map_err(|e| KinveyError::Database(format!("Failed to open RocksDB: {}", e)))?;

        Ok(Self {
            path,
            db: RwLock::new(db),
            upgrades: Mutex::new(()),
        })
    }

    fn has_collection(&self, collection: &str) -> bool {
        let db = self.db.read();
        db.cf_handle(collection).is_some()
    }

    /// Create the column family for `collection` through the upgrade queue.
    async fn ensure_collection(&self, collection: &str) -> KinveyResult<()> {
        if self.has_collection(collection) {
            return Ok(());
        }

        let _upgrade = self.upgrades.lock().await;
        let mut db = self.db.write();
        if db.cf_handle(collection).is_none() {
            debug!(collection, "Creating column family");
            db.create_cf(collection, &Options::default())?;
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for RocksAdapter {
    fn engine(&self) -> &'static str {
        "rocksdb"
    }

    async fn load(&self, collection: &str) -> KinveyResult<Option<Vec<Value>>> {
        let db = self.db.read();
        let Some(cf) = db.cf_handle(collection) else {
            return Ok(None);
        };

        let mut docs = Vec::new();
        for item in db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            docs.push(serde_json::from_slice(&value)?);
        }
        Ok(Some(docs))
    }

    async fn read(&self, collection: &str, id: &str) -> KinveyResult<Option<Value>> {
        let db = self.db.read();
        let cf = db
            .cf_handle(collection)
            .ok_or_else(|| KinveyError::CollectionNotFound(collection.to_string()))?;

        match db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, collection: &str, docs: &[(String, Value)]) -> KinveyResult<()> {
        self.ensure_collection(collection).await?;

        let db = self.db.read();
        let cf = db
            .cf_handle(collection)
            .ok_or_else(|| KinveyError::CollectionNotFound(collection.to_string()))?;

        let mut batch = WriteBatch::default();
        for (id, doc) in docs {
            batch.put_cf(cf, id.as_bytes(), serde_json::to_vec(doc)?);
        }
        db.write(batch)?;
        Ok(())
    }

    async fn remove(&self, collection: &str, ids: &[String]) -> KinveyResult<usize> {
        let db = self.db.read();
        let cf = db
            .cf_handle(collection)
            .ok_or_else(|| KinveyError::CollectionNotFound(collection.to_string()))?;

        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for id in ids {
            if db.get_cf(cf, id.as_bytes())?.is_some() {
                batch.delete_cf(cf, id.as_bytes());
                removed += 1;
            }
        }
        db.write(batch)?;
        Ok(removed)
    }

    async fn collections(&self) -> KinveyResult<Vec<String>> {
        let mut names: Vec<String> = DB::list_cf(&Options::default(), &self.path)?
            .into_iter()
            .filter(|name| name != DEFAULT_CF)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn destruct(&self) -> KinveyResult<()> {
        let names = self.collections().await?;

        let _upgrade = self.upgrades.lock().await;
        let mut db = self.db.write();
        for name in &names {
            if db.cf_handle(name).is_some() {
                db.drop_cf(name)?;
            }
        }
        debug!(path = %self.path.display(), dropped = names.len(), "Dropped local database");
        Ok(())
    }
}
