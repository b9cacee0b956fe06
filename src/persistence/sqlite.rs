//! SQLite-backed adapter: one table per collection.
//!
//! The single connection sits behind a FIFO async mutex, which is the one
//! write slot of the engine. Table creation happens inside that slot, so
//! concurrent structural changes queue behind each other.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::PersistenceAdapter;
use crate::error::{KinveyError, KinveyResult};

pub struct SqliteAdapter {
    conn: Mutex<Connection>,
}

impl SqliteAdapter {
    /// Open or create a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> KinveyResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KinveyError::Database(format!("Cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> KinveyResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn table(collection: &str) -> String {
        format!("\"{}\"", collection.replace('"', "\"\""))
    }

    fn table_exists(conn: &Connection, collection: &str) -> KinveyResult<bool> {
        let found: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn decode(raw: &str) -> KinveyResult<Value> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[async_trait]
impl PersistenceAdapter for SqliteAdapter {
    fn engine(&self) -> &'static str {
        "sqlite"
    }

    async fn load(&self, collection: &str) -> KinveyResult<Option<Vec<Value>>> {
        let conn = self.conn.lock().await;
        if !Self::table_exists(&conn, collection)? {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT value FROM {} ORDER BY rowid",
            Self::table(collection)
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut docs = Vec::new();
        for raw in rows {
            docs.push(Self::decode(&raw?)?);
        }
        Ok(Some(docs))
    }

    async fn read(&self, collection: &str, id: &str) -> KinveyResult<Option<Value>> {
        let conn = self.conn.lock().await;
        if !Self::table_exists(&conn, collection)? {
            return Err(KinveyError::CollectionNotFound(collection.to_string()));
        }

        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", Self::table(collection)),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|r| Self::decode(&r)).transpose()
    }

    async fn write(&self, collection: &str, docs: &[(String, Value)]) -> KinveyResult<()> {
        let mut conn = self.conn.lock().await;
        let table = Self::table(collection);

        let tx = conn.transaction()?;
        if !Self::table_exists(&tx, collection)? {
            debug!(collection, "Creating table");
            tx.execute(
                &format!(
                    "CREATE TABLE {} (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL, modified_at INTEGER NOT NULL)",
                    table
                ),
                [],
            )?;
        }

        let now = chrono::Utc::now().timestamp_millis();
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (key, value, modified_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, modified_at = excluded.modified_at",
                table
            ))?;
            for (id, doc) in docs {
                stmt.execute(params![id, serde_json::to_string(doc)?, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn remove(&self, collection: &str, ids: &[String]) -> KinveyResult<usize> {
        let mut conn = self.conn.lock().await;
        if !Self::table_exists(&conn, collection)? {
            return Err(KinveyError::CollectionNotFound(collection.to_string()));
        }

        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "DELETE FROM {} WHERE key = ?1",
                Self::table(collection)
            ))?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    async fn collections(&self) -> KinveyResult<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    async fn destruct(&self) -> KinveyResult<()> {
        let names = self.collections().await?;
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for name in &names {
            tx.execute(&format!("DROP TABLE IF EXISTS {}", Self::table(name)), [])?;
        }
        tx.commit()?;
        debug!(tables = names.len(), "Dropped local database");
        Ok(())
    }
}
