//! The client context.
//!
//! A [`Client`] owns everything a store needs: configuration, the local
//! persistence adapter, the active session and the two racks. Stores receive
//! a clone of it at construction, so several independent clients can live in
//! one process.
//!
//! # Example
//!
//! ```rust,no_run
//! use kinvey::{Client, ClientConfig, DataStore, DataStoreType, StorageConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("kid_app", "app-secret");
//!     let client = Client::new(config, StorageConfig::open_default("books-app")?).await?;
//!
//!     let books = DataStore::collection(&client, "books", DataStoreType::Sync)?;
//!     books.save(json!({"title": "Dune"})).await?;
//!     let result = books.push().await?;
//!     println!("pushed {} change(s)", result.success.len());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tracing::info;

use crate::auth::AuthRefreshInterceptor;
use crate::config::{ClientConfig, StorageConfig};
use crate::error::KinveyResult;
use crate::persistence::{MemoryAdapter, PersistenceAdapter, RocksAdapter, SqliteAdapter};
use crate::rack::{cache_rack, network_rack, HttpTransport, Rack, ReqwestTransport};
use crate::request::{Request, Response};
use crate::session::Session;
use crate::sync::{SyncManager, SyncQueue};

#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    adapter: Arc<dyn PersistenceAdapter>,
    session: Arc<Session>,
    cache_rack: Arc<Rack>,
    interceptor: Arc<AuthRefreshInterceptor>,
    sync_manager: Arc<SyncManager>,
}

impl Client {
    /// Open local storage and connect over HTTP.
    pub async fn new(config: ClientConfig, storage: StorageConfig) -> KinveyResult<Self> {
        config.validate()?;
        let adapter: Arc<dyn PersistenceAdapter> = match &storage {
            StorageConfig::Sqlite { path } => Arc::new(SqliteAdapter::open(path)?),
            StorageConfig::RocksDb { path } => Arc::new(RocksAdapter::open(path)?),
            StorageConfig::Memory => Arc::new(MemoryAdapter::new()),
        };
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
        let client = Self::with_parts(config, adapter, transport).await?;
        info!(
            app_key = %client.config.app_key,
            engine = client.adapter.engine(),
            "Client initialized"
        );
        Ok(client)
    }

    /// Assemble a client from an existing adapter and transport.
    pub async fn with_parts(
        config: ClientConfig,
        adapter: Arc<dyn PersistenceAdapter>,
        transport: Arc<dyn HttpTransport>,
    ) -> KinveyResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let session = Arc::new(Session::load(adapter.clone()).await?);
        let network = Arc::new(network_rack(config.clone(), transport));
        let interceptor = Arc::new(AuthRefreshInterceptor::new(
            config.clone(),
            network,
            session.clone(),
        ));
        let queue = Arc::new(SyncQueue::new(adapter.clone()));
        let sync_manager = Arc::new(SyncManager::new(config.clone(), queue, interceptor.clone()));

        Ok(Self {
            config,
            cache_rack: Arc::new(cache_rack(adapter.clone())),
            adapter,
            session,
            interceptor,
            sync_manager,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.adapter
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn network_rack(&self) -> &Arc<Rack> {
        self.interceptor.rack()
    }

    pub fn cache_rack(&self) -> &Arc<Rack> {
        &self.cache_rack
    }

    pub fn interceptor(&self) -> &Arc<AuthRefreshInterceptor> {
        &self.interceptor
    }

    pub fn sync_manager(&self) -> &Arc<SyncManager> {
        &self.sync_manager
    }

    pub fn sync_queue(&self) -> &Arc<SyncQueue> {
        self.sync_manager.queue()
    }

    /// Authorize `request` and run it through the network rack, refreshing
    /// the session once if the backend rejects it.
    pub async fn execute_network(&self, request: Request) -> KinveyResult<Response> {
        self.interceptor.execute(request).await
    }

    /// Run `request` against local storage.
    pub async fn execute_local(&self, request: Request) -> KinveyResult<Response> {
        self.cache_rack.execute(request).await?.into_result()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("app_key", &self.config.app_key)
            .field("api_host", &self.config.api_host)
            .field("engine", &self.adapter.engine())
            .finish()
    }
}
