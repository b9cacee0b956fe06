//! Offline-first client SDK for the Kinvey data backend.
//!
//! Requests flow through a [`Rack`] of middlewares: the network rack talks
//! HTTP, the cache rack answers from a local [`PersistenceAdapter`]. Stores
//! built on a [`Client`] write locally first and keep a sync queue that is
//! replayed against the backend on push.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod persistence;
pub mod rack;
pub mod request;
pub mod session;
pub mod store;
pub mod sync;
pub mod user;

pub use auth::{AuthRefreshInterceptor, AuthState};
pub use client::Client;
pub use config::{ClientConfig, StorageConfig};
pub use error::{KinveyError, KinveyResult};
pub use persistence::{MemoryAdapter, PersistenceAdapter, RocksAdapter, SqliteAdapter};
pub use rack::{CancelSignal, Exchange, HttpTransport, Middleware, Rack};
pub use request::{AuthType, Body, Method, Request, Response};
pub use session::{ActiveUser, IdentitySession};
pub use store::{CacheStore, DataStore, DataStoreType, NetworkStore, ReadPolicy, SyncStore};
pub use sync::{PushResult, SyncMethod, SyncOperation, SyncResult};
pub use user::UserService;

pub use kinvey_query::{Aggregation, Query, QueryError, Reduce};
