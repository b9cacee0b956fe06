//! Shared fixtures for integration tests.
//!
//! Provides:
//! - an in-process fake backend (axum) speaking the collection, login and
//!   token endpoints, evaluating filters with `kinvey_query`
//! - clients wired to it over real HTTP
//! - one of each persistence engine on temporary storage

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query as Params, Request, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use kinvey::persistence::{MemoryAdapter, PersistenceAdapter, RocksAdapter, SqliteAdapter};
use kinvey::rack::ReqwestTransport;
use kinvey::{Client, ClientConfig, Query};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const APP_KEY: &str = "kid_test";
pub const APP_SECRET: &str = "app-secret";

pub struct FakeBackend {
    pub store: MemoryAdapter,
    tokens: Mutex<HashSet<String>>,
    failures: Mutex<VecDeque<u16>>,
    log: Mutex<Vec<String>>,
    issued: AtomicUsize,
    refreshes: AtomicUsize,
    reject_refresh: Mutex<bool>,
}

impl FakeBackend {
    fn new() -> Self {
        Self {
            store: MemoryAdapter::new(),
            tokens: Mutex::new(HashSet::new()),
            failures: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            issued: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
            reject_refresh: Mutex::new(false),
        }
    }

    fn issue_token(&self) -> String {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let token = format!("session-{}", n);
        self.tokens.lock().insert(token.clone());
        token
    }

    /// Invalidate every session token handed out so far.
    pub fn expire_sessions(&self) {
        self.tokens.lock().clear();
    }

    /// Answer the next data request with `status`.
    pub fn fail_next(&self, status: u16) {
        self.failures.lock().push_back(status);
    }

    pub fn reject_refresh(&self) {
        *self.reject_refresh.lock() = true;
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Number of requests seen for `"<METHOD> <path>"`.
    pub fn hits(&self, route: &str) -> usize {
        self.log.lock().iter().filter(|r| r.as_str() == route).count()
    }

    pub async fn seed(&self, collection: &str, docs: Vec<Value>) {
        self.store.batch(collection, docs).await.unwrap();
    }
}

pub struct TestServer {
    pub base_url: String,
    pub backend: Arc<FakeBackend>,
    handle: JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub async fn spawn_backend() -> TestServer {
    let backend = Arc::new(FakeBackend::new());

    let app = Router::new()
        .route("/user/{app}/login", post(login))
        .route("/user/{app}/_logout", post(logout))
        .route("/user/{app}/_me", get(me))
        .route("/oauth/token", post(token))
        .route("/slow", get(slow))
        .route(
            "/appdata/{app}/{collection}",
            get(list).post(create).delete(delete_many),
        )
        .route(
            "/appdata/{app}/{collection}/{id}",
            get(get_one).put(replace).delete(delete_one),
        )
        .layer(middleware::from_fn_with_state(backend.clone(), record))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        backend,
        handle,
    }
}

pub fn config_for(server: &TestServer) -> ClientConfig {
    ClientConfig::new(APP_KEY, APP_SECRET)
        .with_api_host(&server.base_url)
        .with_auth_host(&server.base_url)
        .with_default_timeout(Duration::from_secs(5))
}

/// A client talking to `server` over HTTP.
pub async fn client_for(server: &TestServer, adapter: Arc<dyn PersistenceAdapter>) -> Client {
    Client::with_parts(
        config_for(server),
        adapter,
        Arc::new(ReqwestTransport::new().unwrap()),
    )
    .await
    .unwrap()
}

/// The three engines, each on its own temporary storage.
pub fn engines() -> Vec<(&'static str, Arc<dyn PersistenceAdapter>, Option<TempDir>)> {
    let sqlite_dir = TempDir::new().unwrap();
    let rocks_dir = TempDir::new().unwrap();
    vec![
        ("memory", Arc::new(MemoryAdapter::new()), None),
        (
            "sqlite",
            Arc::new(SqliteAdapter::open(sqlite_dir.path().join("kinvey.sqlite")).unwrap()),
            Some(sqlite_dir),
        ),
        (
            "rocksdb",
            Arc::new(RocksAdapter::open(rocks_dir.path().join("kinvey.rocksdb")).unwrap()),
            Some(rocks_dir),
        ),
    ]
}

type Shared = Arc<FakeBackend>;

fn error(status: StatusCode, name: &str, description: &str) -> Response {
    (status, Json(json!({"error": name, "description": description}))).into_response()
}

async fn record(State(backend): State<Shared>, request: Request, next: Next) -> Response {
    backend
        .log
        .lock()
        .push(format!("{} {}", request.method(), request.uri().path()));
    next.run(request).await
}

fn authorize(backend: &FakeBackend, headers: &HeaderMap) -> Result<(), Response> {
    if let Some(status) = backend.failures.lock().pop_front() {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Err(error(status, "ServerError", "injected failure"));
    }
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value.starts_with("Basic ") => Ok(()),
        Some(value) if value.starts_with("Kinvey ") => {
            if backend.tokens.lock().contains(&value["Kinvey ".len()..]) {
                Ok(())
            } else {
                Err(error(StatusCode::UNAUTHORIZED, "InvalidCredentials", "session expired"))
            }
        }
        _ => Err(error(
            StatusCode::UNAUTHORIZED,
            "InsufficientCredentials",
            "missing credentials",
        )),
    }
}

fn parse_query(params: &HashMap<String, String>) -> Result<Query, Response> {
    let bad = |e: String| error(StatusCode::BAD_REQUEST, "ParameterValueOutOfRange", &e);

    let mut query = match params.get("query") {
        Some(raw) => {
            let filter: Value = serde_json::from_str(raw).map_err(|e| bad(e.to_string()))?;
            Query::from_filter(filter).map_err(|e| bad(e.to_string()))?
        }
        None => Query::new(),
    };
    if let Some(raw) = params.get("sort") {
        let sort: Map<String, Value> = serde_json::from_str(raw).map_err(|e| bad(e.to_string()))?;
        for (field, direction) in sort {
            query = if direction.as_i64() == Some(-1) {
                query.descending(&field)
            } else {
                query.ascending(&field)
            };
        }
    }
    if let Some(limit) = params.get("limit").and_then(|l| l.parse().ok()) {
        query = query.limit(limit);
    }
    if let Some(skip) = params.get("skip").and_then(|s| s.parse().ok()) {
        query = query.skip(skip);
    }
    if let Some(fields) = params.get("fields") {
        query = query.fields(fields.split(','));
    }
    Ok(query)
}

async fn login(State(backend): State<Shared>, Json(body): Json<Value>) -> Response {
    let (id, username) = match body.pointer("/_socialIdentity/kinveyAuth/access_token") {
        Some(_) => ("mic-user".to_string(), None),
        None => {
            if body["password"] == "wrong" {
                return error(StatusCode::UNAUTHORIZED, "InvalidCredentials", "bad password");
            }
            let username = body["username"].as_str().unwrap_or_default().to_string();
            (format!("user-{}", username), Some(username))
        }
    };
    let token = backend.issue_token();
    Json(json!({"_id": id, "username": username, "_kmd": {"authtoken": token}})).into_response()
}

async fn logout() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn me(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&backend, &headers) {
        return response;
    }
    Json(json!({"_id": "mic-user", "email": "user@example.com"})).into_response()
}

async fn token(State(backend): State<Shared>, Form(form): Form<HashMap<String, String>>) -> Response {
    if *backend.reject_refresh.lock() || form.get("grant_type").map(String::as_str) != Some("refresh_token") {
        return error(StatusCode::BAD_REQUEST, "invalid_grant", "refresh rejected");
    }
    let n = backend.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("access-{}", n),
        "refresh_token": format!("refresh-{}", n),
        "token_type": "bearer",
        "expires_in": 3600
    }))
    .into_response()
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(30)).await;
    Json(json!({"slow": true}))
}

async fn list(
    State(backend): State<Shared>,
    Path((_app, collection)): Path<(String, String)>,
    Params(params): Params<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&backend, &headers) {
        return response;
    }
    let query = match parse_query(&params) {
        Ok(query) => query,
        Err(response) => return response,
    };
    match backend.store.find(&collection, Some(&query)).await {
        Ok(docs) => Json(Value::Array(docs)).into_response(),
        Err(e) => error(StatusCode::BAD_REQUEST, "BadRequest", &e.to_string()),
    }
}

async fn get_one(
    State(backend): State<Shared>,
    Path((_app, collection, id)): Path<(String, String, String)>,
    Params(params): Params<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&backend, &headers) {
        return response;
    }
    if id == "_count" {
        let query = match parse_query(&params) {
            Ok(query) => query,
            Err(response) => return response,
        };
        return match backend.store.count(&collection, Some(&query)).await {
            Ok(count) => Json(json!({ "count": count })).into_response(),
            Err(e) => error(StatusCode::BAD_REQUEST, "BadRequest", &e.to_string()),
        };
    }
    match backend.store.get(&collection, &id).await {
        Ok(doc) => Json(doc).into_response(),
        Err(_) => error(StatusCode::NOT_FOUND, "EntityNotFound", "no such entity"),
    }
}

async fn create(
    State(backend): State<Shared>,
    Path((_app, collection)): Path<(String, String)>,
    headers: HeaderMap,
    Json(mut doc): Json<Value>,
) -> Response {
    if let Err(response) = authorize(&backend, &headers) {
        return response;
    }
    if let Some(obj) = doc.as_object_mut() {
        if !obj.contains_key("_id") {
            obj.insert(
                "_id".to_string(),
                json!(uuid::Uuid::new_v4().simple().to_string()),
            );
        }
        obj.insert("_kmd".to_string(), json!({"lmt": "2026-01-01T00:00:00.000Z"}));
    }
    match backend.store.save(&collection, doc).await {
        Ok(saved) => (StatusCode::CREATED, Json(saved)).into_response(),
        Err(e) => error(StatusCode::BAD_REQUEST, "BadRequest", &e.to_string()),
    }
}

async fn replace(
    State(backend): State<Shared>,
    Path((_app, collection, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(mut doc): Json<Value>,
) -> Response {
    if let Err(response) = authorize(&backend, &headers) {
        return response;
    }
    if let Some(obj) = doc.as_object_mut() {
        obj.insert("_id".to_string(), json!(id));
        obj.insert("_kmd".to_string(), json!({"lmt": "2026-01-01T00:00:00.000Z"}));
    }
    match backend.store.save(&collection, doc).await {
        Ok(saved) => Json(saved).into_response(),
        Err(e) => error(StatusCode::BAD_REQUEST, "BadRequest", &e.to_string()),
    }
}

async fn delete_one(
    State(backend): State<Shared>,
    Path((_app, collection, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&backend, &headers) {
        return response;
    }
    match backend.store.destroy(&collection, &id).await {
        Ok(_) => Json(json!({"count": 1})).into_response(),
        Err(_) => error(StatusCode::NOT_FOUND, "EntityNotFound", "no such entity"),
    }
}

async fn delete_many(
    State(backend): State<Shared>,
    Path((_app, collection)): Path<(String, String)>,
    Params(params): Params<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = authorize(&backend, &headers) {
        return response;
    }
    let query = match parse_query(&params) {
        Ok(query) => query,
        Err(response) => return response,
    };
    match backend.store.clean(&collection, Some(&query)).await {
        Ok(count) => Json(json!({ "count": count })).into_response(),
        Err(e) => error(StatusCode::BAD_REQUEST, "BadRequest", &e.to_string()),
    }
}
