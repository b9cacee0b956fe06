//! Middleware pipeline.
//!
//! A [`Rack`] threads an [`Exchange`] through an ordered list of named
//! middlewares. A rack is itself a [`Middleware`], so racks nest.
//!
//! Cancellation is cooperative. [`Rack::cancel`] bumps the rack epoch, raises
//! the [`CancelSignal`] of every execution in flight and forwards the call to
//! the middlewares they are running.
//! Each execution remembers the epoch it started in and fails with
//! [`KinveyError::Cancelled`] as soon as it sees a newer one, before or after a
//! middleware step. Executions started after the cancel are unaffected.

pub mod cache;
pub mod network;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{KinveyError, KinveyResult};
use crate::request::{Request, Response};

pub use cache::{cache_rack, CacheMiddleware};
pub use network::{network_rack, HttpMiddleware, ParseMiddleware, SerializeMiddleware};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockTransport;
pub use transport::{HttpTransport, ReqwestTransport};

/// Cancellation flag of one execution. Once raised it stays raised, so a
/// waiter that starts late still sees it.
#[derive(Debug, Default)]
pub struct CancelSignal {
    raised: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Resolves once the signal is raised.
    pub async fn raised(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent raise is not lost.
        notified.as_mut().enable();
        if self.is_raised() {
            return;
        }
        notified.await;
    }
}

/// The value passed from one middleware to the next.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub request: Request,
    pub response: Option<Response>,
    pub signal: Arc<CancelSignal>,
}

impl Exchange {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
            signal: Arc::new(CancelSignal::default()),
        }
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, exchange: Exchange) -> KinveyResult<Exchange>;

    /// Abort in-flight work. Middlewares without a cancel hook run to
    /// completion and their result is discarded by the rack.
    fn cancel(&self) {}
}

pub struct Rack {
    name: String,
    middlewares: Vec<Arc<dyn Middleware>>,
    epoch: AtomicU64,
    next_execution: AtomicU64,
    active: Mutex<HashMap<u64, (Arc<dyn Middleware>, Arc<CancelSignal>)>>,
}

/// Clears the active-middleware slot of one execution, however it ends.
struct ActiveSlot<'a> {
    rack: &'a Rack,
    execution: u64,
}

impl ActiveSlot<'_> {
    fn set(&self, middleware: Arc<dyn Middleware>, signal: Arc<CancelSignal>) {
        self.rack
            .active
            .lock()
            .insert(self.execution, (middleware, signal));
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.rack.active.lock().remove(&self.execution);
    }
}

impl Rack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            middlewares: Vec::new(),
            epoch: AtomicU64::new(0),
            next_execution: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Builder form of [`use_middleware`](Self::use_middleware).
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.use_middleware(Arc::new(middleware));
        self
    }

    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn use_middleware_before(
        &mut self,
        name: &str,
        middleware: Arc<dyn Middleware>,
    ) -> KinveyResult<()> {
        let index = self.position(name)?;
        self.middlewares.insert(index, middleware);
        Ok(())
    }

    pub fn use_middleware_after(
        &mut self,
        name: &str,
        middleware: Arc<dyn Middleware>,
    ) -> KinveyResult<()> {
        let index = self.position(name)?;
        self.middlewares.insert(index + 1, middleware);
        Ok(())
    }

    /// Remove every middleware called `name`. Returns whether any was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.middlewares.len();
        self.middlewares.retain(|m| m.name() != name);
        self.middlewares.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.middlewares.iter().map(|m| m.name().to_string()).collect()
    }

    /// Number of executions currently inside a middleware.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    fn position(&self, name: &str) -> KinveyResult<usize> {
        self.middlewares
            .iter()
            .position(|m| m.name() == name)
            .ok_or_else(|| {
                KinveyError::Configuration(format!(
                    "Middleware '{}' is not part of rack '{}'",
                    name, self.name
                ))
            })
    }

    /// Run `request` through every middleware and return the final response.
    pub async fn execute(&self, request: Request) -> KinveyResult<Response> {
        if request.url.is_empty() {
            return Err(KinveyError::Configuration(format!(
                "Rack '{}' was executed without a request",
                self.name
            )));
        }

        let url = request.url.clone();
        let exchange = self.run(Exchange::new(request)).await?;
        exchange
            .response
            .ok_or_else(|| KinveyError::NoResponse(url))
    }

    /// Cancel every execution in flight and forward the signal to the
    /// middlewares they are currently running.
    pub fn cancel(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let running: Vec<(Arc<dyn Middleware>, Arc<CancelSignal>)> =
            self.active.lock().values().cloned().collect();
        debug!(rack = %self.name, running = running.len(), "Cancelling rack");
        for (middleware, signal) in running {
            signal.raise();
            middleware.cancel();
        }
    }

    async fn run(&self, mut exchange: Exchange) -> KinveyResult<Exchange> {
        let started = self.epoch.load(Ordering::SeqCst);
        let slot = ActiveSlot {
            rack: self,
            execution: self.next_execution.fetch_add(1, Ordering::SeqCst),
        };

        for middleware in &self.middlewares {
            if self.epoch.load(Ordering::SeqCst) != started {
                return Err(KinveyError::Cancelled);
            }

            debug!(
                rack = %self.name,
                middleware = middleware.name(),
                method = %exchange.request.method,
                "Running middleware"
            );
            slot.set(middleware.clone(), exchange.signal.clone());
            exchange = middleware.handle(exchange).await?;

            if self.epoch.load(Ordering::SeqCst) != started {
                return Err(KinveyError::Cancelled);
            }
        }

        Ok(exchange)
    }
}

#[async_trait]
impl Middleware for Rack {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, exchange: Exchange) -> KinveyResult<Exchange> {
        self.run(exchange).await
    }

    fn cancel(&self) {
        Rack::cancel(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Body;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        fn name(&self) -> &str {
            self.0
        }

        async fn handle(&self, mut exchange: Exchange) -> KinveyResult<Exchange> {
            let trail = exchange.request.headers.get("x-trail").unwrap_or("").to_string();
            exchange.request.headers.set("x-trail", format!("{}{}", trail, self.0));
            Ok(exchange)
        }
    }

    struct Respond;

    #[async_trait]
    impl Middleware for Respond {
        fn name(&self) -> &str {
            "respond"
        }

        async fn handle(&self, mut exchange: Exchange) -> KinveyResult<Exchange> {
            let trail = exchange.request.headers.get("x-trail").unwrap_or("").to_string();
            exchange.response = Some(crate::request::Response::json(200, json!({"trail": trail})));
            Ok(exchange)
        }
    }

    /// Blocks until cancelled.
    #[derive(Default)]
    struct Hang {
        cancelled: Notify,
        cancel_calls: AtomicUsize,
    }

    #[async_trait]
    impl Middleware for Hang {
        fn name(&self) -> &str {
            "hang"
        }

        async fn handle(&self, exchange: Exchange) -> KinveyResult<Exchange> {
            if exchange.request.headers.contains("x-skip-hang") {
                return Ok(exchange);
            }
            self.cancelled.notified().await;
            Err(KinveyError::Cancelled)
        }

        fn cancel(&self) {
            self.cancel_calls.fetch_add(1, Ordering::SeqCst);
            self.cancelled.notify_waiters();
        }
    }

    /// Starts watching the execution signal only after a delay.
    struct LateWatcher;

    #[async_trait]
    impl Middleware for LateWatcher {
        fn name(&self) -> &str {
            "late"
        }

        async fn handle(&self, exchange: Exchange) -> KinveyResult<Exchange> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            exchange.signal.raised().await;
            Err(KinveyError::Cancelled)
        }
    }

    /// No cancel hook; finishes after a short sleep.
    struct Slow;

    #[async_trait]
    impl Middleware for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn handle(&self, exchange: Exchange) -> KinveyResult<Exchange> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(exchange)
        }
    }

    fn request() -> Request {
        Request::get("http://localhost/appdata/kid/books")
    }

    async fn wait_until_active(rack: &Rack) {
        for _ in 0..200 {
            if rack.active_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("rack never became active");
    }

    #[tokio::test]
    async fn test_middlewares_run_in_order() {
        let rack = Rack::new("test").with(Tag("a")).with(Tag("b")).with(Respond);
        let response = rack.execute(request()).await.unwrap();
        assert_eq!(response.data, Body::Json(json!({"trail": "ab"})));
        assert_eq!(rack.active_count(), 0);
    }

    #[tokio::test]
    async fn test_composition_by_name() {
        let mut rack = Rack::new("test").with(Tag("a")).with(Respond);
        rack.use_middleware_before("a", Arc::new(Tag("first"))).unwrap();
        rack.use_middleware_after("a", Arc::new(Tag("b"))).unwrap();
        assert_eq!(rack.names(), vec!["first", "a", "b", "respond"]);

        assert!(rack.remove("first"));
        assert!(!rack.remove("missing"));
        assert!(rack.use_middleware_before("missing", Arc::new(Tag("x"))).is_err());

        let response = rack.execute(request()).await.unwrap();
        assert_eq!(response.data, Body::Json(json!({"trail": "ab"})));
    }

    #[tokio::test]
    async fn test_nested_rack() {
        let inner = Rack::new("inner").with(Tag("b")).with(Tag("c"));
        let rack = Rack::new("outer").with(Tag("a")).with(inner).with(Respond);
        let response = rack.execute(request()).await.unwrap();
        assert_eq!(response.data, Body::Json(json!({"trail": "abc"})));
    }

    #[tokio::test]
    async fn test_empty_request_is_configuration_error() {
        let rack = Rack::new("test").with(Respond);
        let err = rack.execute(Request::default()).await.unwrap_err();
        assert!(matches!(err, KinveyError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_missing_response() {
        let rack = Rack::new("test").with(Tag("a"));
        let err = rack.execute(request()).await.unwrap_err();
        assert!(matches!(err, KinveyError::NoResponse(_)));
        assert_eq!(rack.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_is_seen_by_late_watchers() {
        let rack = Arc::new(Rack::new("test").with(LateWatcher).with(Respond));
        let task = {
            let rack = rack.clone();
            tokio::spawn(async move { rack.execute(request()).await })
        };
        wait_until_active(&rack).await;
        rack.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(KinveyError::Cancelled)));
    }

    #[tokio::test]
    async fn test_signal_stays_raised() {
        let signal = CancelSignal::default();
        assert!(!signal.is_raised());
        signal.raise();
        assert!(signal.is_raised());
        tokio::time::timeout(Duration::from_secs(1), signal.raised())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_forwards_to_active_middleware() {
        let hang = Arc::new(Hang::default());
        let mut rack = Rack::new("test");
        rack.use_middleware(hang.clone());
        rack.use_middleware(Arc::new(Respond));
        let rack = Arc::new(rack);

        let task = {
            let rack = rack.clone();
            tokio::spawn(async move { rack.execute(request()).await })
        };
        wait_until_active(&rack).await;
        rack.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(KinveyError::Cancelled)));
        assert_eq!(hang.cancel_calls.load(Ordering::SeqCst), 1);
        assert_eq!(rack.active_count(), 0);

        // The rack is reusable right away.
        let response = rack
            .execute(request().with_header("x-skip-hang", "1"))
            .await
            .unwrap();
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_cancel_discards_uncancellable_result() {
        let rack = Arc::new(Rack::new("test").with(Slow).with(Respond));

        let task = {
            let rack = rack.clone();
            tokio::spawn(async move { rack.execute(request()).await })
        };
        wait_until_active(&rack).await;
        rack.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(KinveyError::Cancelled)));
        assert!(rack.execute(request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_only_touches_running_executions() {
        let rack = Rack::new("test").with(Respond);
        rack.cancel();
        assert!(rack.execute(request()).await.is_ok());
    }
}
