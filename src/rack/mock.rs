//! In-memory [`HttpTransport`] answering from scripted routes.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::transport::HttpTransport;
use crate::error::{KinveyError, KinveyResult};
use crate::request::{Method, Request, Response};

type MockHandler = Arc<dyn Fn(&Request) -> Response + Send + Sync>;

struct MockRoute {
    method: Method,
    path: String,
    handlers: VecDeque<MockHandler>,
}

/// Scripted transport for unit tests and downstream test suites.
///
/// Available in this crate's own tests and, for dependents, behind the
/// `test-util` feature.
///
/// Responses are registered per method and URL path. Each route answers with
/// its queued handlers in order and keeps repeating the last one.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<Vec<MockRoute>>,
    requests: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: Method, path: &str, response: Response) {
        self.respond_with(method, path, move |_| response.clone());
    }

    pub fn respond_with<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&Request) -> Response + Send + Sync + 'static,
    {
        let handler: MockHandler = Arc::new(handler);
        let mut routes = self.routes.lock();
        match routes.iter_mut().find(|r| r.method == method && r.path == path) {
            Some(route) => route.handlers.push_back(handler),
            None => routes.push(MockRoute {
                method,
                path: path.to_string(),
                handlers: VecDeque::from([handler]),
            }),
        }
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self, method: Method, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method == method && url_path(&r.url) == path)
            .count()
    }
}

fn url_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split('?').next().unwrap_or_default().to_string())
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: &Request) -> KinveyResult<Response> {
        self.requests.lock().push(request.clone());

        let path = url_path(&request.url);
        let handler = {
            let mut routes = self.routes.lock();
            let route = routes
                .iter_mut()
                .find(|r| r.method == request.method && r.path == path)
                .ok_or_else(|| {
                    KinveyError::Network(format!("No mock route for {} {}", request.method, path))
                })?;
            if route.handlers.len() > 1 {
                route.handlers.pop_front()
            } else {
                route.handlers.front().cloned()
            }
        };

        match handler {
            Some(handler) => Ok(handler(request)),
            None => Err(KinveyError::Network(format!(
                "No mock response left for {} {}",
                request.method, path
            ))),
        }
    }
}
