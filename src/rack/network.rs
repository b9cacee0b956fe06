//! The network rack: serialize, send, parse.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Exchange, HttpTransport, Middleware, Rack};
use crate::config::ClientConfig;
use crate::error::{KinveyError, KinveyResult};
use crate::request::Body;

pub const API_VERSION_HEADER: &str = "X-Kinvey-Api-Version";
pub const DEVICE_INFO_HEADER: &str = "X-Kinvey-Device-Information";
pub const CUSTOM_PROPERTIES_HEADER: &str = "X-Kinvey-Custom-Request-Properties";

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Build the default network rack.
pub fn network_rack(config: Arc<ClientConfig>, transport: Arc<dyn HttpTransport>) -> Rack {
    Rack::new("Network Rack")
        .with(SerializeMiddleware::new(config))
        .with(HttpMiddleware::new(transport))
        .with(ParseMiddleware)
}

/// Adds the protocol headers, encodes the body and expands the query string.
pub struct SerializeMiddleware {
    config: Arc<ClientConfig>,
}

impl SerializeMiddleware {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Middleware for SerializeMiddleware {
    fn name(&self) -> &str {
        "Serialize Middleware"
    }

    async fn handle(&self, mut exchange: Exchange) -> KinveyResult<Exchange> {
        let request = &mut exchange.request;

        if !request.headers.contains("accept") {
            request.headers.set("Accept", "application/json; charset=utf-8");
        }
        request
            .headers
            .set(API_VERSION_HEADER, self.config.api_version.to_string());
        if let Some(info) = &self.config.device_info {
            request.headers.set(DEVICE_INFO_HEADER, info.clone());
        }
        if let Some(properties) =
            request.properties_header(self.config.custom_request_properties_max_bytes)?
        {
            request.headers.set(CUSTOM_PROPERTIES_HEADER, properties);
        }

        request.url = request.full_url()?;
        request.query = None;

        request.body = match std::mem::take(&mut request.body) {
            Body::Json(value) => Body::Raw {
                content_type: JSON_CONTENT_TYPE.to_string(),
                bytes: serde_json::to_vec(&value)?,
            },
            Body::Form(pairs) => Body::Raw {
                content_type: FORM_CONTENT_TYPE.to_string(),
                bytes: serde_urlencoded::to_string(&pairs)
                    .map_err(|e| KinveyError::Configuration(format!("Invalid form body: {}", e)))?
                    .into_bytes(),
            },
            other => other,
        };

        Ok(exchange)
    }
}

/// Terminal middleware performing the HTTP call. The call is abandoned as
/// soon as the execution's [`CancelSignal`](super::CancelSignal) is raised.
pub struct HttpMiddleware {
    transport: Arc<dyn HttpTransport>,
}

impl HttpMiddleware {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Middleware for HttpMiddleware {
    fn name(&self) -> &str {
        "Http Middleware"
    }

    async fn handle(&self, mut exchange: Exchange) -> KinveyResult<Exchange> {
        let signal = exchange.signal.clone();
        let response = tokio::select! {
            biased;
            _ = signal.raised() => {
                debug!(url = %exchange.request.url, "HTTP request aborted");
                return Err(KinveyError::Cancelled);
            }
            result = self.transport.send(&exchange.request) => result?,
        };

        debug!(
            method = %exchange.request.method,
            url = %exchange.request.url,
            status = response.status_code,
            "HTTP response received"
        );
        exchange.response = Some(response);
        Ok(exchange)
    }
}

/// Decodes JSON response bodies.
pub struct ParseMiddleware;

#[async_trait]
impl Middleware for ParseMiddleware {
    fn name(&self) -> &str {
        "Parse Middleware"
    }

    async fn handle(&self, mut exchange: Exchange) -> KinveyResult<Exchange> {
        if let Some(response) = exchange.response.as_mut() {
            if let Body::Raw { content_type, bytes } = &response.data {
                let looks_json = content_type.is_empty() || content_type.contains("json");
                if looks_json {
                    if let Ok(value) = serde_json::from_slice(bytes) {
                        response.data = Body::Json(value);
                    }
                }
            }
        }
        Ok(exchange)
    }
}
