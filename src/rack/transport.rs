//! Low-level HTTP I/O behind the network rack.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{KinveyError, KinveyResult};
use crate::request::{Body, Headers, Method, Request, Response};

/// Sends a fully serialized request. Bodies arrive as [`Body::Raw`] or
/// [`Body::Empty`] and the URL already carries its query string.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &Request) -> KinveyResult<Response>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    no_redirect_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> KinveyResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(16)
            .build()?;
        let no_redirect_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            no_redirect_client,
        })
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &Request) -> KinveyResult<Response> {
        let client = if request.follow_redirect {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let mut builder = client
            .request(Self::method(request.method), &request.url)
            .timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        builder = match &request.body {
            Body::Empty => builder,
            Body::Raw { content_type, bytes } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type.as_str())
                .body(bytes.clone()),
            Body::Json(_) | Body::Form(_) => {
                return Err(KinveyError::Configuration(
                    "Request body was not serialized before transport".to_string(),
                ))
            }
        };

        debug!(method = %request.method, url = %request.url, "Sending HTTP request");
        let response = builder.send().await?;

        let status_code = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
            .collect();
        let bytes = response.bytes().await?;

        let data = if bytes.is_empty() {
            Body::Empty
        } else {
            Body::Raw {
                content_type: headers.get("content-type").unwrap_or_default().to_string(),
                bytes: bytes.to_vec(),
            }
        };

        Ok(Response {
            status_code,
            headers,
            data,
        })
    }
}
