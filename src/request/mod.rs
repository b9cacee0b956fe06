//! Request and response values.
//!
//! A [`Request`] is owned by the call site until it is moved into
//! [`Rack::execute`](crate::rack::Rack::execute), which freezes it for that
//! execution. Capabilities such as authorization, query-string expansion and
//! custom properties are attached as plain fields and interpreted by the
//! middleware that needs them.

mod headers;
mod response;

pub use headers::Headers;
pub use response::Response;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use kinvey_query::Query;
use serde_json::Value;

use crate::config::DEFAULT_TIMEOUT;
use crate::error::{KinveyError, KinveyResult};

/// HTTP verbs accepted by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = KinveyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PATCH" => Ok(Method::Patch),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(KinveyError::Configuration(format!(
                "Invalid request method: {}. Allowed methods are GET, POST, PATCH, PUT and DELETE",
                other
            ))),
        }
    }
}

/// Credential policy for the `Authorization` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthType {
    #[default]
    None,
    /// Basic app key + app secret.
    App,
    /// Basic app key + master secret.
    Master,
    /// `Kinvey <authtoken>` of the active user.
    Session,
    /// Session when a user is active, app credentials otherwise.
    All,
}

/// Request payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Raw { content_type: String, bytes: Vec<u8> },
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The JSON payload, or `null` for anything else.
    pub fn into_json(self) -> Value {
        match self {
            Body::Json(value) => value,
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Body,
    pub timeout: Duration,
    pub query: Option<Query>,
    pub follow_redirect: bool,
    pub auth: AuthType,
    /// Custom request properties forwarded to backend business logic.
    pub properties: Option<Value>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Get,
            url: String::new(),
            headers: Headers::new(),
            body: Body::Empty,
            timeout: DEFAULT_TIMEOUT,
            query: None,
            follow_redirect: true,
            auth: AuthType::None,
            properties: None,
        }
    }
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Set the method from a verb name, rejecting anything outside the allowed set.
    pub fn set_method(&mut self, method: &str) -> KinveyResult<()> {
        self.method = method.parse()?;
        Ok(())
    }

    /// Set the timeout in milliseconds. The value must be finite and non-negative.
    pub fn set_timeout_ms(&mut self, millis: f64) -> KinveyResult<()> {
        if !millis.is_finite() || millis < 0.0 {
            return Err(KinveyError::Configuration(format!(
                "Invalid timeout: {}. It must be a finite, non-negative number",
                millis
            )));
        }
        self.timeout = Duration::from_millis(millis.round() as u64);
        Ok(())
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Body::Json(body);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    pub fn with_auth(mut self, auth: AuthType) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn with_follow_redirect(mut self, follow: bool) -> Self {
        self.follow_redirect = follow;
        self
    }

    /// The URL with the query expanded into `query`/`sort`/`limit`/`skip`/`fields`.
    pub fn full_url(&self) -> KinveyResult<String> {
        let Some(query) = &self.query else {
            return Ok(self.url.clone());
        };
        let params = query.to_params();
        if params.is_empty() {
            return Ok(self.url.clone());
        }

        let mut url = url::Url::parse(&self.url)
            .map_err(|e| KinveyError::Configuration(format!("Invalid url {}: {}", self.url, e)))?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url.into())
    }

    /// Serialized custom properties, checked against `max_bytes`.
    pub fn properties_header(&self, max_bytes: usize) -> KinveyResult<Option<String>> {
        let Some(properties) = &self.properties else {
            return Ok(None);
        };
        let encoded = properties.to_string();
        if encoded.len() > max_bytes {
            return Err(KinveyError::CustomPropertiesTooLarge {
                size: encoded.len(),
                max: max_bytes,
            });
        }
        Ok(Some(encoded))
    }
}

/// `/<namespace>/<appKey>/<collection>[/<id>]`, parsed from a request URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPath {
    pub namespace: String,
    pub app_key: String,
    pub collection: String,
    pub id: Option<String>,
}

impl CollectionPath {
    pub fn parse(url: &str) -> KinveyResult<Self> {
        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [namespace, app_key, collection, rest @ ..] if rest.len() <= 1 => Ok(Self {
                namespace: namespace.to_string(),
                app_key: app_key.to_string(),
                collection: collection.to_string(),
                id: rest.first().map(|s| s.to_string()),
            }),
            _ => Err(KinveyError::Configuration(format!(
                "Not a collection path: {}",
                url
            ))),
        }
    }
}
