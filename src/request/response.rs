use serde_json::Value;

use super::{Body, Headers};
use crate::error::{KinveyError, KinveyResult};

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub headers: Headers,
    pub data: Body,
}

impl Response {
    pub fn new(status_code: u16, data: Body) -> Self {
        Self {
            status_code,
            headers: Headers::new(),
            data,
        }
    }

    pub fn json(status_code: u16, data: Value) -> Self {
        Self::new(status_code, Body::Json(data))
    }

    /// `2xx`, and the redirect / not-modified codes the backend uses.
    pub fn is_success(&self) -> bool {
        matches!(self.status_code, 200..=299 | 301 | 302 | 304)
    }

    /// The taxonomy error for an unsuccessful response.
    pub fn error(&self) -> Option<KinveyError> {
        if self.is_success() {
            return None;
        }
        let payload = self.data.as_json().cloned().unwrap_or(Value::Null);
        Some(KinveyError::from_status(self.status_code, &payload))
    }

    pub fn into_result(self) -> KinveyResult<Self> {
        match self.error() {
            None => Ok(self),
            Some(err) => Err(err),
        }
    }

    /// Successful JSON payload, or the response error.
    pub fn into_json(self) -> KinveyResult<Value> {
        Ok(self.into_result()?.data.into_json())
    }
}
