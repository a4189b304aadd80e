//! Error types for the cache subsystem
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache subsystem.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed configuration value, fatal at load time
    #[error("Invalid configuration entry '{entry}' in {name}=\"{raw}\": {reason}")]
    Config {
        name: String,
        entry: String,
        raw: String,
        reason: String,
    },

    /// Store unreachable or readiness handshake failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Error returned by the redis driver
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No live store handle (feature disabled or connection failed)
    #[error("Store unavailable")]
    Unavailable,

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// True when no store handle exists. The connection manager has already
    /// logged the cause, so callers may stay quiet.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable)
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::Unavailable | CacheError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache subsystem.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_entry_and_raw_value() {
        let err = CacheError::Config {
            name: "REDIS_CLUSTER_NODES".to_string(),
            entry: "a".to_string(),
            raw: "a,b:6380".to_string(),
            reason: "expected host:port".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'a'"));
        assert!(msg.contains("a,b:6380"));
    }

    #[test]
    fn test_unavailable_maps_to_503() {
        let response = CacheError::Unavailable.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_is_unavailable() {
        assert!(CacheError::Unavailable.is_unavailable());
        assert!(!CacheError::Connection("reset".into()).is_unavailable());
    }

    #[test]
    fn test_invalid_request_maps_to_400() {
        let response = CacheError::InvalidRequest("bad".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
