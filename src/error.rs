use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the proxy chain service
#[derive(Error, Debug)]
pub enum ChainError {
    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Upstream source errors
    #[error("Source error: {0}")]
    Source(String),

    // Allocation errors
    #[error("No free {family} port left to allocate")]
    PortsExhausted { family: String },

    #[error("Node not found: {uid}")]
    NodeNotFound { uid: String },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for proxy chain operations
pub type Result<T> = std::result::Result<T, ChainError>;

impl ChainError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ChainError::InvalidRequest(_) | ChainError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            ChainError::NodeNotFound { .. } => StatusCode::NOT_FOUND,

            // 502 Bad Gateway
            ChainError::Source(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            ChainError::PortsExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            ChainError::Storage(_)
            | ChainError::Serialization(_)
            | ChainError::Io(_)
            | ChainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ChainError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            ChainError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ChainError::NodeNotFound {
                uid: "abc".to_string()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ChainError::PortsExhausted {
                family: "socks5".to_string()
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ChainError::Storage("disk full".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ChainError::Source("unreachable".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
