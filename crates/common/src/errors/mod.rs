//! Error types for TutorForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,

    // Resource errors (4xxx)
    NotFound,
    RunNotFound,
    ModelNotFound,

    // State errors (5xxx)
    InvalidTransition,
    Cancelled,

    // External service errors (8xxx)
    UpstreamError,
    ProviderTimeout,
    ContentPolicy,
    RetrievalError,
    RerankError,
    StatusDeliveryError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1003,

            ErrorCode::NotFound => 4001,
            ErrorCode::RunNotFound => 4002,
            ErrorCode::ModelNotFound => 4003,

            ErrorCode::InvalidTransition => 5001,
            ErrorCode::Cancelled => 5002,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::ProviderTimeout => 8002,
            ErrorCode::ContentPolicy => 8003,
            ErrorCode::RetrievalError => 8004,
            ErrorCode::RerankError => 8005,
            ErrorCode::StatusDeliveryError => 8006,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Failure reported by a language-model provider.
///
/// The split between transient and permanent failures drives the retry
/// loop in [`crate::llm::retry`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Provider request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Provider rate limited the request")]
    RateLimited,

    #[error("Provider server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Provider unreachable: {message}")]
    Unavailable { message: String },

    #[error("Request rejected by content policy: {message}")]
    ContentPolicy { message: String },

    #[error("Provider rejected request {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected provider response: {message}")]
    InvalidResponse { message: String },
}

impl ProviderError {
    /// Whether retrying the identical request can succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout { .. }
                | ProviderError::RateLimited
                | ProviderError::Server { .. }
                | ProviderError::Unavailable { .. }
        )
    }

    /// Classify an HTTP status returned by a provider
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => ProviderError::RateLimited,
            500..=599 => ProviderError::Server { status, message: body },
            400 if is_content_policy_body(&body) => ProviderError::ContentPolicy { message: body },
            _ => ProviderError::Rejected { status, message: body },
        }
    }

    /// Classify a transport-level failure
    pub fn from_transport(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout { timeout_ms }
        } else {
            ProviderError::Unavailable { message: err.to_string() }
        }
    }
}

fn is_content_policy_body(body: &str) -> bool {
    body.contains("content_filter") || body.contains("content_policy")
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Pipeline run not found: {id}")]
    RunNotFound { id: String },

    #[error("Model not found: {id}")]
    ModelNotFound { id: String },

    // State errors
    #[error("Invalid transition '{action}' for stage '{stage}' in state {state}")]
    InvalidTransition {
        stage: String,
        state: String,
        action: &'static str,
    },

    #[error("Pipeline run cancelled")]
    Cancelled,

    // External service errors
    #[error("Model provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Retrieval error: {message}")]
    Retrieval { message: String },

    #[error("Rerank error: {message}")]
    Rerank { message: String },

    #[error("Status delivery error: {message}")]
    StatusDelivery { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::RunNotFound { .. } => ErrorCode::RunNotFound,
            AppError::ModelNotFound { .. } => ErrorCode::ModelNotFound,
            AppError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AppError::Cancelled => ErrorCode::Cancelled,
            AppError::Provider(ProviderError::Timeout { .. }) => ErrorCode::ProviderTimeout,
            AppError::Provider(ProviderError::ContentPolicy { .. }) => ErrorCode::ContentPolicy,
            AppError::Provider(_) => ErrorCode::UpstreamError,
            AppError::Retrieval { .. } => ErrorCode::RetrievalError,
            AppError::Rerank { .. } => ErrorCode::RerankError,
            AppError::StatusDelivery { .. } => ErrorCode::StatusDeliveryError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::RunNotFound { .. }
            | AppError::ModelNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::InvalidTransition { .. } | AppError::Cancelled => StatusCode::CONFLICT,

            // 422 Unprocessable Entity
            AppError::Provider(ProviderError::ContentPolicy { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Provider(_) | AppError::HttpClient(_) | AppError::StatusDelivery { .. } => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            AppError::Retrieval { .. } | AppError::Rerank { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Whether the pipeline may continue without the step that raised it
    pub fn is_skippable(&self) -> bool {
        matches!(self, AppError::Retrieval { .. } | AppError::Rerank { .. })
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match &self {
            AppError::Validation { field: Some(field), .. } => {
                Some(serde_json::json!({ "field": field }))
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
