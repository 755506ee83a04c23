//! Error types for outbound internal HTTP calls.

use thiserror::Error;

/// Errors that can occur while calling sibling platform services.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The HTTP request failed due to a network or connection error.
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// An error occurred in the retrying middleware layer, typically after
    /// all retry attempts were exhausted.
    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    /// The server returned a non-success HTTP status code.
    #[error("Server error {status}: {body}")]
    ServerError {
        status: reqwest::StatusCode,
        body: String,
    },

    /// Failed to parse or construct a URL.
    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    /// Failed to serialize or deserialize JSON data.
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Signing the request with the internal auth scheme failed.
    #[error("Signing error: {0}")]
    SigningError(String),
}
