//! Error types for captionkit.
//!
//! Every fallible library operation returns [`CaptionKitError`]; the RPC layer
//! maps variants onto JSON-RPC error codes with [`CaptionKitError::to_rpc_error_code`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the captionkit library.
#[derive(Debug, Error)]
pub enum CaptionKitError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Manifest errors
    #[error("Manifest parse error on line {line}: {message}")]
    ManifestParse { line: usize, message: String },

    #[error("Invalid environment marker '{marker}': {message}")]
    Marker { marker: String, message: String },

    // Dataset errors
    #[error("Image not found in library: {0}")]
    ImageNotFound(PathBuf),

    // Captioning errors
    #[error("Inference backend error: {message}")]
    Inference { message: String },

    #[error("Captioning is already running")]
    CaptioningInProgress,

    #[error("Operation cancelled")]
    Cancelled,

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for captionkit operations.
pub type Result<T> = std::result::Result<T, CaptionKitError>;

impl From<std::io::Error> for CaptionKitError {
    fn from(err: std::io::Error) -> Self {
        CaptionKitError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CaptionKitError {
    fn from(err: serde_json::Error) -> Self {
        CaptionKitError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for CaptionKitError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CaptionKitError::Timeout(std::time::Duration::from_secs(0))
        } else {
            CaptionKitError::Network {
                message: err.to_string(),
                cause: Some(err.to_string()),
            }
        }
    }
}

impl CaptionKitError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CaptionKitError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Shorthand for a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        CaptionKitError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32000: Network/connectivity error
    /// - -32002: File or image not found
    /// - -32003: Inference backend failure
    /// - -32004: Cancelled by user
    /// - -32005: Validation or parse error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            CaptionKitError::Network { .. } | CaptionKitError::Timeout(_) => -32000,

            CaptionKitError::FileNotFound(_)
            | CaptionKitError::NotADirectory(_)
            | CaptionKitError::ImageNotFound(_) => -32002,

            CaptionKitError::Inference { .. } | CaptionKitError::CaptioningInProgress => -32003,

            CaptionKitError::Cancelled => -32004,

            CaptionKitError::Validation { .. }
            | CaptionKitError::ManifestParse { .. }
            | CaptionKitError::Marker { .. } => -32005,

            CaptionKitError::MethodNotFound(_) => -32601,

            CaptionKitError::InvalidParams { .. } => -32602,

            _ => -32603,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaptionKitError::Network { .. } | CaptionKitError::Timeout(_)
        )
    }
}
