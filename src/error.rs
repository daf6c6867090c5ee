//! Unified error handling for the sciabaca crate
//!
//! This module provides a unified error type that consolidates all domain-specific
//! errors into a single `Error` enum, while maintaining the ability to use
//! domain-specific errors when needed.
//!
//! # Architecture
//!
//! - [`SciabacaErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use sciabaca::error::{Error, SciabacaErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Next cycle may succeed: {err}");
//!     } else {
//!         eprintln!("Fatal error ({}): {err}", err.category().description());
//!     }
//! }
//! ```

use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::storage::StoreError;
pub use crate::utils::error::{ApiError, FetchError, ResolveFailure};

/// Common trait for all sciabaca error types
pub trait SciabacaErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a later attempt may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, rate limit)
    Network,
    /// The remote API refused or failed a call
    Api,
    /// Parsing and data extraction errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "network error",
            Self::Api => "API error",
            Self::Parsing => "parsing error",
            Self::Storage => "storage error",
            Self::Config => "configuration error",
            Self::Other => "other error",
        }
    }
}

impl SciabacaErrorTrait for FetchError {
    fn is_recoverable(&self) -> bool {
        FetchError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::UnexpectedMarkup(_) => ErrorCategory::Parsing,
            Self::InvalidUrl(_) => ErrorCategory::Config,
            _ => ErrorCategory::Network,
        }
    }
}

impl SciabacaErrorTrait for ApiError {
    fn is_recoverable(&self) -> bool {
        ApiError::is_recoverable(self)
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) => ErrorCategory::Network,
            Self::MissingCredentials => ErrorCategory::Config,
            Self::Malformed(_) | Self::ReplyMismatch { .. } => ErrorCategory::Parsing,
            Self::AuthRejected(_) | Self::Api { .. } => ErrorCategory::Api,
        }
    }
}

impl SciabacaErrorTrait for StoreError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

/// Unified error type for the sciabaca crate
#[derive(Error, Debug)]
pub enum Error {
    /// Page fetch errors
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Batch API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Event store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// A blocking task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SciabacaErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => SciabacaErrorTrait::is_recoverable(e),
            Self::Api(e) => SciabacaErrorTrait::is_recoverable(e),
            Self::Store(e) => e.is_recoverable(),
            Self::Config(_) => false,
            Self::Task(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(e) => e.category(),
            Self::Api(e) => e.category(),
            Self::Store(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::Task(_) => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

// Config loading reports through anyhow
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Config(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
