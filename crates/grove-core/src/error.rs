//! Error taxonomy for model operations

use std::fmt;

pub type Result<T> = std::result::Result<T, ModelError>;

/// Why a well-formed handle does not denote an existing element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    /// The underlying resource is absent from the store.
    Missing,
    /// The underlying container exists but is closed.
    NotOpen,
    /// The underlying resource exists but does not qualify as a model element.
    NotQualifying,
}

impl fmt::Display for Existence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Existence::Missing => "does not exist",
            Existence::NotOpen => "is not open",
            Existence::NotQualifying => "does not qualify as a model element",
        })
    }
}

/// Errors produced by the model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{element} {reason}")]
    NotFound { element: String, reason: Existence },

    #[error("failed to build structure of {element}: {source}")]
    Build {
        element: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid element: {message}")]
    InvalidElement { message: String },

    #[error("resource store query failed: {source}")]
    Store {
        #[source]
        source: anyhow::Error,
    },

    #[error("model is not running")]
    NotRunning,
}

impl ModelError {
    pub fn not_found(element: impl fmt::Display, reason: Existence) -> Self {
        ModelError::NotFound {
            element: element.to_string(),
            reason,
        }
    }

    pub fn build(element: impl fmt::Display, source: anyhow::Error) -> Self {
        ModelError::Build {
            element: element.to_string(),
            source,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ModelError::InvalidElement {
            message: message.into(),
        }
    }

    pub fn store(source: anyhow::Error) -> Self {
        ModelError::Store { source }
    }

    /// Whether this is the expected outcome for a speculatively obtained handle.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::NotFound { .. })
    }
}
