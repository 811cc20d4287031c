//! Error type for payload transformers.

use std::fmt;

/// Failure to turn an event payload into a value.
#[derive(Debug)]
pub enum TransformError {
    /// The payload was not valid JSON, or did not match the expected shape.
    Json(serde_json::Error),

    /// Raised by caller-supplied transformers.
    Custom(String),
}

impl TransformError {
    pub fn custom(msg: impl Into<String>) -> Self {
        TransformError::Custom(msg.into())
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::Json(err) => write!(f, "Invalid JSON payload: {}", err),
            TransformError::Custom(msg) => write!(f, "Transform failed: {}", msg),
        }
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransformError::Json(err) => Some(err),
            TransformError::Custom(_) => None,
        }
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        TransformError::Json(err)
    }
}
