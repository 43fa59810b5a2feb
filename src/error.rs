//! Error types for ncuctl

use crate::handles::NcuClass;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NcuError {
    /// Object or property does not exist in the store.
    ///
    /// For configuration classes this is benign ("not yet configured") and
    /// callers are expected to tolerate it rather than surface it.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Write to a schema-declared read-only property
    #[error("Property is read-only: {property}")]
    ReadOnly { property: String },
    /// Requested value type disagrees with the schema-declared type.
    ///
    /// Indicates a store/schema mismatch the caller cannot recover from.
    #[error("Type mismatch on property '{property}': expected {expected}, got {actual}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
        actual: &'static str,
    },
    /// Daemon-side validation rejected a property value
    #[error("Validation of {class} configuration failed on property '{property}'")]
    ValidationFailed { class: NcuClass, property: String },
    /// Commit of one configuration class failed; earlier classes stay committed
    #[error("Commit of {class} configuration failed: {reason}")]
    CommitFailed { class: NcuClass, reason: String },
    /// Destroy of one configuration class failed; remaining classes were not destroyed
    #[error("Destroy of {class} configuration failed: {reason}")]
    DestroyFailed { class: NcuClass, reason: String },
    /// Daemon event record could not be decoded
    #[error("Undecodable daemon event: {0}")]
    EventDecode(String),
    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),
    /// Store backend error
    #[error("Store error: {0}")]
    Store(String),
}

impl NcuError {
    /// True for the benign "class not yet configured" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NcuError::NotFound(_))
    }
}

impl From<serde_json::Error> for NcuError {
    fn from(error: serde_json::Error) -> Self {
        NcuError::ParseError(error.to_string())
    }
}

pub type NcuResult<T> = Result<T, NcuError>;
