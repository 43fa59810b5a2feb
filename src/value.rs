//! Typed property values exchanged with the configuration store
//!
//! Every property the store knows about carries one of five wire types.
//! Accessors are checked: asking a value for the wrong type is a schema
//! mismatch and reported as `TypeMismatch` rather than coerced.

use crate::error::{NcuError, NcuResult};
use serde::{Deserialize, Serialize};

/// A property value in one of the store's wire types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyValue {
    Boolean(bool),
    Uint64(u64),
    Str(String),
    Uint64Array(Vec<u64>),
    StrArray(Vec<String>),
}

impl PropertyValue {
    /// Wire-type name, used in error reports
    pub fn kind(&self) -> &'static str {
        match self {
            PropertyValue::Boolean(_) => "boolean",
            PropertyValue::Uint64(_) => "uint64",
            PropertyValue::Str(_) => "string",
            PropertyValue::Uint64Array(_) => "uint64[]",
            PropertyValue::StrArray(_) => "string[]",
        }
    }

    fn mismatch(&self, property: &str, expected: &'static str) -> NcuError {
        NcuError::TypeMismatch {
            property: property.to_string(),
            expected,
            actual: self.kind(),
        }
    }

    /// Reads the value as a boolean
    pub fn as_bool(&self, property: &str) -> NcuResult<bool> {
        match self {
            PropertyValue::Boolean(b) => Ok(*b),
            other => Err(other.mismatch(property, "boolean")),
        }
    }

    /// Reads the value as a uint64
    pub fn as_u64(&self, property: &str) -> NcuResult<u64> {
        match self {
            PropertyValue::Uint64(v) => Ok(*v),
            other => Err(other.mismatch(property, "uint64")),
        }
    }

    /// Reads the value as a string slice
    pub fn as_str(&self, property: &str) -> NcuResult<&str> {
        match self {
            PropertyValue::Str(s) => Ok(s),
            other => Err(other.mismatch(property, "string")),
        }
    }

    /// Reads the value as a uint64 array
    pub fn as_u64_array(&self, property: &str) -> NcuResult<&[u64]> {
        match self {
            PropertyValue::Uint64Array(v) => Ok(v),
            other => Err(other.mismatch(property, "uint64[]")),
        }
    }

    /// Reads the value as a string array
    pub fn as_str_array(&self, property: &str) -> NcuResult<&[String]> {
        match self {
            PropertyValue::StrArray(v) => Ok(v),
            other => Err(other.mismatch(property, "string[]")),
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Boolean(v)
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::Uint64(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

impl From<Vec<u64>> for PropertyValue {
    fn from(v: Vec<u64>) -> Self {
        PropertyValue::Uint64Array(v)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(v: Vec<String>) -> Self {
        PropertyValue::StrArray(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_accessors() {
        let v = PropertyValue::Uint64(4);
        assert_eq!(v.as_u64("ip-version").unwrap(), 4);
        let err = v.as_str("ip-version").unwrap_err();
        assert!(matches!(err, NcuError::TypeMismatch { expected: "string", .. }));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(PropertyValue::from(vec![4u64, 6]).kind(), "uint64[]");
        assert_eq!(PropertyValue::from("e1000g0").kind(), "string");
    }
}
