//! Property values
//!
//! Values are stored in property maps as JSON text with an explicit type
//! tag, e.g. `{"Long":5}`. Binary values are base64 encoded.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

use crate::errors::{StoreError, StoreResult};

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl PropertyValue {
    /// Encodes the value for a property map entry.
    pub fn encode(&self) -> StoreResult<String> {
        if let PropertyValue::Double(d) = self {
            if !d.is_finite() {
                return Err(StoreError::invalid_argument(format!(
                    "non-finite double {} cannot be stored",
                    d
                )));
            }
        }
        serde_json::to_string(self)
            .map_err(|e| StoreError::invalid_argument(format!("unencodable value: {}", e)))
    }

    /// Decodes a property map entry of document `id`.
    pub fn decode(id: &str, encoded: &str) -> StoreResult<Self> {
        serde_json::from_str(encoded).map_err(|e| {
            StoreError::invariant_violation(id, format!("undecodable property value: {}", e))
        })
    }

    /// JSON rendering used in diffs.
    pub fn to_jsop(&self) -> String {
        match self {
            PropertyValue::String(s) => serde_json::Value::from(s.as_str()).to_string(),
            PropertyValue::Long(v) => v.to_string(),
            PropertyValue::Double(v) => serde_json::Value::from(*v).to_string(),
            PropertyValue::Boolean(v) => v.to_string(),
            PropertyValue::Binary(bytes) => {
                serde_json::Value::from(base64_bytes::encode(bytes)).to_string()
            }
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_jsop())
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Long(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Long(value.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

impl From<Vec<u8>> for PropertyValue {
    fn from(value: Vec<u8>) -> Self {
        PropertyValue::Binary(value)
    }
}

/// Lazily read binary content. Read once per merge, before any commit
/// lock is taken.
pub trait BlobSource: Send + Sync {
    fn read_all(&self) -> io::Result<Vec<u8>>;
}

impl BlobSource for Vec<u8> {
    fn read_all(&self) -> io::Result<Vec<u8>> {
        Ok(self.clone())
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn encode(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_tagged() {
        assert_eq!(PropertyValue::from(5).encode().unwrap(), r#"{"Long":5}"#);
        assert_eq!(PropertyValue::from("v").encode().unwrap(), r#"{"String":"v"}"#);
        assert_eq!(
            PropertyValue::from(vec![1u8, 2, 3]).encode().unwrap(),
            r#"{"Binary":"AQID"}"#
        );
    }

    #[test]
    fn test_decode_binary() {
        let value = PropertyValue::decode("0:/", r#"{"Binary":"AQID"}"#).unwrap();
        assert_eq!(value, PropertyValue::Binary(vec![1, 2, 3]));
    }

    #[test]
    fn test_decode_garbage_is_invariant_violation() {
        let err = PropertyValue::decode("1:/a", "not json").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_non_finite_double_rejected() {
        assert!(PropertyValue::Double(f64::NAN).encode().is_err());
        assert!(PropertyValue::Double(1.5).encode().is_ok());
    }

    #[test]
    fn test_jsop_rendering() {
        assert_eq!(PropertyValue::from("a\"b").to_jsop(), r#""a\"b""#);
        assert_eq!(PropertyValue::from(-1).to_jsop(), "-1");
        assert_eq!(PropertyValue::from(true).to_jsop(), "true");
    }
}
