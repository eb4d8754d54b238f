//! Self-describing encoding for primitive state values
//!
//! Every encoding is a one-byte type tag followed by a tag-specific payload:
//!
//! | tag | kind    | payload                        |
//! |-----|---------|--------------------------------|
//! | `i` | integer | 8 bytes, little-endian `i64`   |
//! | `s` | text    | UTF-8 bytes                    |
//! | `n` | null    | empty                          |
//! | `b` | boolean | `t` or `f`                     |
//! | `j` | opaque  | raw bytes (serialised JSON)    |
//!
//! The format is stable and unversioned; values written by one node must
//! decode identically on every other.

use serde::{Serialize, de::DeserializeOwned};
use std::any::{Any, type_name};

pub const INT_TAG: u8 = b'i';
pub const TEXT_TAG: u8 = b's';
pub const NULL_TAG: u8 = b'n';
pub const BOOL_TAG: u8 = b'b';
pub const OPAQUE_TAG: u8 = b'j';

const INT_PAYLOAD_LEN: usize = 8;

/// Errors from encoding or decoding a value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The runtime type has no encoding
    #[error("type not supported: {type_name}")]
    UnsupportedType { type_name: &'static str },

    /// The bytes are not a valid encoding
    #[error("invalid encoding: {reason}")]
    InvalidEncoding { reason: String },
}

impl CodecError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidEncoding {
            reason: reason.into(),
        }
    }
}

/// Already-serialised structured data, stored opaquely
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializedJson(pub Vec<u8>);

/// A primitive state value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
    Null,
    Bool(bool),
    Opaque(Vec<u8>),
}

impl Value {
    /// Encode to the tagged byte form
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Value::Int(i) => {
                let mut out = Vec::with_capacity(1 + INT_PAYLOAD_LEN);
                out.push(INT_TAG);
                out.extend_from_slice(&i.to_le_bytes());
                out
            }
            Value::Text(s) => tagged(TEXT_TAG, s.as_bytes()),
            Value::Null => vec![NULL_TAG],
            Value::Bool(b) => vec![BOOL_TAG, if *b { b't' } else { b'f' }],
            Value::Opaque(bytes) => tagged(OPAQUE_TAG, bytes),
        }
    }

    /// Short name of the value's kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Text(_) => "text",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Serialise any serde value into an opaque value
    pub fn json<T: Serialize>(value: &T) -> Result<Self, CodecError> {
        serde_json::to_vec(value)
            .map(Value::Opaque)
            .map_err(|e| CodecError::invalid(format!("JSON serialisation failed: {e}")))
    }

    /// Deserialise an opaque value as JSON
    pub fn as_json<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        match self {
            Value::Opaque(bytes) => serde_json::from_slice(bytes)
                .map_err(|e| CodecError::invalid(format!("opaque payload is not JSON: {e}"))),
            other => Err(CodecError::invalid(format!(
                "expected opaque value, found {}",
                other.kind()
            ))),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<SerializedJson> for Value {
    fn from(j: SerializedJson) -> Self {
        Value::Opaque(j.0)
    }
}

fn tagged(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(tag);
    out.extend_from_slice(payload);
    out
}

/// Encode a dynamically typed value.
///
/// Accepts `i64`, `String`, `&'static str`, `bool`, `()` (null),
/// [`SerializedJson`] and [`Value`]. Anything else fails with
/// `UnsupportedType` rather than being coerced.
pub fn encode<T: Any>(value: &T) -> Result<Vec<u8>, CodecError> {
    let any = value as &dyn Any;
    let value = if let Some(v) = any.downcast_ref::<Value>() {
        v.clone()
    } else if let Some(i) = any.downcast_ref::<i64>() {
        Value::Int(*i)
    } else if let Some(s) = any.downcast_ref::<String>() {
        Value::Text(s.clone())
    } else if let Some(s) = any.downcast_ref::<&'static str>() {
        Value::Text(s.to_string())
    } else if let Some(b) = any.downcast_ref::<bool>() {
        Value::Bool(*b)
    } else if any.downcast_ref::<()>().is_some() {
        Value::Null
    } else if let Some(j) = any.downcast_ref::<SerializedJson>() {
        Value::Opaque(j.0.clone())
    } else {
        return Err(CodecError::UnsupportedType {
            type_name: type_name::<T>(),
        });
    };
    Ok(value.encode())
}

/// Decode a tagged byte string.
pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let (&tag, payload) = bytes.split_first().ok_or_else(|| CodecError::invalid("empty input"))?;

    match tag {
        INT_TAG => {
            let raw: [u8; INT_PAYLOAD_LEN] = payload.try_into().map_err(|_| {
                CodecError::invalid(format!(
                    "integer payload must be {INT_PAYLOAD_LEN} bytes, got {}",
                    payload.len()
                ))
            })?;
            Ok(Value::Int(i64::from_le_bytes(raw)))
        }
        TEXT_TAG => String::from_utf8(payload.to_vec())
            .map(Value::Text)
            .map_err(|e| CodecError::invalid(format!("text payload is not UTF-8: {e}"))),
        NULL_TAG => {
            if payload.is_empty() {
                Ok(Value::Null)
            } else {
                Err(CodecError::invalid("null carries a payload"))
            }
        }
        BOOL_TAG => match payload {
            b"t" => Ok(Value::Bool(true)),
            b"f" => Ok(Value::Bool(false)),
            [] => Err(CodecError::invalid("boolean payload missing")),
            _ => Err(CodecError::invalid("boolean payload must be 't' or 'f'")),
        },
        OPAQUE_TAG => Ok(Value::Opaque(payload.to_vec())),
        other => Err(CodecError::invalid(format!("unknown tag 0x{other:02x}"))),
    }
}
