//! The typed scalar carrier for data items.
//!
//! A [`Value`] pairs an optional data path with a [`ValueData`], the tagged
//! union of everything a leaf (or structural node) can hold.  `DECIMAL64`
//! carries an integer mantissa; the scale is implicit in the schema and is not
//! transmitted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A data item as it appears on the wire: where it lives and what it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub data: ValueData,
}

impl Value {
    pub fn new<S: Into<String>>(path: S, data: ValueData) -> Self {
        Self {
            path: Some(path.into()),
            data,
        }
    }

    /// A value without a path, as used in set requests where the path is a
    /// separate field.
    pub fn bare(data: ValueData) -> Self {
        Self { path: None, data }
    }
}

/// The payload of a data item.  Structural nodes (containers, lists) carry no
/// data but still appear in retrieval results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueData {
    Container,
    List,
    String(String),
    Binary(Vec<u8>),
    Enum(String),
    Bits(Vec<String>),
    Bool(bool),
    Empty,
    Identityref(String),
    InstanceId(String),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    /// Integer mantissa; the per-schema `fraction-digits` gives the scale.
    Decimal64(i64),
}

impl ValueData {
    /// The wire name of this value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ValueData::Container => "CONTAINER",
            ValueData::List => "LIST",
            ValueData::String(_) => "STRING",
            ValueData::Binary(_) => "BINARY",
            ValueData::Enum(_) => "ENUM",
            ValueData::Bits(_) => "BITS",
            ValueData::Bool(_) => "BOOL",
            ValueData::Empty => "EMPTY",
            ValueData::Identityref(_) => "IDENTITYREF",
            ValueData::InstanceId(_) => "INSTANCE_ID",
            ValueData::Int8(_) => "INT8",
            ValueData::Int16(_) => "INT16",
            ValueData::Int32(_) => "INT32",
            ValueData::Int64(_) => "INT64",
            ValueData::Uint8(_) => "UINT8",
            ValueData::Uint16(_) => "UINT16",
            ValueData::Uint32(_) => "UINT32",
            ValueData::Uint64(_) => "UINT64",
            ValueData::Decimal64(_) => "DECIMAL64",
        }
    }

    /// Whether this is a structural (container/list) marker rather than data.
    pub fn is_structural(&self) -> bool {
        matches!(self, ValueData::Container | ValueData::List)
    }

    /// Renders the data in the canonical lexical form used for list keys and
    /// comparison, e.g. `true`, `42`, `eth0`.
    pub fn lexical(&self) -> String {
        match self {
            ValueData::Container => String::new(),
            ValueData::List => String::new(),
            ValueData::String(s) => s.clone(),
            ValueData::Binary(b) => b.iter().map(|byte| format!("{:02x}", byte)).collect(),
            ValueData::Enum(s) => s.clone(),
            ValueData::Bits(bits) => bits.join(" "),
            ValueData::Bool(b) => b.to_string(),
            ValueData::Empty => String::new(),
            ValueData::Identityref(s) => s.clone(),
            ValueData::InstanceId(s) => s.clone(),
            ValueData::Int8(n) => n.to_string(),
            ValueData::Int16(n) => n.to_string(),
            ValueData::Int32(n) => n.to_string(),
            ValueData::Int64(n) => n.to_string(),
            ValueData::Uint8(n) => n.to_string(),
            ValueData::Uint16(n) => n.to_string(),
            ValueData::Uint32(n) => n.to_string(),
            ValueData::Uint64(n) => n.to_string(),
            ValueData::Decimal64(n) => n.to_string(),
        }
    }
}

impl fmt::Display for ValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lexical())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tagged_encoding() {
        let v = Value::new("/m:c/leaf", ValueData::String("Leaf value".to_string()));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["path"], "/m:c/leaf");
        assert_eq!(json["type"], "STRING");
        assert_eq!(json["value"], "Leaf value");
    }

    #[test]
    fn structural_has_no_value_field() {
        let v = Value::bare(ValueData::Container);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], "CONTAINER");
        assert!(json.get("value").is_none());
        assert!(json.get("path").is_none());
    }

    #[test]
    fn decimal64_is_mantissa() {
        let v = Value::bare(ValueData::Decimal64(-12345));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], "DECIMAL64");
        assert_eq!(json["value"], -12345);
        let back: Value = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn lexical_forms() {
        assert_eq!(ValueData::Bool(true).lexical(), "true");
        assert_eq!(ValueData::Uint16(8080).lexical(), "8080");
        assert_eq!(
            ValueData::Bits(vec!["a".to_string(), "b".to_string()]).lexical(),
            "a b"
        );
        assert_eq!(ValueData::Binary(vec![0xde, 0xad]).lexical(), "dead");
    }
}
