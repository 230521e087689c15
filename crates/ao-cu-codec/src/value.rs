//! Structured input model for the wire codec.
//!
//! [`Item`] is the codec's view of a value to encode: ordered mappings,
//! sequences, scalars, and raw byte blobs. JSON values convert losslessly
//! except for `null`, which has no wire representation and fails at encode
//! time.

use serde_json::Value;

/// A structured value accepted by the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// An ordered mapping. Key order does not affect the encoded output;
    /// flattened keys are sorted before partitioning.
    Map(Vec<(String, Item)>),
    /// An ordered sequence, flattened to `<path>/0`, `<path>/1`, …
    List(Vec<Item>),
    /// A signed integer, typed `integer` in the `ao-types` sidecar.
    Int(i64),
    /// A finite float, typed `float`. Non-finite values fail the encode.
    Float(f64),
    /// A symbolic constant (e.g. `true`, `false`), typed `atom`.
    Atom(String),
    /// A UTF-8 string, stored directly without a type annotation.
    String(String),
    /// A raw byte blob, stored directly without a type annotation.
    Bytes(Vec<u8>),
    /// JSON null; carried so conversions are total, rejected at encode time.
    Null,
}

impl Item {
    /// Build a map from key/value pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Item)>) -> Self {
        Item::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a list from values.
    pub fn list(entries: impl IntoIterator<Item = Item>) -> Self {
        Item::List(entries.into_iter().collect())
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Self {
        Item::String(s.to_string())
    }
}

impl From<String> for Item {
    fn from(s: String) -> Self {
        Item::String(s)
    }
}

impl From<&Value> for Item {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Item::Null,
            Value::Bool(b) => Item::Atom(b.to_string()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Item::Int(i),
                None => Item::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Item::String(s.clone()),
            Value::Array(items) => Item::List(items.iter().map(Item::from).collect()),
            Value::Object(map) => {
                Item::Map(map.iter().map(|(k, v)| (k.clone(), Item::from(v))).collect())
            }
        }
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Item::from(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(Item::from(json!(7)), Item::Int(7));
        assert_eq!(Item::from(json!(1.5)), Item::Float(1.5));
        assert_eq!(Item::from(json!(true)), Item::Atom("true".into()));
        assert_eq!(Item::from(json!("x")), Item::String("x".into()));
        assert_eq!(Item::from(json!(null)), Item::Null);
    }

    #[test]
    fn test_from_json_nested() {
        let item = Item::from(json!({"a": {"b": [1, 2]}}));
        let Item::Map(entries) = item else {
            panic!("expected map");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "a");
    }
}
