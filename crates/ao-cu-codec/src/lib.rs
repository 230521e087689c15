//! Wire codec for the compute unit.
//!
//! Encodes an arbitrary structured value into a flat HTTP shape: a set of
//! headers, and — when any field is too deep or too large to travel as a
//! header — a `multipart/form-data` body with a deterministic boundary and
//! a `Content-Digest` header. The byte stream is stable for a given input,
//! which makes it suitable for cryptographic signing.
//!
//! # Pipeline
//!
//! ```text
//! Item ──flatten──▶ leaves + ao-types sidecars ──partition──▶ headers
//!                                                        └──▶ body parts
//!                                                              │
//!                                      boundary = b64url(sha256(parts))
//!                                      Content-Digest over assembled body
//! ```
//!
//! Type information that would be lost by flattening (integers, floats,
//! atoms, empty containers) travels in per-layer `ao-types` dictionaries.

pub mod flatten;
pub mod multipart;
pub mod value;

pub use multipart::Encoded;
pub use value::Item;

use ao_cu_common::CuError;

/// Encode a structured value into headers and an optional multipart body.
///
/// # Errors
///
/// Returns [`CuError::Encode`] when a leaf cannot be represented (non-finite
/// float, JSON null).
pub fn encode(item: &Item) -> Result<Encoded, CuError> {
    let leaves = flatten::flatten(item)?;
    Ok(multipart::assemble(leaves))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_headers_only() {
        let item = Item::map([
            ("Name", Item::from("hello")),
            ("Count", Item::Int(42)),
        ]);

        let encoded = encode(&item).unwrap();
        assert!(encoded.body.is_none());
        assert_eq!(encoded.header("name"), Some("hello"));
        assert_eq!(encoded.header("count"), Some("42"));
        assert_eq!(encoded.header("ao-types"), Some("count=\"integer\""));
    }

    #[test]
    fn test_encode_nested_goes_to_body() {
        let item = Item::map([(
            "Outer",
            Item::map([("Inner", Item::from("deep"))]),
        )]);

        let encoded = encode(&item).unwrap();
        let body = encoded.body.clone().expect("nested keys force a body");
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("name=\"outer/inner\""));
        assert!(text.contains("deep"));
        assert!(encoded.header("content-digest").is_some());
        assert!(encoded
            .header("content-type")
            .unwrap()
            .starts_with("multipart/form-data; boundary="));
    }

    #[test]
    fn test_encode_digest_is_insertion_order_independent() {
        let a = Item::map([
            ("a", Item::Int(1)),
            ("b", Item::from("x")),
            ("c", Item::map([("d", Item::list([Item::Int(10), Item::Int(20)]))])),
        ]);
        let b = Item::map([
            ("c", Item::map([("d", Item::list([Item::Int(10), Item::Int(20)]))])),
            ("b", Item::from("x")),
            ("a", Item::Int(1)),
        ]);

        let ea = encode(&a).unwrap();
        let eb = encode(&b).unwrap();
        assert_eq!(ea.header("content-digest"), eb.header("content-digest"));
        assert_eq!(ea.body, eb.body);
    }

    #[test]
    fn test_encode_rejects_nan() {
        let item = Item::map([("bad", Item::Float(f64::NAN))]);
        assert!(matches!(encode(&item), Err(CuError::Encode { .. })));
    }
}
