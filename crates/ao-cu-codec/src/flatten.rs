//! Structure flattening and `ao-types` sidecar emission.
//!
//! Nested values are flattened into lowercased dotted-slash paths: the leaf
//! of `{a: {b: v}}` is `a/b`, a sequence at `a` yields `a/0`, `a/1`, …
//! Each nesting layer that carried typed non-string leaves also emits an
//! `ao-types` dictionary recording the types flattening would otherwise
//! erase.

use std::collections::BTreeMap;

use ao_cu_common::CuError;

use crate::value::Item;

/// One flattened leaf: a path and its value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    /// Lowercased flattened path, layers joined by `/`.
    pub path: String,
    /// Raw value bytes.
    pub value: Vec<u8>,
}

impl Leaf {
    fn new(path: String, value: impl Into<Vec<u8>>) -> Self {
        Self {
            path,
            value: value.into(),
        }
    }
}

/// Flatten a structured value into leaves plus `ao-types` sidecars.
///
/// The top-level value must be a mapping; the wire shape has no place for a
/// bare scalar.
///
/// # Errors
///
/// Returns [`CuError::Encode`] for unrepresentable leaves: non-finite
/// floats and nulls.
pub fn flatten(item: &Item) -> Result<Vec<Leaf>, CuError> {
    let Item::Map(entries) = item else {
        return Err(CuError::encode("top-level value must be a mapping"));
    };

    let mut leaves = Vec::new();
    let iter: Box<dyn Iterator<Item = (&str, &Item)>> =
        Box::new(entries.iter().map(|(k, v)| (k.as_str(), v)));
    flatten_layer("", iter, &mut leaves)?;
    Ok(leaves)
}

/// Flatten one nesting layer (a map's entries or a list's indexed elements).
///
/// Typed non-string leaves at this layer are collected into a sidecar
/// dictionary emitted at `<prefix>/ao-types` (bare `ao-types` at the root).
fn flatten_layer<'a>(
    prefix: &str,
    entries: Box<dyn Iterator<Item = (&'a str, &'a Item)> + 'a>,
    leaves: &mut Vec<Leaf>,
) -> Result<(), CuError> {
    let mut types: BTreeMap<String, &'static str> = BTreeMap::new();

    for (key, value) in entries {
        let key = key.to_lowercase();
        let path = join_path(prefix, &key);

        match value {
            Item::Map(inner) => {
                let iter: Box<dyn Iterator<Item = (&str, &Item)>> =
                    Box::new(inner.iter().map(|(k, v)| (k.as_str(), v)));
                flatten_layer(&path, iter, leaves)?;
            }
            Item::List(inner) if inner.is_empty() => {
                types.insert(key, "empty-list");
            }
            Item::List(inner) => {
                let indices: Vec<String> = (0..inner.len()).map(|i| i.to_string()).collect();
                let iter: Box<dyn Iterator<Item = (&str, &Item)>> =
                    Box::new(indices.iter().map(String::as_str).zip(inner.iter()));
                flatten_layer(&path, iter, leaves)?;
            }
            Item::Int(i) => {
                types.insert(key, "integer");
                leaves.push(Leaf::new(path, i.to_string()));
            }
            Item::Float(f) => {
                if !f.is_finite() {
                    return Err(CuError::encode(format!(
                        "non-finite float at '{path}' is not representable"
                    )));
                }
                types.insert(key, "float");
                leaves.push(Leaf::new(path, format!("{f}")));
            }
            Item::Atom(a) => {
                types.insert(key, "atom");
                leaves.push(Leaf::new(path, a.as_bytes()));
            }
            Item::String(s) if s.is_empty() => {
                types.insert(key, "empty-binary");
            }
            Item::String(s) => {
                leaves.push(Leaf::new(path, s.as_bytes()));
            }
            Item::Bytes(b) if b.is_empty() => {
                types.insert(key, "empty-binary");
            }
            Item::Bytes(b) => {
                leaves.push(Leaf::new(path, b.clone()));
            }
            Item::Null => {
                return Err(CuError::encode(format!(
                    "null at '{path}' is not representable"
                )));
            }
        }
    }

    if !types.is_empty() {
        let dictionary = types
            .iter()
            .map(|(k, t)| format!("{k}=\"{t}\""))
            .collect::<Vec<_>>()
            .join(",");
        leaves.push(Leaf::new(join_path(prefix, "ao-types"), dictionary));
    }

    Ok(())
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}/{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(leaves: &[Leaf]) -> Vec<&str> {
        leaves.iter().map(|l| l.path.as_str()).collect()
    }

    fn find<'a>(leaves: &'a [Leaf], path: &str) -> &'a Leaf {
        leaves
            .iter()
            .find(|l| l.path == path)
            .unwrap_or_else(|| panic!("no leaf at {path}"))
    }

    #[test]
    fn test_flatten_lowercases_and_joins() {
        let item = Item::map([("Outer", Item::map([("Inner", Item::from("v"))]))]);
        let leaves = flatten(&item).unwrap();
        assert_eq!(paths(&leaves), vec!["outer/inner"]);
    }

    #[test]
    fn test_flatten_indexes_sequences() {
        let item = Item::map([("a", Item::list([Item::from("x"), Item::from("y")]))]);
        let leaves = flatten(&item).unwrap();
        assert_eq!(find(&leaves, "a/0").value, b"x");
        assert_eq!(find(&leaves, "a/1").value, b"y");
    }

    #[test]
    fn test_ao_types_per_layer() {
        let item = Item::map([
            ("n", Item::Int(3)),
            ("inner", Item::map([("f", Item::Float(0.5)), ("s", Item::from("plain"))])),
        ]);
        let leaves = flatten(&item).unwrap();

        assert_eq!(find(&leaves, "ao-types").value, b"n=\"integer\"");
        assert_eq!(find(&leaves, "inner/ao-types").value, b"f=\"float\"");
        // Plain strings carry no type annotation
        assert_eq!(find(&leaves, "inner/s").value, b"plain");
    }

    #[test]
    fn test_empty_values_travel_as_types_only() {
        let item = Item::map([
            ("s", Item::from("")),
            ("l", Item::list([])),
            ("b", Item::Bytes(vec![])),
        ]);
        let leaves = flatten(&item).unwrap();

        assert_eq!(leaves.len(), 1);
        assert_eq!(
            find(&leaves, "ao-types").value,
            b"b=\"empty-binary\",l=\"empty-list\",s=\"empty-binary\""
        );
    }

    #[test]
    fn test_atoms_are_typed() {
        let item = Item::map([("flag", Item::Atom("true".into()))]);
        let leaves = flatten(&item).unwrap();
        assert_eq!(find(&leaves, "flag").value, b"true");
        assert_eq!(find(&leaves, "ao-types").value, b"flag=\"atom\"");
    }

    #[test]
    fn test_rejects_top_level_scalar() {
        assert!(flatten(&Item::Int(1)).is_err());
    }

    #[test]
    fn test_rejects_null_and_infinite() {
        let item = Item::map([("x", Item::Null)]);
        assert!(matches!(flatten(&item), Err(CuError::Encode { .. })));

        let item = Item::map([("x", Item::Float(f64::INFINITY))]);
        assert!(matches!(flatten(&item), Err(CuError::Encode { .. })));
    }
}
