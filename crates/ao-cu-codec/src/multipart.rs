//! Header/body partitioning and multipart assembly.
//!
//! Flattened leaves are sorted lexicographically, then split: a leaf whose
//! path contains `/`, or whose path or value exceeds the header size cap,
//! or whose value is not header-safe UTF-8, becomes a body part. The body
//! boundary is derived from the parts themselves so the assembled bytes are
//! a pure function of the input.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::flatten::Leaf;

/// Maximum UTF-8 byte length for a flattened key or value to remain a header.
const MAX_HEADER_LEN: usize = 4096;

/// The encoded wire form: headers plus an optional multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Header name/value pairs, body-derived `Content-Type` and
    /// `Content-Digest` last.
    pub headers: Vec<(String, String)>,
    /// Assembled multipart body, present iff any leaf was partitioned into it.
    pub body: Option<Vec<u8>>,
}

impl Encoded {
    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Partition sorted leaves into headers and body parts, then assemble.
pub fn assemble(mut leaves: Vec<Leaf>) -> Encoded {
    leaves.sort_by(|a, b| a.path.cmp(&b.path));

    let mut headers = Vec::new();
    let mut parts: Vec<Vec<u8>> = Vec::new();

    for leaf in leaves {
        match as_header_value(&leaf) {
            Some(value) if !leaf.path.contains('/') => {
                let value = value.to_string();
                headers.push((leaf.path, value));
            }
            _ => parts.push(body_part(&leaf)),
        }
    }

    if parts.is_empty() {
        return Encoded {
            headers,
            body: None,
        };
    }

    let boundary = derive_boundary(&parts);
    let body = assemble_body(&boundary, &parts);

    headers.push((
        "content-type".to_string(),
        format!("multipart/form-data; boundary=\"{boundary}\""),
    ));
    headers.push((
        "content-digest".to_string(),
        format!("sha-256=:{}:", STANDARD.encode(Sha256::digest(&body))),
    ));

    Encoded {
        headers,
        body: Some(body),
    }
}

/// A leaf's value as a header-safe string, or `None` if it must travel in
/// the body (oversized, non-UTF-8, or containing line breaks).
fn as_header_value(leaf: &Leaf) -> Option<&str> {
    if leaf.path.len() > MAX_HEADER_LEN || leaf.value.len() > MAX_HEADER_LEN {
        return None;
    }
    let value = std::str::from_utf8(&leaf.value).ok()?;
    if value.contains(['\r', '\n']) {
        return None;
    }
    Some(value)
}

/// Render one body part: disposition line, blank line, value bytes.
fn body_part(leaf: &Leaf) -> Vec<u8> {
    let mut part =
        format!("content-disposition: form-data;name=\"{}\"\r\n\r\n", leaf.path).into_bytes();
    part.extend_from_slice(&leaf.value);
    part
}

/// The boundary is the base64url sha-256 of the parts joined by CRLF, with
/// no terminating CRLF after the final part.
fn derive_boundary(parts: &[Vec<u8>]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\r\n");
        }
        hasher.update(part);
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn assemble_body(boundary: &str, parts: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(part);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(path: &str, value: &[u8]) -> Leaf {
        Leaf {
            path: path.to_string(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn test_flat_short_leaves_become_headers() {
        let encoded = assemble(vec![leaf("b", b"2"), leaf("a", b"1")]);
        assert_eq!(
            encoded.headers,
            vec![("a".into(), "1".into()), ("b".into(), "2".into())]
        );
        assert!(encoded.body.is_none());
    }

    #[test]
    fn test_nested_and_oversized_leaves_become_parts() {
        let big = vec![b'x'; MAX_HEADER_LEN + 1];
        let encoded = assemble(vec![leaf("a/b", b"v"), leaf("big", &big)]);

        let body = encoded.body.unwrap();
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("content-disposition: form-data;name=\"a/b\"\r\n\r\nv"));
        assert!(text.contains("name=\"big\""));
        assert_eq!(encoded.headers.len(), 2); // content-type + content-digest
    }

    #[test]
    fn test_body_layout() {
        let encoded = assemble(vec![leaf("a/b", b"v")]);
        let body = String::from_utf8(encoded.body.clone().unwrap()).unwrap();

        let boundary = {
            let ct = encoded.header("content-type").unwrap();
            ct.split("boundary=\"").nth(1).unwrap().trim_end_matches('"').to_string()
        };
        let expected = format!(
            "--{boundary}\r\ncontent-disposition: form-data;name=\"a/b\"\r\n\r\nv\r\n--{boundary}--"
        );
        assert_eq!(body, expected);
    }

    #[test]
    fn test_boundary_is_deterministic() {
        let e1 = assemble(vec![leaf("a/b", b"v"), leaf("a/c", b"w")]);
        let e2 = assemble(vec![leaf("a/c", b"w"), leaf("a/b", b"v")]);
        assert_eq!(e1.header("content-type"), e2.header("content-type"));
        assert_eq!(e1.header("content-digest"), e2.header("content-digest"));
    }

    #[test]
    fn test_value_with_line_breaks_goes_to_body() {
        let encoded = assemble(vec![leaf("text", b"line one\r\nline two")]);
        assert!(encoded.body.is_some());
        assert!(encoded.header("text").is_none());
    }

    #[test]
    fn test_digest_matches_body_bytes() {
        let encoded = assemble(vec![leaf("a/b", b"v")]);
        let body = encoded.body.as_ref().unwrap();
        let expected = format!("sha-256=:{}:", STANDARD.encode(Sha256::digest(body)));
        assert_eq!(encoded.header("content-digest"), Some(expected.as_str()));
    }
}
