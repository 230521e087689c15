//! Content hashing over process memory snapshots.
//!
//! The hash is computed incrementally in fixed-size chunks so host memory
//! overhead stays constant regardless of how large the linear memory is.
//! Gzip-encoded snapshots are decoded on the fly.

use std::io::Read;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};

use ao_cu_common::CuError;

/// Chunk size for the incremental hash loop.
const HASH_CHUNK_SIZE: usize = 8 * 1024;

/// Hash a memory stream, decoding it according to its encoding tag.
///
/// `encoding` is `None` or `"none"` for raw bytes and `"gzip"` for a
/// gzip-compressed stream; anything else is a configuration bug.
///
/// # Errors
///
/// Returns [`CuError::UnsupportedEncoding`] for an unknown tag, or an I/O
/// error from the underlying stream.
pub fn hash_memory<R: Read>(reader: R, encoding: Option<&str>) -> Result<String, CuError> {
    match encoding {
        None | Some("none") => hash_stream(reader),
        Some("gzip") => hash_stream(GzDecoder::new(reader)),
        Some(other) => Err(CuError::unsupported_encoding(other)),
    }
}

fn hash_stream<R: Read>(mut reader: R) -> Result<String, CuError> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Configured system caps on per-process resources.
#[derive(Debug, Clone, Copy)]
pub struct ResourceCaps {
    pub max_memory: u64,
    pub max_compute: u64,
}

impl ResourceCaps {
    /// Whether a module's declared memory limit exceeds the system cap.
    pub fn exceeds_max_memory(&self, limit: u64) -> bool {
        limit > self.max_memory
    }

    /// Whether a module's declared compute limit exceeds the system cap.
    pub fn exceeds_max_compute(&self, limit: u64) -> bool {
        limit > self.max_compute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    #[test]
    fn test_hash_plain() {
        let hash = hash_memory(&b"hello world"[..], None).unwrap();
        // sha256 of "hello world"
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        // "none" is the same as absent
        assert_eq!(hash, hash_memory(&b"hello world"[..], Some("none")).unwrap());
    }

    #[test]
    fn test_hash_gzip_matches_plain() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"hello world").unwrap();
        let gz = encoder.finish().unwrap();

        let plain = hash_memory(&b"hello world"[..], None).unwrap();
        let gzipped = hash_memory(gz.as_slice(), Some("gzip")).unwrap();
        assert_eq!(plain, gzipped);
    }

    #[test]
    fn test_hash_large_stream() {
        // Larger than one chunk, to exercise the incremental loop
        let data = vec![0xabu8; 3 * HASH_CHUNK_SIZE + 17];
        let whole = hash_memory(data.as_slice(), None).unwrap();
        assert_eq!(whole.len(), 64);
    }

    #[test]
    fn test_unknown_encoding_fails() {
        let result = hash_memory(&b"x"[..], Some("zstd"));
        assert!(matches!(result, Err(CuError::UnsupportedEncoding { .. })));
    }

    #[test]
    fn test_resource_caps() {
        let caps = ResourceCaps {
            max_memory: 1024,
            max_compute: 500,
        };
        assert!(caps.exceeds_max_memory(2048));
        assert!(!caps.exceeds_max_memory(1024));
        assert!(caps.exceeds_max_compute(501));
        assert!(!caps.exceeds_max_compute(499));
    }
}
