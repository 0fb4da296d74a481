//! Content hashing for stable, process-independent identifiers.
//!
//! Every identifier in codectx is content-addressed: Merkle node ids,
//! snapshot file names, collection names, and chunk ids are all derived
//! from the first 16 hex characters (64 bits) of a SHA-256 digest. The
//! truncation keeps ids readable in logs and filter expressions;
//! collisions are treated as impossible at indexing scale, and upserts
//! are idempotent on exact id match regardless.

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the full SHA-256 digest.
const HASH_PREFIX_LEN: usize = 16;

/// Hash raw bytes to a 16-hex-char digest prefix.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let full = format!("{:x}", hasher.finalize());
    full[..HASH_PREFIX_LEN].to_string()
}

/// Hash a UTF-8 string to a 16-hex-char digest prefix.
pub fn hash_str(s: &str) -> String {
    hash_bytes(s.as_bytes())
}

/// Content-addressed chunk id: `chunk_` + 16 hex chars over
/// `relative_path ++ content ++ start_line ++ end_line`.
///
/// A pure function of its inputs: the same chunk at the same location
/// always receives the same id, across runs and machines.
pub fn chunk_id(relative_path: &str, content: &str, start_line: u32, end_line: u32) -> String {
    let material = format!("{}{}{}{}", relative_path, content, start_line, end_line);
    format!("chunk_{}", hash_str(&material))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_truncated() {
        let h = hash_str("hello");
        assert_eq!(h.len(), 16);
        assert_eq!(h, hash_str("hello"));
        // Known SHA-256 prefix of "hello"
        assert_eq!(h, "2cf24dba5fb0a30e");
    }

    #[test]
    fn hash_bytes_matches_hash_str() {
        assert_eq!(hash_bytes(b"abc"), hash_str("abc"));
    }

    #[test]
    fn different_inputs_differ() {
        assert_ne!(hash_str("a"), hash_str("b"));
    }

    #[test]
    fn chunk_id_is_deterministic() {
        let a = chunk_id("src/lib.rs", "fn main() {}", 1, 1);
        let b = chunk_id("src/lib.rs", "fn main() {}", 1, 1);
        assert_eq!(a, b);
        assert!(a.starts_with("chunk_"));
        assert_eq!(a.len(), "chunk_".len() + 16);
    }

    #[test]
    fn chunk_id_varies_with_every_input() {
        let base = chunk_id("a.rs", "x", 1, 2);
        assert_ne!(base, chunk_id("b.rs", "x", 1, 2));
        assert_ne!(base, chunk_id("a.rs", "y", 1, 2));
        assert_ne!(base, chunk_id("a.rs", "x", 2, 2));
        assert_ne!(base, chunk_id("a.rs", "x", 1, 3));
    }
}
