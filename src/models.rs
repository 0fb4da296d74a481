//! Core data types that flow through the indexing and retrieval pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! walk → file text → split() → CodeChunk → embed() → EmbeddedChunk
//!                                                        ↓
//!                                               store.insert() / search()
//!                                                        ↓
//!                                                  SearchResult
//! ```
//!
//! - A **[`CodeChunk`]** is a contiguous region of one source file with a
//!   content-addressed id and 1-indexed inclusive line range.
//! - An **[`EmbeddedChunk`]** pairs a chunk with its dense vector.
//! - A **[`SparseVector`]** is the `(indices, values)` bag-of-terms
//!   weighting emitted by the BM25 vectorizer.
//! - A **[`SearchResult`]** is the projection returned to callers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::hashing;

/// Metadata key carrying the originating codebase root on every chunk.
pub const METADATA_CODEBASE_PATH: &str = "codebasePath";

/// A contiguous code region from one file with a stable content-addressed id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChunk {
    /// `chunk_` + 16-hex digest over path, content, and line range.
    pub id: String,
    /// Chunk text, exactly as read from the file.
    pub content: String,
    /// Path relative to the codebase root, host OS separators.
    pub relative_path: String,
    /// First line of the chunk (1-indexed, inclusive).
    pub start_line: u32,
    /// Last line of the chunk (1-indexed, inclusive, `>= start_line`).
    pub end_line: u32,
    /// File extension without the leading dot (e.g. `"rs"`, `"py"`).
    pub file_extension: String,
    /// Free-form metadata; always carries [`METADATA_CODEBASE_PATH`].
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CodeChunk {
    /// Build a chunk with its content-addressed id and codebase metadata.
    pub fn new(
        codebase_path: &str,
        relative_path: &str,
        content: String,
        start_line: u32,
        end_line: u32,
        file_extension: &str,
    ) -> Self {
        let id = hashing::chunk_id(relative_path, &content, start_line, end_line);
        let mut metadata = HashMap::new();
        metadata.insert(
            METADATA_CODEBASE_PATH.to_string(),
            serde_json::Value::String(codebase_path.to_string()),
        );
        Self {
            id,
            content,
            relative_path: relative_path.to_string(),
            start_line,
            end_line,
            file_extension: file_extension.to_string(),
            metadata,
        }
    }
}

/// A chunk paired with its dense vector, ready for upsert.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: CodeChunk,
    /// Dense embedding; length must equal the collection dimension.
    pub dense: Vec<f32>,
}

/// Compressed `(indices, values)` representation of a bag-of-terms weighting.
///
/// Invariants: `indices.len() == values.len()`, indices unique and
/// ascending, every value strictly positive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// True when the vector carries no terms.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Check the structural invariants sparse backends rely on.
    pub fn is_valid(&self) -> bool {
        if self.indices.len() != self.values.len() {
            return false;
        }
        if self.values.iter().any(|v| *v <= 0.0 || !v.is_finite()) {
            return false;
        }
        self.indices.windows(2).all(|w| w[0] < w[1])
    }

    /// Scale values to unit L2 norm. No-op for empty vectors.
    pub fn l2_normalize(&mut self) {
        let norm: f32 = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut self.values {
                *v /= norm;
            }
        }
    }

    /// Dot product over shared term ids. Both operands must be sorted
    /// by index, which [`is_valid`](Self::is_valid) guarantees.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut sum = 0.0f32;
        let (mut i, mut j) = (0usize, 0usize);
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// A single search hit projected for callers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content: String,
    pub relative_path: String,
    pub start_line: u32,
    pub end_line: u32,
    /// Language name derived from the file extension.
    pub language: String,
    pub score: f32,
}

/// Map a file extension (no leading dot) to a language name.
///
/// Unknown extensions fall through to the extension itself, so results
/// for niche file types still carry something useful.
pub fn language_for_extension(ext: &str) -> String {
    match ext {
        "rs" => "rust",
        "py" | "pyw" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" | "zsh" => "shell",
        "md" => "markdown",
        other => return other.to_string(),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_carries_codebase_path_metadata() {
        let c = CodeChunk::new("/repo", "src/a.rs", "fn a() {}".into(), 1, 1, "rs");
        assert_eq!(
            c.metadata.get(METADATA_CODEBASE_PATH),
            Some(&serde_json::Value::String("/repo".into()))
        );
        assert!(c.id.starts_with("chunk_"));
    }

    #[test]
    fn equal_chunks_share_an_id() {
        let a = CodeChunk::new("/r", "a.rs", "x".into(), 1, 1, "rs");
        let b = CodeChunk::new("/other", "a.rs", "x".into(), 1, 1, "rs");
        // The codebase path lives in metadata, not in the id material.
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn sparse_validity() {
        let ok = SparseVector {
            indices: vec![1, 4, 9],
            values: vec![0.5, 1.0, 2.0],
        };
        assert!(ok.is_valid());

        let dup = SparseVector {
            indices: vec![1, 1],
            values: vec![0.5, 0.5],
        };
        assert!(!dup.is_valid());

        let nonpositive = SparseVector {
            indices: vec![1],
            values: vec![0.0],
        };
        assert!(!nonpositive.is_valid());

        let ragged = SparseVector {
            indices: vec![1, 2],
            values: vec![0.5],
        };
        assert!(!ragged.is_valid());
    }

    #[test]
    fn sparse_dot_over_shared_terms() {
        let a = SparseVector {
            indices: vec![1, 3, 5],
            values: vec![1.0, 2.0, 3.0],
        };
        let b = SparseVector {
            indices: vec![3, 5, 7],
            values: vec![4.0, 5.0, 6.0],
        };
        // 2*4 + 3*5
        assert!((a.dot(&b) - 23.0).abs() < 1e-6);
        assert_eq!(a.dot(&SparseVector::default()), 0.0);
    }

    #[test]
    fn sparse_l2_normalize() {
        let mut v = SparseVector {
            indices: vec![0, 1],
            values: vec![3.0, 4.0],
        };
        v.l2_normalize();
        let norm: f32 = v.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn language_mapping() {
        assert_eq!(language_for_extension("rs"), "rust");
        assert_eq!(language_for_extension("tsx"), "typescript");
        assert_eq!(language_for_extension("zig"), "zig");
    }
}
