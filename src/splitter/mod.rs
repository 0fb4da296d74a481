//! Code-aware file splitting.
//!
//! Turns one file's text into an ordered list of [`RawChunk`]s, each
//! covering a 1-indexed inclusive line range. Two variants:
//!
//! - **syntax-aware** ([`ast`]): parses the file with tree-sitter and splits
//!   at declaration boundaries, coalescing small neighbors; falls back to
//!   the character splitter on parse errors or unsupported languages.
//! - **character-based**: accumulates whole lines up to a target size with
//!   a configurable overlap carried into the next chunk.
//!
//! Chunks are never empty; blank input yields no chunks.

pub mod ast;

use serde::Deserialize;

/// A split region before it becomes a [`crate::models::CodeChunk`].
#[derive(Debug, Clone, PartialEq)]
pub struct RawChunk {
    pub content: String,
    /// 1-indexed, inclusive.
    pub start_line: u32,
    /// 1-indexed, inclusive, `>= start_line`.
    pub end_line: u32,
}

/// Which splitting strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    /// Declaration-boundary splitting with character fallback.
    Ast,
    /// Fixed-size, line-respecting splitting with overlap.
    Chars,
}

/// Configured splitter applied to every indexed file.
#[derive(Debug, Clone)]
pub struct CodeSplitter {
    mode: SplitMode,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl CodeSplitter {
    pub fn new(mode: SplitMode, chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            mode,
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    /// Split `text` according to the configured mode. `extension` selects
    /// the tree-sitter grammar for the syntax-aware mode; files in
    /// unsupported languages use the character splitter.
    pub fn split(&self, text: &str, extension: &str) -> Vec<RawChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        if self.mode == SplitMode::Ast {
            if let Some(language) = ast::grammar_for_extension(extension) {
                match ast::split_declarations(text, language, self.chunk_size, self.chunk_overlap)
                {
                    Ok(chunks) if !chunks.is_empty() => return chunks,
                    _ => {} // parse failure: character fallback below
                }
            }
        }
        split_characters(text, self.chunk_size, self.chunk_overlap, 0)
    }
}

/// Line-respecting character splitter.
///
/// Accumulates whole lines until the next line would push the chunk past
/// `chunk_size` characters, then emits and backs up far enough to carry
/// roughly `chunk_overlap` characters into the next chunk. Whitespace-only
/// regions are dropped. `line_offset` shifts reported line numbers when
/// splitting a slice out of a larger file.
pub fn split_characters(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    line_offset: u32,
) -> Vec<RawChunk> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < lines.len() {
        let mut size = 0usize;
        let mut end = start;
        while end < lines.len() {
            let line_len = lines[end].len() + 1;
            if end > start && size + line_len > chunk_size {
                break;
            }
            size += line_len;
            end += 1;
        }

        let content = lines[start..end].join("\n");
        if !content.trim().is_empty() {
            chunks.push(RawChunk {
                content,
                start_line: line_offset + start as u32 + 1,
                end_line: line_offset + end as u32,
            });
        }

        if end >= lines.len() {
            break;
        }

        // Walk back to carry the overlap, but always advance.
        let mut back = end;
        let mut carried = 0usize;
        while back > start + 1 {
            let line_len = lines[back - 1].len() + 1;
            if carried + line_len > chunk_overlap {
                break;
            }
            carried += line_len;
            back -= 1;
        }
        start = back.max(start + 1);
    }

    // A non-blank input always produces at least one chunk.
    if chunks.is_empty() {
        chunks.push(RawChunk {
            content: text.trim_end().to_string(),
            start_line: line_offset + 1,
            end_line: line_offset + lines.len() as u32,
        });
    }

    chunks
}
