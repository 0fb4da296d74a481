//! Syntax-aware splitting at declaration boundaries.
//!
//! Parses a file with the tree-sitter grammar matching its extension and
//! emits one chunk per run of top-level declarations (functions, types,
//! classes, impl blocks, …), coalescing adjacent small declarations up to
//! the configured chunk size. A declaration larger than the chunk size is
//! sub-split with the character splitter at its own line offset.
//!
//! Grammars: Rust, Python, JavaScript, TypeScript, Go. Everything else —
//! and any file the parser rejects — is handled by the caller's character
//! fallback.

use anyhow::{anyhow, Result};
use tree_sitter::{Language, Parser};

use super::{split_characters, RawChunk};

/// Grammar for a file extension, or `None` when the language is not
/// covered by the syntax-aware splitter.
pub fn grammar_for_extension(ext: &str) -> Option<Language> {
    match ext {
        "rs" => Some(tree_sitter_rust::LANGUAGE.into()),
        "py" | "pyw" => Some(tree_sitter_python::LANGUAGE.into()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "ts" | "tsx" | "mts" | "cts" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        _ => None,
    }
}

/// Split `source` at top-level declaration boundaries.
///
/// Errors when the parser cannot produce a usable tree; callers fall back
/// to character splitting in that case.
pub fn split_declarations(
    source: &str,
    language: Language,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Result<Vec<RawChunk>> {
    let mut parser = Parser::new();
    parser
        .set_language(&language)
        .map_err(|e| anyhow!("failed to load grammar: {}", e))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| anyhow!("parser produced no tree"))?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(anyhow!("parse error"));
    }

    // Top-level named nodes as (byte span, line span) groups.
    let mut chunks: Vec<RawChunk> = Vec::new();
    let mut group: Option<(usize, usize, u32, u32)> = None; // (start_byte, end_byte, start_line, end_line)

    let mut cursor = root.walk();
    for node in root.named_children(&mut cursor) {
        let start_byte = node.start_byte();
        let end_byte = node.end_byte();
        let start_line = node.start_position().row as u32 + 1;
        let end_line = node.end_position().row as u32 + 1;
        let node_len = end_byte - start_byte;

        if node_len > chunk_size {
            // Flush the pending group, then sub-split the oversized node.
            if let Some(g) = group.take() {
                push_group(&mut chunks, source, g);
            }
            let body = &source[start_byte..end_byte];
            chunks.extend(split_characters(
                body,
                chunk_size,
                chunk_overlap,
                start_line - 1,
            ));
            continue;
        }

        group = match group {
            None => Some((start_byte, end_byte, start_line, end_line)),
            Some((gs, _, gl, _)) if end_byte - gs <= chunk_size => {
                Some((gs, end_byte, gl, end_line))
            }
            Some(g) => {
                push_group(&mut chunks, source, g);
                Some((start_byte, end_byte, start_line, end_line))
            }
        };
    }
    if let Some(g) = group {
        push_group(&mut chunks, source, g);
    }

    Ok(chunks)
}

fn push_group(chunks: &mut Vec<RawChunk>, source: &str, group: (usize, usize, u32, u32)) {
    let (start_byte, end_byte, start_line, end_line) = group;
    let content = source[start_byte..end_byte].to_string();
    if !content.trim().is_empty() {
        chunks.push(RawChunk {
            content,
            start_line,
            end_line,
        });
    }
}
