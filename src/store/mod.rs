//! Sparse+dense vector storage abstraction.
//!
//! The [`VectorStore`] trait defines every operation the indexing pipeline
//! and search path need, enabling pluggable backends. One local reference
//! implementation ships in [`sqlite`]; remote services would implement the
//! same trait behind configuration.
//!
//! This module also hosts the backend-independent pieces:
//!
//! - the minimum [filter grammar](parse_filter) every implementation must
//!   accept (`field == 'literal'` and `field in ['a', 'b']`);
//! - [Reciprocal Rank Fusion](rrf_fuse) for combining dense and sparse
//!   rankings in hybrid search.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CodeChunk, EmbeddedChunk};

/// Default RRF constant: `score = Σ 1 / (k + rank)`.
pub const RRF_K: f32 = 60.0;

/// Collection metadata as persisted by the backend.
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub is_hybrid: bool,
    pub document_count: usize,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
}

/// Options for dense search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Post-scoring similarity floor.
    pub threshold: Option<f32>,
    /// Optional filter expression (see [`parse_filter`]).
    pub filter: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            threshold: None,
            filter: None,
        }
    }
}

/// Options for hybrid search.
#[derive(Debug, Clone)]
pub struct HybridSearchOptions {
    pub limit: usize,
    pub filter: Option<String>,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            filter: None,
        }
    }
}

/// The two halves of a hybrid request: a dense query vector and the raw
/// query text for the sparse side.
#[derive(Debug, Clone)]
pub struct HybridRequest {
    pub dense: Vec<f32>,
    pub text: String,
}

/// A stored chunk with its retrieval score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: CodeChunk,
    pub score: f32,
}

/// Storage backend contract for code-chunk collections.
///
/// | Op | Guarantee |
/// |----|-----------|
/// | `create_collection` / `create_hybrid_collection` | fails if the name exists |
/// | `drop_collection` | idempotent on non-existent names |
/// | `insert` / `insert_hybrid` | upsert by chunk id (collision ⇒ replace) |
/// | `delete` | unknown ids silently skipped; hybrid retrains BM25 |
/// | `query` | projection of matching rows; empty filter = all rows |
/// | `search` | cosine similarity, descending, threshold after scoring |
/// | `hybrid_search` | RRF fusion, dense-only fallback on empty sparse query |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    async fn create_hybrid_collection(&self, name: &str, dimension: usize) -> Result<()>;

    async fn drop_collection(&self, name: &str) -> Result<()>;

    async fn has_collection(&self, name: &str) -> Result<bool>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo>;

    async fn insert(&self, name: &str, chunks: &[EmbeddedChunk]) -> Result<()>;

    async fn insert_hybrid(&self, name: &str, chunks: &[EmbeddedChunk]) -> Result<()>;

    async fn delete(&self, name: &str, ids: &[String]) -> Result<()>;

    /// Project `fields` out of rows matching `filter`. Field names use the
    /// caller-facing spelling (`relativePath`, `startLine`, …). An
    /// unparseable filter warns and returns unfiltered rows.
    async fn query(
        &self,
        name: &str,
        filter: &str,
        fields: &[&str],
        limit: Option<usize>,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>>;

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<ScoredChunk>>;

    async fn hybrid_search(
        &self,
        name: &str,
        request: &HybridRequest,
        options: &HybridSearchOptions,
    ) -> Result<Vec<ScoredChunk>>;

    /// Capacity gate; the local backend always has room.
    async fn check_collection_limit(&self) -> Result<bool>;
}

// ============ Filter grammar ============

/// Parsed form of the minimum filter grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `field == 'literal'`
    Eq(String, String),
    /// `field in ['a', 'b', …]`
    In(String, Vec<String>),
}

/// Parse a filter expression, or `None` when it falls outside the grammar.
/// Callers must warn and proceed unfiltered on `None` — never raise.
pub fn parse_filter(expr: &str) -> Option<Filter> {
    let expr = expr.trim();
    if expr.is_empty() {
        return None;
    }

    if let Some((field, rest)) = expr.split_once("==") {
        let field = parse_identifier(field)?;
        let value = parse_quoted(rest.trim())?;
        return Some(Filter::Eq(field, value));
    }

    if let Some((field, rest)) = split_keyword(expr, " in ") {
        let field = parse_identifier(&field)?;
        let rest = rest.trim();
        let inner = rest.strip_prefix('[')?.strip_suffix(']')?;
        let mut values = Vec::new();
        for part in inner.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            values.push(parse_quoted(part)?);
        }
        if values.is_empty() {
            return None;
        }
        return Some(Filter::In(field, values));
    }

    None
}

fn split_keyword(expr: &str, keyword: &str) -> Option<(String, String)> {
    let pos = expr.find(keyword)?;
    Some((
        expr[..pos].to_string(),
        expr[pos + keyword.len()..].to_string(),
    ))
}

fn parse_identifier(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() || !s.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some(s.to_string())
}

fn parse_quoted(s: &str) -> Option<String> {
    let s = s.trim();
    let inner = s
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')))?;
    Some(inner.to_string())
}

// ============ Reciprocal Rank Fusion ============

/// Fuse two ranked id lists with RRF: each id scores
/// `Σ 1/(k + rank)` over the lists it appears in (ranks are 1-indexed).
/// Returns the `limit` highest-scoring ids; ties break on ascending id.
pub fn rrf_fuse(
    dense_ranked: &[String],
    sparse_ranked: &[String],
    k: f32,
    limit: usize,
) -> Vec<(String, f32)> {
    let mut scores: std::collections::HashMap<&str, f32> = std::collections::HashMap::new();
    for ranked in [dense_ranked, sparse_ranked] {
        for (rank0, id) in ranked.iter().enumerate() {
            *scores.entry(id.as_str()).or_insert(0.0) += 1.0 / (k + rank0 as f32 + 1.0);
        }
    }

    let mut fused: Vec<(String, f32)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused.truncate(limit);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_equality() {
        assert_eq!(
            parse_filter("relativePath == 'src/main.rs'"),
            Some(Filter::Eq("relativePath".into(), "src/main.rs".into()))
        );
        assert_eq!(
            parse_filter("fileExtension == \"rs\""),
            Some(Filter::Eq("fileExtension".into(), "rs".into()))
        );
    }

    #[test]
    fn parse_membership() {
        assert_eq!(
            parse_filter("fileExtension in ['rs', 'py']"),
            Some(Filter::In(
                "fileExtension".into(),
                vec!["rs".into(), "py".into()]
            ))
        );
    }

    #[test]
    fn unparseable_filters_are_none() {
        assert_eq!(parse_filter(""), None);
        assert_eq!(parse_filter("startLine > 10"), None);
        assert_eq!(parse_filter("a == b"), None); // unquoted literal
        assert_eq!(parse_filter("x in []"), None);
        assert_eq!(parse_filter("not a filter at all"), None);
    }

    #[test]
    fn rrf_scores_sum_over_lists() {
        let dense = vec!["a".to_string(), "b".to_string()];
        let sparse = vec!["b".to_string(), "c".to_string()];
        let fused = rrf_fuse(&dense, &sparse, RRF_K, 10);

        // "b" appears at rank 2 dense and rank 1 sparse.
        let b_score = fused.iter().find(|(id, _)| id == "b").unwrap().1;
        let expected = 1.0 / (RRF_K + 2.0) + 1.0 / (RRF_K + 1.0);
        assert!((b_score - expected).abs() < 1e-6);

        // "b" outranks both single-list entries.
        assert_eq!(fused[0].0, "b");
    }

    #[test]
    fn rrf_ties_break_on_id_order() {
        let dense = vec!["zeta".to_string()];
        let sparse = vec!["alpha".to_string()];
        let fused = rrf_fuse(&dense, &sparse, RRF_K, 10);
        // Equal scores: ascending id wins.
        assert_eq!(fused[0].0, "alpha");
        assert_eq!(fused[1].0, "zeta");
    }

    #[test]
    fn rrf_respects_limit() {
        let dense: Vec<String> = (0..20).map(|i| format!("id{:02}", i)).collect();
        let fused = rrf_fuse(&dense, &[], RRF_K, 5);
        assert_eq!(fused.len(), 5);
        assert_eq!(fused[0].0, "id00");
    }
}
