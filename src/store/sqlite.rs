//! SQLite-backed [`VectorStore`] reference implementation.
//!
//! One database file per collection at `{storage_dir}/{name}.db`, with the
//! trained BM25 model of a hybrid collection persisted next to it as
//! `{name}_bm25.json`. Schema:
//!
//! ```text
//! documents(id PK, content, relative_path, start_line, end_line,
//!           file_extension, metadata JSON, dense_vector BLOB,
//!           sparse_indices JSON NULL, sparse_values JSON NULL)
//! _metadata(key PK, value)   -- dimension, isHybrid, createdAt, documentCount
//! ```
//!
//! Dense search scans candidate rows and recomputes cosine similarity
//! exactly, so ranks are monotone in similarity by construction. Sparse
//! search fetches rows with non-null sparse columns and scores
//! `Σ w_doc · w_query` over shared term ids. Hybrid fuses both rankings
//! with RRF and falls back to dense-only when the sparse side of the query
//! produces no terms.
//!
//! The BM25 model is owned by the collection: `insert_hybrid` and `delete`
//! retrain it over the full post-change corpus and rewrite every stored
//! sparse vector before returning, so readers always score against vectors
//! generated by the persisted model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tokio::sync::Mutex;

use crate::bm25::Bm25Vectorizer;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::CoreError;
use crate::models::{CodeChunk, EmbeddedChunk, SparseVector};
use crate::store::{
    parse_filter, rrf_fuse, CollectionInfo, Filter, HybridRequest, HybridSearchOptions,
    ScoredChunk, SearchOptions, VectorStore, RRF_K,
};

/// Over-fetch factor for the per-modality candidate lists fused by RRF.
const CANDIDATE_MULTIPLIER: usize = 5;

/// Local vector store holding one SQLite file per collection.
pub struct SqliteVectorStore {
    storage_dir: PathBuf,
    pools: Mutex<HashMap<String, SqlitePool>>,
}

impl SqliteVectorStore {
    pub fn new(storage_dir: &Path) -> Self {
        Self {
            storage_dir: storage_dir.to_path_buf(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn db_path(&self, name: &str) -> PathBuf {
        self.storage_dir.join(format!("{}.db", name))
    }

    fn bm25_path(&self, name: &str) -> PathBuf {
        self.storage_dir.join(format!("{}_bm25.json", name))
    }

    async fn connect(&self, name: &str, create: bool) -> Result<SqlitePool> {
        let path = self.db_path(name);
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(create)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open collection database {}", path.display()))?;
        Ok(pool)
    }

    /// Pool for an existing collection; errors with `CollectionNotFound`
    /// when the backing file is absent.
    async fn pool_for(&self, name: &str) -> Result<SqlitePool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(name) {
            return Ok(pool.clone());
        }
        if !self.db_path(name).exists() {
            return Err(CoreError::CollectionNotFound(name.to_string()).into());
        }
        let pool = self.connect(name, false).await?;
        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    async fn create_with_mode(&self, name: &str, dimension: usize, hybrid: bool) -> Result<()> {
        if self.db_path(name).exists() {
            return Err(CoreError::CollectionExists(name.to_string()).into());
        }
        std::fs::create_dir_all(&self.storage_dir).with_context(|| {
            format!(
                "failed to create storage directory {}",
                self.storage_dir.display()
            )
        })?;

        let pool = self.connect(name, true).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                relative_path TEXT NOT NULL,
                start_line INTEGER NOT NULL,
                end_line INTEGER NOT NULL,
                file_extension TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                dense_vector BLOB NOT NULL,
                sparse_indices TEXT,
                sparse_values TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_relative_path ON documents(relative_path)",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        for (key, value) in [
            ("dimension", dimension.to_string()),
            ("isHybrid", hybrid.to_string()),
            ("createdAt", Utc::now().to_rfc3339()),
            ("documentCount", "0".to_string()),
        ] {
            sqlx::query("INSERT OR REPLACE INTO _metadata (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&pool)
                .await?;
        }

        if hybrid {
            // Empty hybrid collections still persist an (untrained) model.
            Bm25Vectorizer::default().save(&self.bm25_path(name))?;
        }

        self.pools
            .lock()
            .await
            .insert(name.to_string(), pool);
        Ok(())
    }

    async fn metadata_value(&self, pool: &SqlitePool, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM _metadata WHERE key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await?;
        Ok(value)
    }

    async fn dimension_of(&self, pool: &SqlitePool) -> Result<usize> {
        self.metadata_value(pool, "dimension")
            .await?
            .and_then(|v| v.parse().ok())
            .context("collection metadata is missing its dimension")
    }

    async fn is_hybrid(&self, pool: &SqlitePool) -> Result<bool> {
        Ok(self
            .metadata_value(pool, "isHybrid")
            .await?
            .map(|v| v == "true")
            .unwrap_or(false))
    }

    async fn refresh_document_count(&self, pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "UPDATE _metadata SET value = (SELECT COUNT(*) FROM documents) WHERE key = 'documentCount'",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    fn check_dimensions(chunks: &[EmbeddedChunk], expected: usize) -> Result<()> {
        for chunk in chunks {
            if chunk.dense.len() != expected {
                return Err(CoreError::DimensionMismatch {
                    expected,
                    actual: chunk.dense.len(),
                }
                .into());
            }
        }
        Ok(())
    }

    async fn upsert_documents(&self, pool: &SqlitePool, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut tx = pool.begin().await?;
        for item in chunks {
            let chunk = &item.chunk;
            let metadata = serde_json::to_string(&chunk.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO documents (id, content, relative_path, start_line, end_line,
                                       file_extension, metadata, dense_vector,
                                       sparse_indices, sparse_values)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)
                ON CONFLICT(id) DO UPDATE SET
                    content = excluded.content,
                    relative_path = excluded.relative_path,
                    start_line = excluded.start_line,
                    end_line = excluded.end_line,
                    file_extension = excluded.file_extension,
                    metadata = excluded.metadata,
                    dense_vector = excluded.dense_vector,
                    sparse_indices = NULL,
                    sparse_values = NULL
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.content)
            .bind(&chunk.relative_path)
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.file_extension)
            .bind(metadata)
            .bind(vec_to_blob(&item.dense))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        self.refresh_document_count(pool).await?;
        Ok(())
    }

    /// Retrain the collection's BM25 model over the full current corpus and
    /// rewrite every stored sparse vector. Training completes before any
    /// sparse column is touched.
    async fn retrain_bm25(&self, name: &str, pool: &SqlitePool) -> Result<()> {
        let rows = sqlx::query("SELECT id, content FROM documents")
            .fetch_all(pool)
            .await?;

        let model_path = self.bm25_path(name);
        if rows.is_empty() {
            Bm25Vectorizer::default().save(&model_path)?;
            return Ok(());
        }

        let corpus: Vec<String> = rows.iter().map(|r| r.get::<String, _>("content")).collect();
        let mut model = Bm25Vectorizer::default();
        model.train(&corpus)?;

        let mut tx = pool.begin().await?;
        for row in &rows {
            let id: String = row.get("id");
            let content: String = row.get("content");
            let sparse = model.vectorize(&content)?;
            if sparse.is_empty() {
                sqlx::query(
                    "UPDATE documents SET sparse_indices = NULL, sparse_values = NULL WHERE id = ?",
                )
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query(
                    "UPDATE documents SET sparse_indices = ?, sparse_values = ? WHERE id = ?",
                )
                .bind(serde_json::to_string(&sparse.indices)?)
                .bind(serde_json::to_string(&sparse.values)?)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        model.save(&model_path)?;
        Ok(())
    }

    /// WHERE clause and binds for a filter expression. Unparseable filters
    /// (or unknown fields) warn and match everything.
    fn filter_clause(filter: Option<&str>) -> (String, Vec<String>) {
        let Some(expr) = filter.filter(|f| !f.trim().is_empty()) else {
            return (String::new(), Vec::new());
        };
        let parsed = match parse_filter(expr) {
            Some(parsed) => parsed,
            None => {
                eprintln!("warning: unsupported filter '{}'; returning unfiltered results", expr);
                return (String::new(), Vec::new());
            }
        };
        match parsed {
            Filter::Eq(field, value) => match column_for_field(&field) {
                Some(column) => (format!(" WHERE {} = ?", column), vec![value]),
                None => {
                    eprintln!("warning: unknown filter field '{}'; returning unfiltered results", field);
                    (String::new(), Vec::new())
                }
            },
            Filter::In(field, values) => match column_for_field(&field) {
                Some(column) => {
                    let placeholders = vec!["?"; values.len()].join(", ");
                    (format!(" WHERE {} IN ({})", column, placeholders), values)
                }
                None => {
                    eprintln!("warning: unknown filter field '{}'; returning unfiltered results", field);
                    (String::new(), Vec::new())
                }
            },
        }
    }

    async fn fetch_rows(
        &self,
        pool: &SqlitePool,
        filter: Option<&str>,
        sparse_only: bool,
    ) -> Result<Vec<SqliteRow>> {
        let (mut clause, binds) = Self::filter_clause(filter);
        if sparse_only {
            if clause.is_empty() {
                clause = " WHERE sparse_indices IS NOT NULL".to_string();
            } else {
                clause.push_str(" AND sparse_indices IS NOT NULL");
            }
        }
        let sql = format!(
            "SELECT id, content, relative_path, start_line, end_line, file_extension, \
             metadata, dense_vector, sparse_indices, sparse_values FROM documents{}",
            clause
        );
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        Ok(query.fetch_all(pool).await?)
    }
}

fn column_for_field(field: &str) -> Option<&'static str> {
    match field {
        "id" => Some("id"),
        "content" => Some("content"),
        "relativePath" => Some("relative_path"),
        "startLine" => Some("start_line"),
        "endLine" => Some("end_line"),
        "fileExtension" => Some("file_extension"),
        _ => None,
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<CodeChunk> {
    let metadata_json: String = row.get("metadata");
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    Ok(CodeChunk {
        id: row.get("id"),
        content: row.get("content"),
        relative_path: row.get("relative_path"),
        start_line: row.get::<i64, _>("start_line") as u32,
        end_line: row.get::<i64, _>("end_line") as u32,
        file_extension: row.get("file_extension"),
        metadata,
    })
}

fn row_sparse_vector(row: &SqliteRow) -> Option<SparseVector> {
    let indices_json: Option<String> = row.get("sparse_indices");
    let values_json: Option<String> = row.get("sparse_values");
    let indices: Vec<u32> = serde_json::from_str(&indices_json?).ok()?;
    let values: Vec<f32> = serde_json::from_str(&values_json?).ok()?;
    Some(SparseVector { indices, values })
}

fn projected_value(chunk: &CodeChunk, field: &str) -> Option<serde_json::Value> {
    match field {
        "id" => Some(serde_json::Value::String(chunk.id.clone())),
        "content" => Some(serde_json::Value::String(chunk.content.clone())),
        "relativePath" => Some(serde_json::Value::String(chunk.relative_path.clone())),
        "startLine" => Some(serde_json::Value::from(chunk.start_line)),
        "endLine" => Some(serde_json::Value::from(chunk.end_line)),
        "fileExtension" => Some(serde_json::Value::String(chunk.file_extension.clone())),
        "metadata" => serde_json::to_value(&chunk.metadata).ok(),
        _ => None,
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        self.create_with_mode(name, dimension, false).await
    }

    async fn create_hybrid_collection(&self, name: &str, dimension: usize) -> Result<()> {
        self.create_with_mode(name, dimension, true).await
    }

    async fn drop_collection(&self, name: &str) -> Result<()> {
        if let Some(pool) = self.pools.lock().await.remove(name) {
            pool.close().await;
        }
        let db = self.db_path(name);
        for path in [
            db.clone(),
            PathBuf::from(format!("{}-wal", db.display())),
            PathBuf::from(format!("{}-shm", db.display())),
            self.bm25_path(name),
        ] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("failed to remove {}", path.display()))
                }
            }
        }
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool> {
        Ok(self.db_path(name).exists())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&self.storage_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("db") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let pool = self.pool_for(name).await?;
        Ok(CollectionInfo {
            name: name.to_string(),
            dimension: self.dimension_of(&pool).await?,
            is_hybrid: self.is_hybrid(&pool).await?,
            document_count: self
                .metadata_value(&pool, "documentCount")
                .await?
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            created_at: self
                .metadata_value(&pool, "createdAt")
                .await?
                .unwrap_or_default(),
        })
    }

    async fn insert(&self, name: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let pool = self.pool_for(name).await?;
        let dimension = self.dimension_of(&pool).await?;
        Self::check_dimensions(chunks, dimension)?;
        self.upsert_documents(&pool, chunks).await
    }

    async fn insert_hybrid(&self, name: &str, chunks: &[EmbeddedChunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let pool = self.pool_for(name).await?;
        if !self.is_hybrid(&pool).await? {
            return Err(CoreError::Invariant(format!(
                "insert_hybrid called on dense-only collection '{}'",
                name
            ))
            .into());
        }
        let dimension = self.dimension_of(&pool).await?;
        Self::check_dimensions(chunks, dimension)?;
        self.upsert_documents(&pool, chunks).await?;
        self.retrain_bm25(name, &pool).await
    }

    async fn delete(&self, name: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let pool = self.pool_for(name).await?;

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("DELETE FROM documents WHERE id IN ({})", placeholders);
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        query.execute(&pool).await?;
        self.refresh_document_count(&pool).await?;

        if self.is_hybrid(&pool).await? {
            self.retrain_bm25(name, &pool).await?;
        }
        Ok(())
    }

    async fn query(
        &self,
        name: &str,
        filter: &str,
        fields: &[&str],
        limit: Option<usize>,
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>> {
        let pool = self.pool_for(name).await?;
        let filter = (!filter.trim().is_empty()).then_some(filter);
        let mut rows = self.fetch_rows(&pool, filter, false).await?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            let mut projected = serde_json::Map::new();
            for field in fields {
                match projected_value(&chunk, field) {
                    Some(value) => {
                        projected.insert(field.to_string(), value);
                    }
                    None => {
                        eprintln!("warning: unknown query field '{}'", field);
                    }
                }
            }
            out.push(projected);
        }
        Ok(out)
    }

    async fn search(
        &self,
        name: &str,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<ScoredChunk>> {
        let pool = self.pool_for(name).await?;
        let rows = self.fetch_rows(&pool, options.filter.as_deref(), false).await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("dense_vector");
            let vector = blob_to_vec(&blob);
            let score = cosine_similarity(query, &vector);
            scored.push(ScoredChunk {
                chunk: row_to_chunk(row)?,
                score,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        if let Some(threshold) = options.threshold {
            scored.retain(|s| s.score >= threshold);
        }
        scored.truncate(options.top_k);
        Ok(scored)
    }

    async fn hybrid_search(
        &self,
        name: &str,
        request: &HybridRequest,
        options: &HybridSearchOptions,
    ) -> Result<Vec<ScoredChunk>> {
        let pool = self.pool_for(name).await?;

        let dense_only = |limit: usize| SearchOptions {
            top_k: limit,
            threshold: None,
            filter: options.filter.clone(),
        };

        // Sparse side: a missing/untrained model or a query with no known
        // terms silently degrades to dense-only search.
        let model_path = self.bm25_path(name);
        let sparse_query = if model_path.exists() {
            match Bm25Vectorizer::load(&model_path) {
                Ok(model) if model.is_trained() => {
                    model.vectorize(&request.text).unwrap_or_default()
                }
                _ => SparseVector::default(),
            }
        } else {
            SparseVector::default()
        };

        if sparse_query.is_empty() || !sparse_query.is_valid() {
            return self.search(name, &request.dense, &dense_only(options.limit)).await;
        }

        let candidate_k = options.limit.max(1) * CANDIDATE_MULTIPLIER;
        let dense_candidates = self
            .search(name, &request.dense, &dense_only(candidate_k))
            .await?;

        let sparse_rows = self
            .fetch_rows(&pool, options.filter.as_deref(), true)
            .await?;
        let mut sparse_candidates: Vec<(CodeChunk, f32)> = Vec::new();
        for row in &sparse_rows {
            let Some(doc_vector) = row_sparse_vector(row) else {
                continue;
            };
            let score = doc_vector.dot(&sparse_query);
            if score > 0.0 {
                sparse_candidates.push((row_to_chunk(row)?, score));
            }
        }
        sparse_candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        sparse_candidates.truncate(candidate_k);

        let dense_ids: Vec<String> = dense_candidates
            .iter()
            .map(|s| s.chunk.id.clone())
            .collect();
        let sparse_ids: Vec<String> = sparse_candidates
            .iter()
            .map(|(c, _)| c.id.clone())
            .collect();

        let mut by_id: HashMap<String, CodeChunk> = HashMap::new();
        for candidate in dense_candidates {
            by_id.insert(candidate.chunk.id.clone(), candidate.chunk);
        }
        for (chunk, _) in sparse_candidates {
            by_id.entry(chunk.id.clone()).or_insert(chunk);
        }

        let fused = rrf_fuse(&dense_ids, &sparse_ids, RRF_K, options.limit);
        Ok(fused
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.remove(&id).map(|chunk| ScoredChunk { chunk, score })
            })
            .collect())
    }

    async fn check_collection_limit(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, SqliteVectorStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteVectorStore::new(&tmp.path().join("collections"));
        (tmp, store)
    }

    fn chunk(path: &str, content: &str, dense: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            chunk: CodeChunk::new("/repo", path, content.to_string(), 1, 1, ext_of(path)),
            dense,
        }
    }

    fn ext_of(path: &str) -> &str {
        path.rsplit('.').next().unwrap_or("")
    }

    #[tokio::test]
    async fn create_and_duplicate() {
        let (_tmp, store) = store();
        store.create_collection("c1", 4).await.unwrap();
        assert!(store.has_collection("c1").await.unwrap());

        let err = store.create_collection("c1", 4).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::CollectionExists(_))
        ));
    }

    #[tokio::test]
    async fn drop_is_idempotent() {
        let (_tmp, store) = store();
        store.create_hybrid_collection("c1", 4).await.unwrap();
        store.drop_collection("c1").await.unwrap();
        assert!(!store.has_collection("c1").await.unwrap());
        // Second drop of a non-existent collection succeeds.
        store.drop_collection("c1").await.unwrap();
    }

    #[tokio::test]
    async fn list_reflects_persisted_state() {
        let (_tmp, store) = store();
        assert!(store.list_collections().await.unwrap().is_empty());
        store.create_collection("beta", 4).await.unwrap();
        store.create_collection("alpha", 4).await.unwrap();
        assert_eq!(store.list_collections().await.unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn insert_query_delete_contract() {
        let (_tmp, store) = store();
        store.create_collection("c", 4).await.unwrap();

        let chunks = vec![
            chunk("a.rs", "fn alpha() {}", vec![1.0, 0.0, 0.0, 0.0]),
            chunk("b.rs", "fn beta() {}", vec![0.0, 1.0, 0.0, 0.0]),
            chunk("c.rs", "fn gamma() {}", vec![0.0, 0.0, 1.0, 0.0]),
        ];
        store.insert("c", &chunks).await.unwrap();

        let rows = store.query("c", "", &["id"], None).await.unwrap();
        let ids: Vec<&str> = rows
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_str()))
            .collect();
        assert_eq!(rows.len(), 3);
        for item in &chunks {
            assert!(ids.contains(&item.chunk.id.as_str()));
        }

        let to_delete = vec![chunks[0].chunk.id.clone(), "chunk_missing".to_string()];
        store.delete("c", &to_delete).await.unwrap();

        let rows = store.query("c", "", &["id"], None).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(!rows
            .iter()
            .any(|r| r.get("id").and_then(|v| v.as_str()) == Some(chunks[0].chunk.id.as_str())));

        let info = store.collection_info("c").await.unwrap();
        assert_eq!(info.document_count, 2);
        assert!(!info.is_hybrid);
    }

    #[tokio::test]
    async fn upsert_replaces_on_id_collision() {
        let (_tmp, store) = store();
        store.create_collection("c", 2).await.unwrap();

        let first = chunk("a.rs", "fn same() {}", vec![1.0, 0.0]);
        store.insert("c", &[first.clone()]).await.unwrap();

        // Same chunk id, different vector: the row is replaced, not duplicated.
        let replacement = EmbeddedChunk {
            chunk: first.chunk.clone(),
            dense: vec![0.0, 1.0],
        };
        store.insert("c", &[replacement]).await.unwrap();

        let rows = store.query("c", "", &["id"], None).await.unwrap();
        assert_eq!(rows.len(), 1);

        let hits = store
            .search("c", &[0.0, 1.0], &SearchOptions::default())
            .await
            .unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn insert_rejects_wrong_dimension() {
        let (_tmp, store) = store();
        store.create_collection("c", 4).await.unwrap();
        let bad = chunk("a.rs", "fn a() {}", vec![1.0, 0.0]);
        let err = store.insert("c", &[bad]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::DimensionMismatch { expected: 4, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn missing_collection_is_typed() {
        let (_tmp, store) = store();
        let err = store.query("nope", "", &["id"], None).await.unwrap_err();
        assert!(CoreError::is_collection_not_found(&err));
    }

    #[tokio::test]
    async fn dense_search_orders_by_similarity_and_thresholds() {
        let (_tmp, store) = store();
        store.create_collection("c", 3).await.unwrap();
        store
            .insert(
                "c",
                &[
                    chunk("exact.rs", "exact match", vec![1.0, 0.0, 0.0]),
                    chunk("near.rs", "near match", vec![0.9, 0.1, 0.0]),
                    chunk("far.rs", "far away", vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "c",
                &[1.0, 0.0, 0.0],
                &SearchOptions {
                    top_k: 10,
                    threshold: None,
                    filter: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.relative_path, "exact.rs");
        assert_eq!(hits[1].chunk.relative_path, "near.rs");
        // Ranks non-increasing in similarity.
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        let strict = store
            .search(
                "c",
                &[1.0, 0.0, 0.0],
                &SearchOptions {
                    top_k: 10,
                    threshold: Some(0.99),
                    filter: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].chunk.relative_path, "exact.rs");
    }

    #[tokio::test]
    async fn search_applies_equality_filter() {
        let (_tmp, store) = store();
        store.create_collection("c", 2).await.unwrap();
        store
            .insert(
                "c",
                &[
                    chunk("a.rs", "fn a() {}", vec![1.0, 0.0]),
                    chunk("b.py", "def b(): pass", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "c",
                &[1.0, 0.0],
                &SearchOptions {
                    top_k: 10,
                    threshold: None,
                    filter: Some("fileExtension == 'py'".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.relative_path, "b.py");
    }

    #[tokio::test]
    async fn unparseable_filter_returns_unfiltered() {
        let (_tmp, store) = store();
        store.create_collection("c", 2).await.unwrap();
        store
            .insert("c", &[chunk("a.rs", "fn a() {}", vec![1.0, 0.0])])
            .await
            .unwrap();

        let rows = store
            .query("c", "startLine >= 10", &["id"], None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn query_by_relative_path_for_targeted_deletion() {
        let (_tmp, store) = store();
        store.create_collection("c", 2).await.unwrap();
        store
            .insert(
                "c",
                &[
                    chunk("src/a.rs", "fn a() {}", vec![1.0, 0.0]),
                    chunk("src/b.rs", "fn b() {}", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let rows = store
            .query("c", "relativePath == 'src/a.rs'", &["id", "relativePath"], None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get("relativePath").and_then(|v| v.as_str()),
            Some("src/a.rs")
        );
    }

    #[tokio::test]
    async fn hybrid_insert_stores_sparse_and_ranks_by_keyword() {
        let (_tmp, store) = store();
        store.create_hybrid_collection("h", 4).await.unwrap();
        store
            .insert_hybrid(
                "h",
                &[
                    chunk("calc.ts", "function calculateTotal", vec![1.0, 0.0, 0.0, 0.0]),
                    chunk("user.ts", "class UserManager", vec![0.0, 1.0, 0.0, 0.0]),
                    chunk("fetch.ts", "const fetchData", vec![0.0, 0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        // Model file sits next to the collection database.
        assert!(store.bm25_path("h").exists());

        // A dense query pointing at the "wrong" doc still surfaces the
        // keyword match through fusion.
        let hits = store
            .hybrid_search(
                "h",
                &HybridRequest {
                    dense: vec![0.0, 1.0, 0.0, 0.0],
                    text: "calculateTotal".to_string(),
                },
                &HybridSearchOptions {
                    limit: 3,
                    filter: None,
                },
            )
            .await
            .unwrap();
        assert!(!hits.is_empty());
        let paths: Vec<&str> = hits.iter().map(|h| h.chunk.relative_path.as_str()).collect();
        assert!(paths.contains(&"calc.ts"));
        assert!(paths.contains(&"user.ts"));
    }

    #[tokio::test]
    async fn hybrid_falls_back_to_dense_for_unknown_terms() {
        let (_tmp, store) = store();
        store.create_hybrid_collection("h", 4).await.unwrap();
        store
            .insert_hybrid(
                "h",
                &[
                    chunk("calc.ts", "function calculateTotal", vec![1.0, 0.0, 0.0, 0.0]),
                    chunk("user.ts", "class UserManager", vec![0.0, 1.0, 0.0, 0.0]),
                    chunk("fetch.ts", "const fetchData", vec![0.0, 0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let query = HybridRequest {
            dense: vec![1.0, 0.0, 0.0, 0.0],
            text: "nonexistent_unknown_term_xyz".to_string(),
        };
        let hybrid = store
            .hybrid_search("h", &query, &HybridSearchOptions { limit: 3, filter: None })
            .await
            .unwrap();

        let dense = store
            .search("h", &query.dense, &SearchOptions { top_k: 3, threshold: None, filter: None })
            .await
            .unwrap();

        assert_eq!(hybrid.len(), dense.len());
        for (h, d) in hybrid.iter().zip(dense.iter()) {
            assert_eq!(h.chunk.id, d.chunk.id);
        }
    }

    #[tokio::test]
    async fn hybrid_on_dense_collection_is_an_invariant_error() {
        let (_tmp, store) = store();
        store.create_collection("d", 2).await.unwrap();
        let err = store
            .insert_hybrid("d", &[chunk("a.rs", "fn a() {}", vec![1.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::Invariant(_))
        ));
    }

    #[tokio::test]
    async fn delete_retrains_the_hybrid_model() {
        let (_tmp, store) = store();
        store.create_hybrid_collection("h", 2).await.unwrap();
        let unique = chunk("only.ts", "zebra_special_term appears here", vec![1.0, 0.0]);
        let other = chunk("other.ts", "ordinary content words", vec![0.0, 1.0]);
        store
            .insert_hybrid("h", &[unique.clone(), other.clone()])
            .await
            .unwrap();

        let model = Bm25Vectorizer::load(&store.bm25_path("h")).unwrap();
        assert!(model.idf_for("zebra_special_term").is_some());

        store.delete("h", &[unique.chunk.id.clone()]).await.unwrap();

        // The term vanished from the corpus; the retrained model forgot it.
        let model = Bm25Vectorizer::load(&store.bm25_path("h")).unwrap();
        assert!(model.is_trained());
        assert!(model.idf_for("zebra_special_term").is_none());
    }

    #[tokio::test]
    async fn deleting_every_document_leaves_untrained_model() {
        let (_tmp, store) = store();
        store.create_hybrid_collection("h", 2).await.unwrap();
        let only = chunk("a.ts", "solitary content", vec![1.0, 0.0]);
        store.insert_hybrid("h", &[only.clone()]).await.unwrap();
        store.delete("h", &[only.chunk.id]).await.unwrap();

        let model = Bm25Vectorizer::load(&store.bm25_path("h")).unwrap();
        assert!(!model.is_trained());
    }
}
