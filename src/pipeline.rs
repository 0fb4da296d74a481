//! Indexing pipeline orchestration.
//!
//! [`Indexer`] wires the synchronizer, splitter, embedder, vector store,
//! and registry into the four operations callers see: full indexing,
//! incremental re-indexing, search, and clearing. Collection names are a
//! deterministic function of the codebase root (and the optional context
//! name), so the same tree always maps to the same collection across runs.
//!
//! # Ordering guarantees
//!
//! - Within one `reindex_by_change`, deletions for removed and modified
//!   paths complete before any insert begins.
//! - Hybrid upserts are issued as a single batch after every chunk of the
//!   run has been embedded, so BM25 training always sees the whole corpus
//!   before sparse vectors are stored.
//! - The registry's in-memory state is updated before each operation
//!   returns; its disk write may lag.
//!
//! # Locking
//!
//! A per-collection `tokio::sync::Mutex` serializes writers (`index`,
//! `reindex_by_change`, `clear_index`). Reads take no lock and accept the
//! snapshot they observe.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::CoreError;
use crate::hashing;
use crate::models::{language_for_extension, CodeChunk, EmbeddedChunk, SearchResult};
use crate::progress::{IndexPhase, ProgressEvent, ProgressReporter};
use crate::registry::{CodebaseRegistry, CodebaseStatus, Completion};
use crate::splitter::{CodeSplitter, SplitMode};
use crate::store::{
    HybridRequest, HybridSearchOptions, ScoredChunk, SearchOptions, VectorStore,
};
use crate::sync::FileSynchronizer;

/// Delay between per-chunk embedding calls after a batch failure.
const PER_CHUNK_DELAY: Duration = Duration::from_millis(100);

/// Construction-time knobs for [`Indexer`], extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub snapshot_dir: PathBuf,
    pub splitter_mode: SplitMode,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub batch_size: usize,
    pub max_chunks: usize,
    pub hybrid: bool,
    pub context_name: Option<String>,
    pub supported_extensions: Vec<String>,
    pub ignore_patterns: Vec<String>,
}

impl IndexerOptions {
    pub fn from_config(config: &Config) -> Self {
        let data_dir = config.storage.resolve_data_dir();
        Self {
            snapshot_dir: data_dir.join("snapshots"),
            splitter_mode: config.indexing.splitter,
            chunk_size: config.indexing.chunk_size,
            chunk_overlap: config.indexing.chunk_overlap,
            batch_size: config.indexing.batch_size,
            max_chunks: config.indexing.max_chunks,
            hybrid: config.indexing.hybrid,
            context_name: config.indexing.context_name.clone(),
            supported_extensions: config.indexing.supported_extensions.clone(),
            ignore_patterns: config.indexing.ignore_patterns.clone(),
        }
    }
}

/// Outcome of a full index run.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub files: usize,
    pub chunks: usize,
    pub completion: Completion,
}

/// Outcome of an incremental run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeStats {
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
}

/// A search request against an indexed codebase.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub threshold: Option<f32>,
    /// Extension allow-list, with or without leading dots.
    pub extensions: Option<Vec<String>>,
}

impl SearchRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            limit: 10,
            threshold: None,
            extensions: None,
        }
    }
}

/// Search results plus an in-progress hint from the registry.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub indexing_in_progress: bool,
}

/// The indexing pipeline. One instance serves every codebase; state that
/// is per-codebase (locks, synchronizers) lives in the keyed maps below.
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    registry: Arc<CodebaseRegistry>,
    splitter: CodeSplitter,
    options: IndexerOptions,
    supported: HashSet<String>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    synchronizers: Mutex<HashMap<PathBuf, Arc<Mutex<FileSynchronizer>>>>,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        registry: Arc<CodebaseRegistry>,
        options: IndexerOptions,
    ) -> Self {
        let splitter = CodeSplitter::new(
            options.splitter_mode,
            options.chunk_size,
            options.chunk_overlap,
        );
        let supported = options
            .supported_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .collect();
        Self {
            embedder,
            store,
            registry,
            splitter,
            options,
            supported,
            locks: Mutex::new(HashMap::new()),
            synchronizers: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<CodebaseRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Deterministic collection name for a codebase root: a fixed prefix
    /// (hybrid collections get their own) plus the optional context name
    /// and the first 8 hex chars of the root digest.
    pub fn collection_name(&self, root: &Path) -> String {
        let canonical = canonical_root(root);
        let digest = hashing::hash_str(&canonical.to_string_lossy());
        let prefix = if self.options.hybrid {
            "hybrid_code_chunks"
        } else {
            "code_chunks"
        };
        match &self.options.context_name {
            Some(name) => format!("{}_{}_{}", prefix, name, &digest[..8]),
            None => format!("{}_{}", prefix, &digest[..8]),
        }
    }

    /// Index a codebase. On an already-indexed root (and without `force`)
    /// this runs the incremental path instead of rebuilding from scratch.
    pub async fn index(
        &self,
        root: &Path,
        force: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<IndexStats> {
        let root = canonical_root(root);
        let root_key = root.to_string_lossy().to_string();
        let name = self.collection_name(&root);

        let lock = self.lock_for(&name).await;
        let _guard = lock.lock().await;

        let result = self.index_inner(&root, &root_key, &name, force, reporter).await;
        if let Err(err) = &result {
            let last_progress = match self.registry.get(&root_key) {
                Some(CodebaseStatus::Indexing { progress, .. }) => Some(progress),
                _ => None,
            };
            self.registry
                .set_failed(&root_key, &err.to_string(), last_progress);
        }
        result
    }

    async fn index_inner(
        &self,
        root: &Path,
        root_key: &str,
        name: &str,
        force: bool,
        reporter: &dyn ProgressReporter,
    ) -> Result<IndexStats> {
        report(reporter, IndexPhase::Preparing, 0, None);
        self.registry.set_indexing(root_key, 0);

        if force {
            self.store.drop_collection(name).await?;
            FileSynchronizer::delete_snapshot(root, &self.options.snapshot_dir)?;
            self.synchronizers.lock().await.remove(root);
        }

        if self.store.has_collection(name).await? {
            // Request-driven re-index of a known codebase.
            self.reindex_inner(root, root_key, name, reporter).await?;
            let info = self.store.collection_info(name).await?;
            let files = self.indexable_file_count(root).await?;
            self.registry
                .set_indexed(root_key, files, info.document_count, Completion::Completed);
            return Ok(IndexStats {
                files,
                chunks: info.document_count,
                completion: Completion::Completed,
            });
        }

        if !self.store.check_collection_limit().await? {
            bail!("collection limit reached; drop an existing collection and retry");
        }

        let dimension = self.embedder.dimension();
        if self.options.hybrid {
            self.store.create_hybrid_collection(name, dimension).await?;
        } else {
            self.store.create_collection(name, dimension).await?;
        }

        report(reporter, IndexPhase::Scanning, 5, None);
        self.registry.set_indexing(root_key, 5);

        let sync = self.synchronizer_for(root).await?;
        let files: Vec<String> = {
            let guard = sync.lock().await;
            guard
                .tracked_files()
                .into_iter()
                .filter(|rel| self.is_supported(rel))
                .collect()
        };

        let (chunks, indexed_files, limit_reached) = self.collect_chunks(root, &files);
        report(reporter, IndexPhase::Scanning, 10, None);
        self.registry.set_indexing(root_key, 10);

        self.upsert_chunks(name, root_key, &chunks, reporter).await?;

        let completion = if limit_reached {
            Completion::LimitReached
        } else {
            Completion::Completed
        };
        self.registry
            .set_indexed(root_key, indexed_files, chunks.len(), completion);
        report(reporter, IndexPhase::Completed, 100, None);

        Ok(IndexStats {
            files: indexed_files,
            chunks: chunks.len(),
            completion,
        })
    }

    /// Incremental re-index driven by snapshot diffing.
    pub async fn reindex_by_change(
        &self,
        root: &Path,
        reporter: &dyn ProgressReporter,
    ) -> Result<ChangeStats> {
        let root = canonical_root(root);
        let root_key = root.to_string_lossy().to_string();
        let name = self.collection_name(&root);

        let lock = self.lock_for(&name).await;
        let _guard = lock.lock().await;

        self.reindex_inner(&root, &root_key, &name, reporter).await
    }

    async fn reindex_inner(
        &self,
        root: &Path,
        root_key: &str,
        name: &str,
        reporter: &dyn ProgressReporter,
    ) -> Result<ChangeStats> {
        report(reporter, IndexPhase::Preparing, 0, None);

        let sync = self.synchronizer_for(root).await?;
        let changes = sync.lock().await.check_for_changes()?;

        if changes.is_empty() {
            report(reporter, IndexPhase::NoChanges, 100, None);
            return Ok(ChangeStats::default());
        }

        let stats = ChangeStats {
            added: changes.added.len(),
            modified: changes.modified.len(),
            removed: changes.removed.len(),
        };

        if !self.store.has_collection(name).await? {
            let dimension = self.embedder.dimension();
            if self.options.hybrid {
                self.store.create_hybrid_collection(name, dimension).await?;
            } else {
                self.store.create_collection(name, dimension).await?;
            }
        }

        report(reporter, IndexPhase::Scanning, 10, None);

        // Deletes for removed ∪ modified complete before inserts begin.
        let mut stale: BTreeSet<&String> = changes.removed.iter().collect();
        stale.extend(changes.modified.iter());
        for rel in stale {
            self.delete_by_relative_path(name, rel).await?;
        }

        let fresh: Vec<String> = {
            let mut fresh: BTreeSet<String> = changes.added.iter().cloned().collect();
            fresh.extend(changes.modified.iter().cloned());
            fresh.into_iter().filter(|rel| self.is_supported(rel)).collect()
        };

        let (chunks, _, _) = self.collect_chunks(root, &fresh);
        self.upsert_chunks(name, root_key, &chunks, reporter).await?;

        let info = self.store.collection_info(name).await?;
        let files = self.indexable_file_count(root).await?;
        self.registry
            .set_indexed(root_key, files, info.document_count, Completion::Completed);
        report(reporter, IndexPhase::Completed, 100, None);

        Ok(stats)
    }

    /// Semantic search. A missing collection returns empty results rather
    /// than an error; an `indexing` registry entry is surfaced as a hint.
    pub async fn search(&self, root: &Path, request: &SearchRequest) -> Result<SearchOutcome> {
        let root = canonical_root(root);
        let root_key = root.to_string_lossy().to_string();
        let name = self.collection_name(&root);

        let indexing_in_progress = matches!(
            self.registry.get(&root_key),
            Some(CodebaseStatus::Indexing { .. })
        );

        if !self.store.has_collection(&name).await? {
            return Ok(SearchOutcome {
                results: Vec::new(),
                indexing_in_progress,
            });
        }

        let embedding = self.embedder.embed(&request.query).await?;
        let filter = extension_filter(request.extensions.as_deref());

        let info = self.store.collection_info(&name).await?;
        let scored = if info.is_hybrid {
            let hybrid = HybridRequest {
                dense: embedding.vector,
                text: request.query.clone(),
            };
            let options = HybridSearchOptions {
                limit: request.limit,
                filter,
            };
            match self.store.hybrid_search(&name, &hybrid, &options).await {
                Ok(scored) => scored,
                Err(err) if CoreError::is_collection_not_found(&err) => Vec::new(),
                Err(err) => return Err(err),
            }
        } else {
            let options = SearchOptions {
                top_k: request.limit,
                threshold: request.threshold,
                filter,
            };
            match self.store.search(&name, &embedding.vector, &options).await {
                Ok(scored) => scored,
                Err(err) if CoreError::is_collection_not_found(&err) => Vec::new(),
                Err(err) => return Err(err),
            }
        };

        let mut results: Vec<SearchResult> = scored.into_iter().map(project_result).collect();
        results.truncate(request.limit);

        Ok(SearchOutcome {
            results,
            indexing_in_progress,
        })
    }

    /// Drop the collection, snapshot, and registry entry for a codebase.
    pub async fn clear_index(&self, root: &Path) -> Result<()> {
        let root = canonical_root(root);
        let root_key = root.to_string_lossy().to_string();
        let name = self.collection_name(&root);

        let lock = self.lock_for(&name).await;
        let _guard = lock.lock().await;

        self.store.drop_collection(&name).await?;
        FileSynchronizer::delete_snapshot(&root, &self.options.snapshot_dir)?;
        self.synchronizers.lock().await.remove(&root);
        self.registry.clear(&root_key);
        Ok(())
    }

    /// Drop `indexed` registry entries whose backing collection is gone.
    /// `indexing` entries are left alone: they may belong to a collection
    /// that is still being populated.
    pub async fn reconcile_registry(&self) -> Result<()> {
        for (path, status) in self.registry.all() {
            if matches!(status, CodebaseStatus::Indexed { .. }) {
                let name = self.collection_name(Path::new(&path));
                if !self.store.has_collection(&name).await? {
                    self.registry.clear(&path);
                }
            }
        }
        Ok(())
    }

    /// Registry status plus collection existence for one codebase.
    pub async fn status(&self, root: &Path) -> Result<(Option<CodebaseStatus>, bool)> {
        let root = canonical_root(root);
        let root_key = root.to_string_lossy().to_string();
        let name = self.collection_name(&root);
        let exists = self.store.has_collection(&name).await?;
        Ok((self.registry.get(&root_key), exists))
    }

    // ── internals ────────────────────────────────────────────────────────

    async fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn synchronizer_for(&self, root: &Path) -> Result<Arc<Mutex<FileSynchronizer>>> {
        let mut synchronizers = self.synchronizers.lock().await;
        if let Some(sync) = synchronizers.get(root) {
            return Ok(sync.clone());
        }
        let mut sync =
            FileSynchronizer::new(root, &self.options.snapshot_dir, &self.options.ignore_patterns)?;
        sync.initialize()?;
        let sync = Arc::new(Mutex::new(sync));
        synchronizers.insert(root.to_path_buf(), sync.clone());
        Ok(sync)
    }

    fn is_supported(&self, rel: &str) -> bool {
        extension_of(rel)
            .map(|ext| self.supported.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    async fn indexable_file_count(&self, root: &Path) -> Result<usize> {
        let sync = self.synchronizer_for(root).await?;
        let guard = sync.lock().await;
        Ok(guard
            .tracked_files()
            .iter()
            .filter(|rel| self.is_supported(rel))
            .count())
    }

    /// Read and split every file in `files`, capping the total chunk count.
    fn collect_chunks(&self, root: &Path, files: &[String]) -> (Vec<CodeChunk>, usize, bool) {
        let root_key = root.to_string_lossy();
        let mut chunks = Vec::new();
        let mut indexed_files = 0usize;
        let mut limit_reached = false;

        for rel in files {
            let text = match std::fs::read_to_string(root.join(rel)) {
                Ok(text) => text,
                Err(err) => {
                    eprintln!("warning: skipping {}: {}", rel, err);
                    continue;
                }
            };
            let ext = extension_of(rel).unwrap_or_default();
            let raw = self.splitter.split(&text, &ext);
            if raw.is_empty() {
                continue;
            }
            indexed_files += 1;
            for piece in raw {
                chunks.push(CodeChunk::new(
                    &root_key,
                    rel,
                    piece.content,
                    piece.start_line,
                    piece.end_line,
                    &ext,
                ));
            }
            if chunks.len() >= self.options.max_chunks {
                chunks.truncate(self.options.max_chunks);
                limit_reached = true;
                break;
            }
        }

        (chunks, indexed_files, limit_reached)
    }

    /// Embed in bounded batches and upsert. Dense collections upsert per
    /// batch; hybrid collections accumulate and upsert once so the BM25
    /// model trains on the complete corpus before sparse vectors land.
    async fn upsert_chunks(
        &self,
        name: &str,
        root_key: &str,
        chunks: &[CodeChunk],
        reporter: &dyn ProgressReporter,
    ) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let total = chunks.len();
        let mut processed = 0usize;
        let mut hybrid_batch: Vec<EmbeddedChunk> = Vec::new();

        for batch in chunks.chunks(self.options.batch_size) {
            let embedded = self.embed_with_fallback(batch).await?;
            if self.options.hybrid {
                hybrid_batch.extend(embedded);
            } else {
                self.store.insert(name, &embedded).await?;
            }

            processed += batch.len();
            let percentage = (10 + processed * 85 / total).min(95) as u8;
            let current = batch.last().map(|c| c.relative_path.clone());
            report(reporter, IndexPhase::IndexingFiles, percentage, current);
            self.registry.set_indexing(root_key, percentage);
        }

        if self.options.hybrid && !hybrid_batch.is_empty() {
            self.store.insert_hybrid(name, &hybrid_batch).await?;
        }
        Ok(())
    }

    /// Embed one batch, falling back to per-chunk calls (with an
    /// inter-call delay) when the batch call fails.
    async fn embed_with_fallback(&self, batch: &[CodeChunk]) -> Result<Vec<EmbeddedChunk>> {
        let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
        match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) => {
                if embeddings.len() != batch.len() {
                    bail!(
                        "embedder returned {} vectors for {} inputs",
                        embeddings.len(),
                        batch.len()
                    );
                }
                Ok(batch
                    .iter()
                    .zip(embeddings)
                    .map(|(chunk, embedding)| EmbeddedChunk {
                        chunk: chunk.clone(),
                        dense: embedding.vector,
                    })
                    .collect())
            }
            Err(batch_err) => {
                eprintln!(
                    "warning: batch embedding failed ({}); falling back to per-chunk calls",
                    batch_err
                );
                let mut out = Vec::with_capacity(batch.len());
                for chunk in batch {
                    tokio::time::sleep(PER_CHUNK_DELAY).await;
                    let embedding = self
                        .embedder
                        .embed(&chunk.content)
                        .await
                        .with_context(|| {
                            format!("embedding failed for {}", chunk.relative_path)
                        })?;
                    out.push(EmbeddedChunk {
                        chunk: chunk.clone(),
                        dense: embedding.vector,
                    });
                }
                Ok(out)
            }
        }
    }

    async fn delete_by_relative_path(&self, name: &str, rel: &str) -> Result<()> {
        let filter = format!("relativePath == '{}'", rel);
        let rows = self.store.query(name, &filter, &["id"], None).await?;
        let ids: Vec<String> = rows
            .iter()
            .filter_map(|row| row.get("id").and_then(|v| v.as_str()))
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();
        if !ids.is_empty() {
            self.store.delete(name, &ids).await?;
        }
        Ok(())
    }
}

fn report(reporter: &dyn ProgressReporter, phase: IndexPhase, percentage: u8, file: Option<String>) {
    reporter.report(&ProgressEvent {
        phase,
        percentage,
        current_file: file,
    });
}

fn canonical_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}

fn extension_of(rel: &str) -> Option<String> {
    Path::new(rel)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_string())
}

fn extension_filter(extensions: Option<&[String]>) -> Option<String> {
    let extensions = extensions?;
    let cleaned: Vec<String> = extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let quoted: Vec<String> = cleaned.iter().map(|e| format!("'{}'", e)).collect();
    Some(format!("fileExtension in [{}]", quoted.join(", ")))
}

fn project_result(scored: ScoredChunk) -> SearchResult {
    let chunk = scored.chunk;
    SearchResult {
        language: language_for_extension(&chunk.file_extension),
        content: chunk.content,
        relative_path: chunk.relative_path,
        start_line: chunk.start_line,
        end_line: chunk.end_line,
        score: scored.score,
    }
}
