//! End-to-end pipeline tests against the library API, using the
//! deterministic hash embedder and a temp-dir data directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use codectx::config::Config;
use codectx::embedding::create_embedder;
use codectx::pipeline::{Indexer, IndexerOptions, SearchRequest};
use codectx::progress::NoProgress;
use codectx::registry::{CodebaseRegistry, CodebaseStatus, Completion};
use codectx::splitter::SplitMode;
use codectx::store::sqlite::SqliteVectorStore;

struct Fixture {
    _tmp: TempDir,
    repo: PathBuf,
    indexer: Arc<Indexer>,
}

fn fixture(hybrid: bool) -> Fixture {
    fixture_with(hybrid, SplitMode::Chars)
}

fn fixture_with(hybrid: bool, splitter: SplitMode) -> Fixture {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();

    let mut config = Config::default();
    config.storage.data_dir = Some(tmp.path().join("data"));
    config.indexing.hybrid = hybrid;
    config.indexing.splitter = splitter;
    config.indexing.chunk_size = 400;
    config.indexing.chunk_overlap = 0;
    config.indexing.batch_size = 8;
    config.embedding.dims = Some(64);

    let data_dir = config.storage.resolve_data_dir();
    let embedder = create_embedder(&config.embedding).unwrap();
    let store = Arc::new(SqliteVectorStore::new(&data_dir.join("collections")));
    let registry = Arc::new(CodebaseRegistry::load(&data_dir.join("registry.json")));
    let indexer = Arc::new(Indexer::new(
        embedder,
        store,
        registry,
        IndexerOptions::from_config(&config),
    ));

    Fixture {
        _tmp: tmp,
        repo,
        indexer,
    }
}

fn write(repo: &Path, rel: &str, content: &str) {
    let path = repo.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn root_key(repo: &Path) -> String {
    repo.canonicalize().unwrap().to_string_lossy().to_string()
}

async fn ids_for_path(fx: &Fixture, rel: &str) -> Vec<String> {
    let name = fx.indexer.collection_name(&fx.repo);
    let filter = format!("relativePath == '{}'", rel);
    fx.indexer
        .store()
        .query(&name, &filter, &["id"], None)
        .await
        .unwrap()
        .iter()
        .filter_map(|row| row.get("id").and_then(|v| v.as_str()).map(String::from))
        .collect()
}

#[tokio::test]
async fn first_run_full_index() {
    let fx = fixture(true);
    write(&fx.repo, "a.ts", "export const x = 1;");
    write(&fx.repo, "b.py", "def f(): return 1");

    let stats = fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();
    assert_eq!(stats.files, 2);
    assert!(stats.chunks >= 2);
    assert_eq!(stats.completion, Completion::Completed);

    let name = fx.indexer.collection_name(&fx.repo);
    assert!(fx.indexer.store().has_collection(&name).await.unwrap());

    match fx.indexer.registry().get(&root_key(&fx.repo)) {
        Some(CodebaseStatus::Indexed { files, chunks, .. }) => {
            assert_eq!(files, 2);
            assert!(chunks >= 2);
        }
        other => panic!("expected indexed status, got {:?}", other),
    }
}

#[tokio::test]
async fn incremental_add_modify_delete() {
    let fx = fixture(true);
    write(&fx.repo, "a.ts", "export const x = 1;");
    write(&fx.repo, "b.py", "def f(): return 1");
    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();

    let old_a_ids = ids_for_path(&fx, "a.ts").await;
    assert!(!old_a_ids.is_empty());

    write(&fx.repo, "c.ts", "export const y = 2;");
    write(&fx.repo, "a.ts", "export const x = 100;");
    fs::remove_file(fx.repo.join("b.py")).unwrap();

    let changes = fx
        .indexer
        .reindex_by_change(&fx.repo, &NoProgress)
        .await
        .unwrap();
    assert_eq!(changes.added, 1);
    assert_eq!(changes.modified, 1);
    assert_eq!(changes.removed, 1);

    // Rows for the deleted file are gone.
    assert!(ids_for_path(&fx, "b.py").await.is_empty());
    // The new file landed.
    assert!(!ids_for_path(&fx, "c.ts").await.is_empty());
    // The modified file got fresh content-addressed ids.
    let new_a_ids = ids_for_path(&fx, "a.ts").await;
    assert!(!new_a_ids.is_empty());
    for old in &old_a_ids {
        assert!(!new_a_ids.contains(old), "stale chunk id survived: {}", old);
    }
}

#[tokio::test]
async fn reindex_without_changes_is_a_noop() {
    let fx = fixture(true);
    write(&fx.repo, "a.ts", "export const x = 1;");
    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();

    let changes = fx
        .indexer
        .reindex_by_change(&fx.repo, &NoProgress)
        .await
        .unwrap();
    assert_eq!(changes.added, 0);
    assert_eq!(changes.modified, 0);
    assert_eq!(changes.removed, 0);
}

#[tokio::test]
async fn index_clear_index_yields_same_chunk_ids() {
    let fx = fixture(false);
    write(&fx.repo, "a.ts", "export const x = 1;");
    write(&fx.repo, "b.py", "def f(): return 1");

    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();
    let name = fx.indexer.collection_name(&fx.repo);
    let mut first: Vec<String> = ids_for_path(&fx, "a.ts").await;
    first.extend(ids_for_path(&fx, "b.py").await);
    first.sort();

    fx.indexer.clear_index(&fx.repo).await.unwrap();
    assert!(!fx.indexer.store().has_collection(&name).await.unwrap());
    assert_eq!(fx.indexer.registry().get(&root_key(&fx.repo)), None);

    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();
    let mut second: Vec<String> = ids_for_path(&fx, "a.ts").await;
    second.extend(ids_for_path(&fx, "b.py").await);
    second.sort();

    assert_eq!(first, second);
}

#[tokio::test]
async fn dense_threshold_separates_self_match_from_noise() {
    let fx = fixture(false);
    let content = "function calculateTotal(items) { return items.length; }";
    write(&fx.repo, "total.js", content);
    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();

    // Searching a chunk's own text: self-similarity is 1 with the hash
    // embedder, so a 0.99 threshold keeps it.
    let hit = fx
        .indexer
        .search(
            &fx.repo,
            &SearchRequest {
                query: content.to_string(),
                limit: 5,
                threshold: Some(0.99),
                extensions: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(hit.results.len(), 1);
    assert_eq!(hit.results[0].relative_path, "total.js");
    assert_eq!(hit.results[0].language, "javascript");

    let miss = fx
        .indexer
        .search(
            &fx.repo,
            &SearchRequest {
                query: "zzz qqq entirely unrelated tokens".to_string(),
                limit: 5,
                threshold: Some(0.99),
                extensions: None,
            },
        )
        .await
        .unwrap();
    assert!(miss.results.is_empty());
}

#[tokio::test]
async fn hybrid_search_survives_unknown_query_terms() {
    let fx = fixture(true);
    write(&fx.repo, "calc.ts", "function calculateTotal() {}");
    write(&fx.repo, "user.ts", "class UserManager {}");
    write(&fx.repo, "fetch.ts", "const fetchData = () => {};");
    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();

    let outcome = fx
        .indexer
        .search(
            &fx.repo,
            &SearchRequest::new("nonexistent_unknown_term_xyz"),
        )
        .await
        .unwrap();
    // Dense-only fallback: up to 3 results, no error.
    assert!(!outcome.results.is_empty());
    assert!(outcome.results.len() <= 3);
}

#[tokio::test]
async fn search_on_unindexed_codebase_returns_empty() {
    let fx = fixture(true);
    write(&fx.repo, "a.ts", "export const x = 1;");

    let outcome = fx
        .indexer
        .search(&fx.repo, &SearchRequest::new("anything"))
        .await
        .unwrap();
    assert!(outcome.results.is_empty());
    assert!(!outcome.indexing_in_progress);
}

#[tokio::test]
async fn search_reports_in_progress_indexing() {
    let fx = fixture(true);
    write(&fx.repo, "a.ts", "export const x = 1;");
    fx.indexer.registry().set_indexing(&root_key(&fx.repo), 40);

    let outcome = fx
        .indexer
        .search(&fx.repo, &SearchRequest::new("anything"))
        .await
        .unwrap();
    assert!(outcome.indexing_in_progress);
}

#[tokio::test]
async fn extension_allow_list_filters_results() {
    let fx = fixture(false);
    write(&fx.repo, "a.rs", "fn shared_token_alpha() {}");
    write(&fx.repo, "b.py", "def shared_token_alpha(): pass");
    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();

    let outcome = fx
        .indexer
        .search(
            &fx.repo,
            &SearchRequest {
                query: "shared_token_alpha".to_string(),
                limit: 10,
                threshold: None,
                extensions: Some(vec![".py".to_string()]),
            },
        )
        .await
        .unwrap();
    assert!(!outcome.results.is_empty());
    for result in &outcome.results {
        assert_eq!(result.relative_path, "b.py");
    }
}

#[tokio::test]
async fn force_reindex_rebuilds_from_scratch() {
    let fx = fixture(true);
    write(&fx.repo, "a.ts", "export const x = 1;");
    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();

    write(&fx.repo, "b.ts", "export const y = 2;");
    let stats = fx.indexer.index(&fx.repo, true, &NoProgress).await.unwrap();
    assert_eq!(stats.files, 2);
    assert!(!ids_for_path(&fx, "b.ts").await.is_empty());
}

#[tokio::test]
async fn index_on_indexed_codebase_runs_incrementally() {
    let fx = fixture(true);
    write(&fx.repo, "a.ts", "export const x = 1;");
    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();

    write(&fx.repo, "b.ts", "export const y = 2;");
    // Second `index` without force takes the incremental path.
    let stats = fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();
    assert_eq!(stats.files, 2);
    assert!(!ids_for_path(&fx, "b.ts").await.is_empty());
}

#[tokio::test]
async fn collection_names_are_deterministic_and_distinct() {
    let fx = fixture(true);
    let other = fx.repo.parent().unwrap().join("other");
    fs::create_dir_all(&other).unwrap();

    let name_a = fx.indexer.collection_name(&fx.repo);
    let name_b = fx.indexer.collection_name(&fx.repo);
    assert_eq!(name_a, name_b);
    assert!(name_a.starts_with("hybrid_code_chunks_"));
    assert_ne!(name_a, fx.indexer.collection_name(&other));
}

#[tokio::test]
async fn reconcile_drops_stale_indexed_entries() {
    let fx = fixture(true);
    write(&fx.repo, "a.ts", "export const x = 1;");
    fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();

    // Simulate the collection disappearing behind the registry's back.
    let name = fx.indexer.collection_name(&fx.repo);
    fx.indexer.store().drop_collection(&name).await.unwrap();

    fx.indexer.reconcile_registry().await.unwrap();
    assert_eq!(fx.indexer.registry().get(&root_key(&fx.repo)), None);

    // Indexing entries survive reconciliation.
    fx.indexer.registry().set_indexing(&root_key(&fx.repo), 10);
    fx.indexer.reconcile_registry().await.unwrap();
    assert!(matches!(
        fx.indexer.registry().get(&root_key(&fx.repo)),
        Some(CodebaseStatus::Indexing { .. })
    ));
}

#[tokio::test]
async fn ast_splitter_indexes_rust_declarations() {
    let fx = fixture_with(false, SplitMode::Ast);
    write(
        &fx.repo,
        "lib.rs",
        "pub fn alpha() -> i32 {\n    1\n}\n\npub fn beta() -> i32 {\n    2\n}\n",
    );
    let stats = fx.indexer.index(&fx.repo, false, &NoProgress).await.unwrap();
    assert_eq!(stats.files, 1);
    assert!(stats.chunks >= 1);

    let rows = ids_for_path(&fx, "lib.rs").await;
    assert_eq!(rows.len(), stats.chunks);
}

struct FailingEmbedder;

#[async_trait::async_trait]
impl codectx::embedding::Embedder for FailingEmbedder {
    fn dimension(&self) -> usize {
        8
    }

    fn provider(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _text: &str) -> anyhow::Result<codectx::embedding::Embedding> {
        anyhow::bail!("provider unreachable")
    }

    async fn embed_batch(
        &self,
        _texts: &[String],
    ) -> anyhow::Result<Vec<codectx::embedding::Embedding>> {
        anyhow::bail!("provider unreachable")
    }
}

#[tokio::test]
async fn fatal_embedding_failure_records_failed_status() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir_all(&repo).unwrap();
    write(&repo, "a.ts", "export const x = 1;");

    let mut config = Config::default();
    config.storage.data_dir = Some(tmp.path().join("data"));
    config.indexing.hybrid = false;
    config.indexing.splitter = SplitMode::Chars;

    let data_dir = config.storage.resolve_data_dir();
    let store = Arc::new(SqliteVectorStore::new(&data_dir.join("collections")));
    let registry = Arc::new(CodebaseRegistry::load(&data_dir.join("registry.json")));
    let indexer = Indexer::new(
        Arc::new(FailingEmbedder),
        store,
        registry,
        IndexerOptions::from_config(&config),
    );

    let result = indexer.index(&repo, false, &NoProgress).await;
    assert!(result.is_err());

    let key = repo.canonicalize().unwrap().to_string_lossy().to_string();
    match indexer.registry().get(&key) {
        Some(CodebaseStatus::Failed { message, .. }) => {
            assert!(message.contains("embedding failed") || message.contains("unreachable"));
        }
        other => panic!("expected failed status, got {:?}", other),
    }
}
