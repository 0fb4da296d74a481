//! # codectx
//!
//! **Hybrid semantic code search with incremental, content-addressed
//! re-indexing.**
//!
//! codectx indexes a source tree into a local sparse+dense vector store
//! and serves semantic code search over it. Change detection is
//! content-addressed: a Merkle-hashed snapshot of the tree persists across
//! runs, so re-indexing touches only the files that actually changed.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Synchronizer │──▶│   Pipeline   │──▶│    SQLite     │
//! │ walk + diff  │   │ split+embed  │   │ dense + BM25  │
//! └──────────────┘   └──────────────┘   └──────┬────────┘
//!                                              │
//!                            ┌─────────────────┤
//!                            ▼                 ▼
//!                      ┌──────────┐      ┌──────────┐
//!                      │   CLI    │      │   HTTP   │
//!                      │ (codectx)│      │  (MCP)   │
//!                      └──────────┘      └──────────┘
//! ```
//!
//! ## Data flow
//!
//! 1. The **synchronizer** ([`sync`]) walks the codebase, hashes every
//!    file ([`hashing`]), and diffs against its persisted snapshot using a
//!    throwaway Merkle DAG ([`merkle`]) plus a path-keyed view, yielding
//!    `{added, modified, removed}`.
//! 2. The **splitter** ([`splitter`]) turns changed files into
//!    line-ranged [`models::CodeChunk`]s, at declaration boundaries when a
//!    tree-sitter grammar is available.
//! 3. The **pipeline** ([`pipeline`]) embeds chunks in bounded batches
//!    ([`embedding`]) and upserts them into a collection-scoped store
//!    ([`store`]); hybrid collections also maintain a corpus-trained BM25
//!    model ([`bm25`]).
//! 4. **Search** embeds the query, runs dense cosine or RRF-fused hybrid
//!    retrieval, and projects results with language metadata.
//! 5. The **registry** ([`registry`]) tracks per-codebase status with
//!    in-memory-authoritative, write-behind persistence.
//!
//! ## Search modes
//!
//! | Collection | Retrieval |
//! |------------|-----------|
//! | dense | cosine similarity over embeddings |
//! | hybrid | RRF fusion of cosine and BM25 rankings, dense-only fallback |
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, validation, `[VAR]` env substitution |
//! | [`hashing`] | SHA-256 content digests (16-hex prefixes) |
//! | [`merkle`] | Content-addressed DAG with structural diff |
//! | [`sync`] | Directory walking, snapshots, change detection |
//! | [`splitter`] | Declaration-boundary and character-based chunking |
//! | [`bm25`] | Sparse BM25 vectorization and model persistence |
//! | [`embedding`] | Embedder trait, hash and OpenAI providers |
//! | [`store`] | Vector store trait, filter grammar, RRF, SQLite backend |
//! | [`pipeline`] | Full/incremental indexing, search, clearing |
//! | [`registry`] | Per-codebase status registry |
//! | [`progress`] | Progress reporting on stderr |
//! | [`server`] | MCP-compatible tool server (Axum) |

pub mod bm25;
pub mod config;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod merkle;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod server;
pub mod splitter;
pub mod store;
pub mod sync;
