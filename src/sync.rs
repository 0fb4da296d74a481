//! File synchronizer: content-addressed change detection over a source tree.
//!
//! Walks a codebase root (skipping hidden segments and configured glob
//! patterns), hashes every file, and maintains a persisted snapshot of
//! `relative path → content hash`. Successive calls to
//! [`FileSynchronizer::check_for_changes`] diff the current tree against
//! the in-memory snapshot and report `{added, modified, removed}` paths.
//!
//! Each diff builds a throwaway Merkle DAG per side — one root node over
//! one node per file — so an unchanged tree is detected by a single
//! root-hash comparison before any per-path work. The keyed map diff then
//! recovers "modified" (same path, different hash), which the DAG alone
//! cannot express.
//!
//! # Snapshot persistence
//!
//! Snapshots live in a process-wide directory as `{hash16(root)}.json`
//! containing `{ "root": ..., "hashes": { relPath: hex16 } }`, written via
//! temp-file + rename. A missing or corrupt snapshot is treated as a first
//! run: the tree is walked and a fresh baseline persisted, so the first
//! `check_for_changes` after a snapshot deletion (and process restart)
//! silently reports no changes.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::hashing;
use crate::merkle::MerkleDag;

/// Glob patterns excluded from every walk, covering typical build outputs,
/// caches, and dependency folders. Hidden segments (leading `.`) are
/// filtered separately and unconditionally.
pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    "**/node_modules/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/out/**",
    "**/__pycache__/**",
    "**/venv/**",
    "**/vendor/**",
    "**/coverage/**",
    "**/*.min.js",
    "**/*.map",
    "**/*.lock",
];

/// Per-path deltas between two consecutive tree states.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

impl FileChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// Persisted snapshot layout.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    root: String,
    hashes: BTreeMap<String, String>,
}

/// Tracks one root directory. Owns that root's snapshot file exclusively.
pub struct FileSynchronizer {
    root: PathBuf,
    snapshot_dir: PathBuf,
    ignore: GlobSet,
    hashes: BTreeMap<String, String>,
}

impl FileSynchronizer {
    /// Create a synchronizer for `root`. `extra_patterns` are appended to
    /// [`DEFAULT_IGNORE_PATTERNS`]. Does not touch the filesystem until
    /// [`initialize`](Self::initialize).
    pub fn new(root: &Path, snapshot_dir: &Path, extra_patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in DEFAULT_IGNORE_PATTERNS {
            builder.add(Glob::new(pattern)?);
        }
        for pattern in extra_patterns {
            builder.add(
                Glob::new(pattern)
                    .with_context(|| format!("invalid ignore pattern: {}", pattern))?,
            );
        }
        Ok(Self {
            root: root.to_path_buf(),
            snapshot_dir: snapshot_dir.to_path_buf(),
            ignore: builder.build()?,
            hashes: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative paths currently tracked by the snapshot, sorted.
    pub fn tracked_files(&self) -> Vec<String> {
        self.hashes.keys().cloned().collect()
    }

    /// Load the persisted snapshot for this root, or walk the tree and
    /// persist a fresh baseline if none exists (or it fails to load).
    pub fn initialize(&mut self) -> Result<()> {
        let path = self.snapshot_path();
        if path.exists() {
            match Self::load_snapshot(&path) {
                Ok(snapshot) if snapshot.root == self.root.to_string_lossy() => {
                    self.hashes = snapshot.hashes;
                    return Ok(());
                }
                Ok(_) => {
                    eprintln!(
                        "warning: snapshot {} belongs to a different root; rebuilding baseline",
                        path.display()
                    );
                }
                Err(err) => {
                    eprintln!(
                        "warning: snapshot {} unreadable ({}); rebuilding baseline",
                        path.display(),
                        err
                    );
                }
            }
        }
        self.hashes = self.walk()?;
        self.persist()?;
        Ok(())
    }

    /// Walk the current tree, diff against the snapshot, atomically replace
    /// and persist the snapshot, and return the deltas.
    ///
    /// Two consecutive calls with no filesystem changes return empty sets.
    pub fn check_for_changes(&mut self) -> Result<FileChangeSet> {
        let current = self.walk()?;

        // Root-hash short circuit: identical trees produce identical DAGs.
        let prev_dag = build_tree_dag(&self.hashes);
        let next_dag = build_tree_dag(&current);
        if MerkleDag::compare(&prev_dag, &next_dag).is_empty() {
            self.hashes = current;
            self.persist()?;
            return Ok(FileChangeSet::default());
        }

        let mut changes = FileChangeSet::default();
        for (path, hash) in &current {
            match self.hashes.get(path) {
                None => changes.added.push(path.clone()),
                Some(prev) if prev != hash => changes.modified.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in self.hashes.keys() {
            if !current.contains_key(path) {
                changes.removed.push(path.clone());
            }
        }

        self.hashes = current;
        self.persist()?;
        Ok(changes)
    }

    /// Remove the persisted snapshot for `root`. Missing files are fine.
    pub fn delete_snapshot(root: &Path, snapshot_dir: &Path) -> Result<()> {
        let path = snapshot_dir.join(snapshot_file_name(root));
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to delete snapshot {}", path.display()))
            }
        }
    }

    fn snapshot_path(&self) -> PathBuf {
        self.snapshot_dir.join(snapshot_file_name(&self.root))
    }

    fn load_snapshot(path: &Path) -> Result<Snapshot> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn persist(&self) -> Result<()> {
        fs::create_dir_all(&self.snapshot_dir).with_context(|| {
            format!(
                "failed to create snapshot directory {}",
                self.snapshot_dir.display()
            )
        })?;
        let snapshot = Snapshot {
            root: self.root.to_string_lossy().to_string(),
            hashes: self.hashes.clone(),
        };
        let json = serde_json::to_string_pretty(&snapshot)?;
        let path = self.snapshot_path();
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("failed to create {}", tmp.display()))?;
            file.write_all(json.as_bytes())?;
            file.flush()?;
        }
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace snapshot {}", path.display()))?;
        Ok(())
    }

    /// Hash every file under the root that survives filtering.
    ///
    /// Unreadable files are skipped with a warning and not tracked.
    fn walk(&self) -> Result<BTreeMap<String, String>> {
        let mut hashes = BTreeMap::new();
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden_name(entry.file_name()));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    eprintln!("warning: skipping unreadable path: {}", err);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path());
            let rel_str = rel.to_string_lossy().to_string();
            if self.ignore.is_match(&rel_str) {
                continue;
            }
            match fs::read(entry.path()) {
                Ok(bytes) => {
                    hashes.insert(rel_str, hashing::hash_bytes(&bytes));
                }
                Err(err) => {
                    eprintln!("warning: skipping {}: {}", entry.path().display(), err);
                }
            }
        }
        Ok(hashes)
    }
}

fn snapshot_file_name(root: &Path) -> String {
    format!("{}.json", hashing::hash_str(&root.to_string_lossy()))
}

fn is_hidden_name(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// One node per file (data = `path\nhash`) under a single root node whose
/// data is the sorted concatenation of the file node ids. Equal trees hash
/// to equal roots.
fn build_tree_dag(hashes: &BTreeMap<String, String>) -> MerkleDag {
    let mut dag = MerkleDag::new();
    let file_data: Vec<String> = hashes
        .iter()
        .map(|(path, hash)| format!("{}\n{}", path, hash))
        .collect();
    let file_ids: Vec<String> = file_data.iter().map(|d| hashing::hash_str(d)).collect();
    let root_id = dag.add_node(&file_ids.join(","), None);
    for data in &file_data {
        dag.add_node(data, Some(&root_id));
    }
    dag
}
