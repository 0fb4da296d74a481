//! Per-codebase indexing status registry.
//!
//! Persists `codebase path → status` in a single JSON file under the
//! user-scoped data directory. The in-memory map is authoritative for the
//! lifetime of the process: every read returns the state produced by the
//! latest mutation, whether or not the disk write behind it has landed.
//! Disk writes are best-effort — failures are logged and never fail the
//! mutating operation — which removes the race between "indexing finished"
//! and "search says not indexed".
//!
//! Status transitions:
//!
//! ```text
//! not_found → indexing(0)            on index start
//! indexing(p) → indexing(p')        on progress
//! indexing → indexed                on success
//! indexing → failed                 on fatal error
//! failed → indexing(0)              on retry
//! any → not_found                   on clear_index
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a finished index run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Completed,
    LimitReached,
}

/// Tagged status of one codebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CodebaseStatus {
    #[serde(rename_all = "camelCase")]
    Indexing {
        /// Percentage in `[0, 100]`.
        progress: u8,
        last_updated: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Indexed {
        files: usize,
        chunks: usize,
        completion: Completion,
        last_updated: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_progress: Option<u8>,
        last_updated: DateTime<Utc>,
    },
}

/// On-disk layout of the registry file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    codebases: HashMap<String, CodebaseStatus>,
}

/// Process-wide registry handle. Owns the status record exclusively.
pub struct CodebaseRegistry {
    path: PathBuf,
    entries: Mutex<HashMap<String, CodebaseStatus>>,
}

impl CodebaseRegistry {
    /// Load the registry from `path`, starting empty if the file is
    /// missing or unreadable (disk is only a cache of the last run).
    pub fn load(path: &Path) -> Self {
        let entries = fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str::<RegistryFile>(&content).ok())
            .map(|file| file.codebases)
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    pub fn set_indexing(&self, codebase: &str, progress: u8) {
        self.update(codebase, CodebaseStatus::Indexing {
            progress: progress.min(100),
            last_updated: Utc::now(),
        });
    }

    pub fn set_indexed(&self, codebase: &str, files: usize, chunks: usize, completion: Completion) {
        self.update(codebase, CodebaseStatus::Indexed {
            files,
            chunks,
            completion,
            last_updated: Utc::now(),
        });
    }

    pub fn set_failed(&self, codebase: &str, message: &str, last_progress: Option<u8>) {
        self.update(codebase, CodebaseStatus::Failed {
            message: message.to_string(),
            last_progress,
            last_updated: Utc::now(),
        });
    }

    /// Drop the entry entirely (`any → not_found`).
    pub fn clear(&self, codebase: &str) {
        let snapshot = {
            let mut entries = self.entries.lock().expect("registry lock poisoned");
            entries.remove(codebase);
            entries.clone()
        };
        self.persist(&snapshot);
    }

    pub fn get(&self, codebase: &str) -> Option<CodebaseStatus> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .get(codebase)
            .cloned()
    }

    /// Paths currently in the `indexed` state.
    pub fn indexed_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .lock()
            .expect("registry lock poisoned")
            .iter()
            .filter(|(_, status)| matches!(status, CodebaseStatus::Indexed { .. }))
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    /// Copy of every entry, for status listings and reconciliation.
    pub fn all(&self) -> HashMap<String, CodebaseStatus> {
        self.entries.lock().expect("registry lock poisoned").clone()
    }

    fn update(&self, codebase: &str, status: CodebaseStatus) {
        let snapshot = {
            let mut entries = self.entries.lock().expect("registry lock poisoned");
            entries.insert(codebase.to_string(), status);
            entries.clone()
        };
        // In-memory state is already visible; the write below may lag.
        self.persist(&snapshot);
    }

    fn persist(&self, entries: &HashMap<String, CodebaseStatus>) {
        let result = (|| -> anyhow::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = RegistryFile {
                codebases: entries.clone(),
            };
            let json = serde_json::to_string_pretty(&file)?;
            let tmp = self.path.with_extension("json.tmp");
            {
                let mut out = fs::File::create(&tmp)?;
                out.write_all(json.as_bytes())?;
                out.flush()?;
            }
            fs::rename(&tmp, &self.path)?;
            Ok(())
        })();
        if let Err(err) = result {
            eprintln!(
                "warning: failed to persist registry {}: {}",
                self.path.display(),
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (TempDir, CodebaseRegistry) {
        let tmp = TempDir::new().unwrap();
        let reg = CodebaseRegistry::load(&tmp.path().join("registry.json"));
        (tmp, reg)
    }

    #[test]
    fn reads_see_writes_immediately() {
        let (_tmp, reg) = registry();
        reg.set_indexing("/repo", 50);
        reg.set_indexed("/repo", 10, 100, Completion::Completed);

        // No waiting on disk: the indexed state is visible at once.
        assert_eq!(reg.indexed_paths(), vec!["/repo"]);
        match reg.get("/repo") {
            Some(CodebaseStatus::Indexed { files, chunks, completion, .. }) => {
                assert_eq!(files, 10);
                assert_eq!(chunks, 100);
                assert_eq!(completion, Completion::Completed);
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }

    #[test]
    fn transitions() {
        let (_tmp, reg) = registry();
        assert_eq!(reg.get("/repo"), None);

        reg.set_indexing("/repo", 0);
        assert!(matches!(
            reg.get("/repo"),
            Some(CodebaseStatus::Indexing { progress: 0, .. })
        ));

        reg.set_indexing("/repo", 40);
        assert!(matches!(
            reg.get("/repo"),
            Some(CodebaseStatus::Indexing { progress: 40, .. })
        ));

        reg.set_failed("/repo", "provider unreachable", Some(40));
        assert!(matches!(
            reg.get("/repo"),
            Some(CodebaseStatus::Failed { .. })
        ));

        // Retry from failed.
        reg.set_indexing("/repo", 0);
        assert!(matches!(
            reg.get("/repo"),
            Some(CodebaseStatus::Indexing { .. })
        ));

        reg.set_indexed("/repo", 1, 2, Completion::LimitReached);
        reg.clear("/repo");
        assert_eq!(reg.get("/repo"), None);
    }

    #[test]
    fn progress_is_clamped() {
        let (_tmp, reg) = registry();
        reg.set_indexing("/repo", 250);
        assert!(matches!(
            reg.get("/repo"),
            Some(CodebaseStatus::Indexing { progress: 100, .. })
        ));
    }

    #[test]
    fn state_survives_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("registry.json");

        let reg = CodebaseRegistry::load(&path);
        reg.set_indexed("/repo", 3, 30, Completion::Completed);
        reg.set_failed("/other", "boom", None);

        let reloaded = CodebaseRegistry::load(&path);
        assert_eq!(reloaded.indexed_paths(), vec!["/repo"]);
        assert!(matches!(
            reloaded.get("/other"),
            Some(CodebaseStatus::Failed { .. })
        ));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("registry.json");
        fs::write(&path, "{{ nope").unwrap();
        let reg = CodebaseRegistry::load(&path);
        assert!(reg.all().is_empty());
    }

    #[test]
    fn serialized_shape_matches_layout() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("registry.json");
        let reg = CodebaseRegistry::load(&path);
        reg.set_indexed("/repo", 2, 5, Completion::LimitReached);

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &value["codebases"]["/repo"];
        assert_eq!(entry["state"], "indexed");
        assert_eq!(entry["completion"], "limit_reached");
        assert!(entry["lastUpdated"].is_string());
    }
}
