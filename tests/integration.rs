//! Integration tests driving the `codectx` binary end to end with the
//! offline hash embedder.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

fn codectx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("codectx");
    path
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let repo = root.join("repo");
    fs::create_dir_all(repo.join("src")).unwrap();
    fs::write(
        repo.join("src/calc.ts"),
        "export function calculateTotal(items: number[]): number {\n  return items.reduce((a, b) => a + b, 0);\n}\n",
    )
    .unwrap();
    fs::write(
        repo.join("src/user.py"),
        "class UserManager:\n    def __init__(self):\n        self.users = []\n\n    def add(self, user):\n        self.users.append(user)\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[storage]
data_dir = "{}/data"

[indexing]
chunk_size = 800
chunk_overlap = 0
hybrid = true
splitter = "chars"

[embedding]
provider = "hash"
dims = 64
"#,
        root.display()
    );
    let config_path = root.join("codectx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, repo)
}

fn run_codectx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = codectx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run codectx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn index_then_search() {
    let (_tmp, config, repo) = setup_test_env();
    let repo_str = repo.to_str().unwrap();

    let (stdout, stderr, ok) = run_codectx(&config, &["index", repo_str]);
    assert!(ok, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files: 2"));
    assert!(stdout.contains("ok"));

    let (stdout, stderr, ok) = run_codectx(&config, &["search", "calculateTotal", repo_str]);
    assert!(ok, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("calc.ts"), "missing hit in: {}", stdout);
}

#[test]
fn index_is_idempotent() {
    let (_tmp, config, repo) = setup_test_env();
    let repo_str = repo.to_str().unwrap();

    let (_, _, ok) = run_codectx(&config, &["index", repo_str]);
    assert!(ok);
    // Second run takes the incremental path and succeeds cleanly.
    let (stdout, stderr, ok) = run_codectx(&config, &["index", repo_str]);
    assert!(ok, "second index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ok"));
}

#[test]
fn search_before_index_reports_no_results() {
    let (_tmp, config, repo) = setup_test_env();
    let (stdout, _, ok) = run_codectx(&config, &["search", "anything", repo.to_str().unwrap()]);
    assert!(ok);
    assert!(stdout.contains("No results."));
}

#[test]
fn status_reflects_lifecycle() {
    let (_tmp, config, repo) = setup_test_env();
    let repo_str = repo.to_str().unwrap();

    let (stdout, _, ok) = run_codectx(&config, &["status", repo_str]);
    assert!(ok);
    assert!(stdout.contains("not indexed"));

    run_codectx(&config, &["index", repo_str]);

    let (stdout, _, ok) = run_codectx(&config, &["status", repo_str]);
    assert!(ok);
    assert!(stdout.contains("indexed: 2 files"), "unexpected: {}", stdout);
}

#[test]
fn clear_removes_the_index() {
    let (_tmp, config, repo) = setup_test_env();
    let repo_str = repo.to_str().unwrap();

    run_codectx(&config, &["index", repo_str]);
    let (stdout, _, ok) = run_codectx(&config, &["clear", repo_str]);
    assert!(ok);
    assert!(stdout.contains("cleared"));

    let (stdout, _, ok) = run_codectx(&config, &["search", "calculateTotal", repo_str]);
    assert!(ok);
    assert!(stdout.contains("No results."));

    let (stdout, _, ok) = run_codectx(&config, &["status", repo_str]);
    assert!(ok);
    assert!(stdout.contains("not indexed"));
}

#[test]
fn search_filters_by_extension() {
    let (_tmp, config, repo) = setup_test_env();
    let repo_str = repo.to_str().unwrap();

    run_codectx(&config, &["index", repo_str]);
    let (stdout, _, ok) = run_codectx(
        &config,
        &["search", "UserManager", repo_str, "--ext", ".py", "--limit", "5"],
    );
    assert!(ok);
    assert!(stdout.contains("user.py"), "unexpected: {}", stdout);
    assert!(!stdout.contains("calc.ts"));
}

#[test]
fn incremental_reindex_via_cli() {
    let (_tmp, config, repo) = setup_test_env();
    let repo_str = repo.to_str().unwrap();

    run_codectx(&config, &["index", repo_str]);

    fs::write(
        repo.join("src/extra.rs"),
        "pub fn extra_function_marker() -> u32 {\n    7\n}\n",
    )
    .unwrap();

    let (stdout, stderr, ok) = run_codectx(&config, &["index", repo_str]);
    assert!(ok, "reindex failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files: 3"), "unexpected: {}", stdout);

    let (stdout, _, ok) = run_codectx(&config, &["search", "extra_function_marker", repo_str]);
    assert!(ok);
    assert!(stdout.contains("extra.rs"), "unexpected: {}", stdout);
}
