//! TOML configuration parsing, validation, and environment substitution.
//!
//! Configuration is read from a single TOML file resolved in the
//! invocation directory (default `./codectx.toml`); a missing file yields
//! [`Config::default`], which indexes with the offline hash embedder into
//! the user-scoped data directory.
//!
//! String values may reference environment variables with the `[VAR]`
//! token syntax (e.g. `api_key = "[OPENAI_API_KEY]"`). Tokens are
//! substituted after parsing; a referenced variable that is not set fails
//! configuration loading immediately.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::error::CoreError;
use crate::splitter::SplitMode;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub indexing: IndexingConfig,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Base directory for collections, snapshots, and the registry.
    /// Defaults to the platform data dir (e.g. `~/.local/share/codectx`).
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolve_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codectx")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexingConfig {
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Overlap carried between character-split chunks.
    pub chunk_overlap: usize,
    /// Chunks per embedding batch.
    pub batch_size: usize,
    /// Hard cap on chunks per index run; exceeding it records
    /// `limit_reached` instead of `completed`.
    pub max_chunks: usize,
    /// Store sparse vectors alongside dense ones and fuse at query time.
    pub hybrid: bool,
    /// `ast` (declaration boundaries) or `chars`.
    pub splitter: SplitMode,
    /// Optional name mixed into the deterministic collection name.
    pub context_name: Option<String>,
    /// File extensions eligible for indexing (no leading dot).
    pub supported_extensions: Vec<String>,
    /// Extra ignore globs on top of the built-in defaults.
    pub ignore_patterns: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            batch_size: 64,
            max_chunks: 450_000,
            hybrid: true,
            splitter: SplitMode::Ast,
            context_name: None,
            supported_extensions: default_supported_extensions(),
            ignore_patterns: Vec::new(),
        }
    }
}

fn default_supported_extensions() -> Vec<String> {
    [
        "rs", "py", "pyw", "js", "jsx", "mjs", "cjs", "ts", "tsx", "go", "java", "kt", "c", "h",
        "cpp", "cc", "hpp", "cs", "rb", "php", "swift", "scala", "sh", "md",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `hash` (offline, deterministic) or `openai`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Supports `[VAR]` environment references.
    pub api_key: Option<String>,
    /// Override for OpenAI-compatible endpoints; supports `[VAR]`.
    pub base_url: Option<String>,
    /// Provider token limit used to truncate oversized inputs.
    pub token_limit: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            model: None,
            dims: None,
            api_key: None,
            base_url: None,
            token_limit: 8192,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchConfig {
    pub limit: usize,
    pub threshold: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            threshold: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7833".to_string(),
        }
    }
}

/// Load and validate configuration. A missing file is not an error: the
/// defaults make the tool usable with zero setup.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str::<Config>(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?
    } else {
        Config::default()
    };

    // Environment substitution on the values that commonly carry secrets.
    config.embedding.api_key = substitute_opt(config.embedding.api_key.take())?;
    config.embedding.base_url = substitute_opt(config.embedding.base_url.take())?;
    config.embedding.model = substitute_opt(config.embedding.model.take())?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.indexing.chunk_size == 0 {
        bail!("indexing.chunk_size must be > 0");
    }
    if config.indexing.batch_size == 0 {
        bail!("indexing.batch_size must be > 0");
    }
    if config.indexing.max_chunks == 0 {
        bail!("indexing.max_chunks must be > 0");
    }
    if config.search.limit == 0 {
        bail!("search.limit must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                bail!("embedding.model is required when provider is 'openai'");
            }
            if config.embedding.dims.unwrap_or(0) == 0 {
                bail!("embedding.dims must be > 0 when provider is 'openai'");
            }
            if config.embedding.api_key.is_none() {
                bail!("embedding.api_key is required when provider is 'openai'");
            }
        }
        other => bail!(
            "unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    Ok(())
}

fn substitute_opt(value: Option<String>) -> Result<Option<String>> {
    value.map(|v| substitute_env_tokens(&v)).transpose()
}

/// Replace `[VAR]` tokens with the value of the named environment
/// variable. Only `[A-Z][A-Z0-9_]*` names are treated as references;
/// anything else inside brackets is kept literally. Missing variables
/// fail fast with a [`CoreError::Config`].
pub fn substitute_env_tokens(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(open) = rest.find('[') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find(']') {
            Some(close) if is_env_name(&after[..close]) => {
                let name = &after[..close];
                match std::env::var(name) {
                    Ok(resolved) => out.push_str(&resolved),
                    Err(_) => {
                        return Err(CoreError::Config(format!(
                            "environment variable {} referenced by config is not set",
                            name
                        ))
                        .into());
                    }
                }
                rest = &after[close + 1..];
            }
            _ => {
                out.push('[');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn is_env_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
