//! MCP-compatible tool server.
//!
//! Exposes the four indexing tools over a JSON HTTP API suitable for
//! Cursor, Claude, and other MCP-compatible clients:
//!
//! | Method | Path | Tool |
//! |--------|------|------|
//! | `POST` | `/tools/index_codebase` | Index (or re-index) a codebase |
//! | `POST` | `/tools/search_code` | Semantic search over an indexed codebase |
//! | `POST` | `/tools/clear_index` | Drop a codebase's collection and snapshot |
//! | `POST` | `/tools/get_indexing_status` | Registry status for a codebase |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Every tool takes an absolute `path` and returns a structured text
//! response (`{"content": [{"type": "text", "text": …}]}`). Errors follow
//! the `{"error": {"code", "message"}}` shape with codes `bad_request`,
//! `not_found`, and `internal`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients and cross-origin tool calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::pipeline::{Indexer, SearchRequest};
use crate::progress::NoProgress;
use crate::registry::{CodebaseStatus, Completion};

/// Shared state handed to every route handler.
#[derive(Clone)]
struct AppState {
    indexer: Arc<Indexer>,
}

/// Start the tool server on `bind`.
pub async fn run_server(indexer: Arc<Indexer>, bind: &str) -> anyhow::Result<()> {
    let state = AppState { indexer };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/index_codebase", post(handle_index))
        .route("/tools/search_code", post(handle_search))
        .route("/tools/clear_index", post(handle_clear))
        .route("/tools/get_indexing_status", post(handle_status))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("MCP tool server listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

enum ToolError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ToolError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ToolError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ToolError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ Structured text response ============

#[derive(Serialize)]
struct ToolResponse {
    content: Vec<ToolContent>,
}

#[derive(Serialize)]
struct ToolContent {
    #[serde(rename = "type")]
    kind: String,
    text: String,
}

fn text_response(text: String) -> Json<ToolResponse> {
    Json(ToolResponse {
        content: vec![ToolContent {
            kind: "text".to_string(),
            text,
        }],
    })
}

fn require_absolute(path: &str) -> Result<PathBuf, ToolError> {
    let path = Path::new(path);
    if !path.is_absolute() {
        return Err(ToolError::BadRequest(format!(
            "path must be absolute, got '{}'",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

// ============ Handlers ============

#[derive(Deserialize)]
struct IndexRequest {
    path: String,
    #[serde(default)]
    force: bool,
}

async fn handle_index(
    State(state): State<AppState>,
    Json(request): Json<IndexRequest>,
) -> Result<Json<ToolResponse>, ToolError> {
    let path = require_absolute(&request.path)?;
    if !path.is_dir() {
        return Err(ToolError::BadRequest(format!(
            "'{}' is not a directory",
            path.display()
        )));
    }

    let stats = state
        .indexer
        .index(&path, request.force, &NoProgress)
        .await
        .map_err(|e| ToolError::Internal(format!("{:#}", e)))?;

    let note = match stats.completion {
        Completion::Completed => String::new(),
        Completion::LimitReached => "\nchunk limit reached; index is partial".to_string(),
    };
    Ok(text_response(format!(
        "Indexed {}\nfiles: {}\nchunks: {}{}",
        path.display(),
        stats.files,
        stats.chunks,
        note
    )))
}

#[derive(Deserialize)]
struct SearchCodeRequest {
    path: String,
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    extensions: Option<Vec<String>>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchCodeRequest>,
) -> Result<Json<ToolResponse>, ToolError> {
    let path = require_absolute(&request.path)?;
    if request.query.trim().is_empty() {
        return Err(ToolError::BadRequest("query must not be empty".to_string()));
    }

    let search = SearchRequest {
        query: request.query.clone(),
        limit: request.limit.unwrap_or(10),
        threshold: None,
        extensions: request.extensions,
    };
    let outcome = state
        .indexer
        .search(&path, &search)
        .await
        .map_err(|e| ToolError::Internal(format!("{:#}", e)))?;

    let mut text = String::new();
    if outcome.indexing_in_progress {
        text.push_str("note: indexing is still in progress; results may be partial\n\n");
    }
    if outcome.results.is_empty() {
        text.push_str("No results.");
    } else {
        for (i, result) in outcome.results.iter().enumerate() {
            text.push_str(&format!(
                "{}. {}:{}-{} [{}] score {:.4}\n{}\n\n",
                i + 1,
                result.relative_path,
                result.start_line,
                result.end_line,
                result.language,
                result.score,
                result.content.trim_end()
            ));
        }
    }
    Ok(text_response(text.trim_end().to_string()))
}

#[derive(Deserialize)]
struct PathRequest {
    path: String,
}

async fn handle_clear(
    State(state): State<AppState>,
    Json(request): Json<PathRequest>,
) -> Result<Json<ToolResponse>, ToolError> {
    let path = require_absolute(&request.path)?;
    state
        .indexer
        .clear_index(&path)
        .await
        .map_err(|e| ToolError::Internal(format!("{:#}", e)))?;
    Ok(text_response(format!("Cleared index for {}", path.display())))
}

async fn handle_status(
    State(state): State<AppState>,
    Json(request): Json<PathRequest>,
) -> Result<Json<ToolResponse>, ToolError> {
    let path = require_absolute(&request.path)?;
    let (status, has_collection) = state
        .indexer
        .status(&path)
        .await
        .map_err(|e| ToolError::Internal(format!("{:#}", e)))?;

    let text = match status {
        Some(CodebaseStatus::Indexing { progress, .. }) => {
            format!("indexing ({}%)", progress)
        }
        Some(CodebaseStatus::Indexed {
            files,
            chunks,
            completion,
            ..
        }) => {
            let suffix = match completion {
                Completion::Completed => "",
                Completion::LimitReached => " (chunk limit reached)",
            };
            format!("indexed: {} files, {} chunks{}", files, chunks, suffix)
        }
        Some(CodebaseStatus::Failed { message, .. }) => {
            format!("failed: {}\nhint: re-run indexing with force=true", message)
        }
        None if has_collection => "collection exists but is not registered".to_string(),
        None => "not indexed".to_string(),
    };
    Ok(text_response(text))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
