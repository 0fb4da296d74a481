//! Indexing progress reporting.
//!
//! Progress is emitted on **stderr** so stdout stays parseable for
//! scripts. Reporters are selected by TTY detection: human-readable lines
//! on a terminal, nothing otherwise, with a JSON mode for tooling.

use std::io::Write;

/// Phase of the indexing pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexPhase {
    Preparing,
    Scanning,
    IndexingFiles,
    Completed,
    NoChanges,
}

impl IndexPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexPhase::Preparing => "preparing",
            IndexPhase::Scanning => "scanning",
            IndexPhase::IndexingFiles => "indexing files",
            IndexPhase::Completed => "completed",
            IndexPhase::NoChanges => "no changes",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub struct ProgressEvent {
    pub phase: IndexPhase,
    /// Percentage in `[0, 100]`.
    pub percentage: u8,
    pub current_file: Option<String>,
}

/// Reports indexing progress. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress: `index  indexing files  42%  src/main.rs`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let line = match &event.current_file {
            Some(file) => format!(
                "index  {}  {}%  {}\n",
                event.phase.as_str(),
                event.percentage,
                file
            ),
            None => format!("index  {}  {}%\n", event.phase.as_str(), event.percentage),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "phase": event.phase.as_str(),
            "percentage": event.percentage,
            "currentFile": event.current_file,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
