//! Build progress reporting.
//!
//! Reports observable progress while a corpus is scored, chunked and
//! embedded, so long neural builds show how much is left. Progress is
//! emitted on **stderr**; structured diagnostics go through `tracing`.

use std::io::Write;

use oeuvre_core::models::SourceType;

/// A single progress event for a build.
#[derive(Clone, Debug, PartialEq)]
pub enum BuildProgressEvent {
    /// Documents of this source scored and chunked.
    Ingesting {
        source: SourceType,
        n: u64,
        total: u64,
    },
    /// Chunks of this source embedded so far.
    Embedding {
        source: SourceType,
        n: u64,
        total: u64,
    },
    /// Shards are being merged into the combined index.
    Merging { shards: usize },
}

/// Reports build progress. Implementations write to stderr (human or JSON).
pub trait BuildProgressReporter: Send + Sync {
    fn report(&self, event: BuildProgressEvent);
}

/// Human progress on stderr: "build news  embedding  1,200 / 5,000 chunks".
pub struct StderrProgress;

impl BuildProgressReporter for StderrProgress {
    fn report(&self, event: BuildProgressEvent) {
        let line = match &event {
            BuildProgressEvent::Ingesting { source, n, total } => format!(
                "build {}  ingesting  {} / {} documents\n",
                source,
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Embedding { source, n, total } => format!(
                "build {}  embedding  {} / {} chunks\n",
                source,
                format_number(*n),
                format_number(*total)
            ),
            BuildProgressEvent::Merging { shards } => {
                format!("build  merging {} shards\n", shards)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BuildProgressReporter for JsonProgress {
    fn report(&self, event: BuildProgressEvent) {
        let obj = match &event {
            BuildProgressEvent::Ingesting { source, n, total } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "ingesting",
                "n": n,
                "total": total
            }),
            BuildProgressEvent::Embedding { source, n, total } => serde_json::json!({
                "event": "progress",
                "source": source,
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            BuildProgressEvent::Merging { shards } => serde_json::json!({
                "event": "progress",
                "phase": "merging",
                "shards": shards
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BuildProgressReporter for NoProgress {
    fn report(&self, _event: BuildProgressEvent) {}
}

pub(crate) fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn BuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
