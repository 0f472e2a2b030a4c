//! Collection run state (`run.json`) and the append-only run log (`log.jsonl`)

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cumulus_core::{Query, SourceTag, StorageError};
use serde::{Deserialize, Serialize};

use crate::layout::{Layout, write_json_atomic};

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    /// Every source exhausted
    Completed,
    /// At least one source failed; at least one other finished
    Partial,
    /// Cancelled by the operator
    Aborted,
    /// Storage failure, or no source finished
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        self != Self::Running
    }

    /// Whether `resume` has anything left to do
    pub fn is_resumable(self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Partial => "PARTIAL",
            Self::Aborted => "ABORTED",
            Self::Failed => "FAILED",
        })
    }
}

/// Status of one source within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Running,
    Exhausted,
    Failed,
    Cancelled,
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Exhausted => "exhausted",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Cursor and counters for one source.
///
/// The cursor is `(query_idx, next_item)`: the index of the next unprocessed
/// item in the source's native order for query `query_idx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProgress {
    pub status: SourceStatus,
    pub query_idx: usize,
    pub next_item: usize,
    #[serde(default)]
    pub collected: usize,
    #[serde(default)]
    pub excluded: usize,
    #[serde(default)]
    pub rejected: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub images: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for SourceProgress {
    fn default() -> Self {
        Self {
            status: SourceStatus::Pending,
            query_idx: 0,
            next_item: 0,
            collected: 0,
            excluded: 0,
            rejected: 0,
            skipped: 0,
            failed: 0,
            images: 0,
            last_error: None,
        }
    }
}

impl SourceProgress {
    /// Items examined so far, across all outcomes
    pub fn examined(&self) -> usize {
        self.collected + self.excluded + self.rejected + self.skipped + self.failed
    }
}

/// Which image files a run downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub images: bool,
    /// Resolution labels to fetch; `None` means all
    #[serde(default)]
    pub labels: Option<BTreeSet<String>>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            images: true,
            labels: None,
        }
    }
}

impl DownloadOptions {
    pub fn wants(&self, label: &str) -> bool {
        self.images && self.labels.as_ref().is_none_or(|l| l.contains(label))
    }
}

/// Persisted state of one collection run (`runs/{run-id}/run.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub queries: Vec<Query>,
    #[serde(default)]
    pub download: DownloadOptions,
    pub sources: BTreeMap<SourceTag, SourceProgress>,
}

impl RunState {
    /// Fresh run with every source pending at the start of query 0.
    pub fn new(queries: Vec<Query>, download: DownloadOptions, sources: &[SourceTag]) -> Self {
        let now = Utc::now();
        let sources = sources
            .iter()
            .map(|&tag| (tag, SourceProgress::default()))
            .collect();
        Self {
            run_id: run_id(now, &queries),
            created_at: now,
            updated_at: now,
            status: RunStatus::Running,
            queries,
            download,
            sources,
        }
    }

    /// Persist a new run, picking a free run id if this one is taken.
    pub fn create(&mut self, layout: &Layout) -> Result<(), StorageError> {
        let base = self.run_id.clone();
        let mut n = 1;
        while layout.run_dir(&self.run_id).exists() {
            n += 1;
            self.run_id = format!("{base}-{n}");
        }
        self.save(layout)
    }

    pub fn save(&self, layout: &Layout) -> Result<(), StorageError> {
        write_json_atomic(&layout.run_dir(&self.run_id).join("run.json"), self)
    }

    pub fn load(layout: &Layout, run_id: &str) -> Result<Self> {
        let path = layout.run_dir(run_id).join("run.json");
        let content =
            fs::read(&path).with_context(|| format!("no run state at {}", path.display()))?;
        serde_json::from_slice(&content)
            .with_context(|| format!("invalid run state {}", path.display()))
    }

    /// Every run under `runs/`, oldest first.
    pub fn list(layout: &Layout) -> Result<Vec<Self>> {
        let dir = layout.runs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))? {
            let entry = entry?;
            if !entry.path().join("run.json").is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match Self::load(layout, &name) {
                Ok(run) => runs.push(run),
                Err(e) => log::warn!("skipping run {name}: {e:#}"),
            }
        }
        runs.sort_by(|a, b| (a.created_at, &a.run_id).cmp(&(b.created_at, &b.run_id)));
        Ok(runs)
    }

    pub fn latest(layout: &Layout) -> Result<Option<Self>> {
        Ok(Self::list(layout)?.pop())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Sources not yet exhausted
    pub fn unfinished(&self) -> impl Iterator<Item = SourceTag> + '_ {
        self.sources
            .iter()
            .filter(|(_, p)| p.status != SourceStatus::Exhausted)
            .map(|(&tag, _)| tag)
    }

    /// Terminal status implied by the per-source statuses.
    pub fn settle(&self) -> RunStatus {
        let statuses = || self.sources.values().map(|p| p.status);
        if statuses().all(|s| s == SourceStatus::Exhausted) {
            RunStatus::Completed
        } else if statuses().any(|s| {
            matches!(
                s,
                SourceStatus::Cancelled | SourceStatus::Pending | SourceStatus::Running
            )
        }) {
            RunStatus::Aborted
        } else if statuses().any(|s| s == SourceStatus::Exhausted) {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        }
    }
}

/// `<UTC %Y%m%dT%H%M%SZ>-<short blake3 of the queries>`
fn run_id(at: DateTime<Utc>, queries: &[Query]) -> String {
    let json = serde_json::to_vec(queries).unwrap_or_default();
    let hash = cumulus_core::hash::short_hash(&cumulus_core::hash::hash_bytes(&json));
    format!("{}-{hash}", at.format("%Y%m%dT%H%M%SZ"))
}

/// One line of `log.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceTag>,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    RunStarted {
        resumed: bool,
    },
    QueryStarted {
        query: String,
        query_idx: usize,
        from: usize,
    },
    Item {
        query_idx: usize,
        index: usize,
        object_id: Option<String>,
        outcome: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    ImageFailed {
        object_id: String,
        label: String,
        error: String,
    },
    SourceFinished {
        status: SourceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    RunFinished {
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Append-only writer for `log.jsonl`; every entry is flushed.
pub struct RunLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RunLog {
    pub fn open(layout: &Layout, run_id: &str) -> Result<Self, StorageError> {
        let dir = layout.run_dir(run_id);
        fs::create_dir_all(&dir).map_err(|e| StorageError::new(&dir, e))?;
        let path = dir.join("log.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::new(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, source: Option<SourceTag>, event: LogEvent) -> Result<(), StorageError> {
        let entry = LogEntry {
            at: Utc::now(),
            source,
            event,
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| StorageError::new(&self.path, std::io::Error::other(e)))?;
        writeln!(self.writer, "{line}")
            .and_then(|()| self.writer.flush())
            .map_err(|e| StorageError::new(&self.path, e))
    }

    /// Read back all entries; a torn last line is ignored.
    pub fn read(layout: &Layout, run_id: &str) -> Result<Vec<LogEntry>> {
        let path = layout.run_dir(run_id).join("log.jsonl");
        let file = File::open(&path).with_context(|| format!("no run log at {}", path.display()))?;
        let mut entries = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => log::warn!("{}:{}: {e}", path.display(), n + 1),
            }
        }
        Ok(entries)
    }
}
