//! Extraction history: one append-only record per completed document.
//!
//! Workers call [`HistorySink::record_run`] exactly once per document, after
//! the last page. The HTTP boundary reads the records back for the history
//! and statistics endpoints.

use crate::error::ExtractError;
use crate::output::seconds_per_row;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Metrics of one completed document, keyed by user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub username: String,
    pub document_name: String,
    pub total_rows: usize,
    pub total_time_seconds: f64,
    /// Unix seconds.
    pub recorded_at: u64,
}

impl RunRecord {
    pub fn new(
        username: impl Into<String>,
        document_name: impl Into<String>,
        total_rows: usize,
        total_time_seconds: f64,
    ) -> Self {
        Self {
            username: username.into(),
            document_name: document_name.into(),
            total_rows,
            total_time_seconds,
            recorded_at: unix_now(),
        }
    }

    pub fn avg_time_per_row(&self) -> f64 {
        seconds_per_row(self.total_time_seconds, self.total_rows)
    }
}

/// Append-only store of [`RunRecord`]s.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record_run(&self, record: RunRecord) -> Result<(), ExtractError>;

    /// Every record, in insertion order.
    async fn runs(&self) -> Result<Vec<RunRecord>, ExtractError>;
}

/// History kept in process memory. Lost on exit.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    runs: Mutex<Vec<RunRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistorySink for MemoryHistory {
    async fn record_run(&self, record: RunRecord) -> Result<(), ExtractError> {
        self.runs.lock().await.push(record);
        Ok(())
    }

    async fn runs(&self) -> Result<Vec<RunRecord>, ExtractError> {
        Ok(self.runs.lock().await.clone())
    }
}

/// History appended to a JSON-lines file, one record per line.
///
/// Appends from concurrent workers are serialised by an async mutex so
/// lines never interleave.
#[derive(Debug)]
pub struct JsonlHistory {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistorySink for JsonlHistory {
    async fn record_run(&self, record: RunRecord) -> Result<(), ExtractError> {
        let mut line = serde_json::to_string(&record)
            .map_err(|e| ExtractError::History(format!("serialise record: {}", e)))?;
        line.push('\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| history_io(&self.path, e))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| history_io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| history_io(&self.path, e))?;
        file.flush().await.map_err(|e| history_io(&self.path, e))?;

        debug!(
            "History: {} / '{}' → {}",
            record.username,
            record.document_name,
            self.path.display()
        );
        Ok(())
    }

    async fn runs(&self) -> Result<Vec<RunRecord>, ExtractError> {
        let _guard = self.lock.lock().await;
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(history_io(&self.path, e)),
        };
        text.lines()
            .filter(|l| !l.trim().is_empty())
            .enumerate()
            .map(|(i, l)| {
                serde_json::from_str(l).map_err(|e| {
                    ExtractError::History(format!(
                        "{} line {}: {}",
                        self.path.display(),
                        i + 1,
                        e
                    ))
                })
            })
            .collect()
    }
}

fn history_io(path: &Path, e: std::io::Error) -> ExtractError {
    ExtractError::History(format!("{}: {}", path.display(), e))
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Queries ──────────────────────────────────────────────────────────────────

/// Runs of one user (or everyone, for `None`), newest first.
pub fn runs_for(runs: &[RunRecord], username: Option<&str>) -> Vec<RunRecord> {
    let mut selected: Vec<RunRecord> = runs
        .iter()
        .filter(|r| username.map_or(true, |u| r.username == u))
        .cloned()
        .collect();
    // Stable sort keeps insertion order within the same second; reverse it too.
    selected.reverse();
    selected.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
    selected
}

/// Totals over the whole history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_users: usize,
    pub total_documents_processed: usize,
    pub total_rows_processed: usize,
}

impl HistoryStats {
    pub fn from_runs(runs: &[RunRecord]) -> Self {
        let users: HashSet<&str> = runs.iter().map(|r| r.username.as_str()).collect();
        let documents: HashSet<&str> = runs.iter().map(|r| r.document_name.as_str()).collect();
        Self {
            total_users: users.len(),
            total_documents_processed: documents.len(),
            total_rows_processed: runs.iter().map(|r| r.total_rows).sum(),
        }
    }
}

/// Per-user totals, sorted by username.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    pub username: String,
    pub total_documents: usize,
    pub total_rows: usize,
    pub avg_time_per_row: f64,
}

impl UserStats {
    pub fn from_runs(runs: &[RunRecord]) -> Vec<Self> {
        #[derive(Default)]
        struct Acc<'a> {
            documents: HashSet<&'a str>,
            rows: usize,
            seconds: f64,
        }

        let mut by_user: BTreeMap<&str, Acc<'_>> = BTreeMap::new();
        for run in runs {
            let acc = by_user.entry(run.username.as_str()).or_default();
            acc.documents.insert(run.document_name.as_str());
            acc.rows += run.total_rows;
            acc.seconds += run.total_time_seconds;
        }

        by_user
            .into_iter()
            .map(|(username, acc)| UserStats {
                username: username.to_string(),
                total_documents: acc.documents.len(),
                total_rows: acc.rows,
                avg_time_per_row: seconds_per_row(acc.seconds, acc.rows),
            })
            .collect()
    }

    /// Totals of one user; zeros when they have no runs.
    pub fn for_user(runs: &[RunRecord], username: &str) -> Self {
        let own: Vec<RunRecord> = runs
            .iter()
            .filter(|r| r.username == username)
            .cloned()
            .collect();
        Self::from_runs(&own).pop().unwrap_or_else(|| UserStats {
            username: username.to_string(),
            total_documents: 0,
            total_rows: 0,
            avg_time_per_row: 0.0,
        })
    }
}
