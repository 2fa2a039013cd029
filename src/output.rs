//! Extraction results: rows, page outcomes and document/job reports.

use crate::error::SkipReason;
use crate::progress::{DocumentSummary, JobSummary, ProgressEvent};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of model output, stamped with where it came from.
///
/// `fields` holds whatever keys the model produced for this page, in the
/// order it produced them. Serialises flat: the stamp columns sit next to
/// the model's own keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRow {
    pub document_name: String,
    pub page_number: usize,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ExtractedRow {
    pub fn new(document_name: impl Into<String>, page_number: usize, fields: Map<String, Value>) -> Self {
        Self {
            document_name: document_name.into(),
            page_number,
            fields,
        }
    }
}

/// Terminal result of extracting one page.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    /// The model answered with parseable JSON; may hold zero rows.
    Success(Vec<ExtractedRow>),
    /// No rows from this page.
    Skipped(SkipReason),
}

impl PageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Success(_))
    }
}

/// Everything a worker hands the coordinator when its document finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentReport {
    pub document_name: String,
    pub total_pages: usize,
    pub rows: Vec<ExtractedRow>,
    pub skipped_pages: Vec<usize>,
    pub elapsed_seconds: f64,
}

impl DocumentReport {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Seconds per extracted row, 0 when nothing was extracted.
    pub fn avg_seconds_per_row(&self) -> f64 {
        seconds_per_row(self.elapsed_seconds, self.rows.len())
    }

    /// The caller-facing summary (rows stay with the coordinator).
    pub fn summary(&self) -> DocumentSummary {
        DocumentSummary {
            document_name: self.document_name.clone(),
            elapsed_seconds: self.elapsed_seconds,
            row_count: self.row_count(),
            avg_seconds_per_row: self.avg_seconds_per_row(),
            skipped_pages: self.skipped_pages.clone(),
        }
    }
}

/// A drained job: every event in emission order plus the terminal summary.
///
/// Returned by [`crate::coordinator::ExtractionCoordinator::run`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobOutcome {
    pub events: Vec<ProgressEvent>,
    pub documents: Vec<DocumentSummary>,
    pub failures: Vec<JobFailure>,
    /// `None` only when every document failed.
    pub summary: Option<JobSummary>,
}

/// A document (or the job itself, when `document_name` is `None`) that
/// ended in error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub document_name: Option<String>,
    pub error: String,
}

impl JobOutcome {
    pub fn push(&mut self, event: ProgressEvent) {
        match &event {
            ProgressEvent::DocumentCompleted(doc) => self.documents.push(doc.clone()),
            ProgressEvent::JobFailed {
                document_name,
                error,
            } => self.failures.push(JobFailure {
                document_name: document_name.clone(),
                error: error.clone(),
            }),
            ProgressEvent::JobCompleted(summary) => self.summary = Some(summary.clone()),
            ProgressEvent::DocumentProgress { .. } | ProgressEvent::GlobalProgress { .. } => {}
        }
        self.events.push(event);
    }

    /// Final global percentage seen, 0 when no page was attempted.
    pub fn final_global_percent(&self) -> f64 {
        self.events
            .iter()
            .rev()
            .find_map(|e| match e {
                ProgressEvent::GlobalProgress {
                    percent_complete, ..
                } => Some(*percent_complete),
                _ => None,
            })
            .unwrap_or(0.0)
    }
}

/// Round to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub(crate) fn seconds_per_row(seconds: f64, rows: usize) -> f64 {
    if rows == 0 {
        0.0
    } else {
        round2(seconds / rows as f64)
    }
}
