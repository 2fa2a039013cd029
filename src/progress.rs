//! Progress events streamed to the caller, and the page tally behind the
//! global percentage.
//!
//! # Wire format
//!
//! Each [`ProgressEvent`] serialises to one JSON object tagged by `type`:
//!
//! ```json
//! {"type":"document_progress","document_name":"a.pdf","page_number":1,"total_pages":3,"percent_complete":33.33}
//! {"type":"global_progress","percent_complete":12.5,"pages_attempted":1,"total_pages":8}
//! {"type":"document_completed","document_name":"a.pdf","elapsed_seconds":4.2,"row_count":7,"avg_seconds_per_row":0.6,"skipped_pages":[]}
//! {"type":"job_completed","download_link":"/download?filename=output_data_1700000000.csv", ...}
//! {"type":"job_failed","document_name":"b.pdf","error":"PDF 'b.pdf' is corrupt: ..."}
//! ```
//!
//! The HTTP boundary frames each object as one server-sent event.

use crate::output::round2;
use serde::{Deserialize, Serialize};

/// One event of a job's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A page of one document was attempted (succeeded or skipped).
    DocumentProgress {
        document_name: String,
        page_number: usize,
        total_pages: usize,
        percent_complete: f64,
    },
    /// Share of all pages of the job attempted so far.
    GlobalProgress {
        percent_complete: f64,
        pages_attempted: usize,
        total_pages: usize,
    },
    /// A document finished all its pages.
    DocumentCompleted(DocumentSummary),
    /// Every worker has terminated; emitted at most once, always last.
    JobCompleted(JobSummary),
    /// A document could not be processed, or (with no `document_name`) the
    /// final export failed.
    JobFailed {
        document_name: Option<String>,
        error: String,
    },
}

impl ProgressEvent {
    /// True for the events that end a worker or the job.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::DocumentCompleted(_)
                | ProgressEvent::JobCompleted(_)
                | ProgressEvent::JobFailed { .. }
        )
    }
}

/// Per-document metrics reported when a document completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_name: String,
    pub elapsed_seconds: f64,
    pub row_count: usize,
    pub avg_seconds_per_row: f64,
    pub skipped_pages: Vec<usize>,
}

/// Whole-job metrics carried by [`ProgressEvent::JobCompleted`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    /// `None` when no rows were extracted and therefore nothing was exported.
    pub download_link: Option<String>,
    /// Sum of the per-document elapsed times.
    pub total_elapsed_seconds: f64,
    pub total_rows: usize,
    pub avg_seconds_per_row: f64,
    pub documents_completed: usize,
    pub documents_failed: usize,
}

/// `done / total` as a percentage rounded to two decimals, capped at 100.
///
/// An empty denominator counts as complete.
pub fn percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    round2(done.min(total) as f64 / total as f64 * 100.0)
}

/// Counts attempted pages against the job's fixed page total.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_pages: usize,
    attempted: usize,
}

impl ProgressTracker {
    pub fn new(total_pages: usize) -> Self {
        Self {
            total_pages,
            attempted: 0,
        }
    }

    /// Count one more attempted page and return the matching event.
    pub fn record_page(&mut self) -> ProgressEvent {
        self.attempted += 1;
        ProgressEvent::GlobalProgress {
            percent_complete: percent(self.attempted, self.total_pages),
            pages_attempted: self.attempted,
            total_pages: self.total_pages,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn attempted(&self) -> usize {
        self.attempted
    }
}
