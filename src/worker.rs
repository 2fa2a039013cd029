//! Per-document worker: render and extract page by page, record history,
//! report.
//!
//! Each page image is rendered right before its extraction and dropped right
//! after, so a worker holds one page in memory at a time. A page that fails
//! to rasterise is skipped. Any other render error (corrupt file, password,
//! pdfium binding) ends the worker early, and that is reported as
//! [`WorkerEvent::Failed`] rather than returned, so the coordinator keeps a
//! single channel as its only input.

use crate::error::{ExtractError, SkipReason};
use crate::history::{HistorySink, RunRecord};
use crate::job::DocumentSource;
use crate::output::{round2, DocumentReport, PageOutcome};
use crate::pipeline::extract::PageExtractor;
use crate::pipeline::render::PageRenderer;
use crate::progress::percent;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a worker tells the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerEvent {
    /// One page reached its outcome.
    PageAttempted {
        document_name: String,
        page_number: usize,
        total_pages: usize,
        percent: f64,
    },
    /// All pages done.
    Completed(DocumentReport),
    /// The document could not be rendered.
    Failed { document_name: String, error: String },
}

/// Everything a worker needs besides its document.
#[derive(Clone)]
pub(crate) struct DocumentWorker {
    pub renderer: Arc<dyn PageRenderer>,
    pub extractor: PageExtractor,
    pub history: Arc<dyn HistorySink>,
}

impl DocumentWorker {
    /// Process one document of `total_pages` pages to completion.
    ///
    /// A closed channel (the caller dropped the stream) does not stop the
    /// worker: pages are still extracted and history is still written.
    pub async fn run(
        &self,
        source: DocumentSource,
        total_pages: usize,
        prompt: String,
        username: String,
        events: UnboundedSender<WorkerEvent>,
    ) {
        let started = Instant::now();
        let name = source.name.clone();
        info!("Worker started: '{}' ({} pages)", name, total_pages);

        let mut rows = Vec::new();
        let mut skipped_pages = Vec::new();

        for page_number in 1..=total_pages {
            let outcome = match self.renderer.render_page(&source, page_number).await {
                Ok(page) => self.extractor.extract(&page, &prompt).await,
                Err(e @ ExtractError::RasterisationFailed { .. }) => {
                    PageOutcome::Skipped(SkipReason::FatalError {
                        detail: e.to_string(),
                    })
                }
                Err(e) => {
                    warn!("'{}': render failed: {}", name, e);
                    let _ = events.send(WorkerEvent::Failed {
                        document_name: name,
                        error: e.to_string(),
                    });
                    return;
                }
            };
            match outcome {
                PageOutcome::Success(page_rows) => {
                    debug!("'{}' p{}: {} rows", name, page_number, page_rows.len());
                    rows.extend(page_rows);
                }
                PageOutcome::Skipped(reason) => {
                    warn!("'{}' p{} skipped: {}", name, page_number, reason);
                    skipped_pages.push(page_number);
                }
            }
            let _ = events.send(WorkerEvent::PageAttempted {
                document_name: name.clone(),
                page_number,
                total_pages,
                percent: percent(page_number, total_pages),
            });
        }

        let elapsed_seconds = round2(started.elapsed().as_secs_f64());
        let report = DocumentReport {
            document_name: name.clone(),
            total_pages,
            rows,
            skipped_pages,
            elapsed_seconds,
        };

        let record = RunRecord::new(&username, &name, report.row_count(), elapsed_seconds);
        if let Err(e) = self.history.record_run(record).await {
            warn!("'{}': history not recorded: {}", name, e);
        }

        info!(
            "Worker finished: '{}' ({} rows, {} skipped pages, {:.2}s)",
            name,
            report.row_count(),
            report.skipped_pages.len(),
            elapsed_seconds
        );
        let _ = events.send(WorkerEvent::Completed(report));
    }
}
