//! Job coordination: fan out one worker per document, fold their events
//! into one ordered progress stream, export the merged rows once at the end.
//!
//! ## Lifecycle of a job
//!
//! ```text
//! submit ─▶ validate ─▶ authenticate ─▶ pre-count pages ─▶ spawn workers
//!                                              │                 │
//!                             (count failures) ▼                 ▼ mpsc
//!                                         JobFailed ◀── fold ◀── events
//!                                                        │
//!                               all workers done ─▶ export ─▶ JobCompleted
//! ```
//!
//! Everything up to the spawn happens inside [`ExtractionCoordinator::submit`]
//! so request errors come back as `Err` before any page is rendered. The
//! returned [`JobStream`] is lazy: the fold, and the final export, run as the
//! caller polls it.

use crate::auth::Authenticator;
use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::export::TabularExporter;
use crate::history::HistorySink;
use crate::job::ExtractionJob;
use crate::output::{round2, seconds_per_row, ExtractedRow, JobOutcome};
use crate::pipeline::extract::PageExtractor;
use crate::pipeline::input::dedupe_names;
use crate::pipeline::llm::{resolve_provider, LlmVisionModel, VisionModel};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer};
use crate::progress::{JobSummary, ProgressEvent, ProgressTracker};
use crate::worker::{DocumentWorker, WorkerEvent};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_stream::Stream;
use tracing::{info, warn};

/// The progress events of one job, ending after the terminal event.
pub type JobStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Runs extraction jobs against shared collaborators.
pub struct ExtractionCoordinator {
    renderer: Arc<dyn PageRenderer>,
    extractor: PageExtractor,
    history: Arc<dyn HistorySink>,
    authenticator: Arc<dyn Authenticator>,
    exporter: Arc<TabularExporter>,
    download_path: String,
}

impl ExtractionCoordinator {
    pub fn new(
        config: &ExtractionConfig,
        renderer: Arc<dyn PageRenderer>,
        model: Arc<dyn VisionModel>,
        history: Arc<dyn HistorySink>,
        authenticator: Arc<dyn Authenticator>,
        exporter: Arc<TabularExporter>,
    ) -> Self {
        Self {
            renderer,
            extractor: PageExtractor::new(model, config.retry_policy()),
            history,
            authenticator,
            exporter,
            download_path: config.download_path.clone(),
        }
    }

    /// Wire pdfium, the configured LLM provider and the export directory
    /// from `config`.
    pub fn from_config(
        config: &ExtractionConfig,
        history: Arc<dyn HistorySink>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, ExtractError> {
        let provider = resolve_provider(config)?;
        info!(
            "Using provider: {} / model: {}",
            config.provider_name.as_deref().unwrap_or("auto"),
            config.model.as_deref().unwrap_or("default")
        );
        let model = Arc::new(LlmVisionModel::new(provider, config));
        let renderer = Arc::new(PdfiumRenderer::new(config));
        let exporter = match &config.export_dir {
            Some(dir) => TabularExporter::new(dir),
            None => TabularExporter::temporary()?,
        };
        Ok(Self::new(
            config,
            renderer,
            model,
            history,
            authenticator,
            Arc::new(exporter),
        ))
    }

    /// The exporter that artifacts of this coordinator's jobs are written to.
    pub fn exporter(&self) -> Arc<TabularExporter> {
        Arc::clone(&self.exporter)
    }

    /// Route prefix of the `download_link`s this coordinator emits.
    pub fn download_path(&self) -> &str {
        &self.download_path
    }

    /// Validate and start a job.
    ///
    /// # Errors
    /// [`ExtractError::NoDocuments`], [`ExtractError::EmptyPrompt`] or
    /// [`ExtractError::AuthenticationFailed`]; in every case nothing has been
    /// rendered.
    pub async fn submit(&self, job: ExtractionJob) -> Result<JobStream, ExtractError> {
        let ExtractionJob {
            mut documents,
            prompt,
            credentials,
        } = job;

        if documents.is_empty() {
            return Err(ExtractError::NoDocuments);
        }
        if prompt.trim().is_empty() {
            return Err(ExtractError::EmptyPrompt);
        }
        if !self
            .authenticator
            .authenticate(&credentials.login, &credentials.password)
            .await
        {
            warn!("Rejected job: bad credentials for '{}'", credentials.login);
            return Err(ExtractError::AuthenticationFailed {
                login: credentials.login,
            });
        }
        let username = self.authenticator.username_for(&credentials.login);

        dedupe_names(&mut documents);

        // ── Pre-count: fixes the global denominator ──────────────────────
        let counts = join_all(documents.iter().map(|d| self.renderer.page_count(d))).await;

        let mut pending = VecDeque::new();
        let mut launch = Vec::with_capacity(documents.len());
        let mut total_pages = 0;
        for (doc, count) in documents.into_iter().zip(counts) {
            match count {
                Ok(n) => {
                    total_pages += n;
                    launch.push((doc, n));
                }
                Err(e) => {
                    warn!("'{}': page count failed: {}", doc.name, e);
                    pending.push_back(ProgressEvent::JobFailed {
                        document_name: Some(doc.name),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Job for '{}': {} documents, {} pages",
            username,
            launch.len(),
            total_pages
        );

        // ── Fan out ──────────────────────────────────────────────────────
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = DocumentWorker {
            renderer: Arc::clone(&self.renderer),
            extractor: self.extractor.clone(),
            history: Arc::clone(&self.history),
        };
        let mut order = HashMap::with_capacity(launch.len());
        for (i, (doc, pages)) in launch.into_iter().enumerate() {
            order.insert(doc.name.clone(), i);
            let worker = worker.clone();
            let tx = tx.clone();
            let prompt = prompt.clone();
            let username = username.clone();
            tokio::spawn(async move { worker.run(doc, pages, prompt, username, tx).await });
        }
        drop(tx);

        let state = JobState {
            rx,
            active: order.len(),
            documents_failed: pending.len(),
            pending,
            tracker: ProgressTracker::new(total_pages),
            order,
            merged: Vec::new(),
            elapsed_seconds: 0.0,
            documents_completed: 0,
            exporter: Arc::clone(&self.exporter),
            download_path: self.download_path.clone(),
            finished: false,
        };

        Ok(Box::pin(stream::unfold(state, |mut state| async move {
            state.next_event().await.map(|ev| (ev, state))
        })))
    }

    /// Submit a job and drain its stream.
    pub async fn run(&self, job: ExtractionJob) -> Result<JobOutcome, ExtractError> {
        let mut events = self.submit(job).await?;
        let mut outcome = JobOutcome::default();
        while let Some(event) = events.next().await {
            outcome.push(event);
        }
        Ok(outcome)
    }
}

/// Coordinator-local fold state of one job.
struct JobState {
    rx: UnboundedReceiver<WorkerEvent>,
    /// Events ready to hand out, oldest first.
    pending: VecDeque<ProgressEvent>,
    /// Workers that have not sent their terminal event.
    active: usize,
    tracker: ProgressTracker,
    /// Submission index per document, for a stable merge order.
    order: HashMap<String, usize>,
    merged: Vec<(usize, Vec<ExtractedRow>)>,
    elapsed_seconds: f64,
    documents_completed: usize,
    documents_failed: usize,
    exporter: Arc<TabularExporter>,
    download_path: String,
    finished: bool,
}

impl JobState {
    async fn next_event(&mut self) -> Option<ProgressEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if self.finished {
                return None;
            }
            if self.active == 0 {
                self.finished = true;
                self.finish().await;
                continue;
            }
            match self.rx.recv().await {
                Some(event) => self.fold(event),
                None => {
                    warn!("Worker channel closed with {} workers active", self.active);
                    self.active = 0;
                }
            }
        }
    }

    fn fold(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::PageAttempted {
                document_name,
                page_number,
                total_pages,
                percent,
            } => {
                self.pending.push_back(ProgressEvent::DocumentProgress {
                    document_name,
                    page_number,
                    total_pages,
                    percent_complete: percent,
                });
                self.pending.push_back(self.tracker.record_page());
            }
            WorkerEvent::Completed(report) => {
                self.active = self.active.saturating_sub(1);
                self.documents_completed += 1;
                self.elapsed_seconds += report.elapsed_seconds;
                self.pending
                    .push_back(ProgressEvent::DocumentCompleted(report.summary()));
                let index = self
                    .order
                    .get(&report.document_name)
                    .copied()
                    .unwrap_or(usize::MAX);
                self.merged.push((index, report.rows));
            }
            WorkerEvent::Failed {
                document_name,
                error,
            } => {
                self.active = self.active.saturating_sub(1);
                self.documents_failed += 1;
                self.pending.push_back(ProgressEvent::JobFailed {
                    document_name: Some(document_name),
                    error,
                });
            }
        }
    }

    /// Runs once, after the last worker reported.
    async fn finish(&mut self) {
        if self.documents_completed == 0 {
            warn!("Job ended: every document failed");
            return;
        }

        self.merged.sort_by_key(|(index, _)| *index);
        let rows: Vec<ExtractedRow> = std::mem::take(&mut self.merged)
            .into_iter()
            .flat_map(|(_, rows)| rows)
            .collect();

        let total_elapsed_seconds = round2(self.elapsed_seconds);
        let download_link = if rows.is_empty() {
            info!("Job ended with zero rows; nothing exported");
            None
        } else {
            let filename = self.exporter.next_filename();
            match self.exporter.export(&rows, &filename).await {
                Ok(_) => Some(format!("{}?filename={}", self.download_path, filename)),
                Err(e) => {
                    warn!("Export failed: {}", e);
                    self.pending.push_back(ProgressEvent::JobFailed {
                        document_name: None,
                        error: e.to_string(),
                    });
                    return;
                }
            }
        };

        info!(
            "Job completed: {} rows from {} documents in {:.2}s",
            rows.len(),
            self.documents_completed,
            total_elapsed_seconds
        );
        self.pending.push_back(ProgressEvent::JobCompleted(JobSummary {
            download_link,
            total_elapsed_seconds,
            total_rows: rows.len(),
            avg_seconds_per_row: seconds_per_row(total_elapsed_seconds, rows.len()),
            documents_completed: self.documents_completed,
            documents_failed: self.documents_failed,
        }));
    }
}
