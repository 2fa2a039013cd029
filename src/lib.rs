//! # edgequake-pdf2table
//!
//! Extract structured rows from PDF documents using Vision Language Models
//! (VLMs), with live progress for every page of every document.
//!
//! ## Why this crate?
//!
//! Invoices, statements and scanned forms carry their data in tables that
//! text extractors flatten or scramble. This crate rasterises each page and
//! asks a VLM to return the records the caller describes in a free-text
//! prompt as JSON, then merges all pages of all documents into one CSV.
//!
//! ## Pipeline Overview
//!
//! ```text
//! job (N PDFs + prompt + credentials)
//!  │
//!  ├─ 1. Authenticate      once, before any rendering
//!  ├─ 2. Pre-count pages   fixes the global progress denominator
//!  ├─ 3. Fan out           one tokio task per document
//!  │     └─ per page:      render → encode → VLM (retry/backoff/timeout) → JSON rows
//!  ├─ 4. Fold events       one ordered ProgressEvent stream
//!  └─ 5. Export            merged rows → output_data_<ts>.csv
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2table::{
//!     CredentialStore, Credentials, DocumentSource, ExtractionConfig, ExtractionCoordinator,
//!     ExtractionJob, MemoryHistory,
//! };
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let users = CredentialStore::load("users.toml".as_ref())?;
//!     let coordinator =
//!         ExtractionCoordinator::from_config(&config, Arc::new(MemoryHistory::new()), Arc::new(users))?;
//!
//!     let pdf = std::fs::read("invoice.pdf")?;
//!     let job = ExtractionJob::new(
//!         vec![DocumentSource::new("invoice.pdf", pdf)],
//!         "One row per line item: description, quantity, unit_price",
//!         Credentials::new("alice", "secret"),
//!     );
//!
//!     let mut events = coordinator.submit(job).await?;
//!     while let Some(event) = events.next().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | via cli | axum HTTP boundary: SSE job stream, download, history |
//! | `cli`    | on      | Enables the `pdf2table` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable default features when using only the library:
//! ```toml
//! edgequake-pdf2table = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod export;
pub mod history;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{Authenticator, CredentialStore, TrustedLocalUser};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use coordinator::{ExtractionCoordinator, JobStream};
pub use error::{ExtractError, SkipReason};
pub use export::TabularExporter;
pub use history::{HistorySink, JsonlHistory, MemoryHistory, RunRecord};
pub use job::{Credentials, DocumentSource, ExtractionJob, PageImage};
pub use output::{DocumentReport, ExtractedRow, JobFailure, JobOutcome, PageOutcome};
pub use pipeline::extract::{PageExtractor, RetryPolicy};
pub use pipeline::llm::{ModelError, VisionModel};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{DocumentSummary, JobSummary, ProgressEvent};
