//! Error types for the edgequake-pdf2table library.
//!
//! Failures are split by the scope they end:
//!
//! * [`ExtractError`] — **Fatal** for whatever returned it. From
//!   [`crate::coordinator::ExtractionCoordinator::submit`] it rejects the whole
//!   request (bad credentials, no documents). From a renderer it ends one
//!   document, which the coordinator reports as a
//!   [`crate::progress::ProgressEvent::JobFailed`] while sibling documents
//!   keep running.
//!
//! * [`SkipReason`] — **Non-fatal**: one page could not be extracted. The
//!   page contributes no rows and its number lands in the document's
//!   `skipped_pages`; the rest of the document is unaffected.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2table library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The job contained no documents.
    #[error("No PDF documents were submitted")]
    NoDocuments,

    /// The extraction prompt was empty or whitespace.
    #[error("The extraction prompt must not be empty")]
    EmptyPrompt,

    /// The identity collaborator rejected the credentials.
    #[error("Invalid credentials for '{login}'")]
    AuthenticationFailed { login: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read, but they are not a PDF.
    #[error("'{name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{name}' is encrypted and requires a password.")]
    PasswordRequired { name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for '{name}' page {page}: {detail}")]
    RasterisationFailed {
        name: String,
        page: usize,
        detail: String,
    },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Install libpdfium system-wide or set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Artifact errors ───────────────────────────────────────────────────
    /// The filename token is unknown, malformed or the artifact was purged.
    #[error("Export artifact '{filename}' not found")]
    ArtifactNotFound { filename: String },

    /// Could not create or write the exported table.
    #[error("Failed to write export '{path}': {source}")]
    ExportFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// Reading or appending the extraction history failed.
    #[error("History store error: {0}")]
    History(String),

    /// The credentials file could not be read or parsed.
    #[error("Failed to load credentials from '{path}': {detail}")]
    CredentialsFile { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// True for errors that reject a request before any work starts.
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            ExtractError::NoDocuments
                | ExtractError::EmptyPrompt
                | ExtractError::AuthenticationFailed { .. }
                | ExtractError::NotAPdf { .. }
        )
    }
}

/// Why a single page produced no rows.
///
/// Exactly one reason is recorded per skipped page.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The page's wait budget ran out before a usable answer arrived.
    #[error("timed out after {waited_secs:.1}s")]
    Timeout { waited_secs: f64 },

    /// Every attempt was rate-limited or returned nothing.
    #[error("gave up after {attempts} attempts: {detail}")]
    MaxRetriesExceeded { attempts: u32, detail: String },

    /// A non-retryable model error or an unparseable answer.
    #[error("fatal error: {detail}")]
    FatalError { detail: String },
}
