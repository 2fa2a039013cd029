//! Pipeline stages for PDF-to-rows extraction.
//!
//! Each submodule implements one transformation step, so each can be tested
//! on its own and the two external seams (rendering, the vision model) can
//! be swapped without touching the rest.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ extract ──▶ llm ──▶ postprocess
//! (bytes)   (pdfium)   (base64)   (retries)   (VLM)   (JSON rows)
//! ```
//!
//! 1. [`input`]  — turn a path, URL or upload into a named in-memory PDF
//! 2. [`render`] — count and rasterise pages; pdfium runs in `spawn_blocking`
//! 3. [`encode`] — PNG-encode and base64-wrap each page image
//! 4. [`extract`] — per-page retry loop: backoff on rate limits, wall-clock
//!    budget, terminal [`crate::output::PageOutcome`]
//! 5. [`llm`]    — the single model call; the only stage with network I/O
//! 6. [`postprocess`] — repair fences/prose around the JSON answer and
//!    normalise it into rows

pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;
