//! Per-page extraction: the retry/timeout state machine around one
//! [`VisionModel`] call.
//!
//! ## Policy
//!
//! For attempt `n` in `1..=max_retries`:
//!
//! 1. If the page's wall-clock budget (`max_wait`, measured from the first
//!    attempt) is spent, stop with [`SkipReason::Timeout`]. No further call.
//! 2. Call the model, bounded by whatever budget is left.
//! 3. Parseable JSON → [`PageOutcome::Success`]. Empty text → try again at
//!    once. Unparseable text → [`SkipReason::FatalError`].
//! 4. Rate-limited → sleep `backoff_base * 2^(n-1)` (2 s, 4 s, 8 s, … with
//!    the default base), capped at the remaining budget, and try again.
//! 5. Any other model error → [`SkipReason::FatalError`], no retry.
//!
//! Running out of attempts gives [`SkipReason::MaxRetriesExceeded`].
//!
//! All timing uses `tokio::time`, so tests drive it with a paused clock.

use super::llm::{ModelError, VisionModel};
use super::postprocess::parse_rows;
use crate::error::SkipReason;
use crate::job::PageImage;
use crate::output::{round2, ExtractedRow, PageOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Attempt and time limits for a single page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum model calls per page.
    pub max_retries: u32,
    /// Wall-clock budget per page, from the first attempt.
    pub max_wait: Duration,
    /// First rate-limit backoff; doubles on every further rate limit.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            max_wait: Duration::from_secs(30),
            backoff_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `attempt`-th (1-based) call was rate-limited.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(1u32 << exp)
    }
}

/// Turns one rendered page into a [`PageOutcome`].
#[derive(Clone)]
pub struct PageExtractor {
    model: Arc<dyn VisionModel>,
    policy: RetryPolicy,
}

impl PageExtractor {
    pub fn new(model: Arc<dyn VisionModel>, policy: RetryPolicy) -> Self {
        Self { model, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Extract rows from one page. Never fails: every problem becomes a
    /// [`PageOutcome::Skipped`].
    pub async fn extract(&self, page: &PageImage, prompt: &str) -> PageOutcome {
        let started = Instant::now();
        let label = format!("{} p{}", page.document_name, page.page_number);
        let mut last_detail = String::from("model returned no content");

        for attempt in 1..=self.policy.max_retries {
            let elapsed = started.elapsed();
            if elapsed >= self.policy.max_wait {
                warn!("{}: timed out after {:.1}s, skipping", label, elapsed.as_secs_f64());
                return timeout(elapsed);
            }
            let remaining = self.policy.max_wait - elapsed;

            let answer =
                match tokio::time::timeout(remaining, self.model.complete(page, prompt)).await {
                    Ok(answer) => answer,
                    Err(_) => {
                        let waited = started.elapsed();
                        warn!("{}: call exceeded the page budget, skipping", label);
                        return timeout(waited);
                    }
                };

            match answer {
                Ok(text) => match parse_rows(&text) {
                    Ok(Some(fields)) => {
                        debug!("{}: {} rows on attempt {}", label, fields.len(), attempt);
                        let rows = fields
                            .into_iter()
                            .map(|f| ExtractedRow::new(&page.document_name, page.page_number, f))
                            .collect();
                        return PageOutcome::Success(rows);
                    }
                    Ok(None) => {
                        debug!("{}: empty answer on attempt {}", label, attempt);
                        last_detail = "model returned no content".to_string();
                    }
                    Err(detail) => {
                        warn!("{}: unparseable answer: {}", label, detail);
                        return PageOutcome::Skipped(SkipReason::FatalError { detail });
                    }
                },
                Err(ModelError::RateLimited(msg)) => {
                    last_detail = msg;
                    if attempt < self.policy.max_retries {
                        let left = self.policy.max_wait.saturating_sub(started.elapsed());
                        let wait = self.policy.backoff(attempt).min(left);
                        warn!(
                            "{}: rate limited (attempt {}/{}), retrying in {:.1}s",
                            label,
                            attempt,
                            self.policy.max_retries,
                            wait.as_secs_f64()
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(ModelError::Api(detail)) => {
                    warn!("{}: model error, skipping: {}", label, detail);
                    return PageOutcome::Skipped(SkipReason::FatalError { detail });
                }
            }
        }

        warn!(
            "{}: giving up after {} attempts",
            label, self.policy.max_retries
        );
        PageOutcome::Skipped(SkipReason::MaxRetriesExceeded {
            attempts: self.policy.max_retries,
            detail: last_detail,
        })
    }
}

fn timeout(elapsed: Duration) -> PageOutcome {
    PageOutcome::Skipped(SkipReason::Timeout {
        waited_secs: round2(elapsed.as_secs_f64()),
    })
}
