//! Configuration types for PDF extraction jobs.
//!
//! Every knob lives in [`ExtractionConfig`], built via its
//! [`ExtractionConfigBuilder`]. One config is shared by every job a
//! coordinator runs; per-job inputs (documents, prompt, credentials) travel
//! in [`crate::job::ExtractionJob`] instead.

use crate::error::ExtractError;
use crate::pipeline::extract::RetryPolicy;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for PDF-to-rows extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2table::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .max_retries(5)
///     .max_wait_secs(20)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 5);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps either dimension, scaling the other proportionally.
    pub max_rendered_pixels: u32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Path to a pdfium shared library. If None, binds the system library.
    pub pdfium_library: Option<PathBuf>,

    /// LLM model identifier, e.g. "gpt-4.1-nano", "gemini-2.0-flash".
    /// If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for the extraction call. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per page. Default: 8192.
    ///
    /// Dense tables produce long JSON arrays; a truncated array fails to
    /// parse and the page is skipped.
    pub max_tokens: usize,

    /// Maximum attempts per page. Default: 10.
    pub max_retries: u32,

    /// Wall-clock budget per page, in seconds. Default: 30.
    ///
    /// Checked before every attempt; an attempt that starts after the
    /// budget is spent is never made.
    pub max_wait_secs: u64,

    /// Base of the rate-limit backoff, in seconds. Default: 2.
    ///
    /// Attempt `n` that is rate-limited waits `base * 2^(n-1)` seconds:
    /// 2 s → 4 s → 8 s → 16 s → 32 s.
    pub backoff_base_secs: u64,

    /// Custom system prompt. If None, uses the built-in JSON extraction prompt.
    pub system_prompt: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Directory for exported tables. If None, a fresh temporary directory
    /// is created by [`crate::export::TabularExporter::temporary`].
    pub export_dir: Option<PathBuf>,

    /// Route prefix of the download endpoint, used to build `download_link`.
    /// Default: "/download".
    pub download_path: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_rendered_pixels: 2000,
            password: None,
            pdfium_library: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            max_retries: 10,
            max_wait_secs: 30,
            backoff_base_secs: 2,
            system_prompt: None,
            download_timeout_secs: 120,
            export_dir: None,
            download_path: "/download".to_string(),
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pdfium_library", &self.pdfium_library)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("max_wait_secs", &self.max_wait_secs)
            .field("backoff_base_secs", &self.backoff_base_secs)
            .field("export_dir", &self.export_dir)
            .field("download_path", &self.download_path)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// The per-page retry policy described by this config.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            max_wait: Duration::from_secs(self.max_wait_secs),
            backoff_base: Duration::from_secs(self.backoff_base_secs),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn max_wait_secs(mut self, secs: u64) -> Self {
        self.config.max_wait_secs = secs;
        self
    }

    pub fn backoff_base_secs(mut self, secs: u64) -> Self {
        self.config.backoff_base_secs = secs;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.export_dir = Some(dir.into());
        self
    }

    pub fn download_path(mut self, path: impl Into<String>) -> Self {
        self.config.download_path = path.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        let c = &self.config;
        if c.max_retries == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_retries must be ≥ 1".into(),
            ));
        }
        if c.max_wait_secs == 0 {
            return Err(ExtractError::InvalidConfig(
                "max_wait_secs must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(ExtractError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if !c.download_path.starts_with('/') {
            return Err(ExtractError::InvalidConfig(format!(
                "download_path must start with '/', got '{}'",
                c.download_path
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_page_policy() {
        let config = ExtractionConfig::default();
        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 10);
        assert_eq!(policy.max_wait, Duration::from_secs(30));
        assert_eq!(policy.backoff_base, Duration::from_secs(2));
        assert_eq!(config.download_path, "/download");
    }

    #[test]
    fn builder_clamps_temperature() {
        let config = ExtractionConfig::builder()
            .temperature(5.0)
            .build()
            .unwrap();
        assert_eq!(config.temperature, 2.0);
    }

    #[test]
    fn zero_retries_rejected() {
        let err = ExtractionConfig::builder().max_retries(0).build().unwrap_err();
        assert!(matches!(err, ExtractError::InvalidConfig(_)));
    }

    #[test]
    fn relative_download_path_rejected() {
        let err = ExtractionConfig::builder()
            .download_path("download")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("download_path"));
    }

    #[test]
    fn debug_hides_provider() {
        let config = ExtractionConfig::default();
        let dbg = format!("{:?}", config);
        assert!(dbg.contains("max_wait_secs"));
        assert!(!dbg.contains("password"));
    }
}
