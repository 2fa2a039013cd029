//! PDF rasterisation: count and render pages via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. `tokio::task::spawn_blocking` keeps rendering off the Tokio
//! worker threads so other documents' model calls keep flowing.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and matching the
//! image-size sweet spot of current vision models (around 1,000–2,000 px).

use super::encode::encode_page;
use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::job::{DocumentSource, PageImage};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::debug;

/// Turns a PDF into page images, one page at a time.
///
/// Pages are rendered on demand so only the page being extracted is held in
/// memory. [`ExtractError::RasterisationFailed`] costs the worker one page;
/// any other error ends the document it was returned for. Sibling documents
/// are unaffected either way.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Number of pages, without rendering them.
    async fn page_count(&self, doc: &DocumentSource) -> Result<usize, ExtractError>;

    /// One page, 1-indexed.
    async fn render_page(
        &self,
        doc: &DocumentSource,
        page_number: usize,
    ) -> Result<PageImage, ExtractError>;
}

/// [`PageRenderer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    max_rendered_pixels: u32,
    password: Option<String>,
    library_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            max_rendered_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
            library_path: config.pdfium_library.clone(),
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn page_count(&self, doc: &DocumentSource) -> Result<usize, ExtractError> {
        let this = self.clone();
        let doc = doc.clone();
        tokio::task::spawn_blocking(move || this.page_count_blocking(&doc))
            .await
            .map_err(|e| ExtractError::Internal(format!("Page-count task panicked: {}", e)))?
    }

    async fn render_page(
        &self,
        doc: &DocumentSource,
        page_number: usize,
    ) -> Result<PageImage, ExtractError> {
        let this = self.clone();
        let doc = doc.clone();
        tokio::task::spawn_blocking(move || this.render_page_blocking(&doc, page_number))
            .await
            .map_err(|e| ExtractError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRenderer {
    fn bind(&self) -> Result<Pdfium, ExtractError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }

    fn page_count_blocking(&self, doc: &DocumentSource) -> Result<usize, ExtractError> {
        let pdfium = self.bind()?;
        let document = self.load(&pdfium, doc)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page_blocking(
        &self,
        doc: &DocumentSource,
        page_number: usize,
    ) -> Result<PageImage, ExtractError> {
        let failed = |detail: String| ExtractError::RasterisationFailed {
            name: doc.name.clone(),
            page: page_number,
            detail,
        };
        let index = page_number
            .checked_sub(1)
            .and_then(|i| u16::try_from(i).ok())
            .ok_or_else(|| failed("page number out of range".to_string()))?;

        let pdfium = self.bind()?;
        let document = self.load(&pdfium, doc)?;

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let pages = document.pages();
        let page = pages.get(index).map_err(|e| failed(format!("{:?}", e)))?;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| failed(format!("{:?}", e)))?;
        let image = bitmap.as_image();
        debug!(
            "'{}' page {} → {}x{} px",
            doc.name,
            page_number,
            image.width(),
            image.height()
        );

        let encoded = encode_page(&image).map_err(|e| failed(e.to_string()))?;
        Ok(PageImage {
            document_name: doc.name.clone(),
            page_number,
            image: encoded,
        })
    }

    fn load<'a>(
        &self,
        pdfium: &'a Pdfium,
        doc: &'a DocumentSource,
    ) -> Result<PdfDocument<'a>, ExtractError> {
        let password = self.password.as_deref();
        pdfium
            .load_pdf_from_byte_slice(&doc.bytes, password)
            .map_err(|e| {
                let err_str = format!("{:?}", e);
                if err_str.contains("Password") || err_str.contains("password") {
                    if password.is_some() {
                        ExtractError::WrongPassword {
                            name: doc.name.clone(),
                        }
                    } else {
                        ExtractError::PasswordRequired {
                            name: doc.name.clone(),
                        }
                    }
                } else {
                    ExtractError::CorruptPdf {
                        name: doc.name.clone(),
                        detail: err_str,
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_takes_config_limits() {
        let config = ExtractionConfig::builder()
            .max_rendered_pixels(1500)
            .password("s3cret")
            .pdfium_library("/opt/pdfium/libpdfium.so")
            .build()
            .unwrap();
        let renderer = PdfiumRenderer::new(&config);
        assert_eq!(renderer.max_rendered_pixels, 1500);
        assert_eq!(renderer.password.as_deref(), Some("s3cret"));
        assert_eq!(
            renderer.library_path,
            Some(PathBuf::from("/opt/pdfium/libpdfium.so"))
        );
    }
}
