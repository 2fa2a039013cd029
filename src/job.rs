//! Job inputs: the documents, prompt and caller identity of one submission.

use edgequake_llm::ImageData;
use std::fmt;
use std::sync::Arc;

/// A named PDF held in memory.
///
/// The bytes are shared, so cloning a source (for the pre-count pass and
/// then for its worker) never copies the document.
#[derive(Clone)]
pub struct DocumentSource {
    /// Display name, used in events, rows and history records.
    pub name: String,
    /// Raw PDF bytes.
    pub bytes: Arc<[u8]>,
}

impl DocumentSource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl fmt::Debug for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSource")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// Login identifier (username or email) and password of the caller.
#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One extraction request: every document is processed with the same prompt
/// on behalf of the same user.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub documents: Vec<DocumentSource>,
    pub prompt: String,
    pub credentials: Credentials,
}

impl ExtractionJob {
    pub fn new(
        documents: Vec<DocumentSource>,
        prompt: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            documents,
            prompt: prompt.into(),
            credentials,
        }
    }
}

/// A rendered page ready for the vision model.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub document_name: String,
    /// 1-indexed.
    pub page_number: usize,
    /// Encoded page, as sent in the multimodal request.
    pub image: ImageData,
}
