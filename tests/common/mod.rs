//! Fakes shared by the integration tests: a renderer with fixed page counts
//! and a model that answers from a per-page script.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_pdf2table::auth::{hash_password, UserEntry};
use edgequake_pdf2table::{
    CredentialStore, DocumentSource, ExtractError, ExtractionConfig, ExtractionCoordinator,
    MemoryHistory, ModelError, PageImage, PageRenderer, TabularExporter, VisionModel,
};
use edgequake_llm::ImageData;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn pdf(name: &str) -> DocumentSource {
    DocumentSource::new(name, b"%PDF-1.7\n%fake".to_vec())
}

// ── Renderer ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeRenderer {
    pages: HashMap<String, usize>,
    /// Documents whose page count fails.
    uncountable: HashSet<String>,
    /// Documents that count but fail to render.
    unrenderable: HashSet<String>,
    pub render_calls: AtomicUsize,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, pages: usize) -> Self {
        self.pages.insert(name.to_string(), pages);
        self
    }

    pub fn uncountable(mut self, name: &str) -> Self {
        self.uncountable.insert(name.to_string());
        self
    }

    pub fn unrenderable(mut self, name: &str, pages: usize) -> Self {
        self.pages.insert(name.to_string(), pages);
        self.unrenderable.insert(name.to_string());
        self
    }

    fn corrupt(name: &str) -> ExtractError {
        ExtractError::CorruptPdf {
            name: name.to_string(),
            detail: "broken xref table".into(),
        }
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn page_count(&self, doc: &DocumentSource) -> Result<usize, ExtractError> {
        if self.uncountable.contains(&doc.name) {
            return Err(Self::corrupt(&doc.name));
        }
        Ok(self.pages.get(&doc.name).copied().unwrap_or(1))
    }

    async fn render_page(
        &self,
        doc: &DocumentSource,
        page_number: usize,
    ) -> Result<PageImage, ExtractError> {
        self.render_calls.fetch_add(1, Ordering::SeqCst);
        if self.uncountable.contains(&doc.name) || self.unrenderable.contains(&doc.name) {
            return Err(Self::corrupt(&doc.name));
        }
        Ok(PageImage {
            document_name: doc.name.clone(),
            page_number,
            image: ImageData::new("iVBORw0KGgo=", "image/png"),
        })
    }
}

// ── Model ────────────────────────────────────────────────────────────────────

type Answer = Result<String, ModelError>;

/// Answers per `(document, page)` are consumed in order; once a page's
/// script runs out (or it has none) the fallback answer is used.
pub struct ScriptedModel {
    scripts: Mutex<HashMap<(String, usize), VecDeque<Answer>>>,
    fallback: Answer,
    pub calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn answering(fallback: &str) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Ok(fallback.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn page(self, doc: &str, page: usize, answers: Vec<Answer>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert((doc.to_string(), page), answers.into());
        self
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    async fn complete(&self, page: &PageImage, _prompt: &str) -> Result<String, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (page.document_name.clone(), page.page_number);
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|q| q.pop_front());
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn rate_limited() -> Answer {
    Err(ModelError::RateLimited("429 Too Many Requests".into()))
}

// ── Wiring ───────────────────────────────────────────────────────────────────

pub const ADMIN: (&str, &str) = ("admin", "admin");
pub const ALICE: (&str, &str) = ("alice", "wonderland");

pub fn users() -> CredentialStore {
    CredentialStore::new(vec![
        UserEntry {
            username: ADMIN.0.into(),
            email: Some("admin@example.com".into()),
            password_sha256: hash_password(ADMIN.1),
            admin: true,
        },
        UserEntry {
            username: ALICE.0.into(),
            email: Some("alice@example.com".into()),
            password_sha256: hash_password(ALICE.1),
            admin: false,
        },
    ])
}

pub struct Harness {
    pub coordinator: Arc<ExtractionCoordinator>,
    pub renderer: Arc<FakeRenderer>,
    pub model: Arc<ScriptedModel>,
    pub history: Arc<MemoryHistory>,
    pub users: Arc<CredentialStore>,
    pub exporter: Arc<TabularExporter>,
    _dir: TempDir,
}

impl Harness {
    pub fn new(renderer: FakeRenderer, model: ScriptedModel) -> Self {
        Self::with_config(renderer, model, &ExtractionConfig::default())
    }

    pub fn with_config(
        renderer: FakeRenderer,
        model: ScriptedModel,
        config: &ExtractionConfig,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let renderer = Arc::new(renderer);
        let model = Arc::new(model);
        let history = Arc::new(MemoryHistory::new());
        let users = Arc::new(users());
        let exporter = Arc::new(TabularExporter::new(dir.path()));
        let coordinator = ExtractionCoordinator::new(
            config,
            renderer.clone(),
            model.clone(),
            history.clone(),
            users.clone(),
            exporter.clone(),
        );
        Self {
            coordinator: Arc::new(coordinator),
            renderer,
            model,
            history,
            users,
            exporter,
            _dir: dir,
        }
    }
}

/// The `filename` query value of a download link.
pub fn filename_of(link: &str) -> &str {
    link.rsplit("filename=").next().unwrap()
}
