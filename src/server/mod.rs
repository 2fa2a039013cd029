//! HTTP boundary: multipart job submission relayed as server-sent events,
//! artifact download, and history/statistics queries.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/extract_text_stream` | Multipart `pdf` (repeatable), `prompt`, `username`, `password` → SSE |
//! | `GET`  | `/download?filename=…` | Exported CSV (route prefix from `ExtractionConfig::download_path`) |
//! | `POST` | `/history` | Runs of the caller, or of anyone for admins |
//! | `GET`  | `/stats` | Distinct users, distinct documents, total rows |
//! | `POST` | `/user_stats` | Per-user totals, admin only |
//! | `POST` | `/user_stats_self` | The caller's own totals |
//! | `GET`  | `/user_list` | Known usernames |
//! | `GET`  | `/health` | Liveness and version |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unauthorized", "message": "Invalid credentials for 'bob'" } }
//! ```

mod handlers;
mod routes;

pub use routes::create_router;

use crate::auth::Authenticator;
use crate::coordinator::ExtractionCoordinator;
use crate::export::TabularExporter;
use crate::history::HistorySink;
use std::sync::Arc;

/// Shared state for the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ExtractionCoordinator>,
    exporter: Arc<TabularExporter>,
    pub history: Arc<dyn HistorySink>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Route of the download endpoint; always the coordinator's.
    download_path: String,
}

impl AppState {
    /// State whose exporter and download route are the coordinator's own,
    /// so every `download_link` the coordinator emits can be served.
    pub fn new(
        coordinator: Arc<ExtractionCoordinator>,
        history: Arc<dyn HistorySink>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            exporter: coordinator.exporter(),
            download_path: coordinator.download_path().to_string(),
            coordinator,
            history,
            authenticator,
        }
    }
}

/// Bind `host:port` and serve until the process is stopped.
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}
