//! Route handlers.

use axum::{
    extract::{Multipart, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::AppState;
use crate::error::ExtractError;
use crate::history::{runs_for, HistoryStats, UserStats};
use crate::job::{Credentials, ExtractionJob};
use crate::pipeline::input::document_from_upload;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Error type that converts into a JSON HTTP response.
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code,
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn unauthorized(message: impl Into<String>) -> AppError {
    app_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

impl From<ExtractError> for AppError {
    fn from(err: ExtractError) -> Self {
        match &err {
            ExtractError::AuthenticationFailed { .. } => unauthorized(err.to_string()),
            ExtractError::ArtifactNotFound { .. } => {
                app_error(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            e if e.is_request_error() => bad_request(err.to_string()),
            _ => app_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                err.to_string(),
            ),
        }
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// `POST /extract_text_stream`: run a job, relaying its events as SSE.
pub async fn extract_text_stream(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let mut documents = Vec::new();
    let mut prompt = None;
    let mut username = None;
    let mut password = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "pdf" => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read upload: {}", e)))?;
                documents.push(document_from_upload(filename.as_deref(), bytes.to_vec())?);
            }
            "prompt" | "username" | "password" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read '{}': {}", name, e)))?;
                let slot = match name.as_str() {
                    "prompt" => &mut prompt,
                    "username" => &mut username,
                    _ => &mut password,
                };
                *slot = Some(text);
            }
            other => warn!("Ignoring unknown form field '{}'", other),
        }
    }

    let (Some(prompt), Some(username), Some(password)) = (prompt, username, password) else {
        return Err(bad_request("Missing required parameters"));
    };
    if documents.is_empty() {
        return Err(bad_request("Missing required parameters"));
    }

    info!(
        "Extraction request from '{}' with {} documents",
        username,
        documents.len()
    );
    let job = ExtractionJob::new(documents, prompt, Credentials::new(username, password));
    let events = state.coordinator.submit(job).await?;

    let stream = events.map(|event| Event::default().json_data(&event));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── Artifacts ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub filename: String,
}

/// `GET /download?filename=…`
pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, AppError> {
    let bytes = state.exporter.fetch(&params.filename).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", params.filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

// ── History & statistics ─────────────────────────────────────────────────────

/// Admins pass this (or nothing) as `target_username` to see everyone.
const ALL_USERS: &str = "All Users";

#[derive(Debug, Deserialize)]
pub struct HistoryRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub target_username: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub username: String,
    pub document_name: String,
    pub total_rows: usize,
    pub total_time_seconds: f64,
    pub avg_time_per_row: f64,
    pub recorded_at: u64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub history: Vec<HistoryEntry>,
}

/// `POST /history`
pub async fn history(
    State(state): State<AppState>,
    Json(req): Json<HistoryRequest>,
) -> Result<Json<HistoryResponse>, AppError> {
    if !state
        .authenticator
        .authenticate(&req.username, &req.password)
        .await
    {
        return Err(unauthorized("Invalid credentials"));
    }
    let username = state.authenticator.username_for(&req.username);

    let target = if state.authenticator.is_admin(&username) {
        req.target_username
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && t != ALL_USERS)
    } else {
        Some(username)
    };

    let runs = state.history.runs().await?;
    let history = runs_for(&runs, target.as_deref())
        .into_iter()
        .map(|r| HistoryEntry {
            avg_time_per_row: r.avg_time_per_row(),
            username: r.username,
            document_name: r.document_name,
            total_rows: r.total_rows,
            total_time_seconds: r.total_time_seconds,
            recorded_at: r.recorded_at,
        })
        .collect();
    Ok(Json(HistoryResponse { history }))
}

/// `GET /stats`
pub async fn stats(State(state): State<AppState>) -> Result<Json<HistoryStats>, AppError> {
    let runs = state.history.runs().await?;
    Ok(Json(HistoryStats::from_runs(&runs)))
}

#[derive(Debug, Deserialize)]
pub struct UserStatsRequest {
    pub admin_username: String,
    pub admin_password: String,
}

#[derive(Debug, Serialize)]
pub struct UserStatsResponse {
    pub user_statistics: Vec<UserStats>,
}

/// `POST /user_stats`, admin only.
pub async fn user_stats(
    State(state): State<AppState>,
    Json(req): Json<UserStatsRequest>,
) -> Result<Json<UserStatsResponse>, AppError> {
    let authenticated = state
        .authenticator
        .authenticate(&req.admin_username, &req.admin_password)
        .await;
    let username = state.authenticator.username_for(&req.admin_username);
    if !authenticated || !state.authenticator.is_admin(&username) {
        return Err(app_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "Only admin can access user statistics",
        ));
    }

    let runs = state.history.runs().await?;
    Ok(Json(UserStatsResponse {
        user_statistics: UserStats::from_runs(&runs),
    }))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /user_stats_self`: the caller's own totals.
pub async fn user_stats_self(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<UserStats>, AppError> {
    if !state
        .authenticator
        .authenticate(&req.username, &req.password)
        .await
    {
        return Err(unauthorized("Invalid credentials"));
    }
    let username = state.authenticator.username_for(&req.username);

    let runs = state.history.runs().await?;
    Ok(Json(UserStats::for_user(&runs, &username)))
}

#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub users: Vec<String>,
}

/// `GET /user_list`: known usernames, for the admin history filter.
pub async fn user_list(State(state): State<AppState>) -> Json<UserListResponse> {
    Json(UserListResponse {
        users: state.authenticator.usernames(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
