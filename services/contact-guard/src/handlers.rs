// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP handlers for the contact guard service.
//!
//! The form endpoint only ever tells clients whether a submission was
//! accepted. Scores and reasons stay in the journal and behind `/admin`.

use crate::blocklist::{BlocklistEntry, BlocklistStats, WhitelistEntry};
use crate::config::Config;
use crate::error::GuardError;
use crate::guard::{AdminOutcome, BlockDuration, ContactGuard, SubmissionRequest};
use crate::record::{FormFields, SubmissionRecord};
use crate::report::{DailyReport, Statistics};
use crate::retention::RetentionSummary;
use axum::{
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Shared application state.
pub struct AppState {
    pub guard: ContactGuard,
    pub config: Config,
}

impl AppState {
    pub fn new(guard: ContactGuard) -> Self {
        let config = guard.config().clone();
        Self { guard, config }
    }
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// What a form client learns about its submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub allowed: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub target: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Omit for a permanent block
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct WhitelistRequest {
    pub target: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub target: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminResponse {
    pub outcome: AdminOutcome,
}

#[derive(Debug, Serialize)]
pub struct BlocklistResponse {
    pub entries: Vec<BlocklistEntry>,
    pub stats: BlocklistStats,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
    #[serde(default)]
    pub include_anonymized: bool,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default = "default_stats_days")]
    pub days: u32,
}

fn default_recent_limit() -> usize {
    50
}

fn default_stats_days() -> u32 {
    7
}

/// A failed request, rendered as [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        match &err {
            GuardError::Validation(v) => Self::new(StatusCode::BAD_REQUEST, v.code(), v.to_string()),
            GuardError::Storage { .. } | GuardError::Serialization { .. } => {
                error!(error = %err, "Storage failure");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "storage_unavailable",
                    "Service temporarily unavailable",
                )
            }
            GuardError::Config(_) | GuardError::Metrics(_) => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code.to_string(),
            }),
        )
            .into_response()
    }
}

/// Run a facade call on the blocking pool.
async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&ContactGuard) -> crate::error::Result<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state.guard))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .map_err(ApiError::from)
}

/// Build the service router.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/submit", post(submit))
        .route("/admin/blocklist", get(list_blocklist).post(block))
        .route("/admin/blocklist/remove", post(unblock))
        .route("/admin/whitelist", get(list_whitelist).post(whitelist))
        .route("/admin/whitelist/remove", post(unwhitelist))
        .route("/admin/report", get(daily_report))
        .route("/admin/recent", get(recent))
        .route("/admin/stats", get(statistics))
        .route("/admin/retention", post(retention));

    if state.config.metrics.enabled {
        app = app.route(&state.config.metrics.path, get(metrics));
    }
    app.with_state(state)
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "contact-guard",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.guard.metrics().render(),
    )
}

/// Accept a url-encoded contact form post.
///
/// The render timestamp travels in a hidden form field and is removed
/// before scoring.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(mut form_fields): Form<FormFields>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let rendered_at_epoch_seconds = form_fields
        .remove(&state.config.scoring.timestamp_field)
        .and_then(|v| v.trim().parse::<i64>().ok());

    let request = SubmissionRequest {
        form_fields,
        client_address: addr.ip().to_string(),
        user_agent: header_value(&headers, header::USER_AGENT),
        accept_language: header_value(&headers, header::ACCEPT_LANGUAGE),
        referer: header_value(&headers, header::REFERER),
        rendered_at_epoch_seconds,
    };

    debug!(fields = request.form_fields.len(), "Processing submission");
    let verdict = blocking(&state, move |guard| guard.submit(&request)).await?;

    Ok(Json(SubmitResponse {
        allowed: verdict.allowed,
        message: verdict.message,
    }))
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Check the bearer token. Admin routes do not exist without one.
fn authorize(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = config.admin.token.as_deref() else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "not_found", "Not found"));
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        // Digests are compared so the check does not short-circuit on a prefix.
        Some(token) if Sha3_256::digest(token.as_bytes()) == Sha3_256::digest(expected.as_bytes()) => Ok(()),
        _ => {
            warn!("Rejected admin request");
            Err(ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized"))
        }
    }
}

pub async fn list_blocklist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BlocklistResponse>, ApiError> {
    authorize(&state.config, &headers)?;
    let response = blocking(&state, |guard| {
        Ok(BlocklistResponse {
            entries: guard.list_blocklist()?,
            stats: guard.blocklist_stats()?,
        })
    })
    .await?;
    Ok(Json(response))
}

pub async fn block(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BlockRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    authorize(&state.config, &headers)?;
    let duration = match req.days {
        Some(days) => BlockDuration::Days(days),
        None => BlockDuration::Permanent,
    };
    let outcome = blocking(&state, move |guard| {
        guard.block_address(&req.target, req.reason, duration, req.metadata)
    })
    .await?;
    Ok(Json(AdminResponse { outcome }))
}

pub async fn unblock(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TargetRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    authorize(&state.config, &headers)?;
    let outcome = blocking(&state, move |guard| guard.unblock_address(&req.target)).await?;
    Ok(Json(AdminResponse { outcome }))
}

pub async fn list_whitelist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<WhitelistEntry>>, ApiError> {
    authorize(&state.config, &headers)?;
    Ok(Json(blocking(&state, |guard| guard.list_whitelist()).await?))
}

pub async fn whitelist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<WhitelistRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    authorize(&state.config, &headers)?;
    let outcome = blocking(&state, move |guard| guard.whitelist_address(&req.target, req.note)).await?;
    Ok(Json(AdminResponse { outcome }))
}

pub async fn unwhitelist(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TargetRequest>,
) -> Result<Json<AdminResponse>, ApiError> {
    authorize(&state.config, &headers)?;
    let outcome = blocking(&state, move |guard| guard.remove_whitelist(&req.target)).await?;
    Ok(Json(AdminResponse { outcome }))
}

pub async fn daily_report(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
) -> Result<Json<DailyReport>, ApiError> {
    authorize(&state.config, &headers)?;
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    Ok(Json(blocking(&state, move |guard| guard.daily_report(date)).await?))
}

pub async fn recent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<SubmissionRecord>>, ApiError> {
    authorize(&state.config, &headers)?;
    let records = blocking(&state, move |guard| {
        guard.recent_records(query.limit, query.include_anonymized)
    })
    .await?;
    Ok(Json(records))
}

pub async fn statistics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Statistics>, ApiError> {
    authorize(&state.config, &headers)?;
    Ok(Json(blocking(&state, move |guard| guard.statistics(query.days)).await?))
}

pub async fn retention(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RetentionSummary>, ApiError> {
    authorize(&state.config, &headers)?;
    Ok(Json(blocking(&state, |guard| guard.run_retention_sweep()).await?))
}
