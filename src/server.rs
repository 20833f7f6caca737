//! JSON HTTP API.
//!
//! Exposes case submission (with duplicate checking), lookup, and the two
//! permitted mutations over HTTP for the web frontend.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and scoring provider) |
//! | `GET`  | `/cases` | List cases; query `reporter`, `status`, `case_type`, `limit` |
//! | `POST` | `/cases` | Submit a case; query `force=true` skips the duplicate hold |
//! | `GET`  | `/cases/{id}` | Fetch one case |
//! | `POST` | `/cases/{id}/status` | Change status: `{ "status": "investigating" }` |
//! | `POST` | `/cases/{id}/blockchain-id` | Backfill notarization id: `{ "blockchain_id": "0x.." }` |
//! | `POST` | `/cases/check-duplicates` | Score a draft against recent cases without storing it |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid case: age is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `conflict` (409),
//! `internal` (500). Malformed JSON bodies and query strings (unknown
//! `case_type` or `status`, non-integer `age`, ...) are `bad_request`.
//! A held-back submission is not an error: it returns
//! `409` with `{ "outcome": "blocked", "threshold": .., "candidates": [..] }`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for the browser frontend.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::cases::{self, CaseError, CaseFilter};
use crate::config::Config;
use crate::db;
use crate::matcher::DuplicateCaseMatcher;
use crate::models::{CaseRecord, CaseStatus, NewCase};
use crate::scoring::{create_provider, ScoreProvider};
use crate::submission::{self, DuplicateCandidate, SubmitOutcome, SubmitSettings};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
    matcher: Arc<DuplicateCaseMatcher>,
    settings: Arc<SubmitSettings>,
}

/// Starts the HTTP server with the scoring provider named in `[matcher]`.
///
/// Binds to `[server].bind` and runs until the process is terminated.
/// The database must already be initialized (`caseguard init`).
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let provider = create_provider(&config.matcher)?;
    run_server_with_provider(config, provider).await
}

/// Starts the HTTP server with a caller-supplied [`ScoreProvider`].
///
/// ```rust,no_run
/// use caseguard::scoring::DisabledScoreProvider;
/// use caseguard::server::run_server_with_provider;
/// use std::sync::Arc;
///
/// # async fn example(config: &caseguard::config::Config) -> anyhow::Result<()> {
/// run_server_with_provider(config, Arc::new(DisabledScoreProvider)).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_provider(
    config: &Config,
    provider: Arc<dyn ScoreProvider>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;

    let matcher = DuplicateCaseMatcher::new(provider, config.matcher.timeout());
    tracing::info!(provider = matcher.provider_name(), "duplicate matcher ready");

    let state = AppState {
        pool,
        matcher: Arc::new(matcher),
        settings: Arc::new(SubmitSettings::from(&config.matcher)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/cases", get(handle_list_cases).post(handle_submit_case))
        .route("/cases/check-duplicates", post(handle_check_duplicates))
        .route("/cases/{id}", get(handle_get_case))
        .route("/cases/{id}/status", post(handle_update_status))
        .route("/cases/{id}/blockchain-id", post(handle_set_blockchain_id))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("caseguard listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
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

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

impl From<CaseError> for AppError {
    fn from(err: CaseError) -> Self {
        let message = err.to_string();
        match err {
            CaseError::NotFound(_) => app_error(StatusCode::NOT_FOUND, "not_found", message),
            CaseError::Invalid(_) => app_error(StatusCode::BAD_REQUEST, "bad_request", message),
            CaseError::InvalidTransition { .. }
            | CaseError::AlreadyAnchored { .. }
            | CaseError::Conflict(_) => app_error(StatusCode::CONFLICT, "conflict", message),
            CaseError::Corrupt(_) | CaseError::Database(_) => {
                tracing::error!(error = %message, "request failed");
                app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        app_error(StatusCode::BAD_REQUEST, "bad_request", rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        app_error(StatusCode::BAD_REQUEST, "bad_request", rejection.body_text())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    provider: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        provider: state.matcher.provider_name().to_string(),
    })
}

// ============ /cases ============

#[derive(Serialize)]
struct CaseListResponse {
    cases: Vec<CaseRecord>,
}

async fn handle_list_cases(
    State(state): State<AppState>,
    filter: Result<Query<CaseFilter>, QueryRejection>,
) -> Result<Json<CaseListResponse>, AppError> {
    let Query(filter) = filter?;
    let cases = cases::list_cases(&state.pool, &filter).await?;
    Ok(Json(CaseListResponse { cases }))
}

async fn handle_get_case(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CaseRecord>, AppError> {
    Ok(Json(cases::require_case(&state.pool, &id).await?))
}

#[derive(Deserialize, Default)]
struct SubmitParams {
    #[serde(default)]
    force: bool,
}

/// Handler for `POST /cases`.
///
/// Returns `201` with `{ "outcome": "created", "case", "candidates" }` or
/// `409` with `{ "outcome": "blocked", .. }` when likely duplicates exist.
async fn handle_submit_case(
    State(state): State<AppState>,
    params: Result<Query<SubmitParams>, QueryRejection>,
    draft: Result<Json<NewCase>, JsonRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    let Json(draft) = draft?;
    let outcome = submission::submit_case(
        &state.pool,
        &state.matcher,
        &state.settings,
        &draft,
        params.force,
    )
    .await?;

    let status = match outcome {
        SubmitOutcome::Created { .. } => StatusCode::CREATED,
        SubmitOutcome::Blocked { .. } => StatusCode::CONFLICT,
    };
    Ok((status, Json(outcome)).into_response())
}

#[derive(Serialize)]
struct CheckResponse {
    threshold: f64,
    likely_duplicate: bool,
    candidates: Vec<DuplicateCandidate>,
}

async fn handle_check_duplicates(
    State(state): State<AppState>,
    draft: Result<Json<NewCase>, JsonRejection>,
) -> Result<Json<CheckResponse>, AppError> {
    let Json(draft) = draft?;
    let candidates =
        submission::check_duplicates(&state.pool, &state.matcher, &draft, &state.settings).await?;
    let threshold = state.settings.duplicate_threshold;
    let likely_duplicate = candidates
        .first()
        .is_some_and(|c| c.scores.overall_similarity >= threshold);

    Ok(Json(CheckResponse {
        threshold,
        likely_duplicate,
        candidates,
    }))
}

#[derive(Deserialize)]
struct StatusUpdate {
    status: CaseStatus,
}

async fn handle_update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    update: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<CaseRecord>, AppError> {
    let Json(update) = update?;
    Ok(Json(
        cases::update_status(&state.pool, &id, update.status).await?,
    ))
}

#[derive(Deserialize)]
struct BlockchainIdUpdate {
    blockchain_id: String,
}

async fn handle_set_blockchain_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    update: Result<Json<BlockchainIdUpdate>, JsonRejection>,
) -> Result<Json<CaseRecord>, AppError> {
    let Json(update) = update?;
    Ok(Json(
        cases::set_blockchain_id(&state.pool, &id, &update.blockchain_id).await?,
    ))
}
