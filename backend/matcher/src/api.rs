//! Axum REST API handlers.
//!
//! Handlers only translate between HTTP and the engine; every rule lives in
//! the engine modules.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::allocation::{AllocateOptions, AllocationEngine};
use crate::db;
use crate::emergency::EmergencySweep;
use crate::errors::EngineError;
use crate::intake::{self, Intake, OrganizationUpdate};
use crate::models::{
    Donation, DonationStatus, MatchStatus, NewDonation, NewOrganization, OrganizationStatus,
};
use crate::scheduler::TickGuard;
use crate::urgency::{calculate_urgency, UrgencyAssessment};

#[derive(Clone)]
pub struct ApiState {
    pub engine: AllocationEngine,
    pub intake: Intake,
    pub sweep: EmergencySweep,
    /// Shared with the periodic sweep so manual scans never overlap it.
    pub sweep_guard: TickGuard,
}

impl ApiState {
    pub fn new(engine: AllocationEngine, sweep_guard: TickGuard) -> Self {
        Self {
            intake: Intake::new(engine.clone()),
            sweep: EmergencySweep::new(engine.clone()),
            engine,
            sweep_guard,
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/donations", post(create_donation).get(list_donations))
        .route("/donations/:id", get(get_donation))
        .route("/donations/:id/allocate", post(allocate_donation))
        .route("/organizations", post(create_organization).get(list_organizations))
        .route("/organizations/:id", get(get_organization).patch(update_organization))
        .route("/matches", get(list_matches))
        .route("/matches/:id", get(get_match))
        .route("/matches/:id/status", patch(update_match_status))
        .route("/emergency/scan", post(emergency_scan))
        .route("/summary", get(summary))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct DataResponse<T> {
    pub success: bool,
    pub message: &'static str,
    pub data: T,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub success: bool,
    pub count: usize,
    pub data: Vec<T>,
}

#[derive(Serialize)]
pub struct DonationView {
    #[serde(flatten)]
    pub donation: Donation,
    pub urgency: UrgencyAssessment,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    pub code: &'static str,
}

fn ok<T: Serialize>(status: StatusCode, message: &'static str, data: T) -> Response {
    let body = DataResponse {
        success: true,
        message,
        data,
    };
    (status, Json(body)).into_response()
}

fn list<T: Serialize>(data: Vec<T>) -> Response {
    let body = ListResponse {
        success: true,
        count: data.len(),
        data,
    };
    (StatusCode::OK, Json(body)).into_response()
}

// ─────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
    SweepInProgress,
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message, "VALIDATION_ERROR"),
            Self::SweepInProgress => (
                StatusCode::CONFLICT,
                "An emergency sweep is already running".to_string(),
                "SWEEP_IN_PROGRESS",
            ),
            Self::Engine(e) => {
                let status = match &e {
                    EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                    EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                    EngineError::AssignmentConflict(_)
                    | EngineError::CapacityConflict { .. }
                    | EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    e if e.is_retryable() => StatusCode::CONFLICT,
                    _ => {
                        error!(error = %e, "Request failed");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, e.to_string(), e.code())
            }
        };

        let body = ErrorResponse {
            success: false,
            message,
            code,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Deserialize)]
pub struct DonationFilter {
    pub status: Option<DonationStatus>,
}

/// `POST /donations`
///
/// Stores the donation, fires the emergency trigger and attempts a match.
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<NewDonation>, JsonRejection>,
) -> ApiResult {
    let Json(input) = body?;
    let submission = state.intake.submit_donation(input).await?;
    Ok(ok(StatusCode::CREATED, "Donation created", submission))
}

/// `GET /donations?status=`
pub async fn list_donations(
    State(state): State<Arc<ApiState>>,
    filter: Result<Query<DonationFilter>, QueryRejection>,
) -> ApiResult {
    let Query(filter) = filter?;
    let donations = db::list_donations(state.engine.pool(), filter.status).await?;
    Ok(list(donations))
}

/// `GET /donations/:id` with the urgency as of now.
pub async fn get_donation(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> ApiResult {
    let donation = db::get_donation(state.engine.pool(), id)
        .await?
        .ok_or_else(|| EngineError::not_found("donation", id))?;
    let urgency = calculate_urgency(
        donation.expires_at_utc(),
        donation.quantity,
        state.engine.now(),
    );
    Ok(ok(StatusCode::OK, "Donation found", DonationView { donation, urgency }))
}

/// `POST /donations/:id/allocate`
pub async fn allocate_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    let allocation = state.engine.allocate(id, AllocateOptions::default()).await?;
    let message = if allocation.is_matched() {
        "Donation allocated"
    } else {
        "No organization available for allocation"
    };
    Ok(ok(StatusCode::OK, message, allocation))
}

#[derive(Debug, Deserialize)]
pub struct OrganizationFilter {
    pub status: Option<OrganizationStatus>,
}

/// `POST /organizations`
pub async fn create_organization(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<NewOrganization>, JsonRejection>,
) -> ApiResult {
    let Json(input) = body?;
    let organization =
        intake::register_organization(state.engine.pool(), &input, state.engine.now()).await?;
    Ok(ok(StatusCode::CREATED, "Organization registered", organization))
}

/// `GET /organizations?status=`
pub async fn list_organizations(
    State(state): State<Arc<ApiState>>,
    filter: Result<Query<OrganizationFilter>, QueryRejection>,
) -> ApiResult {
    let Query(filter) = filter?;
    let organizations = db::list_organizations(state.engine.pool(), filter.status).await?;
    Ok(list(organizations))
}

/// `GET /organizations/:id`
pub async fn get_organization(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> ApiResult {
    let organization = db::get_organization(state.engine.pool(), id)
        .await?
        .ok_or_else(|| EngineError::not_found("organization", id))?;
    Ok(ok(StatusCode::OK, "Organization found", organization))
}

/// `PATCH /organizations/:id`
pub async fn update_organization(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<OrganizationUpdate>, JsonRejection>,
) -> ApiResult {
    let Json(update) = body?;
    let organization = intake::update_organization(state.engine.pool(), id, &update).await?;
    Ok(ok(StatusCode::OK, "Organization updated", organization))
}

#[derive(Debug, Deserialize)]
pub struct MatchFilter {
    pub status: Option<MatchStatus>,
    pub organization_id: Option<i64>,
}

/// `GET /matches?status=&organization_id=`
pub async fn list_matches(
    State(state): State<Arc<ApiState>>,
    filter: Result<Query<MatchFilter>, QueryRejection>,
) -> ApiResult {
    let Query(filter) = filter?;
    let matches =
        db::list_matches(state.engine.pool(), filter.status, filter.organization_id).await?;
    Ok(list(matches))
}

/// `GET /matches/:id` joined with its donation and organization.
pub async fn get_match(State(state): State<Arc<ApiState>>, Path(id): Path<i64>) -> ApiResult {
    let details = state.engine.match_details(id).await?;
    Ok(ok(StatusCode::OK, "Match found", details))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: MatchStatus,
}

/// `PATCH /matches/:id/status`
pub async fn update_match_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> ApiResult {
    let Json(update) = body?;
    let details = state.engine.set_match_status(id, update.status).await?;
    Ok(ok(StatusCode::OK, "Match status updated", details))
}

/// `POST /emergency/scan`
///
/// Runs a sweep now unless one is already running.
pub async fn emergency_scan(State(state): State<Arc<ApiState>>) -> ApiResult {
    let Some(_permit) = state.sweep_guard.try_acquire() else {
        return Err(ApiError::SweepInProgress);
    };
    let report = state.sweep.run_sweep().await?;
    Ok(ok(StatusCode::OK, "Emergency scan completed", report))
}

/// `GET /summary`
pub async fn summary(State(state): State<Arc<ApiState>>) -> ApiResult {
    let counts = db::summary(state.engine.pool()).await?;
    Ok(ok(StatusCode::OK, "Summary", counts))
}
