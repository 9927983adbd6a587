use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use finportal_core::{BusinessUnit, FinancialSubmission, Kpis, RecentTable, SummaryRow, SummaryTable};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};

use crate::{error::PortalError, submission::SubmissionReceipt, Portal};

#[derive(Clone)]
pub struct AppState {
    pub portal: Arc<Portal>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub business_unit: String,
    pub revenue: f64,
    pub expenses: f64,
    #[serde(default)]
    pub submitted_by: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(flatten)]
    pub receipt: SubmissionReceipt,
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Portal(PortalError),
    Internal(String),
}

impl From<PortalError> for ApiError {
    fn from(e: PortalError) -> Self {
        ApiError::Portal(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Portal(PortalError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Portal(PortalError::Connection(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Portal(PortalError::Write(_)) | ApiError::Portal(PortalError::Query(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match self {
            ApiError::Portal(e) => e.to_string(),
            ApiError::Internal(msg) => msg,
        };
        (status, Json(ErrorBody { success: false, error })).into_response()
    }
}

/// Runs a blocking portal call off the async workers.
async fn blocking<T, F>(portal: Arc<Portal>, call: F) -> Result<T, ApiError>
where
    F: FnOnce(&Portal) -> Result<T, PortalError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || call(&portal))
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?;
    Ok(result?)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/submissions", post(submit))
        .route("/submissions/recent", get(recent))
        .route("/submissions/recent.txt", get(recent_text))
        .route("/summary", get(summary))
        .route("/summary.txt", get(summary_text))
        .route("/kpis", get(kpis))
        .route("/business-units", get(business_units))
        .route("/refresh", post(refresh))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

pub async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let receipt = blocking(state.portal, move |portal| {
        portal.submit(&req.business_unit, req.revenue, req.expenses, &req.submitted_by)
    })
    .await?;
    Ok(Json(SubmitResponse {
        success: true,
        receipt,
    }))
}

pub async fn recent(State(state): State<AppState>) -> Result<Json<Vec<FinancialSubmission>>, ApiError> {
    let rows = blocking(state.portal, |portal| portal.fetch_recent()).await?;
    Ok(Json(rows.as_ref().clone()))
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<Vec<SummaryRow>>, ApiError> {
    let rows = blocking(state.portal, |portal| portal.fetch_summary()).await?;
    Ok(Json(rows.as_ref().clone()))
}

pub async fn recent_text(State(state): State<AppState>) -> Result<String, ApiError> {
    let rows = blocking(state.portal, |portal| portal.fetch_recent()).await?;
    Ok(RecentTable(&rows).to_string())
}

pub async fn summary_text(State(state): State<AppState>) -> Result<String, ApiError> {
    let rows = blocking(state.portal, |portal| portal.fetch_summary()).await?;
    Ok(SummaryTable(&rows).to_string())
}

pub async fn kpis(State(state): State<AppState>) -> Result<Json<Kpis>, ApiError> {
    Ok(Json(blocking(state.portal, |portal| portal.fetch_kpis()).await?))
}

pub async fn business_units() -> Json<Vec<&'static str>> {
    Json(BusinessUnit::ALL.iter().map(|u| u.as_str()).collect())
}

pub async fn refresh(State(state): State<AppState>) -> StatusCode {
    state.portal.invalidate();
    StatusCode::NO_CONTENT
}

pub async fn health(State(state): State<AppState>) -> Response {
    let check = blocking(state.portal, |portal| {
        let handle = portal.connections().get_connection()?;
        handle.ping().map_err(|e| {
            portal.connections().reset();
            PortalError::Connection(e.to_string())
        })
    })
    .await;
    match check {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn render_metrics(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
