//! HTTP trigger surface: health, manual and webhook runs, manual company
//! intake, and CRM field discovery.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::extract::mention::parse_mention;
use crate::pipeline::PipelineOrchestrator;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    /// Reported by `/health`.
    pub interval_minutes: u64,
}

/// Build the router with all routes and request tracing.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/process-emails", post(process_emails))
        .route("/webhook/gmail", post(gmail_webhook))
        .route("/api/companies", post(submit_company))
        .route("/api/crm/fields", get(list_crm_fields))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "dealflow",
        "interval_minutes": state.interval_minutes,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

// ── Runs ────────────────────────────────────────────────────────────────

async fn process_emails(State(state): State<AppState>) -> Response {
    match state.orchestrator.run_batch().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e @ PipelineError::RunInProgress) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e @ PipelineError::Fetch(_)) => {
            error!(error = %e, "Manual run failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Manual run failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Push notifications only say "something changed"; acknowledge at once and
/// run a batch in the background.
async fn gmail_webhook(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        match orchestrator.run_batch().await {
            Ok(summary) => info!(
                run_id = %summary.run_id,
                processed = summary.processed,
                "Webhook-triggered run finished"
            ),
            Err(PipelineError::RunInProgress) => {
                info!("Webhook received during an active run, skipping")
            }
            Err(e) => error!(error = %e, "Webhook-triggered run failed"),
        }
    });
    Json(json!({ "received": true }))
}

// ── Manual intake ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CompanySubmission {
    text: String,
}

async fn submit_company(
    State(state): State<AppState>,
    Json(body): Json<CompanySubmission>,
) -> Response {
    let info = parse_mention(&body.text).into_company_info();
    if !info.has_identity() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Could not find a company name or domain in the text",
        );
    }

    match state.orchestrator.reconciler().reconcile(&info).await {
        Ok(outcome) => {
            info!(
                organization_id = outcome.organization.id,
                status = outcome.status(),
                "Manual company intake"
            );
            Json(json!({
                "success": true,
                "status": outcome.status(),
                "company": outcome.organization.name,
                "organization_id": outcome.organization.id,
                "list_entry_id": outcome.membership.entry().id,
                "stage": outcome.stage,
            }))
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Manual company intake failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

// ── CRM ─────────────────────────────────────────────────────────────────

async fn list_crm_fields(State(state): State<AppState>) -> Response {
    match state.orchestrator.reconciler().list_fields().await {
        Ok(fields) => Json(json!({ "success": true, "fields": fields })).into_response(),
        Err(e) => {
            warn!(error = %e, "Field listing failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}
