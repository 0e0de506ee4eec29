//! JSON endpoints used by the application to read and sync email decisions.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coa_approval::BrokerError;
use tracing::{error, info};

use super::email_links::TokenQuery;
use super::state::AppState;
use super::{json_error, pages, parse_body};

fn broker_error(err: BrokerError) -> Response {
    if matches!(err, BrokerError::Storage(_) | BrokerError::InvalidTtl { .. }) {
        error!(error = %err, "token store failure");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
    }
    let body = serde_json::json!({
        "success": false,
        "error": err.to_string(),
        "reason": pages::failure_reason(&err),
    });
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

/// GET /validate-token?token&certificateId
///
/// Returns the certificate snapshot bound to a live token.
pub(crate) async fn handle_validate_token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let Some((token, certificate_id)) = query.pair() else {
        return json_error(StatusCode::BAD_REQUEST, "token and certificateId are required");
    };

    match state.broker.validate(token, certificate_id).await {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "certificateData": snapshot,
            })),
        )
            .into_response(),
        Err(e) => broker_error(e),
    }
}

/// GET /sync-email-approvals
pub(crate) async fn handle_list_unsynced(State(state): State<Arc<AppState>>) -> Response {
    match state.broker.list_unsynced().await {
        Ok(approvals) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "count": approvals.len(),
                "approvals": approvals,
            })),
        )
            .into_response(),
        Err(e) => broker_error(e),
    }
}

/// POST /sync-email-approvals
///
/// Body: `{"token": "...", "certificateId": "..."}`. Marks one decision as
/// copied into the durable store. Unknown tokens are accepted silently;
/// tokens not yet decided by email are left usable.
pub(crate) async fn handle_mark_synced(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let body: serde_json::Value = match parse_body(&body) {
        Ok(b) => b,
        Err(response) => return response,
    };
    let token = match body.get("token").and_then(|t| t.as_str()) {
        Some(t) if !t.is_empty() => t,
        _ => return json_error(StatusCode::BAD_REQUEST, "missing 'token' field"),
    };
    let certificate_id = body
        .get("certificateId")
        .and_then(|c| c.as_str())
        .unwrap_or_default();

    match state.broker.mark_synced(token).await {
        Ok(()) => {
            info!(certificate_id, "email decision marked synced");
            (StatusCode::OK, Json(serde_json::json!({"success": true}))).into_response()
        }
        Err(e) => broker_error(e),
    }
}

/// POST /sync-email-approvals/run
///
/// Runs one reconciliation pass immediately and returns its report.
pub(crate) async fn handle_run_reconciliation(State(state): State<Arc<AppState>>) -> Response {
    match state.reconciler.run_once().await {
        Ok(report) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "success": true,
                "report": report,
            })),
        )
            .into_response(),
        Err(e) => broker_error(e),
    }
}
