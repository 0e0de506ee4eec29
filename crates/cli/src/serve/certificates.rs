//! Certificate lookup and approval requests.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coa_approval::{render_approval_email, ApprovalLinks, BrokerError, Clock};
use coa_core::{CertificateStatus, DecisionChannel, Outcome};
use coa_storage::{CertificateUpdate, StorageError};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::state::AppState;
use super::{json_error, parse_body, storage_error};

/// GET /certificates/{id}
pub(crate) async fn handle_get_certificate(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
) -> Response {
    match state.certificates.get_certificate(&certificate_id).await {
        Ok(certificate) => (StatusCode::OK, Json(certificate)).into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApprovalRequest {
    /// Recipient; falls back to the configured approver.
    to: Option<String>,
}

/// POST /certificates/{id}/request-approval
///
/// Body (optional): `{"to": "approver@example.com"}`. Moves a draft to
/// `awaiting_authentication`, issues a token bound to a snapshot of the
/// certificate and emails the approve/reject/preview links. The email is
/// sent in the background; a send failure is logged and the token stays
/// valid.
pub(crate) async fn handle_request_approval(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
    body: Bytes,
) -> Response {
    let request: ApprovalRequest = if body.is_empty() {
        ApprovalRequest::default()
    } else {
        match parse_body(&body) {
            Ok(r) => r,
            Err(response) => return response,
        }
    };

    let Some(recipient) = request
        .to
        .filter(|t| !t.trim().is_empty())
        .or_else(|| state.approver_email.clone())
    else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "no recipient: pass 'to' or configure approval.approver_email",
        );
    };

    let mut certificate = match state.certificates.get_certificate(&certificate_id).await {
        Ok(c) => c,
        Err(e) => return storage_error(e),
    };

    match certificate.status {
        CertificateStatus::AwaitingAuthentication => {}
        CertificateStatus::Draft => {
            certificate = match state
                .certificates
                .update_certificate_if(
                    &certificate_id,
                    CertificateStatus::Draft,
                    CertificateUpdate::Status(CertificateStatus::AwaitingAuthentication),
                )
                .await
            {
                Ok(c) => c,
                // another request moved it first
                Err(StorageError::StatusConflict {
                    actual: CertificateStatus::AwaitingAuthentication,
                    ..
                }) => match state.certificates.get_certificate(&certificate_id).await {
                    Ok(c) => c,
                    Err(e) => return storage_error(e),
                },
                Err(e) => return storage_error(e),
            };
        }
        other => {
            return json_error(
                StatusCode::CONFLICT,
                &format!("certificate {} is already {}", certificate_id, other),
            );
        }
    }

    let issued = match state.broker.issue(certificate.clone()).await {
        Ok(issued) => issued,
        Err(BrokerError::Storage(e)) => return storage_error(e),
        Err(e) => {
            error!(error = %e, "token issue failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    let links = match ApprovalLinks::new(&state.base_url, &issued.token, &certificate_id) {
        Ok(links) => links,
        Err(e) => {
            error!(error = %e, "cannot build approval links");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    let message = render_approval_email(&certificate, &links, issued.expires_at);
    let mailer = state.mailer.clone();
    let to = recipient.clone();
    let id = certificate_id.clone();
    tokio::spawn(async move {
        match mailer.send(&to, &message.subject, &message.html).await {
            Ok(()) => info!(certificate_id = %id, to = %to, "approval email sent"),
            Err(e) => warn!(certificate_id = %id, to = %to, error = %e, "approval email failed"),
        }
    });

    let response = serde_json::json!({
        "success": true,
        "certificateId": certificate_id,
        "recipient": recipient,
        "token": issued.token,
        "expiresAt": issued.expires_at.format(&time::format_description::well_known::Rfc3339).ok(),
        "links": links,
    });
    (StatusCode::OK, Json(response)).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ManualDecision {
    outcome: Outcome,
    decided_by: String,
}

/// POST /certificates/{id}/decision
///
/// Body: `{"outcome": "approve" | "reject", "decidedBy": "..."}`. Records an
/// in-app decision. Only certificates awaiting authentication can be decided;
/// of two racing decisions the second gets 409.
pub(crate) async fn handle_manual_decision(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
    body: Bytes,
) -> Response {
    let decision: ManualDecision = match parse_body(&body) {
        Ok(d) => d,
        Err(response) => return response,
    };
    if decision.decided_by.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "decidedBy must not be empty");
    }

    let update = CertificateUpdate::Decision {
        outcome: decision.outcome,
        by: decision.decided_by,
        at: state.clock.now(),
        via: DecisionChannel::Manual,
    };
    let written = state
        .certificates
        .update_certificate_if(&certificate_id, CertificateStatus::AwaitingAuthentication, update)
        .await;
    match written {
        Ok(certificate) => {
            info!(certificate_id = %certificate_id, status = %certificate.status, "certificate decided in app");
            (StatusCode::OK, Json(certificate)).into_response()
        }
        Err(StorageError::StatusConflict { actual, .. }) => json_error(
            StatusCode::CONFLICT,
            &format!("certificate {} is {}", certificate_id, actual),
        ),
        Err(e) => storage_error(e),
    }
}
