//! Small HTML pages shown after an emailed link is opened.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use coa_approval::email::escape_html;
use coa_approval::BrokerError;
use coa_core::CertificateStatus;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tone {
    Success,
    Notice,
    Failure,
}

impl Tone {
    fn colour(self) -> &'static str {
        match self {
            Tone::Success => "#1b7a3a",
            Tone::Notice => "#8a6d00",
            Tone::Failure => "#b3261e",
        }
    }
}

/// Render a minimal standalone page. Title and message are escaped.
pub(crate) fn page(status: StatusCode, tone: Tone, title: &str, message: &str) -> Response {
    let body = format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body style="font-family: sans-serif; max-width: 36em; margin: 4em auto; color: #222;">
  <h1 style="color: {colour};">{title}</h1>
  <p>{message}</p>
</body>
</html>
"#,
        title = escape_html(title),
        colour = tone.colour(),
        message = escape_html(message),
    );
    (status, Html(body)).into_response()
}

pub(crate) fn missing_parameters() -> Response {
    page(
        StatusCode::BAD_REQUEST,
        Tone::Failure,
        "Invalid link",
        "This link is missing its token or certificate reference.",
    )
}

/// Page for a broker failure. Storage details are logged, never shown.
pub(crate) fn token_failure(err: &BrokerError) -> Response {
    match err {
        BrokerError::NotFound => page(
            StatusCode::FORBIDDEN,
            Tone::Failure,
            "Link not recognised",
            "This approval link is invalid or has already been cleared.",
        ),
        BrokerError::Expired { .. } => page(
            StatusCode::FORBIDDEN,
            Tone::Failure,
            "Link expired",
            "This approval link has expired. Ask for a new approval request.",
        ),
        BrokerError::Mismatch => page(
            StatusCode::FORBIDDEN,
            Tone::Failure,
            "Link mismatch",
            "This approval link does not belong to the requested certificate.",
        ),
        BrokerError::Storage(_) | BrokerError::InvalidTtl { .. } => {
            error!(error = %err, "approval link failed");
            internal_error()
        }
    }
}

pub(crate) fn internal_error() -> Response {
    page(
        StatusCode::INTERNAL_SERVER_ERROR,
        Tone::Failure,
        "Something went wrong",
        "The request could not be completed. Please try again later.",
    )
}

pub(crate) fn decided(certificate_id: &str, status: CertificateStatus) -> Response {
    let (tone, title) = match status {
        CertificateStatus::Rejected => (Tone::Notice, "Certificate rejected"),
        _ => (Tone::Success, "Certificate approved"),
    };
    page(
        StatusCode::OK,
        tone,
        title,
        &format!("Certificate {} is now {}. Thank you.", certificate_id, status),
    )
}

pub(crate) fn already_processed(certificate_id: &str, status: CertificateStatus) -> Response {
    page(
        StatusCode::OK,
        Tone::Notice,
        "Already processed",
        &format!(
            "Certificate {} has already been processed (status: {}). No changes were made.",
            certificate_id, status
        ),
    )
}

/// Short machine-readable reason for JSON callers.
pub(crate) fn failure_reason(err: &BrokerError) -> &'static str {
    match err {
        BrokerError::NotFound => "not_found",
        BrokerError::Expired { .. } => "expired",
        BrokerError::Mismatch => "mismatch",
        BrokerError::Storage(_) | BrokerError::InvalidTtl { .. } => "internal",
    }
}
