//! Handlers for the links embedded in approval emails.
//!
//! These answer with HTML because they are opened in a browser from an
//! email client. The token in the query string is the only credential.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use coa_approval::{app_preview_url, DecisionResult};
use coa_core::Outcome;
use serde::Deserialize;
use tracing::error;

use super::pages;
use super::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct TokenQuery {
    pub(crate) token: Option<String>,
    #[serde(rename = "certificateId")]
    pub(crate) certificate_id: Option<String>,
}

impl TokenQuery {
    /// Both parameters, when present and non-empty.
    pub(crate) fn pair(&self) -> Option<(&str, &str)> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        let certificate_id = self.certificate_id.as_deref().filter(|c| !c.is_empty())?;
        Some((token, certificate_id))
    }
}

/// GET /approve?token&certificateId
pub(crate) async fn handle_approve(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Response {
    decide_from_link(&state, &query, Outcome::Approve).await
}

/// GET /reject?token&certificateId
pub(crate) async fn handle_reject(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
) -> Response {
    decide_from_link(&state, &query, Outcome::Reject).await
}

async fn decide_from_link(state: &AppState, query: &TokenQuery, outcome: Outcome) -> Response {
    let Some((token, certificate_id)) = query.pair() else {
        return pages::missing_parameters();
    };

    match state.broker.decide(token, certificate_id, outcome).await {
        Ok(DecisionResult::Decided(status)) => pages::decided(certificate_id, status),
        Ok(DecisionResult::AlreadyProcessed(status)) => {
            pages::already_processed(certificate_id, status)
        }
        Err(e) => pages::token_failure(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct PreviewQuery {
    token: Option<String>,
}

/// GET /certificate-preview/{id}?token
///
/// Checks the token, then redirects to the application's preview page,
/// which fetches the snapshot through `/validate-token`.
pub(crate) async fn handle_certificate_preview(
    State(state): State<Arc<AppState>>,
    Path(certificate_id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Response {
    let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) else {
        return pages::missing_parameters();
    };

    if let Err(e) = state.broker.validate(token, &certificate_id).await {
        return pages::token_failure(&e);
    }

    match app_preview_url(&state.preview_base_url, &certificate_id, token) {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(e) => {
            error!(error = %e, "cannot build preview URL");
            pages::internal_error()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parameters_are_missing() {
        let query = TokenQuery {
            token: Some(String::new()),
            certificate_id: Some("C1".into()),
        };
        assert!(query.pair().is_none());

        let query = TokenQuery {
            token: Some("t".into()),
            certificate_id: None,
        };
        assert!(query.pair().is_none());

        let query = TokenQuery {
            token: Some("t".into()),
            certificate_id: Some("C1".into()),
        };
        assert_eq!(query.pair(), Some(("t", "C1")));
    }
}
