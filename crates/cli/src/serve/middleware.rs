//! HTTP middleware: rate limiting and API key authentication.

use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::state::AppState;

/// Routes opened from an email client. The token is their credential.
fn is_email_link(path: &str) -> bool {
    path == "/approve" || path == "/reject" || path.starts_with("/certificate-preview/")
}

/// Rate limiting middleware. Checks per-IP request rate before routing.
pub(crate) async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }
    match state.rate_limiter.check(addr.ip()).await {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            tracing::warn!(client = %addr.ip(), "rate limit exceeded");
            let body = serde_json::json!({
                "success": false,
                "error": "rate limit exceeded",
                "retry_after": retry_after,
            });
            (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
        }
    }
}

/// API key authentication middleware.
///
/// If an API key is configured, application routes must include either
/// `Authorization: Bearer <key>` or `X-API-Key: <key>`. `/health` and the
/// emailed link routes are exempt.
pub(crate) async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected_key) = &state.api_key else {
        return next.run(request).await;
    };

    let path = request.uri().path();
    if path == "/health" || is_email_link(path) {
        return next.run(request).await;
    }

    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok());

    if let Some(token) = auth_header.and_then(|auth| auth.strip_prefix("Bearer ")) {
        if token == expected_key {
            return next.run(request).await;
        }
        return super::json_error(StatusCode::FORBIDDEN, "invalid API key");
    }

    let api_key_header = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());

    if let Some(key) = api_key_header {
        if key == expected_key {
            return next.run(request).await;
        }
        return super::json_error(StatusCode::FORBIDDEN, "invalid API key");
    }

    super::json_error(StatusCode::UNAUTHORIZED, "authentication required")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_link_routes() {
        assert!(is_email_link("/approve"));
        assert!(is_email_link("/reject"));
        assert!(is_email_link("/certificate-preview/C1"));
        assert!(!is_email_link("/validate-token"));
        assert!(!is_email_link("/approve/extra"));
        assert!(!is_email_link("/sync-email-approvals"));
    }
}
