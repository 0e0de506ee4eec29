//! `coa serve` -- HTTP server for the certificate approval workflow.
//!
//! Exposes the token broker, reconciliation, certificate and test-record
//! stores as an async HTTP service using `axum` + `tokio`.
//!
//! Security features:
//! - Per-IP rate limiting on every route except /health (configurable)
//! - Optional API key on application routes via `server.api_key` / COA_API_KEY
//! - Emailed link routes authenticate by token only, never by API key
//! - CORS headers on all responses
//!
//! Endpoints, emailed links (HTML responses):
//! - GET  /approve?token&certificateId          - Approve via email link
//! - GET  /reject?token&certificateId           - Reject via email link
//! - GET  /certificate-preview/{id}?token       - Redirect to the preview page
//!
//! Endpoints, application (JSON responses):
//! - GET  /health                               - Server status (exempt from auth)
//! - GET  /validate-token?token&certificateId   - Snapshot for a valid token
//! - GET  /sync-email-approvals                 - Unsynced email decisions
//! - POST /sync-email-approvals                 - Mark one decision synced
//! - POST /sync-email-approvals/run             - Run reconciliation now
//! - GET  /certificates/{id}                    - Durable certificate
//! - POST /certificates/{id}/request-approval   - Issue token and send email
//! - POST /certificates/{id}/decision           - Approve or reject in the app
//! - POST /test-records                         - Create a test record
//! - GET  /test-records/pending?userId&machines - Per-user pending work
//! - GET  /test-records/{ref}                   - Test record with status
//! - POST /test-records/{ref}/results/{machine} - Record a station result
//! - POST /test-records/{ref}/hold              - Put a record on hold
//! - DELETE /test-records/{ref}/hold            - Release a hold
//! - POST /test-records/{ref}/certificate       - Certificate from a completed record

mod certificates;
mod email_links;
mod handlers;
mod middleware;
mod pages;
mod records;
mod state;
mod sync;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Json, Router};
use coa_core::{Certificate, TestRecord};
use coa_storage::StorageError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use self::certificates::{
    handle_get_certificate, handle_manual_decision, handle_request_approval,
};
use self::email_links::{handle_approve, handle_certificate_preview, handle_reject};
use self::handlers::{handle_health, handle_not_found};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::records::{
    handle_create_certificate, handle_create_record, handle_get_record, handle_pending_records,
    handle_place_hold, handle_record_result, handle_release_hold,
};
use self::state::AppState;
use self::sync::{
    handle_list_unsynced, handle_mark_synced, handle_run_reconciliation, handle_validate_token,
};
use crate::config::Config;

/// Maximum request body size: 1 MB.
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Construct a JSON error response with the given status code and message.
fn json_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({"success": false, "error": message})),
    )
        .into_response()
}

/// Parse a JSON request body, answering malformed input with a JSON 400.
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)))
}

/// Map a storage failure to a JSON response. Missing entities are 404,
/// status conflicts 409; anything else is logged and reported as a bare 500.
fn storage_error(e: StorageError) -> Response {
    match e {
        StorageError::CertificateNotFound { .. } | StorageError::RecordNotFound { .. } => {
            json_error(StatusCode::NOT_FOUND, &e.to_string())
        }
        StorageError::StatusConflict { .. } => json_error(StatusCode::CONFLICT, &e.to_string()),
        other => {
            error!(error = %other, "storage failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Initial contents for the in-memory stores.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedData {
    certificates: Vec<Certificate>,
    records: Vec<TestRecord>,
}

async fn load_seed(state: &AppState, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read seed {}: {}", path.display(), e))?;
    let seed: SeedData = serde_json::from_str(&text)
        .map_err(|e| format!("invalid seed {}: {}", path.display(), e))?;

    let (certificates, records) = (seed.certificates.len(), seed.records.len());
    for certificate in seed.certificates {
        state.certificates.put_certificate(certificate).await?;
    }
    for record in seed.records {
        state.records.save_record(record).await?;
    }
    info!(certificates, records, seed = %path.display(), "loaded seed data");
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/approve", get(handle_approve))
        .route("/reject", get(handle_reject))
        .route("/certificate-preview/{id}", get(handle_certificate_preview))
        .route("/validate-token", get(handle_validate_token))
        .route(
            "/sync-email-approvals",
            get(handle_list_unsynced).post(handle_mark_synced),
        )
        .route("/sync-email-approvals/run", post(handle_run_reconciliation))
        .route("/certificates/{id}", get(handle_get_certificate))
        .route("/certificates/{id}/decision", post(handle_manual_decision))
        .route(
            "/certificates/{id}/request-approval",
            post(handle_request_approval),
        )
        .route("/test-records", post(handle_create_record))
        .route("/test-records/pending", get(handle_pending_records))
        .route("/test-records/{reference_no}", get(handle_get_record))
        .route(
            "/test-records/{reference_no}/results/{machine}",
            post(handle_record_result),
        )
        .route(
            "/test-records/{reference_no}/hold",
            post(handle_place_hold).delete(handle_release_hold),
        )
        .route(
            "/test-records/{reference_no}/certificate",
            post(handle_create_certificate),
        )
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Periodically sweep expired tokens and reconcile email decisions.
fn spawn_maintenance(state: Arc<AppState>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = state.broker.sweep_expired().await {
                warn!(error = %e, "token sweep failed");
            }
            if let Err(e) = state.reconciler.run_once().await {
                warn!(error = %e, "reconciliation pass failed");
            }
        }
    })
}

/// Start the HTTP server with in-memory stores, optionally seeded from JSON.
pub async fn start_server(
    config: Config,
    seed: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let state = Arc::new(AppState::in_memory(&config)?);

    if let Some(path) = seed {
        load_seed(&state, path).await?;
    }

    if state.api_key.is_some() {
        info!("API key authentication enabled");
    }
    info!(
        rate_limit = config.server.rate_limit,
        mailer = state.mailer.mailer_id(),
        base_url = %state.base_url,
        "server configured"
    );

    let maintenance = spawn_maintenance(
        state.clone(),
        Duration::from_secs(config.server.reconcile_interval_secs),
    );

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("COA server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance.abort();
    info!("server shut down");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C).
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("received shutdown signal");
}
