//! Test records: creation, station results, holds and pending work.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coa_approval::Clock;
use coa_core::{
    pending_machines_for, Certificate, CertificateError, Machine, MachineResult, TestRecord,
};
use coa_storage::StorageError;
use serde::Deserialize;
use tracing::info;

use super::state::AppState;
use super::{json_error, parse_body, storage_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRecord {
    reference_no: String,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    batch_no: String,
}

/// POST /test-records
pub(crate) async fn handle_create_record(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let body: NewRecord = match parse_body(&body) {
        Ok(b) => b,
        Err(response) => return response,
    };
    let record = match TestRecord::new(
        body.reference_no,
        body.product_name,
        body.batch_no,
        state.clock.now(),
    ) {
        Ok(r) => r,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let _guard = state.record_writes.lock().await;
    match state.records.get_record(record.reference_no()).await {
        Ok(_) => {
            return json_error(
                StatusCode::CONFLICT,
                &format!("test record {} already exists", record.reference_no()),
            )
        }
        Err(StorageError::RecordNotFound { .. }) => {}
        Err(e) => return storage_error(e),
    }
    if let Err(e) = state.records.save_record(record.clone()).await {
        return storage_error(e);
    }
    info!(reference_no = record.reference_no(), "test record created");
    (StatusCode::CREATED, Json(record)).into_response()
}

/// GET /test-records/{reference_no}
pub(crate) async fn handle_get_record(
    State(state): State<Arc<AppState>>,
    Path(reference_no): Path<String>,
) -> Response {
    match state.records.get_record(&reference_no).await {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResultSubmission {
    #[serde(alias = "userId")]
    completed_by_user_id: String,
    #[serde(default)]
    measurements: BTreeMap<String, f64>,
}

/// POST /test-records/{reference_no}/results/{machine}
///
/// Stores a completed station result and returns the recomputed status.
pub(crate) async fn handle_record_result(
    State(state): State<Arc<AppState>>,
    Path((reference_no, machine)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let body: ResultSubmission = match parse_body(&body) {
        Ok(b) => b,
        Err(response) => return response,
    };
    let machine: Machine = match machine.parse() {
        Ok(m) => m,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    if body.completed_by_user_id.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "completedByUserId must not be empty");
    }

    let result = MachineResult::completed(
        body.completed_by_user_id,
        state.clock.now(),
        body.measurements,
    );
    let updated = modify_record(&state, &reference_no, |record| {
        record.record_result(machine, result);
    })
    .await;

    match updated {
        Ok(record) => {
            info!(
                reference_no = %reference_no,
                machine = %machine,
                status = %record.status(),
                "station result recorded"
            );
            record_response(&record)
        }
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HoldRequest {
    reason: String,
    held_by: String,
}

/// POST /test-records/{reference_no}/hold
pub(crate) async fn handle_place_hold(
    State(state): State<Arc<AppState>>,
    Path(reference_no): Path<String>,
    body: Bytes,
) -> Response {
    let body: HoldRequest = match parse_body(&body) {
        Ok(b) => b,
        Err(response) => return response,
    };
    let now = state.clock.now();
    let updated = modify_record(&state, &reference_no, |record| {
        record.place_on_hold(body.reason, body.held_by, now);
    })
    .await;
    match updated {
        Ok(record) => record_response(&record),
        Err(e) => storage_error(e),
    }
}

/// DELETE /test-records/{reference_no}/hold
pub(crate) async fn handle_release_hold(
    State(state): State<Arc<AppState>>,
    Path(reference_no): Path<String>,
) -> Response {
    let updated = modify_record(&state, &reference_no, |record| {
        record.release_hold();
    })
    .await;
    match updated {
        Ok(record) => record_response(&record),
        Err(e) => storage_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct PendingQuery {
    user_id: Option<String>,
    /// Comma-separated station list. Omitted means every station.
    machines: Option<String>,
}

/// GET /test-records/pending?userId&machines=G1,G2
pub(crate) async fn handle_pending_records(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingQuery>,
) -> Response {
    let Some(user_id) = query.user_id.filter(|u| !u.is_empty()) else {
        return json_error(StatusCode::BAD_REQUEST, "userId is required");
    };
    let access = match parse_machines(query.machines.as_deref()) {
        Ok(a) => a,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, &e.to_string()),
    };

    let records = match state.records.list_records().await {
        Ok(r) => r,
        Err(e) => return storage_error(e),
    };

    let pending: Vec<serde_json::Value> = records
        .iter()
        .filter_map(|record| {
            let machines = pending_machines_for(record, &user_id, &access);
            if machines.is_empty() {
                return None;
            }
            Some(serde_json::json!({
                "referenceNo": record.reference_no(),
                "productName": record.product_name,
                "batchNo": record.batch_no,
                "status": record.status(),
                "stage": record.stage(),
                "pendingMachines": machines,
            }))
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "userId": user_id,
            "count": pending.len(),
            "records": pending,
        })),
    )
        .into_response()
}

/// POST /test-records/{reference_no}/certificate
///
/// Builds a draft certificate from a completed record. The certificate id
/// is `COA-{reference_no}`.
pub(crate) async fn handle_create_certificate(
    State(state): State<Arc<AppState>>,
    Path(reference_no): Path<String>,
) -> Response {
    let record = match state.records.get_record(&reference_no).await {
        Ok(r) => r,
        Err(e) => return storage_error(e),
    };

    let certificate_id = format!("COA-{}", record.reference_no());
    match state.certificates.get_certificate(&certificate_id).await {
        Ok(_) => {
            return json_error(
                StatusCode::CONFLICT,
                &format!("certificate {} already exists", certificate_id),
            )
        }
        Err(StorageError::CertificateNotFound { .. }) => {}
        Err(e) => return storage_error(e),
    }

    let certificate = match Certificate::from_record(&certificate_id, &record, state.clock.now()) {
        Ok(c) => c,
        Err(e @ CertificateError::RecordIncomplete { .. }) => {
            return json_error(StatusCode::CONFLICT, &e.to_string())
        }
    };
    if let Err(e) = state.certificates.put_certificate(certificate.clone()).await {
        return storage_error(e);
    }
    info!(certificate_id = %certificate_id, "certificate created");
    (StatusCode::CREATED, Json(certificate)).into_response()
}

/// Read, mutate and write back one record under the record write lock.
async fn modify_record<F>(
    state: &AppState,
    reference_no: &str,
    mutate: F,
) -> Result<TestRecord, StorageError>
where
    F: FnOnce(&mut TestRecord),
{
    let _guard = state.record_writes.lock().await;
    let mut record = state.records.get_record(reference_no).await?;
    mutate(&mut record);
    state.records.save_record(record.clone()).await?;
    Ok(record)
}

fn record_response(record: &TestRecord) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "status": record.status(),
            "stage": record.stage(),
            "record": record,
        })),
    )
        .into_response()
}

fn parse_machines(raw: Option<&str>) -> Result<Vec<Machine>, coa_core::RecordError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(Machine::ALL.to_vec()),
        Some(list) => list
            .split(',')
            .filter(|m| !m.trim().is_empty())
            .map(str::parse)
            .collect(),
    }
}
