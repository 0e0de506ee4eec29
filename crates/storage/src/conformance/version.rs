use std::future::Future;

use coa_core::CertificateStatus;

use super::{make_entry, TestResult};
use crate::{StorageError, TokenStore};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TokenStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "version",
            "update_bumps_version",
            update_bumps_version(factory().await).await,
        ),
        TestResult::from_result(
            "version",
            "stale_update_conflicts",
            stale_update_conflicts(factory().await).await,
        ),
        TestResult::from_result(
            "version",
            "update_missing_entry_not_found",
            update_missing_entry_not_found(factory().await).await,
        ),
    ]
}

async fn update_bumps_version<S: TokenStore>(store: S) -> Result<(), String> {
    store
        .insert_entry(make_entry("tok-1", "C1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut entry = make_entry("tok-1", "C1");
    entry.synced = true;
    let v = store
        .update_entry(entry, 0)
        .await
        .map_err(|e| format!("update: {e}"))?;
    if v != 1 {
        return Err(format!("expected version 1, got {v}"));
    }

    let stored = store
        .get_entry("tok-1")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("entry missing")?;
    if stored.version != 1 || !stored.synced {
        return Err(format!(
            "update not visible: version={} synced={}",
            stored.version, stored.synced
        ));
    }
    Ok(())
}

/// Two writers read version 0; the second write must be refused and must
/// not clobber the first.
async fn stale_update_conflicts<S: TokenStore>(store: S) -> Result<(), String> {
    store
        .insert_entry(make_entry("tok-1", "C1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut first = make_entry("tok-1", "C1");
    first.certificate_snapshot.status = CertificateStatus::Approved;
    store
        .update_entry(first, 0)
        .await
        .map_err(|e| format!("first update: {e}"))?;

    let mut second = make_entry("tok-1", "C1");
    second.certificate_snapshot.status = CertificateStatus::Rejected;
    match store.update_entry(second, 0).await {
        Err(StorageError::ConcurrentConflict {
            expected_version: 0,
            ..
        }) => {}
        other => return Err(format!("expected ConcurrentConflict, got {other:?}")),
    }

    let stored = store
        .get_entry("tok-1")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("entry missing")?;
    if stored.certificate_snapshot.status != CertificateStatus::Approved {
        return Err("stale update overwrote the winning write".to_string());
    }
    Ok(())
}

async fn update_missing_entry_not_found<S: TokenStore>(store: S) -> Result<(), String> {
    match store.update_entry(make_entry("ghost", "C1"), 0).await {
        Err(StorageError::TokenNotFound { .. }) => Ok(()),
        other => Err(format!("expected TokenNotFound, got {other:?}")),
    }
}
