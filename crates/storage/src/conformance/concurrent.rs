use std::future::Future;
use std::sync::Arc;

use coa_core::CertificateStatus;

use super::{make_entry, TestResult};
use crate::{StorageError, TokenStore};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TokenStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_updates_exactly_one_wins",
            concurrent_updates_exactly_one_wins(factory().await).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_inserts_exactly_one_wins",
            concurrent_inserts_exactly_one_wins(factory().await).await,
        ),
    ]
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each try to decide the same token from version 0. Exactly one
/// update succeeds; the rest must get ConcurrentConflict.
async fn concurrent_updates_exactly_one_wins<S: TokenStore>(store: S) -> Result<(), String> {
    let store = Arc::new(store);
    store
        .insert_entry(make_entry("tok-1", "C1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            let mut entry = make_entry("tok-1", "C1");
            entry.certificate_snapshot.status = if i % 2 == 0 {
                CertificateStatus::Approved
            } else {
                CertificateStatus::Rejected
            };
            match s.update_entry(entry, 0).await {
                Ok(_) => Ok(true),
                Err(StorageError::ConcurrentConflict { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let winners = count_winners(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }

    let stored = store
        .get_entry("tok-1")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("entry missing")?;
    if stored.version != 1 {
        return Err(format!("expected final version 1, got {}", stored.version));
    }
    Ok(())
}

// ── Concurrent insert: exactly one wins ─────────────────────────────────────

async fn concurrent_inserts_exactly_one_wins<S: TokenStore>(store: S) -> Result<(), String> {
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            match s.insert_entry(make_entry("tok-1", &format!("C{i}"))).await {
                Ok(()) => Ok(true),
                Err(StorageError::TokenExists { .. }) => Ok(false),
                Err(e) => Err(e),
            }
        }));
    }

    let winners = count_winners(handles).await?;
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

async fn count_winners(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<usize, String> {
    let mut winners = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        }
    }
    Ok(winners)
}
