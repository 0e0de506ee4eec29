use std::future::Future;

use super::{make_entry, TestResult};
use crate::{StorageError, TokenStore};

pub(super) async fn run_entry_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: TokenStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "entries",
            "insert_then_get_roundtrips",
            insert_then_get_roundtrips(factory().await).await,
        ),
        TestResult::from_result(
            "entries",
            "duplicate_insert_rejected",
            duplicate_insert_rejected(factory().await).await,
        ),
        TestResult::from_result(
            "entries",
            "get_missing_returns_none",
            get_missing_returns_none(factory().await).await,
        ),
        TestResult::from_result(
            "entries",
            "remove_returns_entry_once",
            remove_returns_entry_once(factory().await).await,
        ),
        TestResult::from_result(
            "entries",
            "list_returns_all_entries",
            list_returns_all_entries(factory().await).await,
        ),
    ]
}

async fn insert_then_get_roundtrips<S: TokenStore>(store: S) -> Result<(), String> {
    let entry = make_entry("tok-1", "C1");
    store
        .insert_entry(entry.clone())
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let got = store
        .get_entry("tok-1")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("entry missing after insert")?;
    if got != entry {
        return Err(format!("stored entry differs: {got:?}"));
    }
    Ok(())
}

async fn duplicate_insert_rejected<S: TokenStore>(store: S) -> Result<(), String> {
    store
        .insert_entry(make_entry("tok-1", "C1"))
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    match store.insert_entry(make_entry("tok-1", "C2")).await {
        Err(StorageError::TokenExists { .. }) => {}
        other => return Err(format!("expected TokenExists, got {other:?}")),
    }
    let kept = store
        .get_entry("tok-1")
        .await
        .map_err(|e| format!("get: {e}"))?
        .ok_or("entry vanished")?;
    if kept.certificate_id != "C1" {
        return Err("duplicate insert overwrote the original entry".to_string());
    }
    Ok(())
}

async fn get_missing_returns_none<S: TokenStore>(store: S) -> Result<(), String> {
    match store.get_entry("missing").await {
        Ok(None) => Ok(()),
        other => Err(format!("expected Ok(None), got {other:?}")),
    }
}

async fn remove_returns_entry_once<S: TokenStore>(store: S) -> Result<(), String> {
    store
        .insert_entry(make_entry("tok-1", "C1"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let first = store
        .remove_entry("tok-1")
        .await
        .map_err(|e| format!("remove: {e}"))?;
    if first.is_none() {
        return Err("first remove returned None".to_string());
    }
    let second = store
        .remove_entry("tok-1")
        .await
        .map_err(|e| format!("second remove: {e}"))?;
    if second.is_some() {
        return Err("second remove returned an entry".to_string());
    }
    Ok(())
}

async fn list_returns_all_entries<S: TokenStore>(store: S) -> Result<(), String> {
    for i in 0..3 {
        store
            .insert_entry(make_entry(&format!("tok-{i}"), &format!("C{i}")))
            .await
            .map_err(|e| format!("insert {i}: {e}"))?;
    }
    let mut tokens: Vec<String> = store
        .list_entries()
        .await
        .map_err(|e| format!("list: {e}"))?
        .into_iter()
        .map(|e| e.token)
        .collect();
    tokens.sort();
    if tokens != ["tok-0", "tok-1", "tok-2"] {
        return Err(format!("unexpected tokens: {tokens:?}"));
    }
    Ok(())
}
