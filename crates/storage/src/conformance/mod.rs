//! Conformance test suite for `TokenStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any `TokenStore`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Entries**: insertion, duplicate detection, lookup, removal, listing
//! - **Version validation / OCC**: stale-version updates are refused
//! - **Concurrency**: of N racing updates from one version exactly one wins
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use coa_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test(flavor = "multi_thread")]
//! async fn redis_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_redis_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod concurrent;
mod entries;
mod version;

use std::fmt;
use std::future::Future;

use coa_core::{Certificate, CertificateStatus};
use time::macros::datetime;
use time::Duration;

use crate::record::ApprovalTokenRecord;
use crate::TokenStore;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "entries", "version", "concurrent").
    pub category: String,
    /// Test name (e.g. "insert_then_get_roundtrips").
    pub name: String,
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        let (passed, message) = match result {
            Ok(()) => (true, None),
            Err(msg) => (false, Some(msg)),
        };
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed,
            message,
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a token store.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store, ensuring test isolation. The concurrent tests spawn tasks, so the
/// caller must run inside a tokio runtime.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: TokenStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(entries::run_entry_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn make_entry(token: &str, certificate_id: &str) -> ApprovalTokenRecord {
    let issued_at = datetime!(2025-01-01 00:00 UTC);
    ApprovalTokenRecord {
        token: token.to_string(),
        certificate_id: certificate_id.to_string(),
        certificate_snapshot: Certificate {
            id: certificate_id.to_string(),
            reference_no: format!("REF-{certificate_id}"),
            product_name: "test-product".to_string(),
            batch_no: "test-batch".to_string(),
            status: CertificateStatus::AwaitingAuthentication,
            approved_by: None,
            approved_at: None,
            approved_via: None,
            rejected_by: None,
            rejected_at: None,
            rejected_via: None,
            rejection_reason: None,
            results: serde_json::json!({}),
            created_at: issued_at,
        },
        issued_at,
        expires_at: issued_at + Duration::hours(24),
        synced: false,
        version: 0,
    }
}
