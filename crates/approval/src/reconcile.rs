//! Copies email decisions from the broker into the durable certificate store.
//!
//! Conflict policy: the durable certificate is only written while it is
//! still `awaiting_authentication`, checked by the store at write time
//! through `update_certificate_if`. If it already carries the same outcome
//! the token is simply marked synced. Any other durable status means the
//! certificate moved on in the application while the email was in flight;
//! the email decision is dropped with a warning and the token marked synced
//! so it is not retried. Store failures leave the token unsynced for the
//! next run.

use std::sync::Arc;

use coa_core::{CertificateStatus, DecisionChannel};
use coa_storage::{redact_token, CertificateStore, CertificateUpdate, StorageError};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::broker::{BrokerError, TokenBroker, UnsyncedDecision};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Decisions written to the durable store.
    pub applied: usize,
    /// Durable store already showed the same outcome.
    pub already_current: usize,
    /// Durable certificate had moved to another status; decision dropped.
    pub conflicts: usize,
    /// Durable certificate no longer exists; decision dropped.
    pub orphaned: usize,
    /// Store errors; retried next pass.
    pub failed: usize,
}

enum Reconciled {
    Applied,
    AlreadyCurrent,
    Conflict(CertificateStatus),
    Orphaned,
}

pub struct Reconciler {
    broker: Arc<TokenBroker>,
    certificates: Arc<dyn CertificateStore>,
}

impl Reconciler {
    pub fn new(broker: Arc<TokenBroker>, certificates: Arc<dyn CertificateStore>) -> Self {
        Self {
            broker,
            certificates,
        }
    }

    /// Reconcile every unsynced email decision once.
    ///
    /// Fails only if the broker cannot be listed; per-decision failures
    /// are counted in the report.
    pub async fn run_once(&self) -> Result<ReconcileReport, BrokerError> {
        let mut report = ReconcileReport::default();

        for decision in self.broker.list_unsynced().await? {
            match self.reconcile(&decision).await {
                Ok(Reconciled::Applied) => report.applied += 1,
                Ok(Reconciled::AlreadyCurrent) => report.already_current += 1,
                Ok(Reconciled::Conflict(durable)) => {
                    warn!(
                        certificate_id = %decision.certificate_id,
                        durable_status = %durable,
                        email_outcome = %decision.outcome,
                        "email decision conflicts with durable certificate, not applied"
                    );
                    report.conflicts += 1;
                }
                Ok(Reconciled::Orphaned) => {
                    error!(
                        certificate_id = %decision.certificate_id,
                        "email decision for a certificate that no longer exists"
                    );
                    report.orphaned += 1;
                }
                Err(e) => {
                    warn!(
                        certificate_id = %decision.certificate_id,
                        token = %redact_token(&decision.token),
                        error = %e,
                        "reconciliation failed, will retry"
                    );
                    report.failed += 1;
                }
            }
        }

        if report != ReconcileReport::default() {
            info!(
                applied = report.applied,
                already_current = report.already_current,
                conflicts = report.conflicts,
                orphaned = report.orphaned,
                failed = report.failed,
                "reconciled email approvals"
            );
        }
        Ok(report)
    }

    async fn reconcile(&self, decision: &UnsyncedDecision) -> Result<Reconciled, BrokerError> {
        let durable = match self.certificates.get_certificate(&decision.certificate_id).await {
            Ok(cert) => cert,
            Err(StorageError::CertificateNotFound { .. }) => {
                self.broker.mark_synced(&decision.token).await?;
                return Ok(Reconciled::Orphaned);
            }
            Err(e) => return Err(e.into()),
        };

        let result = if durable.status == decision.outcome {
            Reconciled::AlreadyCurrent
        } else if durable.status == CertificateStatus::AwaitingAuthentication {
            let written = self
                .certificates
                .update_certificate_if(
                    &decision.certificate_id,
                    CertificateStatus::AwaitingAuthentication,
                    CertificateUpdate::Decision {
                        outcome: decision.outcome(),
                        by: decision.decided_by.clone(),
                        at: decision.decided_at,
                        via: DecisionChannel::Email,
                    },
                )
                .await;
            match written {
                Ok(_) => Reconciled::Applied,
                // moved on between our read and the write
                Err(StorageError::StatusConflict { actual, .. }) if actual == decision.outcome => {
                    Reconciled::AlreadyCurrent
                }
                Err(StorageError::StatusConflict { actual, .. }) => Reconciled::Conflict(actual),
                Err(StorageError::CertificateNotFound { .. }) => Reconciled::Orphaned,
                Err(e) => return Err(e.into()),
            }
        } else {
            Reconciled::Conflict(durable.status)
        };

        self.broker.mark_synced(&decision.token).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::DEFAULT_TOKEN_TTL;
    use crate::clock::ManualClock;
    use coa_core::{Certificate, Outcome};
    use async_trait::async_trait;
    use coa_storage::{MemoryCertificateStore, MemoryTokenStore};
    use std::sync::atomic::{AtomicBool, Ordering};
    use time::macros::datetime;

    fn certificate(id: &str, status: CertificateStatus) -> Certificate {
        Certificate {
            id: id.to_string(),
            reference_no: format!("REF-{id}"),
            product_name: "NBR 70".to_string(),
            batch_no: "B-7".to_string(),
            status,
            approved_by: None,
            approved_at: None,
            approved_via: None,
            rejected_by: None,
            rejected_at: None,
            rejected_via: None,
            rejection_reason: None,
            results: serde_json::json!({}),
            created_at: datetime!(2025-06-01 00:00 UTC),
        }
    }

    async fn setup() -> (Arc<TokenBroker>, Arc<MemoryCertificateStore>, Reconciler) {
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 09:00 UTC)));
        let broker = Arc::new(TokenBroker::new(
            Arc::new(MemoryTokenStore::new()),
            clock,
            DEFAULT_TOKEN_TTL,
        ));
        let certificates = Arc::new(MemoryCertificateStore::new());
        let reconciler = Reconciler::new(broker.clone(), certificates.clone());
        (broker, certificates, reconciler)
    }

    #[tokio::test]
    async fn rejected_by_email_lands_in_durable_store() {
        let (broker, certificates, reconciler) = setup().await;
        let cert = certificate("C1", CertificateStatus::AwaitingAuthentication);
        certificates.put_certificate(cert.clone()).await.unwrap();

        let issued = broker.issue(cert).await.unwrap();
        broker.decide(&issued.token, "C1", Outcome::Reject).await.unwrap();

        let pending = broker.list_unsynced().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].certificate_id, "C1");
        assert_eq!(pending[0].token, issued.token);
        assert_eq!(pending[0].outcome, CertificateStatus::Rejected);

        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.applied, 1);

        let durable = certificates.get_certificate("C1").await.unwrap();
        assert_eq!(durable.status, CertificateStatus::Rejected);
        assert_eq!(durable.rejected_via, Some(DecisionChannel::Email));
        assert_eq!(durable.rejected_by.as_deref(), Some(coa_core::EMAIL_APPROVER));
        assert!(broker.list_unsynced().await.unwrap().is_empty());

        // a second pass has nothing to do
        assert_eq!(reconciler.run_once().await.unwrap(), ReconcileReport::default());
    }

    #[tokio::test]
    async fn manual_decision_in_flight_wins() {
        let (broker, certificates, reconciler) = setup().await;
        let cert = certificate("C1", CertificateStatus::AwaitingAuthentication);
        let issued = broker.issue(cert.clone()).await.unwrap();

        // rejected in the application while the email was in flight
        let mut manual = cert;
        manual.apply_decision(
            Outcome::Reject,
            "qa-manager",
            datetime!(2025-06-01 10:00 UTC),
            DecisionChannel::Manual,
        );
        certificates.put_certificate(manual).await.unwrap();

        broker.decide(&issued.token, "C1", Outcome::Approve).await.unwrap();
        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.applied, 0);

        let durable = certificates.get_certificate("C1").await.unwrap();
        assert_eq!(durable.status, CertificateStatus::Rejected);
        assert_eq!(durable.rejected_via, Some(DecisionChannel::Manual));
        assert!(broker.list_unsynced().await.unwrap().is_empty());
    }

    /// Hands out the certificate as read, then lands an in-app rejection
    /// before the caller gets to write.
    struct RejectAfterRead {
        inner: MemoryCertificateStore,
        fired: AtomicBool,
    }

    #[async_trait]
    impl CertificateStore for RejectAfterRead {
        async fn get_certificate(&self, certificate_id: &str) -> Result<Certificate, StorageError> {
            let read = self.inner.get_certificate(certificate_id).await?;
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.inner
                    .update_certificate(
                        certificate_id,
                        CertificateUpdate::Decision {
                            outcome: Outcome::Reject,
                            by: "qa-manager".to_string(),
                            at: datetime!(2025-06-01 10:00 UTC),
                            via: DecisionChannel::Manual,
                        },
                    )
                    .await?;
            }
            Ok(read)
        }

        async fn put_certificate(&self, certificate: Certificate) -> Result<(), StorageError> {
            self.inner.put_certificate(certificate).await
        }

        async fn update_certificate(
            &self,
            certificate_id: &str,
            update: CertificateUpdate,
        ) -> Result<Certificate, StorageError> {
            self.inner.update_certificate(certificate_id, update).await
        }

        async fn update_certificate_if(
            &self,
            certificate_id: &str,
            expected: CertificateStatus,
            update: CertificateUpdate,
        ) -> Result<Certificate, StorageError> {
            self.inner
                .update_certificate_if(certificate_id, expected, update)
                .await
        }

        async fn list_certificates(&self) -> Result<Vec<Certificate>, StorageError> {
            self.inner.list_certificates().await
        }
    }

    #[tokio::test]
    async fn manual_decision_between_read_and_write_wins() {
        let clock = Arc::new(ManualClock::new(datetime!(2025-06-01 09:00 UTC)));
        let broker = Arc::new(TokenBroker::new(
            Arc::new(MemoryTokenStore::new()),
            clock,
            DEFAULT_TOKEN_TTL,
        ));
        let store = Arc::new(RejectAfterRead {
            inner: MemoryCertificateStore::new(),
            fired: AtomicBool::new(false),
        });
        let cert = certificate("C1", CertificateStatus::AwaitingAuthentication);
        store.put_certificate(cert.clone()).await.unwrap();
        let reconciler = Reconciler::new(broker.clone(), store.clone());

        let issued = broker.issue(cert).await.unwrap();
        broker.decide(&issued.token, "C1", Outcome::Approve).await.unwrap();

        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.conflicts, 1);
        assert_eq!(report.applied, 0);

        let durable = store.inner.get_certificate("C1").await.unwrap();
        assert_eq!(durable.status, CertificateStatus::Rejected);
        assert_eq!(durable.rejected_by.as_deref(), Some("qa-manager"));
        assert_eq!(durable.rejected_via, Some(DecisionChannel::Manual));
        assert_eq!(durable.approved_by, None);
        assert_eq!(durable.approved_via, None);
        assert!(broker.list_unsynced().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_outcome_is_already_current() {
        let (broker, certificates, reconciler) = setup().await;
        let issued = broker
            .issue(certificate("C1", CertificateStatus::AwaitingAuthentication))
            .await
            .unwrap();
        certificates
            .put_certificate(certificate("C1", CertificateStatus::Approved))
            .await
            .unwrap();
        broker.decide(&issued.token, "C1", Outcome::Approve).await.unwrap();

        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.already_current, 1);
        assert!(broker.list_unsynced().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_certificate_is_orphaned() {
        let (broker, _certificates, reconciler) = setup().await;
        let issued = broker
            .issue(certificate("C9", CertificateStatus::AwaitingAuthentication))
            .await
            .unwrap();
        broker.decide(&issued.token, "C9", Outcome::Approve).await.unwrap();

        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.orphaned, 1);
        assert!(broker.list_unsynced().await.unwrap().is_empty());
    }
}
