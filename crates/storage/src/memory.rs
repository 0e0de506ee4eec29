//! In-memory backends.
//!
//! Each store is a single map behind a `tokio::sync::Mutex`. Suitable for a
//! single process; contents are lost on restart.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use coa_core::{Certificate, CertificateStatus, TestRecord};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::{redact_token, ApprovalTokenRecord, CertificateUpdate};
use crate::traits::{CertificateStore, TestRecordStore, TokenStore};

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, ApprovalTokenRecord>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn insert_entry(&self, record: ApprovalTokenRecord) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&record.token) {
            return Err(StorageError::TokenExists {
                token_prefix: redact_token(&record.token),
            });
        }
        entries.insert(record.token.clone(), record);
        Ok(())
    }

    async fn get_entry(&self, token: &str) -> Result<Option<ApprovalTokenRecord>, StorageError> {
        Ok(self.entries.lock().await.get(token).cloned())
    }

    async fn update_entry(
        &self,
        mut record: ApprovalTokenRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError> {
        let mut entries = self.entries.lock().await;
        let stored = entries
            .get_mut(&record.token)
            .ok_or_else(|| StorageError::TokenNotFound {
                token_prefix: redact_token(&record.token),
            })?;
        if stored.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                token_prefix: redact_token(&record.token),
                expected_version,
            });
        }
        record.version = expected_version + 1;
        let new_version = record.version;
        *stored = record;
        Ok(new_version)
    }

    async fn remove_entry(&self, token: &str) -> Result<Option<ApprovalTokenRecord>, StorageError> {
        Ok(self.entries.lock().await.remove(token))
    }

    async fn list_entries(&self) -> Result<Vec<ApprovalTokenRecord>, StorageError> {
        Ok(self.entries.lock().await.values().cloned().collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    certificates: Mutex<BTreeMap<String, Certificate>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CertificateStore for MemoryCertificateStore {
    async fn get_certificate(&self, certificate_id: &str) -> Result<Certificate, StorageError> {
        self.certificates
            .lock()
            .await
            .get(certificate_id)
            .cloned()
            .ok_or_else(|| StorageError::CertificateNotFound {
                certificate_id: certificate_id.to_string(),
            })
    }

    async fn put_certificate(&self, certificate: Certificate) -> Result<(), StorageError> {
        self.certificates
            .lock()
            .await
            .insert(certificate.id.clone(), certificate);
        Ok(())
    }

    async fn update_certificate(
        &self,
        certificate_id: &str,
        update: CertificateUpdate,
    ) -> Result<Certificate, StorageError> {
        let mut certificates = self.certificates.lock().await;
        let certificate =
            certificates
                .get_mut(certificate_id)
                .ok_or_else(|| StorageError::CertificateNotFound {
                    certificate_id: certificate_id.to_string(),
                })?;
        update.apply(certificate);
        Ok(certificate.clone())
    }

    async fn update_certificate_if(
        &self,
        certificate_id: &str,
        expected: CertificateStatus,
        update: CertificateUpdate,
    ) -> Result<Certificate, StorageError> {
        let mut certificates = self.certificates.lock().await;
        let certificate =
            certificates
                .get_mut(certificate_id)
                .ok_or_else(|| StorageError::CertificateNotFound {
                    certificate_id: certificate_id.to_string(),
                })?;
        if certificate.status != expected {
            return Err(StorageError::StatusConflict {
                certificate_id: certificate_id.to_string(),
                expected,
                actual: certificate.status,
            });
        }
        update.apply(certificate);
        Ok(certificate.clone())
    }

    async fn list_certificates(&self) -> Result<Vec<Certificate>, StorageError> {
        Ok(self.certificates.lock().await.values().cloned().collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTestRecordStore {
    records: Mutex<BTreeMap<String, TestRecord>>,
}

impl MemoryTestRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TestRecordStore for MemoryTestRecordStore {
    async fn get_record(&self, reference_no: &str) -> Result<TestRecord, StorageError> {
        self.records
            .lock()
            .await
            .get(reference_no)
            .cloned()
            .ok_or_else(|| StorageError::RecordNotFound {
                reference_no: reference_no.to_string(),
            })
    }

    async fn save_record(&self, record: TestRecord) -> Result<(), StorageError> {
        self.records
            .lock()
            .await
            .insert(record.reference_no().to_string(), record);
        Ok(())
    }

    async fn list_records(&self) -> Result<Vec<TestRecord>, StorageError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance::run_conformance_suite;
    use coa_core::{DecisionChannel, Outcome};
    use std::sync::Arc;
    use time::macros::datetime;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn memory_token_store_conformance() {
        let report = run_conformance_suite(|| async { MemoryTokenStore::new() }).await;
        assert!(report.failed == 0, "{report}");
    }

    fn certificate(id: &str) -> Certificate {
        Certificate {
            id: id.to_string(),
            reference_no: "REF-1".to_string(),
            product_name: String::new(),
            batch_no: String::new(),
            status: CertificateStatus::AwaitingAuthentication,
            approved_by: None,
            approved_at: None,
            approved_via: None,
            rejected_by: None,
            rejected_at: None,
            rejected_via: None,
            rejection_reason: None,
            results: serde_json::Value::Null,
            created_at: datetime!(2025-01-01 00:00 UTC),
        }
    }

    #[tokio::test]
    async fn certificate_update_applies_decision() {
        let store = MemoryCertificateStore::new();
        store.put_certificate(certificate("C1")).await.unwrap();

        let updated = store
            .update_certificate(
                "C1",
                CertificateUpdate::Decision {
                    outcome: Outcome::Reject,
                    by: "Email Approval".to_string(),
                    at: datetime!(2025-01-02 00:00 UTC),
                    via: DecisionChannel::Email,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, CertificateStatus::Rejected);
        assert_eq!(updated.rejected_via, Some(DecisionChannel::Email));
        assert_eq!(
            store.get_certificate("C1").await.unwrap().status,
            CertificateStatus::Rejected
        );
    }

    fn manual(outcome: Outcome, by: &str) -> CertificateUpdate {
        CertificateUpdate::Decision {
            outcome,
            by: by.to_string(),
            at: datetime!(2025-01-02 00:00 UTC),
            via: DecisionChannel::Manual,
        }
    }

    #[tokio::test]
    async fn conditional_update_refuses_moved_status() {
        let store = MemoryCertificateStore::new();
        store.put_certificate(certificate("C1")).await.unwrap();

        store
            .update_certificate_if(
                "C1",
                CertificateStatus::AwaitingAuthentication,
                manual(Outcome::Reject, "qa-manager"),
            )
            .await
            .unwrap();

        let err = store
            .update_certificate_if(
                "C1",
                CertificateStatus::AwaitingAuthentication,
                manual(Outcome::Approve, "qa-lead"),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::StatusConflict {
                actual: CertificateStatus::Rejected,
                ..
            }
        ));

        let stored = store.get_certificate("C1").await.unwrap();
        assert_eq!(stored.status, CertificateStatus::Rejected);
        assert_eq!(stored.rejected_by.as_deref(), Some("qa-manager"));
        assert_eq!(stored.approved_by, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_conditional_decisions_have_one_winner() {
        let store = Arc::new(MemoryCertificateStore::new());
        store.put_certificate(certificate("C1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let outcome = if i % 2 == 0 { Outcome::Approve } else { Outcome::Reject };
            handles.push(tokio::spawn(async move {
                store
                    .update_certificate_if(
                        "C1",
                        CertificateStatus::AwaitingAuthentication,
                        manual(outcome, &format!("user-{i}")),
                    )
                    .await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(StorageError::StatusConflict { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn missing_certificate_is_reported() {
        let store = MemoryCertificateStore::new();
        let err = store
            .update_certificate("nope", CertificateUpdate::Status(CertificateStatus::Issued))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CertificateNotFound { .. }));
    }

    #[tokio::test]
    async fn records_are_keyed_by_reference() {
        let store = MemoryTestRecordStore::new();
        let record =
            TestRecord::new("REF-5", "SBR", "B-5", datetime!(2025-01-01 00:00 UTC)).unwrap();
        store.save_record(record.clone()).await.unwrap();
        assert_eq!(store.get_record("REF-5").await.unwrap(), record);
        assert!(matches!(
            store.get_record("REF-6").await,
            Err(StorageError::RecordNotFound { .. })
        ));
        assert_eq!(store.list_records().await.unwrap().len(), 1);
    }
}
