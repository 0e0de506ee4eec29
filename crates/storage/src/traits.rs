use async_trait::async_trait;
use coa_core::{Certificate, CertificateStatus, TestRecord};

use crate::error::StorageError;
use crate::record::{ApprovalTokenRecord, CertificateUpdate};

/// Capability store backing the email-approval broker.
///
/// ## OCC
///
/// `update_entry` is conditional on the stored `version` equal to
/// `expected_version`. On mismatch it returns
/// `Err(StorageError::ConcurrentConflict)` and leaves the entry untouched.
/// This is what makes a broker read-modify-write atomic per token: of two
/// concurrent updates from the same version, exactly one succeeds.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be shared through
/// axum application state and across spawned tasks.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Insert a new entry.
    ///
    /// Returns `Err(StorageError::TokenExists)` if the key is taken.
    async fn insert_entry(&self, record: ApprovalTokenRecord) -> Result<(), StorageError>;

    /// Read an entry, `None` if absent.
    async fn get_entry(&self, token: &str) -> Result<Option<ApprovalTokenRecord>, StorageError>;

    /// Replace an entry if its stored version is `expected_version`.
    ///
    /// Returns the new version on success.
    async fn update_entry(
        &self,
        record: ApprovalTokenRecord,
        expected_version: i64,
    ) -> Result<i64, StorageError>;

    /// Remove an entry, returning it if it was present.
    async fn remove_entry(&self, token: &str) -> Result<Option<ApprovalTokenRecord>, StorageError>;

    /// Every entry currently held, in no particular order.
    async fn list_entries(&self) -> Result<Vec<ApprovalTokenRecord>, StorageError>;
}

/// The durable system of record for certificates.
#[async_trait]
pub trait CertificateStore: Send + Sync + 'static {
    /// Returns `Err(StorageError::CertificateNotFound)` if absent.
    async fn get_certificate(&self, certificate_id: &str) -> Result<Certificate, StorageError>;

    /// Insert or replace a certificate.
    async fn put_certificate(&self, certificate: Certificate) -> Result<(), StorageError>;

    /// Apply `update` and return the certificate as stored afterwards.
    async fn update_certificate(
        &self,
        certificate_id: &str,
        update: CertificateUpdate,
    ) -> Result<Certificate, StorageError>;

    /// Apply `update` only if the stored status is `expected`, checked and
    /// written in one step.
    ///
    /// Returns `Err(StorageError::StatusConflict)` with the stored status on
    /// mismatch and leaves the certificate untouched.
    async fn update_certificate_if(
        &self,
        certificate_id: &str,
        expected: CertificateStatus,
        update: CertificateUpdate,
    ) -> Result<Certificate, StorageError>;

    async fn list_certificates(&self) -> Result<Vec<Certificate>, StorageError>;
}

/// Storage for test records.
///
/// Records are saved whole: a result write and its recomputed status
/// always land in the same `save_record` call.
#[async_trait]
pub trait TestRecordStore: Send + Sync + 'static {
    /// Returns `Err(StorageError::RecordNotFound)` if absent.
    async fn get_record(&self, reference_no: &str) -> Result<TestRecord, StorageError>;

    async fn save_record(&self, record: TestRecord) -> Result<(), StorageError>;

    async fn list_records(&self) -> Result<Vec<TestRecord>, StorageError>;
}
