use coa_core::CertificateStatus;

/// All errors that can be returned by a COA storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A token entry with the same key already exists.
    #[error("token already exists: {token_prefix}…")]
    TokenExists { token_prefix: String },

    /// No token entry under the given key.
    #[error("token not found: {token_prefix}…")]
    TokenNotFound { token_prefix: String },

    /// Optimistic concurrency control conflict: another writer updated the
    /// entry first, so the expected version no longer matches.
    #[error("concurrent conflict on token {token_prefix}…: expected version {expected_version}")]
    ConcurrentConflict {
        token_prefix: String,
        expected_version: i64,
    },

    /// Durable certificate not found.
    #[error("certificate not found: {certificate_id}")]
    CertificateNotFound { certificate_id: String },

    /// Conditional certificate write refused: the stored status moved on.
    #[error("certificate {certificate_id} is {actual}, expected {expected}")]
    StatusConflict {
        certificate_id: String,
        expected: CertificateStatus,
        actual: CertificateStatus,
    },

    /// Test record not found.
    #[error("test record not found: {reference_no}")]
    RecordNotFound { reference_no: String },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}
