/// Errors raised when mutating a [`TestRecord`](crate::TestRecord).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// Reference numbers must be non-empty.
    #[error("reference number must not be empty")]
    EmptyReference,

    /// The reference number was already assigned and the caller is not privileged.
    #[error("reference number {reference_no} is immutable")]
    ReferenceImmutable { reference_no: String },

    /// A machine name did not match G1, G2 or G3.
    #[error("unknown machine '{0}' (expected G1, G2 or G3)")]
    UnknownMachine(String),
}

/// Errors raised when building a [`Certificate`](crate::Certificate).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    /// Certificates can only be produced from completed records.
    #[error("test record {reference_no} is not complete (status: {status})")]
    RecordIncomplete { reference_no: String, status: String },
}
