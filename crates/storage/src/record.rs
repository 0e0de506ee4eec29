use coa_core::{Certificate, CertificateStatus, DecisionChannel, Outcome};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Number of token characters kept when a token appears in logs or errors.
const TOKEN_PREFIX_LEN: usize = 8;

/// Shorten a bearer token for logs and error messages.
pub fn redact_token(token: &str) -> String {
    token.chars().take(TOKEN_PREFIX_LEN).collect()
}

/// A token held by the approval broker, with the certificate snapshot it
/// authorizes acting on.
///
/// The snapshot is a copy taken at issue time. Approve/reject decisions
/// mutate the snapshot, never the durable certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalTokenRecord {
    pub token: String,
    pub certificate_id: String,
    pub certificate_snapshot: Certificate,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub synced: bool,
    /// Optimistic concurrency counter, bumped by every successful update.
    pub version: i64,
}

impl ApprovalTokenRecord {
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    /// The snapshot carries an outcome that arrived by email.
    pub fn has_email_decision(&self) -> bool {
        self.certificate_snapshot.email_decision().is_some()
    }
}

/// A write against the durable certificate store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateUpdate {
    /// Record an approve/reject decision with its audit fields.
    Decision {
        outcome: Outcome,
        by: String,
        at: OffsetDateTime,
        via: DecisionChannel,
    },
    /// Move the certificate to a new status without decision fields.
    Status(CertificateStatus),
}

impl CertificateUpdate {
    pub fn apply(&self, certificate: &mut Certificate) {
        match self {
            CertificateUpdate::Decision {
                outcome,
                by,
                at,
                via,
            } => certificate.apply_decision(*outcome, by.clone(), *at, *via),
            CertificateUpdate::Status(status) => certificate.status = *status,
        }
    }
}
