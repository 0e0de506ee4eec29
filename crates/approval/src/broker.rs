//! Email-approval token broker.
//!
//! Per-token lifecycle:
//!
//! - **Issued**: fresh token, snapshot copied from the certificate, expiry
//!   `ttl` from now.
//! - **Decided**: the snapshot was approved or rejected by a validated
//!   request. At most once; later attempts read back `AlreadyProcessed`.
//! - **Synced**: the decision was copied into the durable store. Readable,
//!   never mutated again.
//! - **Expired**: `now > expires_at`. Reads fail with `Expired` and the entry
//!   is evicted, unless it still holds an email decision awaiting sync.
//!
//! Read-modify-write goes through [`TokenStore::update_entry`] with the
//! version read, so two racing decisions cannot both land.

use std::sync::Arc;

use coa_core::{Certificate, CertificateStatus, DecisionChannel, Outcome, EMAIL_APPROVER};
use coa_storage::{redact_token, ApprovalTokenRecord, StorageError, TokenStore};
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::token::generate_token;

/// Token lifetime used when none is configured.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::hours(24);

/// Attempts at finding an unused token before giving up.
const ISSUE_ATTEMPTS: usize = 3;

/// Reasons a token cannot be used. Each maps to a distinct message.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("approval link is invalid or has already been cleared")]
    NotFound,

    #[error("approval link expired at {expired_at}")]
    Expired { expired_at: OffsetDateTime },

    #[error("approval link does not belong to this certificate")]
    Mismatch,

    #[error("token lifetime {ttl} runs past the representable date range")]
    InvalidTtl { ttl: Duration },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a decide call. Neither variant is an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionResult {
    /// This call decided the snapshot.
    Decided(CertificateStatus),
    /// The snapshot was already decided; nothing changed.
    AlreadyProcessed(CertificateStatus),
}

impl DecisionResult {
    pub fn status(&self) -> CertificateStatus {
        match self {
            DecisionResult::Decided(s) | DecisionResult::AlreadyProcessed(s) => *s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub token: String,
    pub certificate_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// What reconciliation needs to copy a decision into the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsyncedDecision {
    pub certificate_id: String,
    pub token: String,
    pub outcome: CertificateStatus,
    pub decided_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub decided_at: OffsetDateTime,
}

impl UnsyncedDecision {
    pub fn outcome(&self) -> Outcome {
        match self.outcome {
            CertificateStatus::Rejected => Outcome::Reject,
            _ => Outcome::Approve,
        }
    }
}

pub struct TokenBroker {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl TokenBroker {
    pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a token bound to a copy of `snapshot`.
    pub async fn issue(&self, snapshot: Certificate) -> Result<IssuedToken, BrokerError> {
        let issued_at = self.clock.now();
        let expires_at = issued_at
            .checked_add(self.ttl)
            .ok_or(BrokerError::InvalidTtl { ttl: self.ttl })?;
        let certificate_id = snapshot.id.clone();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = generate_token();
            let record = ApprovalTokenRecord {
                token: token.clone(),
                certificate_id: certificate_id.clone(),
                certificate_snapshot: snapshot.clone(),
                issued_at,
                expires_at,
                synced: false,
                version: 0,
            };
            match self.store.insert_entry(record).await {
                Ok(()) => {
                    info!(
                        certificate_id = %certificate_id,
                        token = %redact_token(&token),
                        %expires_at,
                        "issued approval token"
                    );
                    return Ok(IssuedToken {
                        token,
                        certificate_id,
                        issued_at,
                        expires_at,
                    });
                }
                Err(StorageError::TokenExists { .. }) if attempt < ISSUE_ATTEMPTS => {
                    warn!(attempt, "approval token collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Approve or reject the snapshot bound to `token`.
    pub async fn decide(
        &self,
        token: &str,
        certificate_id: &str,
        outcome: Outcome,
    ) -> Result<DecisionResult, BrokerError> {
        loop {
            let entry = self.checked_entry(token, certificate_id).await?;
            let current = entry.certificate_snapshot.status;
            if current.is_decided() {
                debug!(
                    certificate_id,
                    status = %current,
                    "approval link already processed"
                );
                return Ok(DecisionResult::AlreadyProcessed(current));
            }

            let expected_version = entry.version;
            let mut updated = entry;
            let now = self.clock.now();
            updated
                .certificate_snapshot
                .apply_decision(outcome, EMAIL_APPROVER, now, DecisionChannel::Email);

            match self.store.update_entry(updated, expected_version).await {
                Ok(_) => {
                    let status = outcome.target_status();
                    info!(
                        certificate_id,
                        token = %redact_token(token),
                        status = %status,
                        "certificate decided by email"
                    );
                    return Ok(DecisionResult::Decided(status));
                }
                // Lost the race; the re-read sees the winner's decision.
                Err(StorageError::ConcurrentConflict { .. }) => continue,
                Err(StorageError::TokenNotFound { .. }) => return Err(BrokerError::NotFound),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Check `token` against `certificate_id` and return its snapshot.
    pub async fn validate(&self, token: &str, certificate_id: &str) -> Result<Certificate, BrokerError> {
        let entry = self.checked_entry(token, certificate_id).await?;
        Ok(entry.certificate_snapshot)
    }

    /// Record that the token's decision reached the durable store.
    ///
    /// A missing token is not an error. A token without an email decision
    /// is left untouched so its links keep working.
    pub async fn mark_synced(&self, token: &str) -> Result<(), BrokerError> {
        loop {
            let Some(entry) = self.store.get_entry(token).await? else {
                return Ok(());
            };
            if entry.synced {
                return Ok(());
            }
            if !entry.has_email_decision() {
                debug!(token = %redact_token(token), "nothing to sync, token undecided");
                return Ok(());
            }
            let expected_version = entry.version;
            let mut updated = entry;
            updated.synced = true;
            match self.store.update_entry(updated, expected_version).await {
                Ok(_) => {
                    debug!(token = %redact_token(token), "approval token synced");
                    return Ok(());
                }
                Err(StorageError::ConcurrentConflict { .. }) => continue,
                Err(StorageError::TokenNotFound { .. }) => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Every email decision not yet copied into the durable store, oldest first.
    pub async fn list_unsynced(&self) -> Result<Vec<UnsyncedDecision>, BrokerError> {
        let mut pending: Vec<UnsyncedDecision> = self
            .store
            .list_entries()
            .await?
            .into_iter()
            .filter(|entry| !entry.synced)
            .filter_map(|entry| {
                let decision = entry.certificate_snapshot.email_decision()?;
                Some(UnsyncedDecision {
                    certificate_id: entry.certificate_id,
                    token: entry.token,
                    outcome: decision.status,
                    decided_by: decision.by,
                    decided_at: decision.at,
                })
            })
            .collect();
        pending.sort_by(|a, b| a.decided_at.cmp(&b.decided_at));
        Ok(pending)
    }

    /// Evict expired entries. Decisions still awaiting sync are kept.
    pub async fn sweep_expired(&self) -> Result<usize, BrokerError> {
        let now = self.clock.now();
        let mut evicted = 0;
        for entry in self.store.list_entries().await? {
            if !entry.is_expired(now) || awaiting_sync(&entry) {
                continue;
            }
            if self.store.remove_entry(&entry.token).await?.is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, "swept expired approval tokens");
        }
        Ok(evicted)
    }

    /// Number of entries currently held.
    pub async fn outstanding(&self) -> Result<usize, BrokerError> {
        Ok(self.store.list_entries().await?.len())
    }

    async fn checked_entry(
        &self,
        token: &str,
        certificate_id: &str,
    ) -> Result<ApprovalTokenRecord, BrokerError> {
        let entry = self
            .store
            .get_entry(token)
            .await?
            .ok_or(BrokerError::NotFound)?;

        if entry.is_expired(self.clock.now()) {
            if !awaiting_sync(&entry) {
                self.store.remove_entry(token).await?;
            }
            return Err(BrokerError::Expired {
                expired_at: entry.expires_at,
            });
        }

        if entry.certificate_id != certificate_id {
            warn!(
                bound = %entry.certificate_id,
                requested = certificate_id,
                "approval token used for another certificate"
            );
            return Err(BrokerError::Mismatch);
        }

        Ok(entry)
    }
}

fn awaiting_sync(entry: &ApprovalTokenRecord) -> bool {
    !entry.synced && entry.has_email_decision()
}
