//! Certificate records and their approval fields.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::CertificateError;
use crate::machine::Machine;
use crate::record::TestRecord;
use crate::status::WorkflowStatus;

/// Lifecycle status of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    Draft,
    AwaitingAuthentication,
    Approved,
    Rejected,
    Issued,
    Cancelled,
}

impl CertificateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificateStatus::Draft => "draft",
            CertificateStatus::AwaitingAuthentication => "awaiting_authentication",
            CertificateStatus::Approved => "approved",
            CertificateStatus::Rejected => "rejected",
            CertificateStatus::Issued => "issued",
            CertificateStatus::Cancelled => "cancelled",
        }
    }

    /// Approved or rejected.
    pub fn is_decided(&self) -> bool {
        matches!(self, CertificateStatus::Approved | CertificateStatus::Rejected)
    }
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a decision reached the certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionChannel {
    Manual,
    Email,
}

/// An approver's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Approve,
    Reject,
}

impl Outcome {
    /// Certificate status a decision with this outcome produces.
    pub fn target_status(&self) -> CertificateStatus {
        match self {
            Outcome::Approve => CertificateStatus::Approved,
            Outcome::Reject => CertificateStatus::Rejected,
        }
    }
}

/// The decision fields carried by a decided certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub status: CertificateStatus,
    pub by: String,
    pub at: OffsetDateTime,
    pub via: DecisionChannel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    pub reference_no: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub batch_no: String,
    pub status: CertificateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub approved_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_via: Option<DecisionChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub rejected_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_via: Option<DecisionChannel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Aggregated station measurements keyed by machine.
    #[serde(default)]
    pub results: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Certificate {
    /// Build a draft certificate from a completed test record.
    pub fn from_record(
        id: impl Into<String>,
        record: &TestRecord,
        created_at: OffsetDateTime,
    ) -> Result<Self, CertificateError> {
        if record.status() != WorkflowStatus::Completed {
            return Err(CertificateError::RecordIncomplete {
                reference_no: record.reference_no().to_string(),
                status: record.status().to_string(),
            });
        }

        let mut results = serde_json::Map::new();
        for machine in Machine::ALL {
            let Some(result) = record.result(machine) else {
                continue;
            };
            let measurements: serde_json::Map<String, serde_json::Value> = result
                .measurements
                .iter()
                .filter_map(|(k, v)| {
                    serde_json::Number::from_f64(*v).map(|n| (k.clone(), serde_json::Value::Number(n)))
                })
                .collect();
            results.insert(
                machine.as_str().to_string(),
                serde_json::json!({
                    "measurements": measurements,
                    "completedByUserId": result.completed_by_user_id,
                }),
            );
        }

        Ok(Certificate {
            id: id.into(),
            reference_no: record.reference_no().to_string(),
            product_name: record.product_name.clone(),
            batch_no: record.batch_no.clone(),
            status: CertificateStatus::Draft,
            approved_by: None,
            approved_at: None,
            approved_via: None,
            rejected_by: None,
            rejected_at: None,
            rejected_via: None,
            rejection_reason: None,
            results: serde_json::Value::Object(results),
            created_at,
        })
    }

    pub fn is_decided(&self) -> bool {
        self.status.is_decided()
    }

    /// The decision fields matching the current status, if decided.
    pub fn decision(&self) -> Option<Decision> {
        let (by, at, via) = match self.status {
            CertificateStatus::Approved => (&self.approved_by, self.approved_at, self.approved_via),
            CertificateStatus::Rejected => (&self.rejected_by, self.rejected_at, self.rejected_via),
            _ => return None,
        };
        Some(Decision {
            status: self.status,
            by: by.clone().unwrap_or_default(),
            at: at?,
            via: via.unwrap_or(DecisionChannel::Manual),
        })
    }

    /// The decision, if it arrived through an emailed link.
    pub fn email_decision(&self) -> Option<Decision> {
        self.decision().filter(|d| d.via == DecisionChannel::Email)
    }

    /// Set status and the matching audit fields for `outcome`. The other
    /// outcome's audit fields are cleared.
    pub fn apply_decision(
        &mut self,
        outcome: Outcome,
        by: impl Into<String>,
        at: OffsetDateTime,
        via: DecisionChannel,
    ) {
        let by = by.into();
        self.status = outcome.target_status();
        match outcome {
            Outcome::Approve => {
                self.approved_by = Some(by);
                self.approved_at = Some(at);
                self.approved_via = Some(via);
                self.rejected_by = None;
                self.rejected_at = None;
                self.rejected_via = None;
                self.rejection_reason = None;
            }
            Outcome::Reject => {
                self.rejected_by = Some(by);
                self.rejected_at = Some(at);
                self.rejected_via = Some(via);
                self.approved_by = None;
                self.approved_at = None;
                self.approved_via = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MachineResult;
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn completed_record() -> TestRecord {
        let mut r =
            TestRecord::new("REF-9", "FKM 80", "B-9", datetime!(2025-01-01 00:00 UTC)).unwrap();
        for m in Machine::ALL {
            let mut values = BTreeMap::new();
            values.insert("density".to_string(), 1.85);
            r.record_result(
                m,
                MachineResult::completed("op", datetime!(2025-01-01 02:00 UTC), values),
            );
        }
        r
    }

    #[test]
    fn builds_from_completed_record() {
        let cert =
            Certificate::from_record("C1", &completed_record(), datetime!(2025-01-02 00:00 UTC))
                .unwrap();
        assert_eq!(cert.status, CertificateStatus::Draft);
        assert_eq!(cert.results["G2"]["measurements"]["density"], 1.85);
    }

    #[test]
    fn refuses_incomplete_record() {
        let r = TestRecord::new("REF-1", "", "", datetime!(2025-01-01 00:00 UTC)).unwrap();
        let err = Certificate::from_record("C1", &r, datetime!(2025-01-02 00:00 UTC)).unwrap_err();
        assert!(matches!(err, CertificateError::RecordIncomplete { .. }));
    }

    #[test]
    fn email_decision_only_for_email_channel() {
        let mut cert =
            Certificate::from_record("C1", &completed_record(), datetime!(2025-01-02 00:00 UTC))
                .unwrap();
        assert!(cert.decision().is_none());

        cert.apply_decision(
            Outcome::Reject,
            "qa-manager",
            datetime!(2025-01-03 00:00 UTC),
            DecisionChannel::Manual,
        );
        assert!(cert.is_decided());
        assert!(cert.email_decision().is_none());

        cert.apply_decision(
            Outcome::Approve,
            crate::EMAIL_APPROVER,
            datetime!(2025-01-04 00:00 UTC),
            DecisionChannel::Email,
        );
        let d = cert.email_decision().unwrap();
        assert_eq!(d.status, CertificateStatus::Approved);
        assert_eq!(d.by, "Email Approval");
    }

    #[test]
    fn decision_clears_other_outcome() {
        let mut cert =
            Certificate::from_record("C1", &completed_record(), datetime!(2025-01-02 00:00 UTC))
                .unwrap();
        cert.apply_decision(
            Outcome::Reject,
            "qa-manager",
            datetime!(2025-01-03 00:00 UTC),
            DecisionChannel::Manual,
        );
        cert.rejection_reason = Some("density out of range".to_string());

        cert.apply_decision(
            Outcome::Approve,
            "qa-lead",
            datetime!(2025-01-04 00:00 UTC),
            DecisionChannel::Manual,
        );
        assert_eq!(cert.status, CertificateStatus::Approved);
        assert_eq!(cert.approved_by.as_deref(), Some("qa-lead"));
        assert_eq!(cert.rejected_by, None);
        assert_eq!(cert.rejected_at, None);
        assert_eq!(cert.rejected_via, None);
        assert_eq!(cert.rejection_reason, None);
    }

    #[test]
    fn wire_format_uses_snake_case_status() {
        let mut cert =
            Certificate::from_record("C1", &completed_record(), datetime!(2025-01-02 00:00 UTC))
                .unwrap();
        cert.status = CertificateStatus::AwaitingAuthentication;
        let json = serde_json::to_value(&cert).unwrap();
        assert_eq!(json["status"], "awaiting_authentication");
        assert_eq!(json["referenceNo"], "REF-9");
        assert!(json.get("approvedBy").is_none());
    }
}
