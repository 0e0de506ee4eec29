//! Test records and their per-machine result blocks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::RecordError;
use crate::machine::Machine;
use crate::status::{resolve_status, Stage, StatusResolution, WorkflowStatus};

/// Measurements supplied by one station.
///
/// A block only counts as a completed result once `completed_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineResult {
    #[serde(default)]
    pub measurements: BTreeMap<String, f64>,
    pub completed_by_user_id: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl MachineResult {
    /// A completed result entered by `user_id` at `at`.
    pub fn completed(
        user_id: impl Into<String>,
        at: OffsetDateTime,
        measurements: BTreeMap<String, f64>,
    ) -> Self {
        MachineResult {
            measurements,
            completed_by_user_id: user_id.into(),
            completed_at: Some(at),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

/// Why and by whom a record was put on hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldState {
    pub reason: String,
    pub held_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub held_at: OffsetDateTime,
}

/// A product batch under test.
///
/// `status` and `stage` are never set directly. Every mutator recomputes
/// them before returning, and deserialization recomputes them from the
/// stored result blocks, ignoring whatever status the input carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredTestRecord")]
pub struct TestRecord {
    reference_no: String,
    pub product_name: String,
    pub batch_no: String,
    g1_result: Option<MachineResult>,
    g2_result: Option<MachineResult>,
    g3_result: Option<MachineResult>,
    hold: Option<HoldState>,
    status: WorkflowStatus,
    stage: Stage,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTestRecord {
    reference_no: String,
    #[serde(default)]
    product_name: String,
    #[serde(default)]
    batch_no: String,
    #[serde(default)]
    g1_result: Option<MachineResult>,
    #[serde(default)]
    g2_result: Option<MachineResult>,
    #[serde(default)]
    g3_result: Option<MachineResult>,
    #[serde(default)]
    hold: Option<HoldState>,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl From<StoredTestRecord> for TestRecord {
    fn from(stored: StoredTestRecord) -> Self {
        let mut record = TestRecord {
            reference_no: stored.reference_no,
            product_name: stored.product_name,
            batch_no: stored.batch_no,
            g1_result: stored.g1_result,
            g2_result: stored.g2_result,
            g3_result: stored.g3_result,
            hold: stored.hold,
            status: WorkflowStatus::PendingG1,
            stage: Stage::G1,
            created_at: stored.created_at,
        };
        record.refresh();
        record
    }
}

impl TestRecord {
    pub fn new(
        reference_no: impl Into<String>,
        product_name: impl Into<String>,
        batch_no: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Result<Self, RecordError> {
        let reference_no = reference_no.into();
        if reference_no.trim().is_empty() {
            return Err(RecordError::EmptyReference);
        }
        Ok(StoredTestRecord {
            reference_no,
            product_name: product_name.into(),
            batch_no: batch_no.into(),
            g1_result: None,
            g2_result: None,
            g3_result: None,
            hold: None,
            created_at,
        }
        .into())
    }

    pub fn reference_no(&self) -> &str {
        &self.reference_no
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn hold(&self) -> Option<&HoldState> {
        self.hold.as_ref()
    }

    pub fn is_on_hold(&self) -> bool {
        self.hold.is_some()
    }

    pub fn result(&self, machine: Machine) -> Option<&MachineResult> {
        match machine {
            Machine::G1 => self.g1_result.as_ref(),
            Machine::G2 => self.g2_result.as_ref(),
            Machine::G3 => self.g3_result.as_ref(),
        }
    }

    /// True when `machine` has a result with a completion timestamp.
    pub fn has_result(&self, machine: Machine) -> bool {
        self.result(machine).is_some_and(MachineResult::is_complete)
    }

    /// Resolve status from the current result blocks and hold flag.
    pub fn resolve(&self) -> StatusResolution {
        resolve_status(
            self.has_result(Machine::G1),
            self.has_result(Machine::G2),
            self.has_result(Machine::G3),
            self.is_on_hold(),
        )
    }

    /// Store a station's result and recompute status in one step.
    ///
    /// Replacing an existing result never regresses status.
    pub fn record_result(&mut self, machine: Machine, result: MachineResult) -> StatusResolution {
        let slot = match machine {
            Machine::G1 => &mut self.g1_result,
            Machine::G2 => &mut self.g2_result,
            Machine::G3 => &mut self.g3_result,
        };
        *slot = Some(result);
        self.refresh()
    }

    pub fn place_on_hold(
        &mut self,
        reason: impl Into<String>,
        held_by: impl Into<String>,
        held_at: OffsetDateTime,
    ) -> StatusResolution {
        self.hold = Some(HoldState {
            reason: reason.into(),
            held_by: held_by.into(),
            held_at,
        });
        self.refresh()
    }

    pub fn release_hold(&mut self) -> StatusResolution {
        self.hold = None;
        self.refresh()
    }

    /// Change the reference number. Only privileged callers may do this.
    pub fn reassign_reference(
        &mut self,
        new_reference: impl Into<String>,
        privileged: bool,
    ) -> Result<(), RecordError> {
        if !privileged {
            return Err(RecordError::ReferenceImmutable {
                reference_no: self.reference_no.clone(),
            });
        }
        let new_reference = new_reference.into();
        if new_reference.trim().is_empty() {
            return Err(RecordError::EmptyReference);
        }
        self.reference_no = new_reference;
        Ok(())
    }

    fn refresh(&mut self) -> StatusResolution {
        let resolution = self.resolve();
        self.status = resolution.status;
        self.stage = resolution.stage;
        resolution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record() -> TestRecord {
        TestRecord::new("REF-001", "EPDM 70", "B-42", datetime!(2025-03-01 08:00 UTC)).unwrap()
    }

    fn done(user: &str) -> MachineResult {
        let mut m = BTreeMap::new();
        m.insert("hardness".to_string(), 70.5);
        MachineResult::completed(user, datetime!(2025-03-01 09:00 UTC), m)
    }

    #[test]
    fn progresses_through_all_stations() {
        let mut r = record();
        assert_eq!(r.status(), WorkflowStatus::PendingG1);

        assert_eq!(r.record_result(Machine::G1, done("op-1")).status, WorkflowStatus::PendingG2);
        assert_eq!(r.record_result(Machine::G2, done("op-2")).status, WorkflowStatus::PendingG3);
        let last = r.record_result(Machine::G3, done("op-3"));
        assert_eq!(last.status, WorkflowStatus::Completed);
        assert_eq!(r.stage(), Stage::Completed);

        // rewriting a completed station keeps the record completed
        assert_eq!(r.record_result(Machine::G1, done("op-9")).status, WorkflowStatus::Completed);
    }

    #[test]
    fn out_of_order_results_report_first_missing_station() {
        let mut r = record();
        assert_eq!(r.record_result(Machine::G3, done("op")).status, WorkflowStatus::PendingG1);
        assert_eq!(r.record_result(Machine::G1, done("op")).status, WorkflowStatus::PendingG2);
    }

    #[test]
    fn block_without_timestamp_is_not_a_result() {
        let mut r = record();
        let draft = MachineResult {
            measurements: BTreeMap::new(),
            completed_by_user_id: "op".to_string(),
            completed_at: None,
        };
        assert_eq!(r.record_result(Machine::G1, draft).status, WorkflowStatus::PendingG1);
        assert!(!r.has_result(Machine::G1));
    }

    #[test]
    fn hold_and_release() {
        let mut r = record();
        r.record_result(Machine::G1, done("op"));
        let held = r.place_on_hold("retest", "qa-lead", datetime!(2025-03-02 10:00 UTC));
        assert_eq!(held.status, WorkflowStatus::Hold);
        assert_eq!(r.hold().unwrap().reason, "retest");
        assert_eq!(r.release_hold().status, WorkflowStatus::PendingG2);
    }

    #[test]
    fn reference_is_immutable_without_privilege() {
        let mut r = record();
        assert!(matches!(
            r.reassign_reference("REF-002", false),
            Err(RecordError::ReferenceImmutable { .. })
        ));
        r.reassign_reference("REF-002", true).unwrap();
        assert_eq!(r.reference_no(), "REF-002");
        assert_eq!(r.reassign_reference("  ", true), Err(RecordError::EmptyReference));
    }

    #[test]
    fn deserialization_recomputes_status() {
        let json = serde_json::json!({
            "referenceNo": "REF-7",
            "status": "completed",
            "stage": "COMPLETED",
            "g1Result": {
                "completedByUserId": "op-1",
                "completedAt": "2025-03-01T09:00:00Z",
                "measurements": {"tensile": 12.0}
            },
            "createdAt": "2025-03-01T08:00:00Z"
        });
        let r: TestRecord = serde_json::from_value(json).unwrap();
        assert_eq!(r.status(), WorkflowStatus::PendingG2);

        let out = serde_json::to_value(&r).unwrap();
        assert_eq!(out["status"], "pending_g2");
        assert_eq!(out["stage"], "G2");
        assert_eq!(out["referenceNo"], "REF-7");
    }
}
