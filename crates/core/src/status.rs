//! Stage-completion resolution.
//!
//! A record's status depends only on which stations have a completed result
//! and on the hold flag. Stations may complete in any order; the pending
//! status names the first station (in G1, G2, G3 order) still missing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical workflow status of a test record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowStatus {
    #[serde(rename = "pending_g1")]
    PendingG1,
    #[serde(rename = "pending_g2")]
    PendingG2,
    #[serde(rename = "pending_g3")]
    PendingG3,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "hold")]
    Hold,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::PendingG1 => "pending_g1",
            WorkflowStatus::PendingG2 => "pending_g2",
            WorkflowStatus::PendingG3 => "pending_g3",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Hold => "hold",
        }
    }

    /// The display stage mirroring this status.
    pub fn stage(&self) -> Stage {
        match self {
            WorkflowStatus::PendingG1 => Stage::G1,
            WorkflowStatus::PendingG2 => Stage::G2,
            WorkflowStatus::PendingG3 => Stage::G3,
            WorkflowStatus::Completed => Stage::Completed,
            WorkflowStatus::Hold => Stage::Hold,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display label for a record's stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    G1,
    G2,
    G3,
    Completed,
    Hold,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::G1 => "G1",
            Stage::G2 => "G2",
            Stage::G3 => "G3",
            Stage::Completed => "COMPLETED",
            Stage::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of the resolver: the status and its stage label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResolution {
    pub status: WorkflowStatus,
    pub stage: Stage,
}

impl StatusResolution {
    fn of(status: WorkflowStatus) -> Self {
        StatusResolution {
            status,
            stage: status.stage(),
        }
    }
}

/// Resolve a record's status from result presence and the hold flag.
///
/// Hold short-circuits every other check.
pub fn resolve_status(has_g1: bool, has_g2: bool, has_g3: bool, on_hold: bool) -> StatusResolution {
    let status = if on_hold {
        WorkflowStatus::Hold
    } else if !has_g1 {
        WorkflowStatus::PendingG1
    } else if !has_g2 {
        WorkflowStatus::PendingG2
    } else if !has_g3 {
        WorkflowStatus::PendingG3
    } else {
        WorkflowStatus::Completed
    };
    StatusResolution::of(status)
}
