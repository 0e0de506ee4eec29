//! coa-core: domain model for certificate-of-analysis management.
//!
//! Test records collect measurements from three machine stations (G1, G2,
//! G3). A record's workflow status is always derived from which stations
//! have completed results, and whether the record is on hold. Completed
//! records aggregate into [`Certificate`]s that go through approval.
//!
//! # Public API
//!
//! - [`TestRecord`] -- a batch under test; the only way to write a machine
//!   result is [`TestRecord::record_result`], which recomputes status in the
//!   same call
//! - [`resolve_status()`] -- the stage-completion resolver
//! - [`is_pending_for()`] / [`pending_machines_for()`] -- per-user pending view
//! - [`Certificate`] -- certificate record and its approval fields

pub mod certificate;
pub mod error;
pub mod machine;
pub mod pending;
pub mod record;
pub mod status;

pub use certificate::{Certificate, CertificateStatus, Decision, DecisionChannel, Outcome};
pub use error::{CertificateError, RecordError};
pub use machine::Machine;
pub use pending::{is_pending_for, pending_machines_for};
pub use record::{HoldState, MachineResult, TestRecord};
pub use status::{resolve_status, Stage, StatusResolution, WorkflowStatus};

/// Actor name recorded on certificates decided through an emailed link.
pub const EMAIL_APPROVER: &str = "Email Approval";
