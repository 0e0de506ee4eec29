//! Per-user "my pending work" projection.
//!
//! A second axis of done-ness layered on top of canonical status: a
//! station result completed by someone else still counts as pending for
//! the viewing user. This never changes a record's status.

use crate::machine::Machine;
use crate::record::TestRecord;

/// True iff `user_id` can work `machine` and the record still needs that
/// user's result for it. Records on hold are never pending.
pub fn is_pending_for(record: &TestRecord, user_id: &str, machine: Machine, access: &[Machine]) -> bool {
    if record.is_on_hold() || !access.contains(&machine) {
        return false;
    }
    match record.result(machine) {
        Some(result) if result.is_complete() => result.completed_by_user_id != user_id,
        _ => true,
    }
}

/// Every station on `record` pending for `user_id`, in station order.
pub fn pending_machines_for(record: &TestRecord, user_id: &str, access: &[Machine]) -> Vec<Machine> {
    Machine::ALL
        .into_iter()
        .filter(|m| is_pending_for(record, user_id, *m, access))
        .collect()
}
