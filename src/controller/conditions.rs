//! Condition management helpers following Cluster API conventions
//!
//! Conditions are kept sorted with `Ready` first and the rest alphabetical,
//! so that status diffs stay stable between passes.

use chrono::Utc;

use crate::crd::{Condition, ConditionSeverity};

pub const CONDITION_TYPE_READY: &str = "Ready";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

/// Set a condition to `True`, clearing reason, severity and message
pub fn mark_true(conditions: &mut Vec<Condition>, type_: &str) {
    set(conditions, type_, CONDITION_STATUS_TRUE, None, "", "");
}

/// Set a condition to `False` with a reason, severity and message
pub fn mark_false(
    conditions: &mut Vec<Condition>,
    type_: &str,
    reason: &str,
    severity: ConditionSeverity,
    message: &str,
) {
    set(
        conditions,
        type_,
        CONDITION_STATUS_FALSE,
        Some(severity),
        reason,
        message,
    );
}

/// Find a condition by type
pub fn get<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check if a condition is true
pub fn is_true(conditions: &[Condition], type_: &str) -> bool {
    get(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

fn set(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    severity: Option<ConditionSeverity>,
    reason: &str,
    message: &str,
) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        // Transition time only moves when the status flips
        if existing.status != status {
            existing.last_transition_time = Utc::now().to_rfc3339();
        }
        existing.status = status.to_string();
        existing.severity = severity;
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            severity,
            last_transition_time: Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    conditions.sort_by(|a, b| {
        let a_ready = a.type_ == CONDITION_TYPE_READY;
        let b_ready = b.type_ == CONDITION_TYPE_READY;
        b_ready.cmp(&a_ready).then_with(|| a.type_.cmp(&b.type_))
    });
}
