use chrono::{DateTime, Utc};

use crate::approvals::machine::ApprovalStateMachine;
use crate::domain::approval::{ApprovalRecord, StepId};
use crate::errors::ApprovalError;
use crate::events::ApprovalEvent;

pub const DEFAULT_AUTO_APPROVAL_COMMENT: &str = "auto-approved after {hours}h without decision";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordSweep {
    pub resolved_step_ids: Vec<StepId>,
    pub events: Vec<ApprovalEvent>,
}

/// Auto-approves steps whose level has been waiting longer than its
/// configured timeout. Works on one record at a time; the caller owns locking
/// and persistence.
#[derive(Clone, Debug)]
pub struct TimeoutSweeper {
    machine: ApprovalStateMachine,
    comment_template: String,
}

impl Default for TimeoutSweeper {
    fn default() -> Self {
        Self::new(DEFAULT_AUTO_APPROVAL_COMMENT)
    }
}

impl TimeoutSweeper {
    pub fn new(comment_template: impl Into<String>) -> Self {
        Self { machine: ApprovalStateMachine, comment_template: comment_template.into() }
    }

    pub fn is_due(&self, record: &ApprovalRecord, now: DateTime<Utc>) -> bool {
        if !record.approval.is_open() {
            return false;
        }

        let Some(timeout) = record
            .workflow
            .level(record.approval.current_level)
            .and_then(|level| level.auto_approval_timeout())
        else {
            return false;
        };

        now - record.approval.level_activated_at >= timeout
            && !record.pending_current_steps().is_empty()
    }

    pub fn sweep_record(
        &self,
        record: &mut ApprovalRecord,
        now: DateTime<Utc>,
    ) -> Result<RecordSweep, ApprovalError> {
        let mut sweep = RecordSweep::default();
        if !self.is_due(record, now) {
            return Ok(sweep);
        }

        let comment = self.comment_for(record);
        for step_id in record.pending_current_steps() {
            let outcome = self.machine.auto_approve(record, &step_id, comment.clone(), now)?;
            sweep.resolved_step_ids.push(step_id);
            sweep.events.extend(outcome.events.iter().cloned());
            if outcome.level_resolved() {
                break;
            }
        }

        Ok(sweep)
    }

    fn comment_for(&self, record: &ApprovalRecord) -> String {
        let hours = record
            .workflow
            .level(record.approval.current_level)
            .and_then(|level| level.auto_approval_timeout_hours)
            .map(|hours| hours.normalize().to_string())
            .unwrap_or_default();
        self.comment_template.replace("{hours}", &hours)
    }
}
