use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalStatus, ApprovalStep, Decision, QuotationApproval, StepId,
    StepStatus,
};
use crate::domain::quote::QuoteId;
use crate::domain::workflow::{ApprovalLevel, ApprovalWorkflow};
use crate::errors::ApprovalError;
use crate::events::ApprovalEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelResolution {
    Pending,
    Approved,
    Rejected,
}

/// Resolves one level from the steps materialized for it.
///
/// With `require_all_approvers` a single rejection settles the level; without
/// it a single approval does, and the level is only rejected once every
/// approver has rejected.
pub fn resolve_level<'a, I>(level: &ApprovalLevel, steps: I) -> LevelResolution
where
    I: IntoIterator<Item = &'a ApprovalStep>,
{
    let mut total = 0usize;
    let mut approved = 0usize;
    let mut rejected = 0usize;
    for step in steps {
        total += 1;
        match step.status {
            StepStatus::Approved => approved += 1,
            StepStatus::Rejected => rejected += 1,
            StepStatus::Pending => {}
        }
    }

    if total == 0 {
        return LevelResolution::Pending;
    }

    if level.require_all_approvers {
        if rejected > 0 {
            LevelResolution::Rejected
        } else if approved == total {
            LevelResolution::Approved
        } else {
            LevelResolution::Pending
        }
    } else if approved > 0 {
        LevelResolution::Approved
    } else if rejected == total {
        LevelResolution::Rejected
    } else {
        LevelResolution::Pending
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub approval_id: ApprovalId,
    pub from_status: ApprovalStatus,
    pub to_status: ApprovalStatus,
    pub from_level: u32,
    pub to_level: u32,
    pub decided_step: Option<StepId>,
    pub events: Vec<ApprovalEvent>,
}

impl TransitionOutcome {
    pub fn level_resolved(&self) -> bool {
        self.from_level != self.to_level || self.from_status != self.to_status
    }
}

/// Pure transitions over an [`ApprovalRecord`]. Nothing here touches storage;
/// every successful mutation bumps `state_version` so the caller can persist
/// with an optimistic check against the version it loaded.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    pub fn open(
        &self,
        approval_id: ApprovalId,
        quote_id: QuoteId,
        workflow: &ApprovalWorkflow,
        requested_by: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        workflow.validate()?;
        let first = workflow.require_level(1)?;
        let steps = materialize_steps(&approval_id, first);

        Ok(ApprovalRecord {
            approval: QuotationApproval {
                id: approval_id,
                quote_id,
                workflow_id: workflow.id.clone(),
                current_level: 1,
                status: ApprovalStatus::Pending,
                requested_by: requested_by.to_owned(),
                requested_at: now,
                level_activated_at: now,
                completed_at: None,
                cancelled_by: None,
                state_version: 1,
            },
            workflow: workflow.clone(),
            steps,
        })
    }

    pub fn decide(
        &self,
        record: &mut ApprovalRecord,
        approver_user_id: &str,
        decision: Decision,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let current_level = record.approval.current_level;
        if record.approval.is_open() {
            let pending = record.steps.iter().position(|step| {
                step.level == current_level
                    && step.approver_user_id == approver_user_id
                    && step.status == StepStatus::Pending
            });
            if let Some(index) = pending {
                return self.apply(record, index, decision.step_status(), comments, false, now);
            }
        }

        let previous = record
            .steps
            .iter()
            .filter(|step| {
                step.approver_user_id == approver_user_id && step.status != StepStatus::Pending
            })
            .max_by_key(|step| step.level);
        if let Some(step) = previous {
            return Err(ApprovalError::AlreadyDecided {
                approval_id: record.approval.id.clone(),
                user_id: approver_user_id.to_owned(),
                level: step.level,
                status: step.status,
            });
        }

        if !record.approval.is_open() {
            return Err(ApprovalError::ApprovalNotOpen {
                approval_id: record.approval.id.clone(),
                status: record.approval.status,
            });
        }

        Err(ApprovalError::NotAnApprover {
            approval_id: record.approval.id.clone(),
            user_id: approver_user_id.to_owned(),
            level: current_level,
        })
    }

    /// Approves one pending step of the current level on behalf of the system.
    pub fn auto_approve(
        &self,
        record: &mut ApprovalRecord,
        step_id: &StepId,
        comment: String,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        if !record.approval.is_open() {
            return Err(ApprovalError::ApprovalNotOpen {
                approval_id: record.approval.id.clone(),
                status: record.approval.status,
            });
        }

        let current_level = record.approval.current_level;
        let index = record
            .steps
            .iter()
            .position(|step| {
                &step.id == step_id
                    && step.level == current_level
                    && step.status == StepStatus::Pending
            })
            .ok_or_else(|| ApprovalError::NotAnApprover {
                approval_id: record.approval.id.clone(),
                user_id: step_id.0.clone(),
                level: current_level,
            })?;

        self.apply(record, index, StepStatus::Approved, Some(comment), true, now)
    }

    pub fn cancel(
        &self,
        record: &mut ApprovalRecord,
        by_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let from_status = record.approval.status;
        if !record.approval.is_open() {
            return Err(ApprovalError::ApprovalNotOpen {
                approval_id: record.approval.id.clone(),
                status: from_status,
            });
        }

        record.approval.transition_to(ApprovalStatus::Cancelled, now)?;
        record.approval.cancelled_by = Some(by_user_id.to_owned());
        record.approval.state_version += 1;

        let level = record.approval.current_level;
        Ok(TransitionOutcome {
            approval_id: record.approval.id.clone(),
            from_status,
            to_status: record.approval.status,
            from_level: level,
            to_level: level,
            decided_step: None,
            events: vec![ApprovalEvent::ApprovalCompleted {
                approval_id: record.approval.id.clone(),
                status: ApprovalStatus::Cancelled,
            }],
        })
    }

    fn apply(
        &self,
        record: &mut ApprovalRecord,
        index: usize,
        status: StepStatus,
        comments: Option<String>,
        auto_resolved: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let from_status = record.approval.status;
        let from_level = record.approval.current_level;

        let step = &mut record.steps[index];
        step.status = status;
        step.comments = comments;
        step.decided_at = Some(now);
        step.auto_resolved = auto_resolved;
        let decided_step = step.id.clone();

        let events = self.settle(record, now)?;
        record.approval.state_version += 1;

        Ok(TransitionOutcome {
            approval_id: record.approval.id.clone(),
            from_status,
            to_status: record.approval.status,
            from_level,
            to_level: record.approval.current_level,
            decided_step: Some(decided_step),
            events,
        })
    }

    fn settle(
        &self,
        record: &mut ApprovalRecord,
        now: DateTime<Utc>,
    ) -> Result<Vec<ApprovalEvent>, ApprovalError> {
        let current = record.approval.current_level;
        let resolution = {
            let level = record.workflow.require_level(current)?;
            resolve_level(level, record.steps_at(current))
        };

        let approval_id = record.approval.id.clone();
        match resolution {
            LevelResolution::Pending => Ok(Vec::new()),
            LevelResolution::Rejected => {
                record.approval.transition_to(ApprovalStatus::Rejected, now)?;
                Ok(vec![ApprovalEvent::ApprovalCompleted {
                    approval_id,
                    status: ApprovalStatus::Rejected,
                }])
            }
            LevelResolution::Approved if current >= record.workflow.last_level() => {
                record.approval.transition_to(ApprovalStatus::Approved, now)?;
                Ok(vec![ApprovalEvent::ApprovalCompleted {
                    approval_id,
                    status: ApprovalStatus::Approved,
                }])
            }
            LevelResolution::Approved => {
                let next = current + 1;
                let steps = materialize_steps(&approval_id, record.workflow.require_level(next)?);
                record.steps.extend(steps);
                record.approval.current_level = next;
                record.approval.level_activated_at = now;
                Ok(vec![ApprovalEvent::LevelAdvanced { approval_id, new_level: next }])
            }
        }
    }
}

fn materialize_steps(approval_id: &ApprovalId, level: &ApprovalLevel) -> Vec<ApprovalStep> {
    level
        .approver_user_ids
        .iter()
        .filter(|user| !user.trim().is_empty())
        .map(|user| ApprovalStep {
            id: StepId(Uuid::new_v4().to_string()),
            approval_id: approval_id.clone(),
            level: level.level,
            approver_user_id: user.clone(),
            status: StepStatus::Pending,
            comments: None,
            decided_at: None,
            auto_resolved: false,
        })
        .collect()
}
