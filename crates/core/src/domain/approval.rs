use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quote::QuoteId;
use crate::domain::workflow::{ApprovalWorkflow, WorkflowId};
use crate::errors::ApprovalError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl std::fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Pending, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!((self, next), (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected))
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn step_status(&self) -> StepStatus {
        match self {
            Self::Approve => StepStatus::Approved,
            Self::Reject => StepStatus::Rejected,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotationApproval {
    pub id: ApprovalId,
    pub quote_id: QuoteId,
    pub workflow_id: WorkflowId,
    pub current_level: u32,
    pub status: ApprovalStatus,
    pub requested_by: String,
    pub requested_at: DateTime<Utc>,
    pub level_activated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub state_version: u32,
}

impl QuotationApproval {
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Moves to a terminal status; `completed_at` is stamped in the same call.
    pub fn transition_to(
        &mut self,
        next: ApprovalStatus,
        at: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if !self.status.can_transition_to(next) {
            return Err(ApprovalError::InvalidTransition { from: self.status, to: next });
        }

        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub approval_id: ApprovalId,
    pub level: u32,
    pub approver_user_id: String,
    pub status: StepStatus,
    pub comments: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub auto_resolved: bool,
}

/// An approval together with its steps and the workflow snapshot it runs
/// under. This is the unit of persistence and of serialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approval: QuotationApproval,
    pub workflow: ApprovalWorkflow,
    pub steps: Vec<ApprovalStep>,
}

impl ApprovalRecord {
    pub fn id(&self) -> &ApprovalId {
        &self.approval.id
    }

    pub fn steps_at(&self, level: u32) -> impl Iterator<Item = &ApprovalStep> {
        self.steps.iter().filter(move |step| step.level == level)
    }

    pub fn current_steps(&self) -> impl Iterator<Item = &ApprovalStep> {
        self.steps_at(self.approval.current_level)
    }

    pub fn pending_current_steps(&self) -> Vec<StepId> {
        self.current_steps()
            .filter(|step| step.status == StepStatus::Pending)
            .map(|step| step.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{ApprovalId, ApprovalStatus, QuotationApproval, StepStatus};
    use crate::domain::quote::QuoteId;
    use crate::domain::workflow::WorkflowId;
    use crate::errors::ApprovalError;

    fn approval(status: ApprovalStatus) -> QuotationApproval {
        let now = Utc::now();
        QuotationApproval {
            id: ApprovalId("APR-1".to_owned()),
            quote_id: QuoteId("Q-1".to_owned()),
            workflow_id: WorkflowId("wf-1".to_owned()),
            current_level: 1,
            status,
            requested_by: "u-sales-rep".to_owned(),
            requested_at: now,
            level_activated_at: now,
            completed_at: None,
            cancelled_by: None,
            state_version: 1,
        }
    }

    #[test]
    fn pending_moves_to_each_terminal_status_and_stamps_completion() {
        for terminal in [ApprovalStatus::Approved, ApprovalStatus::Rejected, ApprovalStatus::Cancelled]
        {
            let mut approval = approval(ApprovalStatus::Pending);
            let at = Utc::now();
            approval.transition_to(terminal, at).expect("pending -> terminal");

            assert_eq!(approval.status, terminal);
            assert_eq!(approval.completed_at, Some(at));
            assert!(!approval.is_open());
        }
    }

    #[test]
    fn terminal_statuses_never_transition_again() {
        let mut approval = approval(ApprovalStatus::Approved);
        let error = approval
            .transition_to(ApprovalStatus::Rejected, Utc::now())
            .expect_err("approved is terminal");

        assert_eq!(
            error,
            ApprovalError::InvalidTransition {
                from: ApprovalStatus::Approved,
                to: ApprovalStatus::Rejected
            }
        );
        assert_eq!(approval.completed_at, None);
    }

    #[test]
    fn step_statuses_only_leave_pending() {
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Approved));
        assert!(StepStatus::Pending.can_transition_to(StepStatus::Rejected));
        assert!(!StepStatus::Approved.can_transition_to(StepStatus::Rejected));
        assert!(!StepStatus::Rejected.can_transition_to(StepStatus::Pending));
    }

    #[test]
    fn status_storage_encoding_round_trips() {
        for status in [
            ApprovalStatus::Pending,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::Cancelled,
        ] {
            assert_eq!(ApprovalStatus::parse(status.as_str()), Some(status));
        }
        for status in [StepStatus::Pending, StepStatus::Approved, StepStatus::Rejected] {
            assert_eq!(StepStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ApprovalStatus::parse("escalated"), None);
    }
}
