use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::approval::{ApprovalId, ApprovalStatus, StepStatus};
use crate::domain::quote::QuoteId;
use crate::domain::workflow::WorkflowId;

/// A corrupt or structurally invalid workflow definition.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("unknown condition operator `{operator}` on field `{field}`")]
    UnknownOperator { field: String, operator: String },
    #[error("operator `{operator}` on field `{field}` requires an array value")]
    SetValueRequired { field: String, operator: String },
    #[error("condition field must not be empty")]
    EmptyConditionField,
    #[error("workflow id must not be empty")]
    EmptyWorkflowId,
    #[error("workflow `{workflow_id}` defines no approval levels")]
    NoLevels { workflow_id: WorkflowId },
    #[error("workflow `{workflow_id}` levels must be contiguous from 1: expected level {expected}, found {found}")]
    NonContiguousLevels { workflow_id: WorkflowId, expected: u32, found: u32 },
    #[error("workflow `{workflow_id}` level {level} has no approvers")]
    NoApprovers { workflow_id: WorkflowId, level: u32 },
    #[error("workflow `{workflow_id}` level {level} auto-approval timeout must be positive")]
    NonPositiveTimeout { workflow_id: WorkflowId, level: u32 },
    #[error("workflow `{workflow_id}` level {level} auto-approval timeout of {hours}h is out of range")]
    TimeoutOutOfRange { workflow_id: WorkflowId, level: u32, hours: Decimal },
    #[error("workflow `{workflow_id}` has no level {level}")]
    MissingLevel { workflow_id: WorkflowId, level: u32 },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("quotation `{quote_id}` already has an open approval")]
    DuplicateApproval { quote_id: QuoteId, existing: Option<ApprovalId> },
    #[error("user `{user_id}` has no pending step at level {level} of approval `{approval_id}`")]
    NotAnApprover { approval_id: ApprovalId, user_id: String, level: u32 },
    #[error("user `{user_id}` already decided level {level} of approval `{approval_id}` ({status})")]
    AlreadyDecided { approval_id: ApprovalId, user_id: String, level: u32, status: StepStatus },
    #[error("approval `{approval_id}` is not open (status {status})")]
    ApprovalNotOpen { approval_id: ApprovalId, status: ApprovalStatus },
    #[error("approval `{approval_id}` was modified concurrently (expected version {expected_version})")]
    PersistenceConflict { approval_id: ApprovalId, expected_version: u32 },
    #[error("invalid approval transition from {from} to {to}")]
    InvalidTransition { from: ApprovalStatus, to: ApprovalStatus },
    #[error("approval `{0}` not found")]
    NotFound(ApprovalId),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl ApprovalError {
    /// Stable machine-readable class used in operator output.
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::DuplicateApproval { .. } => "duplicate_approval",
            Self::NotAnApprover { .. } => "not_an_approver",
            Self::AlreadyDecided { .. } => "already_decided",
            Self::ApprovalNotOpen { .. } => "approval_not_open",
            Self::PersistenceConflict { .. } => "persistence_conflict",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotFound(_) => "not_found",
            Self::Persistence(_) => "persistence",
        }
    }

    /// Only a lost optimistic-lock race may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceConflict { .. } | Self::Persistence(_))
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The approval was changed by someone else or storage is busy. Please retry."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl From<ApprovalError> for InterfaceError {
    fn from(value: ApprovalError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value {
            ApprovalError::DuplicateApproval { .. }
            | ApprovalError::NotAnApprover { .. }
            | ApprovalError::AlreadyDecided { .. }
            | ApprovalError::ApprovalNotOpen { .. }
            | ApprovalError::InvalidTransition { .. }
            | ApprovalError::NotFound(_) => Self::BadRequest { message, correlation_id },
            ApprovalError::PersistenceConflict { .. } | ApprovalError::Persistence(_) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApprovalError::Configuration(_) => Self::Internal { message, correlation_id },
        }
    }
}
