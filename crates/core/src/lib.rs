pub mod approvals;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod events;
pub mod store;

pub use approvals::{
    ApprovalEngine, ApprovalEngineConfig, ApprovalStateMachine, ConditionEvaluator, ReadyOutcome,
    SweepReport, TimeoutSweeper, TransitionOutcome, WorkflowSelector,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalStatus, ApprovalStep, Decision, QuotationApproval, StepId,
    StepStatus,
};
pub use domain::quote::{QuotationSnapshot, QuoteId};
pub use domain::workflow::{
    ApprovalCondition, ApprovalLevel, ApprovalWorkflow, ConditionOperator, WorkflowId,
};
pub use errors::{ApprovalError, ConfigurationError, InterfaceError};
pub use events::{ApprovalEvent, EventEnvelope, EventSink, InMemoryEventSink, TracingEventSink};
pub use store::{
    ApprovalStore, InMemoryApprovalStore, StaticWorkflowCatalog, StoreError, WorkflowCatalog,
};
