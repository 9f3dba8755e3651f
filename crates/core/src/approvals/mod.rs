pub mod conditions;
pub mod engine;
pub mod locks;
pub mod machine;
pub mod selector;
pub mod sweeper;

pub use conditions::ConditionEvaluator;
pub use engine::{ApprovalEngine, ApprovalEngineConfig, ReadyOutcome, SweepReport};
pub use machine::{resolve_level, ApprovalStateMachine, LevelResolution, TransitionOutcome};
pub use selector::WorkflowSelector;
pub use sweeper::{RecordSweep, TimeoutSweeper, DEFAULT_AUTO_APPROVAL_COMMENT};
