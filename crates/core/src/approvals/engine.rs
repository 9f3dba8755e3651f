use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::approvals::locks::{approval_key, quote_key, KeyedLocks};
use crate::approvals::machine::{ApprovalStateMachine, TransitionOutcome};
use crate::approvals::selector::WorkflowSelector;
use crate::approvals::sweeper::{TimeoutSweeper, DEFAULT_AUTO_APPROVAL_COMMENT};
use crate::clock::{Clock, SystemClock};
use crate::domain::approval::{ApprovalId, ApprovalRecord, Decision, QuotationApproval, StepId};
use crate::domain::quote::{QuotationSnapshot, QuoteId};
use crate::domain::workflow::ApprovalWorkflow;
use crate::errors::ApprovalError;
use crate::events::{ApprovalEvent, EventEnvelope, EventSink, TracingEventSink};
use crate::store::{ApprovalStore, WorkflowCatalog};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalEngineConfig {
    pub system_actor: String,
    pub auto_approval_comment: String,
}

impl Default for ApprovalEngineConfig {
    fn default() -> Self {
        Self {
            system_actor: "system".to_owned(),
            auto_approval_comment: DEFAULT_AUTO_APPROVAL_COMMENT.to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReadyOutcome {
    /// No active workflow matched; the quotation may proceed without approval.
    NotRequired,
    Requested(ApprovalRecord),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub resolved_step_ids: Vec<StepId>,
    pub conflicted_approval_ids: Vec<ApprovalId>,
    pub failed_approval_ids: Vec<ApprovalId>,
}

/// Facade over selection, the state machine and the timeout sweeper.
///
/// Every mutation runs under a per-key in-process lock and is persisted with
/// an optimistic `state_version` check, so two decisions on one approval can
/// never both apply. Events are published only after the write succeeded.
pub struct ApprovalEngine<S, C> {
    store: S,
    catalog: C,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    locks: KeyedLocks,
    selector: WorkflowSelector,
    machine: ApprovalStateMachine,
    sweeper: TimeoutSweeper,
    config: ApprovalEngineConfig,
}

impl<S, C> ApprovalEngine<S, C>
where
    S: ApprovalStore,
    C: WorkflowCatalog,
{
    pub fn new(store: S, catalog: C) -> Self {
        let config = ApprovalEngineConfig::default();
        Self {
            store,
            catalog,
            clock: Arc::new(SystemClock),
            events: Arc::new(TracingEventSink),
            locks: KeyedLocks::new(),
            selector: WorkflowSelector::new(),
            machine: ApprovalStateMachine,
            sweeper: TimeoutSweeper::new(config.auto_approval_comment.clone()),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_config(mut self, config: ApprovalEngineConfig) -> Self {
        self.sweeper = TimeoutSweeper::new(config.auto_approval_comment.clone());
        self.config = config;
        self
    }

    pub fn config(&self) -> &ApprovalEngineConfig {
        &self.config
    }

    pub async fn on_quotation_ready_for_approval(
        &self,
        snapshot: &QuotationSnapshot,
        requested_by: &str,
    ) -> Result<ReadyOutcome, ApprovalError> {
        let correlation_id = new_correlation_id();
        let workflows = self.catalog.active_workflows().await?;
        let Some(workflow) = self.selector.select(snapshot, &workflows) else {
            info!(
                event_name = "approval.request.not_required",
                correlation_id = %correlation_id,
                quote_id = %snapshot.id,
                "no workflow matched; approval not required"
            );
            return Ok(ReadyOutcome::NotRequired);
        };

        let record = self.open_approval(&snapshot.id, workflow, requested_by, &correlation_id).await?;
        Ok(ReadyOutcome::Requested(record))
    }

    pub async fn request_approval(
        &self,
        quote_id: &QuoteId,
        workflow: &ApprovalWorkflow,
        requested_by: &str,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let correlation_id = new_correlation_id();
        self.open_approval(quote_id, workflow, requested_by, &correlation_id).await
    }

    pub async fn on_approver_decision(
        &self,
        approval_id: &ApprovalId,
        approver_user_id: &str,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        self.process_decision(approval_id, approver_user_id, decision, comments).await
    }

    pub async fn process_decision(
        &self,
        approval_id: &ApprovalId,
        approver_user_id: &str,
        decision: Decision,
        comments: Option<String>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let correlation_id = new_correlation_id();
        let _guard = self.locks.acquire(approval_key(&approval_id.0)).await;

        let mut record = self.load(approval_id).await?;
        let expected_version = record.approval.state_version;
        let now = self.clock.now();

        let outcome =
            match self.machine.decide(&mut record, approver_user_id, decision, comments, now) {
                Ok(outcome) => outcome,
                Err(error) => {
                    info!(
                        event_name = "approval.decision.refused",
                        correlation_id = %correlation_id,
                        approval_id = %approval_id,
                        user_id = approver_user_id,
                        error_class = error.error_class(),
                        "decision refused"
                    );
                    return Err(error);
                }
            };

        self.persist(&record, expected_version, &correlation_id).await?;
        info!(
            event_name = "approval.decision.applied",
            correlation_id = %correlation_id,
            approval_id = %approval_id,
            quote_id = %record.approval.quote_id,
            user_id = approver_user_id,
            decision = ?decision,
            level = outcome.from_level,
            status = %outcome.to_status,
            "decision applied"
        );
        self.publish(&correlation_id, now, &outcome.events);
        Ok(outcome)
    }

    pub async fn cancel(
        &self,
        approval_id: &ApprovalId,
        by_user_id: &str,
    ) -> Result<TransitionOutcome, ApprovalError> {
        let correlation_id = new_correlation_id();
        let _guard = self.locks.acquire(approval_key(&approval_id.0)).await;

        let mut record = self.load(approval_id).await?;
        let expected_version = record.approval.state_version;
        let now = self.clock.now();
        let outcome = self.machine.cancel(&mut record, by_user_id, now)?;

        self.persist(&record, expected_version, &correlation_id).await?;
        info!(
            event_name = "approval.cancelled",
            correlation_id = %correlation_id,
            approval_id = %approval_id,
            quote_id = %record.approval.quote_id,
            user_id = by_user_id,
            "approval cancelled"
        );
        self.publish(&correlation_id, now, &outcome.events);
        Ok(outcome)
    }

    pub async fn on_timeout_tick(&self) -> Result<SweepReport, ApprovalError> {
        self.sweep(self.clock.now()).await
    }

    /// Auto-approves overdue steps across all open approvals. A failure on
    /// one approval is logged and reported; the others are still swept.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, ApprovalError> {
        let correlation_id = new_correlation_id();
        let mut report = SweepReport::default();

        for candidate in self.store.list_open().await? {
            if !self.sweeper.is_due(&candidate, now) {
                continue;
            }

            let approval_id = candidate.approval.id;
            match self.sweep_one(&approval_id, now, &correlation_id).await {
                Ok(resolved) => report.resolved_step_ids.extend(resolved),
                Err(error @ ApprovalError::PersistenceConflict { .. }) => {
                    warn!(
                        event_name = "approval.sweep.conflict",
                        correlation_id = %correlation_id,
                        approval_id = %approval_id,
                        error = %error,
                        "approval changed during sweep; retrying next tick"
                    );
                    report.conflicted_approval_ids.push(approval_id);
                }
                Err(error) => {
                    warn!(
                        event_name = "approval.sweep.failed",
                        correlation_id = %correlation_id,
                        approval_id = %approval_id,
                        error_class = error.error_class(),
                        error = %error,
                        "approval could not be swept"
                    );
                    report.failed_approval_ids.push(approval_id);
                }
            }
        }

        info!(
            event_name = "approval.sweep.completed",
            correlation_id = %correlation_id,
            resolved = report.resolved_step_ids.len(),
            conflicted = report.conflicted_approval_ids.len(),
            failed = report.failed_approval_ids.len(),
            system_actor = %self.config.system_actor,
            "timeout sweep finished"
        );
        Ok(report)
    }

    /// Read model: the most recent approval for the quotation, open or not.
    pub async fn approval_status(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<QuotationApproval>, ApprovalError> {
        Ok(self.store.latest_for_quote(quote_id).await?.map(|record| record.approval))
    }

    pub async fn approval(
        &self,
        approval_id: &ApprovalId,
    ) -> Result<Option<ApprovalRecord>, ApprovalError> {
        Ok(self.store.find_by_id(approval_id).await?)
    }

    async fn open_approval(
        &self,
        quote_id: &QuoteId,
        workflow: &ApprovalWorkflow,
        requested_by: &str,
        correlation_id: &str,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let _guard = self.locks.acquire(quote_key(&quote_id.0)).await;

        if let Some(existing) = self.store.find_open_for_quote(quote_id).await? {
            warn!(
                event_name = "approval.request.duplicate",
                correlation_id = %correlation_id,
                quote_id = %quote_id,
                approval_id = %existing.approval.id,
                "quotation already has an open approval"
            );
            return Err(ApprovalError::DuplicateApproval {
                quote_id: quote_id.clone(),
                existing: Some(existing.approval.id),
            });
        }

        let now = self.clock.now();
        let approval_id = ApprovalId(Uuid::new_v4().to_string());
        let record =
            self.machine.open(approval_id, quote_id.clone(), workflow, requested_by, now)?;
        self.store.insert(&record).await?;

        info!(
            event_name = "approval.requested",
            correlation_id = %correlation_id,
            approval_id = %record.approval.id,
            quote_id = %quote_id,
            workflow_id = %workflow.id,
            steps = record.steps.len(),
            "approval requested"
        );
        self.publish(
            correlation_id,
            now,
            &[ApprovalEvent::ApprovalRequested {
                approval_id: record.approval.id.clone(),
                quote_id: quote_id.clone(),
            }],
        );
        Ok(record)
    }

    async fn sweep_one(
        &self,
        approval_id: &ApprovalId,
        now: DateTime<Utc>,
        correlation_id: &str,
    ) -> Result<Vec<StepId>, ApprovalError> {
        let _guard = self.locks.acquire(approval_key(&approval_id.0)).await;

        let mut record = self.load(approval_id).await?;
        let expected_version = record.approval.state_version;
        let sweep = self.sweeper.sweep_record(&mut record, now)?;
        if sweep.resolved_step_ids.is_empty() {
            return Ok(Vec::new());
        }

        self.persist(&record, expected_version, correlation_id).await?;
        info!(
            event_name = "approval.sweep.auto_approved",
            correlation_id = %correlation_id,
            approval_id = %approval_id,
            quote_id = %record.approval.quote_id,
            steps = sweep.resolved_step_ids.len(),
            status = %record.approval.status,
            "overdue steps auto-approved"
        );
        self.publish(correlation_id, now, &sweep.events);
        Ok(sweep.resolved_step_ids)
    }

    async fn load(&self, approval_id: &ApprovalId) -> Result<ApprovalRecord, ApprovalError> {
        self.store
            .find_by_id(approval_id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound(approval_id.clone()))
    }

    async fn persist(
        &self,
        record: &ApprovalRecord,
        expected_version: u32,
        correlation_id: &str,
    ) -> Result<(), ApprovalError> {
        self.store.update(record, expected_version).await.map_err(|error| {
            let error = ApprovalError::from(error);
            warn!(
                event_name = "approval.persist.failed",
                correlation_id = %correlation_id,
                approval_id = %record.approval.id,
                expected_version,
                error_class = error.error_class(),
                error = %error,
                "approval write rejected"
            );
            error
        })
    }

    fn publish(&self, correlation_id: &str, at: DateTime<Utc>, events: &[ApprovalEvent]) {
        for event in events {
            self.events.publish(EventEnvelope::new(correlation_id, at, event.clone()));
        }
    }
}

fn new_correlation_id() -> String {
    format!("req-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{ApprovalEngine, ApprovalEngineConfig, ReadyOutcome};
    use crate::clock::ManualClock;
    use crate::domain::approval::{
        ApprovalId, ApprovalRecord, ApprovalStatus, Decision, StepStatus,
    };
    use crate::domain::quote::{QuotationSnapshot, QuoteId};
    use crate::domain::workflow::{
        ApprovalCondition, ApprovalLevel, ApprovalWorkflow, ConditionOperator,
    };
    use crate::errors::ApprovalError;
    use crate::events::{ApprovalEvent, InMemoryEventSink};
    use crate::store::{
        ApprovalStore, InMemoryApprovalStore, StaticWorkflowCatalog, StoreError,
    };

    type Engine = ApprovalEngine<Arc<InMemoryApprovalStore>, StaticWorkflowCatalog>;

    struct Harness {
        engine: Engine,
        store: Arc<InMemoryApprovalStore>,
        clock: Arc<ManualClock>,
        events: Arc<InMemoryEventSink>,
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp")
    }

    fn large_order_workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            "wf-large-order",
            "Large order",
            vec![ApprovalCondition::new("totalAmount", ConditionOperator::Gte, 100000)],
            vec![ApprovalLevel::new(1, "Directors", ["u-dir-1", "u-dir-2"], true)],
            10,
        )
        .expect("valid workflow")
    }

    fn two_level_workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            "wf-dealer",
            "Dealer",
            vec![ApprovalCondition::new("customerType", ConditionOperator::Eq, "DEALER")],
            vec![
                ApprovalLevel::new(1, "Sales managers", ["u-sm-1", "u-sm-2"], false)
                    .with_timeout_hours(Decimal::from(24)),
                ApprovalLevel::new(2, "Finance", ["u-cfo"], true),
            ],
            20,
        )
        .expect("valid workflow")
    }

    fn harness(workflows: Vec<ApprovalWorkflow>) -> Harness {
        let store = Arc::new(InMemoryApprovalStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let events = Arc::new(InMemoryEventSink::default());
        let engine = ApprovalEngine::new(store.clone(), StaticWorkflowCatalog::new(workflows))
            .with_clock(clock.clone())
            .with_event_sink(events.clone());
        Harness { engine, store, clock, events }
    }

    fn quote(id: &str, total: i64, customer_type: &str) -> QuotationSnapshot {
        QuotationSnapshot::new(id)
            .with_field("totalAmount", total)
            .with_field("customerType", customer_type)
    }

    async fn request(harness: &Harness, snapshot: &QuotationSnapshot) -> ApprovalRecord {
        match harness
            .engine
            .on_quotation_ready_for_approval(snapshot, "u-sales-rep")
            .await
            .expect("request")
        {
            ReadyOutcome::Requested(record) => record,
            ReadyOutcome::NotRequired => panic!("approval should be required"),
        }
    }

    #[tokio::test]
    async fn large_order_approved_by_both_directors() {
        let harness = harness(vec![large_order_workflow()]);
        let record = request(&harness, &quote("Q-A", 150000, "RETAIL")).await;
        assert_eq!(record.approval.workflow_id.0, "wf-large-order");
        assert_eq!(record.steps.len(), 2);

        let first = harness
            .engine
            .on_approver_decision(record.id(), "u-dir-1", Decision::Approve, None)
            .await
            .expect("first approval");
        assert_eq!(first.to_status, ApprovalStatus::Pending);

        let second = harness
            .engine
            .on_approver_decision(record.id(), "u-dir-2", Decision::Approve, None)
            .await
            .expect("second approval");
        assert_eq!(second.to_status, ApprovalStatus::Approved);

        let status = harness
            .engine
            .approval_status(&QuoteId("Q-A".to_owned()))
            .await
            .expect("status")
            .expect("approval exists");
        assert_eq!(status.status, ApprovalStatus::Approved);
        assert_eq!(status.completed_at, Some(start()));

        let events = harness.events.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], ApprovalEvent::ApprovalRequested { .. }));
        assert!(matches!(
            events[1],
            ApprovalEvent::ApprovalCompleted { status: ApprovalStatus::Approved, .. }
        ));
    }

    #[tokio::test]
    async fn one_rejection_closes_all_of_level() {
        let harness = harness(vec![large_order_workflow()]);
        let record = request(&harness, &quote("Q-B", 150000, "RETAIL")).await;

        let outcome = harness
            .engine
            .process_decision(record.id(), "u-dir-2", Decision::Reject, Some("margin".to_owned()))
            .await
            .expect("rejection");
        assert_eq!(outcome.to_status, ApprovalStatus::Rejected);

        let stored = harness
            .engine
            .approval(record.id())
            .await
            .expect("load")
            .expect("approval exists");
        let untouched = stored
            .steps
            .iter()
            .find(|step| step.approver_user_id == "u-dir-1")
            .expect("other director");
        assert_eq!(untouched.status, StepStatus::Pending);

        let late = harness
            .engine
            .process_decision(record.id(), "u-dir-1", Decision::Approve, None)
            .await
            .expect_err("approval is closed");
        assert!(matches!(late, ApprovalError::ApprovalNotOpen { .. }));
    }

    #[tokio::test]
    async fn any_of_first_level_advances_to_finance() {
        let harness = harness(vec![large_order_workflow(), two_level_workflow()]);
        let record = request(&harness, &quote("Q-C", 150000, "DEALER")).await;
        assert_eq!(record.approval.workflow_id.0, "wf-dealer");

        let outcome = harness
            .engine
            .process_decision(record.id(), "u-sm-1", Decision::Approve, None)
            .await
            .expect("approval");
        assert_eq!(outcome.to_level, 2);

        let stored = harness.engine.approval(record.id()).await.expect("load").expect("exists");
        assert_eq!(stored.approval.current_level, 2);
        assert_eq!(stored.steps_at(2).count(), 1);

        let late = harness
            .engine
            .process_decision(record.id(), "u-sm-2", Decision::Approve, None)
            .await
            .expect_err("level 1 is settled");
        assert!(matches!(late, ApprovalError::NotAnApprover { level: 2, .. }));

        let events = harness.events.events();
        assert!(events.contains(&ApprovalEvent::LevelAdvanced {
            approval_id: record.id().clone(),
            new_level: 2
        }));
    }

    #[tokio::test]
    async fn timeout_tick_auto_approves_after_twenty_five_hours() {
        let harness = harness(vec![two_level_workflow()]);
        let record = request(&harness, &quote("Q-D", 20000, "DEALER")).await;

        harness.clock.advance(Duration::hours(23));
        let early = harness.engine.on_timeout_tick().await.expect("early tick");
        assert!(early.resolved_step_ids.is_empty());

        harness.clock.advance(Duration::hours(2));
        let report = harness.engine.on_timeout_tick().await.expect("tick");
        assert_eq!(report.resolved_step_ids.len(), 1);
        assert!(report.conflicted_approval_ids.is_empty());

        let stored = harness.engine.approval(record.id()).await.expect("load").expect("exists");
        assert_eq!(stored.approval.current_level, 2);
        assert_eq!(stored.approval.level_activated_at, start() + Duration::hours(25));
        let auto = stored
            .steps_at(1)
            .find(|step| step.status == StepStatus::Approved)
            .expect("auto-approved step");
        assert!(auto.auto_resolved);
        assert_eq!(auto.comments.as_deref(), Some("auto-approved after 24h without decision"));

        let again = harness.engine.on_timeout_tick().await.expect("second tick");
        assert!(again.resolved_step_ids.is_empty());
        let unchanged =
            harness.engine.approval(record.id()).await.expect("load").expect("exists");
        assert_eq!(unchanged, stored);
    }

    #[tokio::test]
    async fn unmatched_quotation_needs_no_approval() {
        let harness = harness(vec![large_order_workflow()]);
        let outcome = harness
            .engine
            .on_quotation_ready_for_approval(&quote("Q-E", 50000, "RETAIL"), "u-sales-rep")
            .await
            .expect("evaluation");

        assert_eq!(outcome, ReadyOutcome::NotRequired);
        assert!(harness.store.list_open().await.expect("list").is_empty());
        assert!(harness.events.events().is_empty());
    }

    #[tokio::test]
    async fn second_request_for_open_quote_is_duplicate() {
        let harness = harness(vec![large_order_workflow()]);
        let first = request(&harness, &quote("Q-DUP", 150000, "RETAIL")).await;

        let error = harness
            .engine
            .on_quotation_ready_for_approval(&quote("Q-DUP", 150000, "RETAIL"), "u-sales-rep")
            .await
            .expect_err("duplicate");
        assert_eq!(
            error,
            ApprovalError::DuplicateApproval {
                quote_id: QuoteId("Q-DUP".to_owned()),
                existing: Some(first.id().clone()),
            }
        );

        harness.engine.cancel(first.id(), "u-sales-rep").await.expect("cancel");
        request(&harness, &quote("Q-DUP", 150000, "RETAIL")).await;
    }

    #[tokio::test]
    async fn replayed_decision_is_reported_as_already_decided() {
        let harness = harness(vec![large_order_workflow()]);
        let record = request(&harness, &quote("Q-R", 150000, "RETAIL")).await;
        harness
            .engine
            .process_decision(record.id(), "u-dir-1", Decision::Approve, None)
            .await
            .expect("approval");

        let error = harness
            .engine
            .process_decision(record.id(), "u-dir-1", Decision::Approve, None)
            .await
            .expect_err("replay");
        assert!(matches!(error, ApprovalError::AlreadyDecided { .. }));

        let stranger = harness
            .engine
            .process_decision(record.id(), "u-intern", Decision::Approve, None)
            .await
            .expect_err("stranger");
        assert!(matches!(stranger, ApprovalError::NotAnApprover { .. }));

        let missing = harness
            .engine
            .process_decision(&ApprovalId("APR-missing".to_owned()), "u-dir-1", Decision::Approve, None)
            .await
            .expect_err("missing");
        assert!(matches!(missing, ApprovalError::NotFound(_)));
    }

    #[tokio::test]
    async fn running_approval_keeps_its_workflow_snapshot() {
        let harness = harness(vec![large_order_workflow()]);
        let record = request(&harness, &quote("Q-S", 150000, "RETAIL")).await;

        let mut edited = large_order_workflow();
        edited.levels[0].approver_user_ids.insert("u-dir-3".to_owned());
        let other = ApprovalEngine::new(harness.store.clone(), StaticWorkflowCatalog::new(vec![edited]))
            .with_clock(harness.clock.clone());

        let error = other
            .process_decision(record.id(), "u-dir-3", Decision::Approve, None)
            .await
            .expect_err("u-dir-3 was not an approver when the request was made");
        assert!(matches!(error, ApprovalError::NotAnApprover { .. }));
    }

    #[tokio::test]
    async fn configured_comment_is_used_for_auto_approval() {
        let store = Arc::new(InMemoryApprovalStore::default());
        let clock = Arc::new(ManualClock::new(start()));
        let engine = ApprovalEngine::new(store, StaticWorkflowCatalog::new(vec![two_level_workflow()]))
            .with_clock(clock.clone())
            .with_config(ApprovalEngineConfig {
                system_actor: "svc-approvals".to_owned(),
                auto_approval_comment: "SLA of {hours}h expired".to_owned(),
            });
        let record = engine
            .request_approval(&QuoteId("Q-CFG".to_owned()), &two_level_workflow(), "u-sales-rep")
            .await
            .expect("request");

        clock.advance(Duration::hours(48));
        engine.on_timeout_tick().await.expect("tick");

        let stored = engine.approval(record.id()).await.expect("load").expect("exists");
        let auto = stored.steps_at(1).find(|step| step.auto_resolved).expect("auto step");
        assert_eq!(auto.comments.as_deref(), Some("SLA of 24h expired"));
        assert_eq!(engine.config().system_actor, "svc-approvals");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_open_exactly_one_approval() {
        let store = Arc::new(InMemoryApprovalStore::default());
        let shared = Arc::new(ApprovalEngine::new(
            store.clone(),
            StaticWorkflowCatalog::new(vec![large_order_workflow()]),
        ));
        let mut tasks = Vec::new();
        for attempt in 0..16 {
            // Odd callers get their own engine, so only the store guards them.
            let engine = if attempt % 2 == 0 {
                shared.clone()
            } else {
                Arc::new(ApprovalEngine::new(
                    store.clone(),
                    StaticWorkflowCatalog::new(vec![large_order_workflow()]),
                ))
            };
            tasks.push(tokio::spawn(async move {
                engine
                    .request_approval(
                        &QuoteId("Q-RACE".to_owned()),
                        &large_order_workflow(),
                        "u-sales-rep",
                    )
                    .await
            }));
        }

        let mut opened = 0;
        for task in tasks {
            match task.await.expect("task") {
                Ok(_) => opened += 1,
                Err(error) => assert!(matches!(error, ApprovalError::DuplicateApproval { .. })),
            }
        }

        assert_eq!(opened, 1);
        assert_eq!(store.list_open().await.expect("list").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_decisions_on_one_approval_apply_once_each() {
        let harness = harness(vec![large_order_workflow()]);
        let record = request(&harness, &quote("Q-PAR", 150000, "RETAIL")).await;
        let engine = Arc::new(harness.engine);

        let mut tasks = Vec::new();
        for user in ["u-dir-1", "u-dir-2", "u-dir-1", "u-dir-2"] {
            let engine = engine.clone();
            let approval_id = record.id().clone();
            tasks.push(tokio::spawn(async move {
                engine.process_decision(&approval_id, user, Decision::Approve, None).await
            }));
        }

        let mut applied = 0;
        for task in tasks {
            match task.await.expect("task") {
                Ok(_) => applied += 1,
                Err(error) => assert!(matches!(error, ApprovalError::AlreadyDecided { .. })),
            }
        }
        assert_eq!(applied, 2);

        let stored = engine.approval(record.id()).await.expect("load").expect("exists");
        assert_eq!(stored.approval.status, ApprovalStatus::Approved);
        assert_eq!(stored.approval.state_version, 3);
    }

    /// Simulates another process writing between our read and our write.
    struct RacingStore {
        inner: InMemoryApprovalStore,
    }

    #[async_trait]
    impl ApprovalStore for RacingStore {
        async fn insert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
            self.inner.insert(record).await
        }

        async fn update(
            &self,
            record: &ApprovalRecord,
            expected_version: u32,
        ) -> Result<(), StoreError> {
            self.inner.update(record, expected_version).await
        }

        async fn find_by_id(
            &self,
            id: &ApprovalId,
        ) -> Result<Option<ApprovalRecord>, StoreError> {
            let Some(record) = self.inner.find_by_id(id).await? else {
                return Ok(None);
            };
            let mut bumped = record.clone();
            bumped.approval.state_version += 1;
            self.inner.update(&bumped, record.approval.state_version).await?;
            Ok(Some(record))
        }

        async fn find_open_for_quote(
            &self,
            quote_id: &QuoteId,
        ) -> Result<Option<ApprovalRecord>, StoreError> {
            self.inner.find_open_for_quote(quote_id).await
        }

        async fn latest_for_quote(
            &self,
            quote_id: &QuoteId,
        ) -> Result<Option<ApprovalRecord>, StoreError> {
            self.inner.latest_for_quote(quote_id).await
        }

        async fn list_open(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
            self.inner.list_open().await
        }
    }

    #[tokio::test]
    async fn lost_write_race_surfaces_as_persistence_conflict_without_events() {
        let clock = Arc::new(ManualClock::new(start()));
        let events = Arc::new(InMemoryEventSink::default());
        let engine = ApprovalEngine::new(
            RacingStore { inner: InMemoryApprovalStore::default() },
            StaticWorkflowCatalog::new(vec![two_level_workflow()]),
        )
        .with_clock(clock.clone())
        .with_event_sink(events.clone());
        let record = engine
            .request_approval(&QuoteId("Q-RACE".to_owned()), &two_level_workflow(), "u-sales-rep")
            .await
            .expect("request");

        let error = engine
            .process_decision(record.id(), "u-sm-1", Decision::Approve, None)
            .await
            .expect_err("lost race");
        assert!(matches!(error, ApprovalError::PersistenceConflict { .. }));
        assert!(error.is_retryable());

        clock.advance(Duration::hours(30));
        let report = engine.on_timeout_tick().await.expect("sweep still completes");
        assert!(report.resolved_step_ids.is_empty());
        assert_eq!(report.conflicted_approval_ids, vec![record.id().clone()]);

        assert_eq!(events.events().len(), 1);
    }
}
