use tracing::{debug, warn};

use crate::approvals::conditions::ConditionEvaluator;
use crate::domain::quote::QuotationSnapshot;
use crate::domain::workflow::ApprovalWorkflow;

/// Picks the workflow that governs a quotation.
///
/// Only active, structurally valid workflows whose conditions all hold are
/// candidates. Among candidates the highest `priority` wins and ties go to
/// the lexicographically smallest id, so the choice never depends on the
/// order the catalog returned them in.
#[derive(Clone, Copy, Debug, Default)]
pub struct WorkflowSelector {
    evaluator: ConditionEvaluator,
}

impl WorkflowSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<'a>(
        &self,
        snapshot: &QuotationSnapshot,
        workflows: &'a [ApprovalWorkflow],
    ) -> Option<&'a ApprovalWorkflow> {
        let selected = self.matching(snapshot, workflows).into_iter().next();
        debug!(
            event_name = "approval.workflow.selected",
            quote_id = %snapshot.id,
            candidates = workflows.len(),
            workflow_id = selected.map(|workflow| workflow.id.0.as_str()).unwrap_or("none"),
            "workflow selection finished"
        );
        selected
    }

    /// Every matching workflow, best first.
    pub fn matching<'a>(
        &self,
        snapshot: &QuotationSnapshot,
        workflows: &'a [ApprovalWorkflow],
    ) -> Vec<&'a ApprovalWorkflow> {
        let mut matches: Vec<&ApprovalWorkflow> = workflows
            .iter()
            .filter(|workflow| workflow.is_active)
            .filter(|workflow| match workflow.validate() {
                Ok(()) => true,
                Err(error) => {
                    warn!(
                        event_name = "approval.workflow.invalid",
                        workflow_id = %workflow.id,
                        error = %error,
                        "skipping invalid workflow definition"
                    );
                    false
                }
            })
            .filter(|workflow| self.evaluator.matches_all(&workflow.conditions, snapshot))
            .collect();

        matches.sort_by(|left, right| {
            right.priority.cmp(&left.priority).then_with(|| left.id.cmp(&right.id))
        });
        matches
    }
}
