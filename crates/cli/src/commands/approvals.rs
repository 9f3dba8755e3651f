use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context};
use quoteflow_core::{ApprovalId, Decision, QuotationSnapshot, ReadyOutcome};
use serde::Serialize;
use serde_json::{json, Value};

use crate::commands::runtime::{engine, execute, Failure};
use crate::commands::CommandResult;

/// Evaluates a quotation snapshot (a JSON object with a string `id`) against
/// the active workflows and opens an approval when one matches.
pub fn request(snapshot_path: &Path, requested_by: &str) -> CommandResult {
    let snapshot = match read_snapshot(snapshot_path) {
        Ok(snapshot) => snapshot,
        Err(error) => return CommandResult::failure("request", "input", format!("{error:#}"), 6),
    };

    execute("request", |config, pool| async move {
        let engine = engine(&config, &pool);
        let outcome = engine
            .on_quotation_ready_for_approval(&snapshot, requested_by)
            .await
            .map_err(|error| Failure::approval("request", error))?;

        Ok(match outcome {
            ReadyOutcome::NotRequired => CommandResult::success_with(
                "request",
                format!("no approval required for quotation `{}`", snapshot.id),
                Some(json!({ "outcome": "not_required", "quote_id": snapshot.id })),
            ),
            ReadyOutcome::Requested(record) => CommandResult::success_with(
                "request",
                format!(
                    "approval `{}` opened with workflow `{}`",
                    record.approval.id, record.approval.workflow_id
                ),
                Some(json!({ "outcome": "requested", "approval": record })),
            ),
        })
    })
}

pub fn decide(
    approval_id: &str,
    user_id: &str,
    decision: Decision,
    comment: Option<String>,
) -> CommandResult {
    let approval_id = ApprovalId(approval_id.to_owned());
    execute("decide", |config, pool| async move {
        let outcome = engine(&config, &pool)
            .on_approver_decision(&approval_id, user_id, decision, comment)
            .await
            .map_err(|error| Failure::approval("decide", error))?;

        Ok(CommandResult::success_with(
            "decide",
            format!("decision recorded; approval is {}", outcome.to_status),
            Some(transition_payload(&outcome)),
        ))
    })
}

pub fn cancel(approval_id: &str, user_id: &str) -> CommandResult {
    let approval_id = ApprovalId(approval_id.to_owned());
    execute("cancel", |config, pool| async move {
        let outcome = engine(&config, &pool)
            .cancel(&approval_id, user_id)
            .await
            .map_err(|error| Failure::approval("cancel", error))?;

        Ok(CommandResult::success_with(
            "cancel",
            format!("approval `{}` cancelled", outcome.approval_id),
            Some(transition_payload(&outcome)),
        ))
    })
}

/// The decision is already committed here, so an encoding failure is reported
/// inside the payload instead of failing the command.
fn transition_payload<T: Serialize>(outcome: &T) -> Value {
    serde_json::to_value(outcome)
        .unwrap_or_else(|error| json!({ "encode_error": error.to_string() }))
}

fn read_snapshot(path: &Path) -> anyhow::Result<QuotationSnapshot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read snapshot file `{}`", path.display()))?;
    let document: Value = serde_json::from_str(&raw)
        .with_context(|| format!("snapshot file `{}` is not valid JSON", path.display()))?;

    let id = document
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("snapshot `{}` needs a non-empty string `id`", path.display()))?
        .to_owned();

    Ok(QuotationSnapshot::from_document(id, document))
}
