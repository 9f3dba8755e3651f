use quoteflow_core::QuoteId;
use serde_json::json;

use crate::commands::runtime::{engine, execute, Failure};
use crate::commands::CommandResult;

/// Shows the most recent approval for a quotation with its steps.
pub fn run(quote_id: &str) -> CommandResult {
    let quote_id = QuoteId(quote_id.to_owned());
    execute("status", |config, pool| async move {
        let engine = engine(&config, &pool);
        let Some(approval) = engine
            .approval_status(&quote_id)
            .await
            .map_err(|error| Failure::approval("status", error))?
        else {
            return Ok(CommandResult::success_with(
                "status",
                format!("no approval recorded for quotation `{quote_id}`"),
                Some(json!({ "quote_id": quote_id, "approval": null })),
            ));
        };

        let steps = engine
            .approval(&approval.id)
            .await
            .map_err(|error| Failure::approval("status", error))?
            .map(|record| record.steps)
            .unwrap_or_default();

        Ok(CommandResult::success_with(
            "status",
            format!(
                "approval `{}` is {} at level {}",
                approval.id, approval.status, approval.current_level
            ),
            Some(json!({ "quote_id": quote_id, "approval": approval, "steps": steps })),
        ))
    })
}
