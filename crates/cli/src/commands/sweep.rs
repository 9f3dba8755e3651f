use serde_json::json;

use crate::commands::runtime::{engine, execute, Failure};
use crate::commands::CommandResult;

/// Runs a single timeout sweep. Approvals that fail are reported in the
/// payload; the command itself only fails when open approvals cannot be read.
pub fn run() -> CommandResult {
    execute("sweep", |config, pool| async move {
        let report = engine(&config, &pool)
            .on_timeout_tick()
            .await
            .map_err(|error| Failure::approval("sweep", error))?;

        Ok(CommandResult::success_with(
            "sweep",
            format!("auto-approved {} step(s)", report.resolved_step_ids.len()),
            Some(json!(report)),
        ))
    })
}
