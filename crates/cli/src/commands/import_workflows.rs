use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use quoteflow_core::ApprovalWorkflow;
use quoteflow_db::SqlWorkflowCatalog;
use serde_json::{json, Value};

use crate::commands::runtime::{execute, Failure};
use crate::commands::CommandResult;

const COMMAND: &str = "import-workflows";

/// Imports workflow definitions from a JSON file holding either an array of
/// workflows or an object with a `workflows` array. Every definition is
/// validated before any is written.
pub fn run(path: &Path) -> CommandResult {
    let workflows = match read_workflows(path) {
        Ok(workflows) => workflows,
        Err(error) => {
            return CommandResult::failure(COMMAND, "input", format!("{error:#}"), 6);
        }
    };

    if let Some((workflow, error)) = workflows
        .iter()
        .find_map(|workflow| workflow.validate().err().map(|error| (workflow, error)))
    {
        return CommandResult::failure(
            COMMAND,
            "configuration",
            format!("workflow `{}` is invalid: {error}", workflow.id),
            7,
        );
    }

    execute(COMMAND, |_config, pool| async move {
        let catalog = SqlWorkflowCatalog::new(pool);
        for workflow in &workflows {
            catalog.upsert(workflow).await.map_err(|error| Failure {
                error_class: "persistence",
                message: format!("could not store workflow `{}`: {error}", workflow.id),
                exit_code: 8,
            })?;
        }

        let ids: Vec<&str> = workflows.iter().map(|workflow| workflow.id.0.as_str()).collect();
        Ok(CommandResult::success_with(
            COMMAND,
            format!("imported {} workflow(s)", ids.len()),
            Some(json!({ "workflow_ids": ids })),
        ))
    })
}

fn read_workflows(path: &Path) -> anyhow::Result<Vec<ApprovalWorkflow>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read workflow file `{}`", path.display()))?;
    let document: Value = serde_json::from_str(&raw)
        .with_context(|| format!("workflow file `{}` is not valid JSON", path.display()))?;

    let entries = match document {
        Value::Array(entries) => Value::Array(entries),
        Value::Object(mut object) => match object.remove("workflows") {
            Some(entries @ Value::Array(_)) => entries,
            _ => bail!("expected a `workflows` array in `{}`", path.display()),
        },
        _ => bail!("expected a JSON array of workflows in `{}`", path.display()),
    };

    let workflows: Vec<ApprovalWorkflow> =
        serde_json::from_value(entries).context("workflow definitions do not match the schema")?;
    if workflows.is_empty() {
        bail!("no workflows found in `{}`", path.display());
    }
    Ok(workflows)
}
