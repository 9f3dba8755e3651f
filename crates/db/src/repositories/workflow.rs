use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use tracing::warn;

use quoteflow_core::domain::workflow::{ApprovalWorkflow, WorkflowId};
use quoteflow_core::store::{StoreError, WorkflowCatalog};

use super::{format_timestamp, RepositoryError};
use crate::DbPool;

/// Workflow definitions stored as JSON documents, with `priority` and
/// `is_active` lifted into columns for ordering and filtering.
pub struct SqlWorkflowCatalog {
    pool: DbPool,
}

impl SqlWorkflowCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, workflow: &ApprovalWorkflow) -> Result<(), RepositoryError> {
        let definition = serde_json::to_string(workflow)
            .map_err(|error| RepositoryError::Decode(format!("encode workflow: {error}")))?;
        let now = format_timestamp(Utc::now());

        sqlx::query(
            "INSERT INTO approval_workflow (
                id, name, priority, is_active, definition_json, created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 priority = excluded.priority,
                 is_active = excluded.is_active,
                 definition_json = excluded.definition_json,
                 updated_at = excluded.updated_at",
        )
        .bind(&workflow.id.0)
        .bind(&workflow.name)
        .bind(i64::from(workflow.priority))
        .bind(workflow.is_active)
        .bind(definition)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<ApprovalWorkflow>, RepositoryError> {
        let row = sqlx::query("SELECT definition_json FROM approval_workflow WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let definition: String = row.try_get("definition_json")?;
            serde_json::from_str(&definition).map_err(|error| {
                RepositoryError::Decode(format!("invalid workflow `{}`: {error}", id.0))
            })
        })
        .transpose()
    }

    /// Active workflows ordered by priority. Rows whose definition no longer
    /// decodes are skipped so one bad row cannot block selection.
    pub async fn list_active(&self) -> Result<Vec<ApprovalWorkflow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, definition_json
             FROM approval_workflow
             WHERE is_active = 1
             ORDER BY priority DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let definition: String = row.try_get("definition_json")?;
            match serde_json::from_str::<ApprovalWorkflow>(&definition) {
                Ok(workflow) => workflows.push(workflow),
                Err(error) => warn!(
                    event_name = "approval.workflow.decode_failed",
                    workflow_id = %id,
                    error = %error,
                    "skipping workflow with unreadable definition"
                ),
            }
        }
        Ok(workflows)
    }
}

#[async_trait]
impl WorkflowCatalog for SqlWorkflowCatalog {
    async fn active_workflows(&self) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        Ok(self.list_active().await?)
    }
}
