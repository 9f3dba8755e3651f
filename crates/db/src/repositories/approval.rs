use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row, Sqlite, Transaction};

use quoteflow_core::domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalStatus, ApprovalStep, QuotationApproval, StepId,
    StepStatus,
};
use quoteflow_core::domain::quote::QuoteId;
use quoteflow_core::domain::workflow::{ApprovalWorkflow, WorkflowId};
use quoteflow_core::store::{ApprovalStore, StoreError};

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, RepositoryError,
};
use crate::DbPool;

const APPROVAL_COLUMNS: &str = "id, quote_id, workflow_id, workflow_snapshot_json, current_level,
    status, requested_by, requested_at, level_activated_at, completed_at, cancelled_by,
    state_version";

pub struct SqlApprovalStore {
    pool: DbPool,
}

impl SqlApprovalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_steps(&self, approval_id: &str) -> Result<Vec<ApprovalStep>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, approval_id, level, approver_user_id, status, comments, decided_at,
                    auto_resolved
             FROM approval_step
             WHERE approval_id = ?
             ORDER BY seq ASC",
        )
        .bind(approval_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(step_from_row).collect()
    }

    async fn hydrate(&self, row: SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
        let (approval, workflow) = approval_from_row(&row)?;
        let steps = self.load_steps(&approval.id.0).await?;
        Ok(ApprovalRecord { approval, workflow, steps })
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let sql = format!("SELECT {APPROVAL_COLUMNS} FROM quotation_approval WHERE {clause}");
        let row = sqlx::query(&sql).bind(value).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn insert_record(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        let approval = &record.approval;
        let snapshot = serde_json::to_string(&record.workflow)
            .map_err(|error| StoreError::Backend(format!("encode workflow snapshot: {error}")))?;

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;
        let inserted = sqlx::query(
            "INSERT INTO quotation_approval (
                id, quote_id, workflow_id, workflow_snapshot_json, current_level, status,
                requested_by, requested_at, level_activated_at, completed_at, cancelled_by,
                state_version
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(&approval.quote_id.0)
        .bind(&approval.workflow_id.0)
        .bind(snapshot)
        .bind(i64::from(approval.current_level))
        .bind(approval.status.as_str())
        .bind(&approval.requested_by)
        .bind(format_timestamp(approval.requested_at))
        .bind(format_timestamp(approval.level_activated_at))
        .bind(approval.completed_at.map(format_timestamp))
        .bind(&approval.cancelled_by)
        .bind(i64::from(approval.state_version))
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            if is_open_quote_violation(&error) {
                return Err(StoreError::DuplicateOpenApproval {
                    quote_id: approval.quote_id.clone(),
                });
            }
            return Err(RepositoryError::from(error).into());
        }

        upsert_steps(&mut tx, record).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn update_record(
        &self,
        record: &ApprovalRecord,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let approval = &record.approval;
        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let updated = sqlx::query(
            "UPDATE quotation_approval
             SET current_level = ?,
                 status = ?,
                 level_activated_at = ?,
                 completed_at = ?,
                 cancelled_by = ?,
                 state_version = ?
             WHERE id = ? AND state_version = ?",
        )
        .bind(i64::from(approval.current_level))
        .bind(approval.status.as_str())
        .bind(format_timestamp(approval.level_activated_at))
        .bind(approval.completed_at.map(format_timestamp))
        .bind(&approval.cancelled_by)
        .bind(i64::from(approval.state_version))
        .bind(&approval.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await
        .map_err(RepositoryError::from)?;

        if updated.rows_affected() == 0 {
            let current: Option<i64> =
                sqlx::query_scalar("SELECT state_version FROM quotation_approval WHERE id = ?")
                    .bind(&approval.id.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(RepositoryError::from)?;
            return Err(match current {
                None => StoreError::Missing(approval.id.clone()),
                Some(actual) => StoreError::VersionConflict {
                    approval_id: approval.id.clone(),
                    expected: expected_version,
                    actual: u32::try_from(actual).ok(),
                },
            });
        }

        upsert_steps(&mut tx, record).await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}

#[async_trait]
impl ApprovalStore for SqlApprovalStore {
    async fn insert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        self.insert_record(record).await
    }

    async fn update(
        &self,
        record: &ApprovalRecord,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        self.update_record(record, expected_version).await
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError> {
        Ok(self.fetch_one_where("id = ?", &id.0).await?)
    }

    async fn find_open_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        Ok(self.fetch_one_where("quote_id = ? AND status = 'pending' LIMIT 1", &quote_id.0).await?)
    }

    async fn latest_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        Ok(self
            .fetch_one_where("quote_id = ? ORDER BY requested_at DESC, id DESC LIMIT 1", &quote_id.0)
            .await?)
    }

    async fn list_open(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
        let sql = format!(
            "SELECT {APPROVAL_COLUMNS} FROM quotation_approval
             WHERE status = 'pending'
             ORDER BY requested_at ASC, id ASC"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await.map_err(RepositoryError::from)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(self.hydrate(row).await?);
        }
        Ok(records)
    }
}

async fn upsert_steps(
    tx: &mut Transaction<'_, Sqlite>,
    record: &ApprovalRecord,
) -> Result<(), RepositoryError> {
    for (seq, step) in record.steps.iter().enumerate() {
        sqlx::query(
            "INSERT INTO approval_step (
                id, approval_id, seq, level, approver_user_id, status, comments, decided_at,
                auto_resolved
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 comments = excluded.comments,
                 decided_at = excluded.decided_at,
                 auto_resolved = excluded.auto_resolved",
        )
        .bind(&step.id.0)
        .bind(&step.approval_id.0)
        .bind(seq as i64)
        .bind(i64::from(step.level))
        .bind(&step.approver_user_id)
        .bind(step.status.as_str())
        .bind(&step.comments)
        .bind(step.decided_at.map(format_timestamp))
        .bind(step.auto_resolved)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn is_open_quote_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(database) => {
            database.is_unique_violation() && database.message().contains("quote_id")
        }
        _ => false,
    }
}

fn approval_from_row(
    row: &SqliteRow,
) -> Result<(QuotationApproval, ApprovalWorkflow), RepositoryError> {
    let status: String = row.try_get("status")?;
    let status = ApprovalStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{status}`")))?;
    let snapshot: String = row.try_get("workflow_snapshot_json")?;
    let workflow: ApprovalWorkflow = serde_json::from_str(&snapshot).map_err(|error| {
        RepositoryError::Decode(format!("invalid workflow snapshot: {error}"))
    })?;

    let approval = QuotationApproval {
        id: ApprovalId(row.try_get("id")?),
        quote_id: QuoteId(row.try_get("quote_id")?),
        workflow_id: WorkflowId(row.try_get("workflow_id")?),
        current_level: parse_u32("current_level", row.try_get("current_level")?)?,
        status,
        requested_by: row.try_get("requested_by")?,
        requested_at: parse_timestamp("requested_at", row.try_get("requested_at")?)?,
        level_activated_at: parse_timestamp(
            "level_activated_at",
            row.try_get("level_activated_at")?,
        )?,
        completed_at: parse_optional_timestamp("completed_at", row.try_get("completed_at")?)?,
        cancelled_by: row.try_get("cancelled_by")?,
        state_version: parse_u32("state_version", row.try_get("state_version")?)?,
    };
    Ok((approval, workflow))
}

fn step_from_row(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let status: String = row.try_get("status")?;
    let status = StepStatus::parse(&status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status}`")))?;

    Ok(ApprovalStep {
        id: StepId(row.try_get("id")?),
        approval_id: ApprovalId(row.try_get("approval_id")?),
        level: parse_u32("level", row.try_get("level")?)?,
        approver_user_id: row.try_get("approver_user_id")?,
        status,
        comments: row.try_get("comments")?,
        decided_at: parse_optional_timestamp("decided_at", row.try_get("decided_at")?)?,
        auto_resolved: row.try_get("auto_resolved")?,
    })
}
