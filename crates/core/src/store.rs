use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::approval::{ApprovalId, ApprovalRecord};
use crate::domain::quote::QuoteId;
use crate::domain::workflow::ApprovalWorkflow;
use crate::errors::ApprovalError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("quotation `{quote_id}` already has an open approval")]
    DuplicateOpenApproval { quote_id: QuoteId },
    #[error("approval `{approval_id}` version conflict: expected {expected}, found {actual:?}")]
    VersionConflict { approval_id: ApprovalId, expected: u32, actual: Option<u32> },
    #[error("approval `{0}` does not exist")]
    Missing(ApprovalId),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<StoreError> for ApprovalError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::DuplicateOpenApproval { quote_id } => {
                Self::DuplicateApproval { quote_id, existing: None }
            }
            StoreError::VersionConflict { approval_id, expected, .. } => {
                Self::PersistenceConflict { approval_id, expected_version: expected }
            }
            StoreError::Missing(approval_id) => Self::NotFound(approval_id),
            StoreError::Backend(message) => Self::Persistence(message),
        }
    }
}

/// Durable home of approval records.
///
/// Implementations must make `insert` fail with
/// [`StoreError::DuplicateOpenApproval`] when the quotation already has a
/// pending approval, and `update` fail with [`StoreError::VersionConflict`]
/// unless the stored `state_version` equals `expected_version`. Both checks
/// must be atomic with the write.
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    async fn insert(&self, record: &ApprovalRecord) -> Result<(), StoreError>;

    async fn update(&self, record: &ApprovalRecord, expected_version: u32)
        -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError>;

    async fn find_open_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    async fn latest_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<ApprovalRecord>, StoreError>;

    async fn list_open(&self) -> Result<Vec<ApprovalRecord>, StoreError>;
}

/// Source of configured workflows. Callers load once per evaluation and
/// decide against that snapshot.
#[async_trait]
pub trait WorkflowCatalog: Send + Sync {
    async fn active_workflows(&self) -> Result<Vec<ApprovalWorkflow>, StoreError>;
}

#[async_trait]
impl<T> ApprovalStore for Arc<T>
where
    T: ApprovalStore + ?Sized,
{
    async fn insert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        (**self).insert(record).await
    }

    async fn update(
        &self,
        record: &ApprovalRecord,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        (**self).update(record, expected_version).await
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_open_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        (**self).find_open_for_quote(quote_id).await
    }

    async fn latest_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        (**self).latest_for_quote(quote_id).await
    }

    async fn list_open(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
        (**self).list_open().await
    }
}

#[async_trait]
impl<T> WorkflowCatalog for Arc<T>
where
    T: WorkflowCatalog + ?Sized,
{
    async fn active_workflows(&self) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        (**self).active_workflows().await
    }
}

#[derive(Default)]
pub struct InMemoryApprovalStore {
    records: RwLock<HashMap<String, ApprovalRecord>>,
}

#[async_trait]
impl ApprovalStore for InMemoryApprovalStore {
    async fn insert(&self, record: &ApprovalRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.approval.id.0) {
            return Err(StoreError::Backend(format!(
                "approval `{}` already exists",
                record.approval.id
            )));
        }

        let open_for_quote = records.values().any(|existing| {
            existing.approval.quote_id == record.approval.quote_id && existing.approval.is_open()
        });
        if open_for_quote && record.approval.is_open() {
            return Err(StoreError::DuplicateOpenApproval {
                quote_id: record.approval.quote_id.clone(),
            });
        }

        records.insert(record.approval.id.0.clone(), record.clone());
        Ok(())
    }

    async fn update(
        &self,
        record: &ApprovalRecord,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let Some(existing) = records.get_mut(&record.approval.id.0) else {
            return Err(StoreError::Missing(record.approval.id.clone()));
        };

        if existing.approval.state_version != expected_version {
            return Err(StoreError::VersionConflict {
                approval_id: record.approval.id.clone(),
                expected: expected_version,
                actual: Some(existing.approval.state_version),
            });
        }

        *existing = record.clone();
        Ok(())
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&id.0).cloned())
    }

    async fn find_open_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|record| &record.approval.quote_id == quote_id && record.approval.is_open())
            .cloned())
    }

    async fn latest_for_quote(
        &self,
        quote_id: &QuoteId,
    ) -> Result<Option<ApprovalRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|record| &record.approval.quote_id == quote_id)
            .max_by(|left, right| {
                left.approval
                    .requested_at
                    .cmp(&right.approval.requested_at)
                    .then_with(|| left.approval.id.cmp(&right.approval.id))
            })
            .cloned())
    }

    async fn list_open(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
        let records = self.records.read().await;
        let mut open: Vec<ApprovalRecord> =
            records.values().filter(|record| record.approval.is_open()).cloned().collect();
        open.sort_by(|left, right| {
            left.approval
                .requested_at
                .cmp(&right.approval.requested_at)
                .then_with(|| left.approval.id.cmp(&right.approval.id))
        });
        Ok(open)
    }
}

#[derive(Clone, Debug, Default)]
pub struct StaticWorkflowCatalog {
    workflows: Vec<ApprovalWorkflow>,
}

impl StaticWorkflowCatalog {
    pub fn new(workflows: Vec<ApprovalWorkflow>) -> Self {
        Self { workflows }
    }
}

#[async_trait]
impl WorkflowCatalog for StaticWorkflowCatalog {
    async fn active_workflows(&self) -> Result<Vec<ApprovalWorkflow>, StoreError> {
        Ok(self.workflows.iter().filter(|workflow| workflow.is_active).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        ApprovalStore, InMemoryApprovalStore, StaticWorkflowCatalog, StoreError, WorkflowCatalog,
    };
    use crate::domain::approval::{
        ApprovalId, ApprovalRecord, ApprovalStatus, QuotationApproval,
    };
    use crate::domain::quote::QuoteId;
    use crate::domain::workflow::{ApprovalLevel, ApprovalWorkflow};

    fn workflow() -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            "wf-standard",
            "Standard",
            Vec::new(),
            vec![ApprovalLevel::new(1, "Manager", ["u-manager"], true)],
            0,
        )
        .expect("valid workflow")
    }

    fn record(id: &str, quote_id: &str, status: ApprovalStatus) -> ApprovalRecord {
        let now = Utc::now();
        ApprovalRecord {
            approval: QuotationApproval {
                id: ApprovalId(id.to_owned()),
                quote_id: QuoteId(quote_id.to_owned()),
                workflow_id: workflow().id,
                current_level: 1,
                status,
                requested_by: "u-sales-rep".to_owned(),
                requested_at: now,
                level_activated_at: now,
                completed_at: None,
                cancelled_by: None,
                state_version: 1,
            },
            workflow: workflow(),
            steps: Vec::new(),
        }
    }

    #[tokio::test]
    async fn insert_rejects_second_open_approval_for_same_quote() {
        let store = InMemoryApprovalStore::default();
        store.insert(&record("APR-1", "Q-1", ApprovalStatus::Pending)).await.expect("first");

        let error = store
            .insert(&record("APR-2", "Q-1", ApprovalStatus::Pending))
            .await
            .expect_err("second open approval must fail");
        assert_eq!(error, StoreError::DuplicateOpenApproval { quote_id: QuoteId("Q-1".to_owned()) });

        store
            .insert(&record("APR-3", "Q-2", ApprovalStatus::Pending))
            .await
            .expect("other quotations are independent");
    }

    #[tokio::test]
    async fn terminal_approval_does_not_block_a_new_request() {
        let store = InMemoryApprovalStore::default();
        store.insert(&record("APR-1", "Q-1", ApprovalStatus::Rejected)).await.expect("closed");
        store.insert(&record("APR-2", "Q-1", ApprovalStatus::Pending)).await.expect("reopen");

        let open = store
            .find_open_for_quote(&QuoteId("Q-1".to_owned()))
            .await
            .expect("query")
            .expect("open approval");
        assert_eq!(open.approval.id.0, "APR-2");
    }

    #[tokio::test]
    async fn update_requires_matching_version() {
        let store = InMemoryApprovalStore::default();
        let mut stored = record("APR-1", "Q-1", ApprovalStatus::Pending);
        store.insert(&stored).await.expect("insert");

        stored.approval.state_version = 2;
        store.update(&stored, 1).await.expect("version 1 matches");

        let error = store.update(&stored, 1).await.expect_err("stale version");
        assert!(matches!(error, StoreError::VersionConflict { expected: 1, actual: Some(2), .. }));

        let missing = record("APR-404", "Q-9", ApprovalStatus::Pending);
        let error = store.update(&missing, 1).await.expect_err("unknown approval");
        assert_eq!(error, StoreError::Missing(ApprovalId("APR-404".to_owned())));
    }

    #[tokio::test]
    async fn latest_and_open_listings_are_ordered_by_request_time() {
        let store = InMemoryApprovalStore::default();
        let mut older = record("APR-1", "Q-1", ApprovalStatus::Cancelled);
        older.approval.requested_at = Utc::now() - Duration::days(2);
        store.insert(&older).await.expect("older");
        store.insert(&record("APR-2", "Q-1", ApprovalStatus::Pending)).await.expect("newer");
        store.insert(&record("APR-3", "Q-2", ApprovalStatus::Pending)).await.expect("other");

        let latest = store
            .latest_for_quote(&QuoteId("Q-1".to_owned()))
            .await
            .expect("query")
            .expect("latest");
        assert_eq!(latest.approval.id.0, "APR-2");

        let open = store.list_open().await.expect("list open");
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|record| record.approval.is_open()));
    }

    #[tokio::test]
    async fn static_catalog_returns_only_active_workflows() {
        let catalog = StaticWorkflowCatalog::new(vec![workflow(), workflow().inactive()]);
        let active = catalog.active_workflows().await.expect("catalog");

        assert_eq!(active.len(), 1);
        assert!(active[0].is_active);
    }
}
