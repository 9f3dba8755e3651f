use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::quote::QuoteId;

/// Domain events consumed by the notification/email collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalEvent {
    ApprovalRequested { approval_id: ApprovalId, quote_id: QuoteId },
    LevelAdvanced { approval_id: ApprovalId, new_level: u32 },
    ApprovalCompleted { approval_id: ApprovalId, status: ApprovalStatus },
}

impl ApprovalEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ApprovalRequested { .. } => "approval.requested",
            Self::LevelAdvanced { .. } => "approval.level_advanced",
            Self::ApprovalCompleted { .. } => "approval.completed",
        }
    }

    pub fn approval_id(&self) -> &ApprovalId {
        match self {
            Self::ApprovalRequested { approval_id, .. }
            | Self::LevelAdvanced { approval_id, .. }
            | Self::ApprovalCompleted { approval_id, .. } => approval_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub correlation_id: String,
    pub occurred_at: DateTime<Utc>,
    pub event: ApprovalEvent,
}

impl EventEnvelope {
    pub fn new(
        correlation_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
        event: ApprovalEvent,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id: correlation_id.into(),
            occurred_at,
            event,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, envelope: EventEnvelope);
}

/// Writes every event to the tracing pipeline; the default sink for binaries.
#[derive(Clone, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, envelope: EventEnvelope) {
        let payload = encode_payload(&envelope.event, &envelope.correlation_id);
        info!(
            event_name = envelope.event.event_name(),
            event_id = %envelope.event_id,
            correlation_id = %envelope.correlation_id,
            approval_id = %envelope.event.approval_id(),
            payload = %payload,
            "approval event published"
        );
    }
}

fn encode_payload<T: Serialize>(value: &T, correlation_id: &str) -> String {
    match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(
                event_name = "approval.event.encode_failed",
                correlation_id = %correlation_id,
                error = %error,
                "event payload could not be encoded; publishing without payload"
            );
            String::new()
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryEventSink {
    envelopes: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl InMemoryEventSink {
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        match self.envelopes.lock() {
            Ok(envelopes) => envelopes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events(&self) -> Vec<ApprovalEvent> {
        self.envelopes().into_iter().map(|envelope| envelope.event).collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn publish(&self, envelope: EventEnvelope) {
        match self.envelopes.lock() {
            Ok(mut envelopes) => envelopes.push(envelope),
            Err(poisoned) => poisoned.into_inner().push(envelope),
        }
    }
}
