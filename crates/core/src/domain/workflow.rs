use std::collections::BTreeSet;

use chrono::Duration;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigurationError;

const MILLIS_PER_HOUR: i64 = 3_600_000;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Nin => "nin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "in" => Some(Self::In),
            "nin" => Some(Self::Nin),
            _ => None,
        }
    }

    pub fn is_set_operator(&self) -> bool {
        matches!(self, Self::In | Self::Nin)
    }
}

/// One `(field, operator, value)` rule. The operator is kept as configured so
/// a corrupt catalog entry surfaces as a [`ConfigurationError`] at evaluation
/// time instead of failing the whole catalog load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalCondition {
    pub field: String,
    pub operator: String,
    pub value: Value,
}

impl ApprovalCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self { field: field.into(), operator: operator.as_str().to_owned(), value: value.into() }
    }

    pub fn operator(&self) -> Result<ConditionOperator, ConfigurationError> {
        ConditionOperator::parse(&self.operator).ok_or_else(|| ConfigurationError::UnknownOperator {
            field: self.field.clone(),
            operator: self.operator.clone(),
        })
    }

    pub fn validate(&self) -> Result<ConditionOperator, ConfigurationError> {
        if self.field.trim().is_empty() {
            return Err(ConfigurationError::EmptyConditionField);
        }

        let operator = self.operator()?;
        if operator.is_set_operator() && !self.value.is_array() {
            return Err(ConfigurationError::SetValueRequired {
                field: self.field.clone(),
                operator: operator.as_str().to_owned(),
            });
        }

        Ok(operator)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalLevel {
    pub level: u32,
    pub name: String,
    pub approver_user_ids: BTreeSet<String>,
    pub require_all_approvers: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_approval_timeout_hours: Option<Decimal>,
}

impl ApprovalLevel {
    pub fn new<I, U>(level: u32, name: impl Into<String>, approvers: I, require_all: bool) -> Self
    where
        I: IntoIterator<Item = U>,
        U: Into<String>,
    {
        Self {
            level,
            name: name.into(),
            approver_user_ids: approvers.into_iter().map(Into::into).collect(),
            require_all_approvers: require_all,
            auto_approval_timeout_hours: None,
        }
    }

    pub fn with_timeout_hours(mut self, hours: Decimal) -> Self {
        self.auto_approval_timeout_hours = Some(hours);
        self
    }

    /// Configured timeout as a duration. `None` when unset, non-positive, or
    /// outside the range a duration can hold; `validate` rejects the latter.
    pub fn auto_approval_timeout(&self) -> Option<Duration> {
        let hours = self.auto_approval_timeout_hours?;
        if hours <= Decimal::ZERO {
            return None;
        }
        let millis = hours.checked_mul(Decimal::from(MILLIS_PER_HOUR))?.round().to_i64()?;
        if millis <= 0 {
            return None;
        }
        Duration::try_milliseconds(millis)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalWorkflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub conditions: Vec<ApprovalCondition>,
    pub levels: Vec<ApprovalLevel>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl ApprovalWorkflow {
    /// Builds a workflow, ordering levels by number and validating the result.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        conditions: Vec<ApprovalCondition>,
        mut levels: Vec<ApprovalLevel>,
        priority: i32,
    ) -> Result<Self, ConfigurationError> {
        levels.sort_by_key(|level| level.level);
        let workflow = Self {
            id: WorkflowId(id.into()),
            name: name.into(),
            conditions,
            levels,
            priority,
            is_active: true,
        };
        workflow.validate()?;
        Ok(workflow)
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.0.trim().is_empty() {
            return Err(ConfigurationError::EmptyWorkflowId);
        }

        if self.levels.is_empty() {
            return Err(ConfigurationError::NoLevels { workflow_id: self.id.clone() });
        }

        let mut numbers: Vec<u32> = self.levels.iter().map(|level| level.level).collect();
        numbers.sort_unstable();
        for (index, found) in numbers.into_iter().enumerate() {
            let expected = index as u32 + 1;
            if found != expected {
                return Err(ConfigurationError::NonContiguousLevels {
                    workflow_id: self.id.clone(),
                    expected,
                    found,
                });
            }
        }

        for level in &self.levels {
            if level.approver_user_ids.iter().all(|user| user.trim().is_empty()) {
                return Err(ConfigurationError::NoApprovers {
                    workflow_id: self.id.clone(),
                    level: level.level,
                });
            }

            if let Some(hours) = level.auto_approval_timeout_hours {
                if hours <= Decimal::ZERO {
                    return Err(ConfigurationError::NonPositiveTimeout {
                        workflow_id: self.id.clone(),
                        level: level.level,
                    });
                }
                if level.auto_approval_timeout().is_none() {
                    return Err(ConfigurationError::TimeoutOutOfRange {
                        workflow_id: self.id.clone(),
                        level: level.level,
                        hours,
                    });
                }
            }
        }

        for condition in &self.conditions {
            condition.validate()?;
        }

        Ok(())
    }

    pub fn level(&self, level: u32) -> Option<&ApprovalLevel> {
        self.levels.iter().find(|candidate| candidate.level == level)
    }

    pub fn require_level(&self, level: u32) -> Result<&ApprovalLevel, ConfigurationError> {
        self.level(level).ok_or_else(|| ConfigurationError::MissingLevel {
            workflow_id: self.id.clone(),
            level,
        })
    }

    pub fn last_level(&self) -> u32 {
        self.levels.iter().map(|level| level.level).max().unwrap_or(0)
    }
}
