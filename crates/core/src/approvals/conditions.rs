use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;

use crate::domain::quote::QuotationSnapshot;
use crate::domain::workflow::{ApprovalCondition, ConditionOperator};
use crate::errors::ConfigurationError;

/// Evaluates workflow conditions against a quotation snapshot.
///
/// A field that is absent or null never matches, whatever the operator.
/// Equality (`eq`, `ne`, `in`, `nin`) is strict JSON equality except that
/// numbers compare by value (`150000` equals `150000.0`); a numeric string is
/// never equal to a number, so `"150000" eq 150000` does not match.
/// Ordering operators coerce decimal strings on both sides, so
/// `"150000" gte 100000` does match. Anything non-numeric does not match an
/// ordering operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn evaluate(
        &self,
        condition: &ApprovalCondition,
        snapshot: &QuotationSnapshot,
    ) -> Result<bool, ConfigurationError> {
        let operator = condition.validate()?;
        let Some(actual) = snapshot.lookup(&condition.field) else {
            return Ok(false);
        };

        let matched = match operator {
            ConditionOperator::Eq => values_equal(actual, &condition.value),
            ConditionOperator::Ne => !values_equal(actual, &condition.value),
            ConditionOperator::Gt => compare(actual, &condition.value) == Some(Ordering::Greater),
            ConditionOperator::Gte => matches!(
                compare(actual, &condition.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOperator::Lt => compare(actual, &condition.value) == Some(Ordering::Less),
            ConditionOperator::Lte => matches!(
                compare(actual, &condition.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOperator::In => set_contains(&condition.value, actual),
            ConditionOperator::Nin => !set_contains(&condition.value, actual),
        };

        Ok(matched)
    }

    /// Like [`Self::evaluate`], but a malformed condition counts as a
    /// non-match and is logged.
    pub fn matches(&self, condition: &ApprovalCondition, snapshot: &QuotationSnapshot) -> bool {
        match self.evaluate(condition, snapshot) {
            Ok(matched) => matched,
            Err(error) => {
                warn!(
                    event_name = "approval.condition.invalid",
                    quote_id = %snapshot.id,
                    field = %condition.field,
                    operator = %condition.operator,
                    error = %error,
                    "condition could not be evaluated; treating as no match"
                );
                false
            }
        }
    }

    pub fn matches_all(&self, conditions: &[ApprovalCondition], snapshot: &QuotationSnapshot) -> bool {
        conditions.iter().all(|condition| self.matches(condition, snapshot))
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => {
            match (as_decimal(left), as_decimal(right)) {
                (Some(left), Some(right)) => left == right,
                _ => left == right,
            }
        }
        _ => left == right,
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    let actual = as_decimal(actual)?;
    let expected = as_decimal(expected)?;
    Some(actual.cmp(&expected))
}

fn set_contains(set: &Value, actual: &Value) -> bool {
    set.as_array().is_some_and(|items| items.iter().any(|item| values_equal(actual, item)))
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Some(Decimal::from(integer))
            } else if let Some(integer) = number.as_u64() {
                Some(Decimal::from(integer))
            } else {
                number.as_f64().and_then(Decimal::from_f64)
            }
        }
        Value::String(raw) => Decimal::from_str(raw.trim()).ok(),
        _ => None,
    }
}
