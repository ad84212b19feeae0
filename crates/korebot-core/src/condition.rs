//! Trigger conditions and their evaluation against a snapshot.
//!
//! A [`Condition`] is either a simple comparison of one snapshot field with
//! a literal, or a compound AND / OR / NOT over child conditions. The config
//! form is tagged by `type`:
//!
//! ```json
//! {"type": "simple", "field": "character.hp_percent", "operator": "<=", "value": 25}
//! {"type": "compound", "compound_operator": "AND", "checks": [ ... ]}
//! ```
//!
//! Operators are `== != < <= > >=` plus `contains` for text fields.
//! Evaluation is pure and total. A field the snapshot cannot resolve makes
//! the comparison `false`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use korebot_types::{FieldValue, StateSnapshot};

/// Comparison operator of a simple condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equal.
    #[serde(rename = "==", alias = "eq")]
    Eq,
    /// Not equal.
    #[serde(rename = "!=", alias = "ne")]
    Ne,
    /// Less than.
    #[serde(rename = "<", alias = "lt")]
    Lt,
    /// Less than or equal.
    #[serde(rename = "<=", alias = "le")]
    Le,
    /// Greater than.
    #[serde(rename = ">", alias = "gt")]
    Gt,
    /// Greater than or equal.
    #[serde(rename = ">=", alias = "ge")]
    Ge,
    /// Field text contains the literal text (case-insensitive).
    #[serde(rename = "contains")]
    Contains,
}

impl Operator {
    fn apply(self, ordering: core::cmp::Ordering) -> bool {
        use core::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
            Self::Contains => false,
        }
    }
}

/// Boolean combinator of a compound condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompoundOperator {
    /// All children true. Empty is true.
    #[serde(rename = "AND", alias = "and")]
    And,
    /// Any child true. Empty is false.
    #[serde(rename = "OR", alias = "or")]
    Or,
    /// Negation of the first child. Empty is false.
    #[serde(rename = "NOT", alias = "not")]
    Not,
}

/// A trigger condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Compare one snapshot field with a literal.
    Simple {
        /// Dotted field path, see [`StateSnapshot::resolve`].
        field: String,
        /// Comparison operator.
        operator: Operator,
        /// Literal to compare against.
        value: FieldValue,
    },
    /// Combine child conditions.
    Compound {
        /// How the children combine.
        compound_operator: CompoundOperator,
        /// Child conditions, evaluated in order.
        #[serde(default)]
        checks: Vec<Self>,
    },
}

impl Condition {
    /// Build a simple comparison.
    pub fn simple(field: &str, operator: Operator, value: impl Into<FieldValue>) -> Self {
        Self::Simple {
            field: field.to_owned(),
            operator,
            value: value.into(),
        }
    }

    /// All of `checks` must hold.
    pub const fn all(checks: Vec<Self>) -> Self {
        Self::Compound {
            compound_operator: CompoundOperator::And,
            checks,
        }
    }

    /// Any of `checks` must hold.
    pub const fn any(checks: Vec<Self>) -> Self {
        Self::Compound {
            compound_operator: CompoundOperator::Or,
            checks,
        }
    }

    /// Negate `check`.
    pub fn not(check: Self) -> Self {
        Self::Compound {
            compound_operator: CompoundOperator::Not,
            checks: vec![check],
        }
    }

    /// Evaluate against a snapshot. See [`evaluate`].
    pub fn evaluate(&self, snapshot: &StateSnapshot) -> bool {
        evaluate(self, snapshot)
    }
}

/// Evaluate a condition against a snapshot.
///
/// AND and OR short-circuit. Absent fields make simple comparisons false.
pub fn evaluate(condition: &Condition, snapshot: &StateSnapshot) -> bool {
    match condition {
        Condition::Simple {
            field,
            operator,
            value,
        } => match snapshot.resolve(field) {
            Some(actual) => compare(&actual, *operator, value),
            None => {
                debug!(field = %field, "condition field absent, evaluating false");
                false
            }
        },
        Condition::Compound {
            compound_operator,
            checks,
        } => match compound_operator {
            CompoundOperator::And => checks.iter().all(|c| evaluate(c, snapshot)),
            CompoundOperator::Or => checks.iter().any(|c| evaluate(c, snapshot)),
            CompoundOperator::Not => checks.first().is_some_and(|c| !evaluate(c, snapshot)),
        },
    }
}

/// Compare numerically when both sides are numbers, otherwise as strings.
fn compare(actual: &FieldValue, operator: Operator, expected: &FieldValue) -> bool {
    if operator == Operator::Contains {
        let needle = expected.to_text().to_lowercase();
        return actual.to_text().to_lowercase().contains(&needle);
    }
    let ordering = match (actual.as_number(), expected.as_number()) {
        (Some(a), Some(b)) => {
            if (a - b).abs() <= f64::EPSILON {
                core::cmp::Ordering::Equal
            } else {
                a.total_cmp(&b)
            }
        }
        _ => actual.to_text().cmp(&expected.to_text()),
    };
    operator.apply(ordering)
}
