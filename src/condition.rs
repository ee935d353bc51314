//! Structured filter conditions supplied by the UI's filter builder.
//!
//! Conditions arrive as loosely-shaped JSON (`{"field": "status", "operator": "=", "value": 200}`)
//! and may be half-filled while the user is still editing them. Every field is therefore
//! optional here; [`FilterCondition::is_complete`] decides whether a condition takes part
//! in SQL generation.

use serde::{Deserialize, Serialize};

/// Operator of a [`FilterCondition`].
///
/// Unknown operator strings are kept as [`FilterOperator::Other`] so the generator can
/// fall back to equality instead of rejecting the condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    NotContains,
    ContainsIgnoreCase,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Other(String),
}

impl FilterOperator {
    pub fn as_str(&self) -> &str {
        match self {
            FilterOperator::Equals => "=",
            FilterOperator::NotEquals => "!=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "not_contains",
            FilterOperator::ContainsIgnoreCase => "icontains",
            FilterOperator::StartsWith => "starts_with",
            FilterOperator::EndsWith => "ends_with",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not_in",
            FilterOperator::IsNull => "is_null",
            FilterOperator::IsNotNull => "is_not_null",
            FilterOperator::Other(raw) => raw,
        }
    }

    /// Null checks are the only operators that need no value.
    pub fn is_null_check(&self) -> bool {
        matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, FilterOperator::In | FilterOperator::NotIn)
    }
}

impl From<&str> for FilterOperator {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" | "equals" => FilterOperator::Equals,
            "!=" | "<>" | "ne" | "not_equals" => FilterOperator::NotEquals,
            ">" | "gt" => FilterOperator::GreaterThan,
            "<" | "lt" => FilterOperator::LessThan,
            ">=" | "gte" => FilterOperator::GreaterOrEqual,
            "<=" | "lte" => FilterOperator::LessOrEqual,
            "contains" => FilterOperator::Contains,
            "not_contains" | "not contains" => FilterOperator::NotContains,
            "icontains" | "ilike" => FilterOperator::ContainsIgnoreCase,
            "starts_with" | "startswith" => FilterOperator::StartsWith,
            "ends_with" | "endswith" => FilterOperator::EndsWith,
            "in" => FilterOperator::In,
            "not_in" | "not in" => FilterOperator::NotIn,
            "is_null" | "is null" => FilterOperator::IsNull,
            "is_not_null" | "is not null" => FilterOperator::IsNotNull,
            _ => FilterOperator::Other(raw.to_string()),
        }
    }
}

impl From<String> for FilterOperator {
    fn from(raw: String) -> Self {
        FilterOperator::from(raw.as_str())
    }
}

impl From<FilterOperator> for String {
    fn from(op: FilterOperator) -> Self {
        op.as_str().to_string()
    }
}

/// A single scalar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Value of a condition: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Scalar(Scalar),
    List(Vec<Scalar>),
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Scalar(Scalar::Text(s.to_string()))
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Scalar(Scalar::Integer(n))
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        FilterValue::Scalar(Scalar::Integer(i64::from(n)))
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Scalar(Scalar::Float(n))
    }
}

impl From<Vec<Scalar>> for FilterValue {
    fn from(items: Vec<Scalar>) -> Self {
        FilterValue::List(items)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub operator: Option<FilterOperator>,
    #[serde(default)]
    pub value: Option<FilterValue>,
}

impl FilterCondition {
    pub fn new(field: &str, operator: impl Into<FilterOperator>, value: impl Into<FilterValue>) -> Self {
        Self {
            field: Some(field.to_string()),
            operator: Some(operator.into()),
            value: Some(value.into()),
        }
    }

    /// A condition without a value, for the null-check operators.
    pub fn without_value(field: &str, operator: impl Into<FilterOperator>) -> Self {
        Self {
            field: Some(field.to_string()),
            operator: Some(operator.into()),
            value: None,
        }
    }

    /// Complete iff it has a non-blank field, an operator, and a value unless the
    /// operator is a null check.
    pub fn is_complete(&self) -> bool {
        let has_field = self.field.as_deref().is_some_and(|f| !f.trim().is_empty());
        match &self.operator {
            None => false,
            Some(op) if op.is_null_check() => has_field,
            Some(_) => has_field && self.value.is_some(),
        }
    }
}
