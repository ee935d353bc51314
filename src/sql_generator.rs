//! SQL generator for the structured filter builder.
//!
//! Produces a complete ClickHouse `SELECT` from a list of [`FilterCondition`]s. The text
//! layout (one clause per line, continuation predicates indented by two spaces, time
//! bounds as `toDateTime64('YYYY-MM-DD HH:MM:SS.mmm', 3)`) is what the query backend and
//! the SQL analyzer expect, so it must stay byte-stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::TranslationContext;
use crate::condition::{FilterCondition, FilterOperator, FilterValue, Scalar};
use crate::error::GenerationError;

pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestamp";

/// Literal format of the time bounds, millisecond precision, UTC without suffix.
pub const TIMESTAMP_LITERAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Literal format accepted by `toDateTime`, second precision.
pub const DATETIME_LITERAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Fixed inputs of a generation run. Timestamps are Unix epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub database: String,
    pub table: String,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub limit: u64,
    #[serde(default)]
    pub timestamp_field: Option<String>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
}

impl GenerationOptions {
    pub fn timestamp_field(&self) -> &str {
        self.timestamp_field
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .unwrap_or(DEFAULT_TIMESTAMP_FIELD)
    }

    fn qualified_table(&self) -> Result<String, GenerationError> {
        let table = self.table.trim();
        if table.is_empty() {
            return Err(GenerationError::MissingTable);
        }
        let database = self.database.trim();
        if database.is_empty() {
            Ok(table.to_string())
        } else {
            Ok(format!("{}.{}", database, table))
        }
    }
}

impl From<&TranslationContext> for GenerationOptions {
    fn from(context: &TranslationContext) -> Self {
        Self {
            database: context.source.database.clone(),
            table: context.source.table.clone(),
            start_timestamp: context.time_range.start,
            end_timestamp: context.time_range.end,
            limit: context.limit,
            timestamp_field: Some(context.source.timestamp_field.clone()),
            sort: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSql {
    pub sql: String,
    /// Number of conditions that produced a WHERE term.
    pub applied_conditions: usize,
    /// Number of conditions dropped as incomplete or unusable.
    pub skipped_conditions: usize,
}

/// Formats epoch milliseconds with `format`, in UTC.
pub fn format_timestamp(epoch_millis: i64, format: &str) -> Result<String, GenerationError> {
    let datetime = DateTime::<Utc>::from_timestamp_millis(epoch_millis)
        .ok_or(GenerationError::TimestampOutOfRange(epoch_millis))?;
    Ok(datetime.format(format).to_string())
}

/// Formats epoch milliseconds as `toDateTime64('YYYY-MM-DD HH:MM:SS.mmm', 3)`.
pub fn datetime64_literal(epoch_millis: i64) -> Result<String, GenerationError> {
    Ok(format!(
        "toDateTime64('{}', 3)",
        format_timestamp(epoch_millis, TIMESTAMP_LITERAL_FORMAT)?
    ))
}

/// Builds `SELECT * FROM db.table WHERE <time bounds> AND <conditions> ORDER BY .. LIMIT ..`.
///
/// Incomplete conditions are skipped, never reported as errors. With no usable
/// conditions the output is identical to [`generate_default_sql`].
pub fn generate_sql(
    options: &GenerationOptions,
    conditions: &[FilterCondition],
) -> Result<GeneratedSql, GenerationError> {
    let table = options.qualified_table()?;
    let ts_field = options.timestamp_field();

    let mut predicates = vec![
        format!("{} >= {}", ts_field, datetime64_literal(options.start_timestamp)?),
        format!("{} <= {}", ts_field, datetime64_literal(options.end_timestamp)?),
    ];

    let mut applied_conditions = 0;
    for condition in conditions {
        match compile_condition(condition) {
            Some(predicate) => {
                predicates.push(predicate);
                applied_conditions += 1;
            }
            None => warn!(?condition, "skipping unusable filter condition"),
        }
    }

    let mut sql = format!("SELECT *\nFROM {}", table);
    if !predicates.is_empty() {
        sql.push_str("\nWHERE ");
        sql.push_str(&predicates.join("\n  AND "));
    }

    match &options.sort {
        Some(sort) => sql.push_str(&format!("\nORDER BY {} {}", sort.field, sort.direction.as_sql())),
        None => sql.push_str(&format!("\nORDER BY {} DESC", ts_field)),
    }
    sql.push_str(&format!("\nLIMIT {}", options.limit));

    self_check(&sql)?;
    debug!(%sql, applied_conditions, "generated SQL from filter conditions");

    Ok(GeneratedSql {
        sql,
        applied_conditions,
        skipped_conditions: conditions.len() - applied_conditions,
    })
}

/// Time-bounded query with default ordering and no filter conditions.
pub fn generate_default_sql(options: &GenerationOptions) -> Result<GeneratedSql, GenerationError> {
    generate_sql(options, &[])
}

fn self_check(sql: &str) -> Result<(), GenerationError> {
    let upper = sql.trim_start().to_ascii_uppercase();
    if !upper.starts_with("SELECT") {
        return Err(GenerationError::SelfCheck("statement does not start with SELECT".to_string()));
    }
    if !upper.contains("FROM") {
        return Err(GenerationError::SelfCheck("statement has no FROM clause".to_string()));
    }
    Ok(())
}

/// Compiles one condition into a boolean SQL expression, `None` when it must be skipped.
fn compile_condition(condition: &FilterCondition) -> Option<String> {
    if !condition.is_complete() {
        return None;
    }
    let field = condition.field.as_deref()?.trim();
    let operator = condition.operator.as_ref()?;

    let expr = match operator {
        FilterOperator::IsNull => format!("{} IS NULL", field),
        FilterOperator::IsNotNull => format!("{} IS NOT NULL", field),
        FilterOperator::In | FilterOperator::NotIn => {
            let values = list_literal(condition.value.as_ref()?)?;
            let keyword = if *operator == FilterOperator::In { "IN" } else { "NOT IN" };
            format!("{} {} ({})", field, keyword, values)
        }
        other => {
            let value = scalar_literal(condition.value.as_ref()?)?;
            match other {
                FilterOperator::Equals => format!("{} = {}", field, value),
                FilterOperator::NotEquals => format!("{} != {}", field, value),
                FilterOperator::GreaterThan => format!("{} > {}", field, value),
                FilterOperator::LessThan => format!("{} < {}", field, value),
                FilterOperator::GreaterOrEqual => format!("{} >= {}", field, value),
                FilterOperator::LessOrEqual => format!("{} <= {}", field, value),
                FilterOperator::Contains => format!("position({}, {}) > 0", field, value),
                FilterOperator::NotContains => format!("position({}, {}) = 0", field, value),
                FilterOperator::ContainsIgnoreCase => {
                    format!("position(lower({}), lower({})) > 0", field, value)
                }
                FilterOperator::StartsWith => format!("startsWith({}, {})", field, value),
                FilterOperator::EndsWith => format!("endsWith({}, {})", field, value),
                FilterOperator::Other(raw) => {
                    warn!(operator = %raw, field, "unknown filter operator, falling back to equals");
                    format!("{} = {}", field, value)
                }
                // handled by the outer arms
                FilterOperator::IsNull
                | FilterOperator::IsNotNull
                | FilterOperator::In
                | FilterOperator::NotIn => return None,
            }
        }
    };
    Some(expr)
}

/// Scalar comparisons take the first element when handed a list.
fn scalar_literal(value: &FilterValue) -> Option<String> {
    match value {
        FilterValue::Scalar(scalar) => Some(format_scalar(scalar)),
        FilterValue::List(items) => items.first().map(format_scalar),
    }
}

/// An empty list would render `IN ()`, which ClickHouse rejects.
fn list_literal(value: &FilterValue) -> Option<String> {
    let items = match value {
        FilterValue::Scalar(scalar) => vec![format_scalar(scalar)],
        FilterValue::List(items) => items.iter().map(format_scalar).collect(),
    };
    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}

/// Numbers and numeric-looking text are emitted bare, everything else single-quoted
/// with embedded quotes doubled.
pub fn format_scalar(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Integer(n) => n.to_string(),
        Scalar::Float(f) if f.is_finite() => f.to_string(),
        Scalar::Float(f) => quote(&f.to_string()),
        Scalar::Text(s) if looks_numeric(s) => s.trim().to_string(),
        Scalar::Text(s) => quote(s),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Plain decimal notation only: `inf`, `NaN` and blank strings stay text.
fn looks_numeric(s: &str) -> bool {
    let trimmed = s.trim();
    !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        && trimmed.parse::<f64>().is_ok_and(f64::is_finite)
}
