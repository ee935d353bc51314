//! Interfaces of the services the engine consumes.
//!
//! The engine ships default implementations ([`FilterSyntax`](crate::sql_compiler::FilterSyntax),
//! [`SqlAnalyzer`](crate::sql_analyzer::SqlAnalyzer), [`SourceCatalog`](crate::config::SourceCatalog)),
//! but a UI binding may substitute its own, e.g. a backend-side translator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sql_analyzer::SqlAnalysis;
use crate::sql_generator::DEFAULT_TIMESTAMP_FIELD;
use crate::state::TimeRange;
use crate::token::Span;

/// Table coordinates of the selected data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub database: String,
    pub table: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
}

fn default_timestamp_field() -> String {
    DEFAULT_TIMESTAMP_FIELD.to_string()
}

impl SourceMetadata {
    pub fn new(database: &str, table: &str) -> Self {
        Self {
            database: database.to_string(),
            table: table.to_string(),
            timestamp_field: default_timestamp_field(),
        }
    }

    pub fn with_timestamp_field(mut self, field: &str) -> Self {
        self.timestamp_field = field.to_string();
        self
    }

    pub fn qualified_table(&self) -> String {
        if self.database.is_empty() {
            self.table.clone()
        } else {
            format!("{}.{}", self.database, self.table)
        }
    }
}

/// Everything a translator needs besides the query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationContext {
    pub source: SourceMetadata,
    pub time_range: TimeRange,
    pub limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
    pub span: Option<Span>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), span: None }
    }

    pub fn at(message: impl Into<String>, span: Span) -> Self {
        Self { message: message.into(), span: Some(span) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TranslationError {
    pub message: String,
}

impl TranslationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionFailure {
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Converts filter-syntax text to SQL.
pub trait Translator {
    fn translate(&self, text: &str, context: &TranslationContext) -> Result<String, TranslationError>;
}

/// Checks filter-syntax text without translating it.
pub trait PrimarySyntaxValidator {
    fn validate(&self, text: &str) -> Result<(), ValidationError>;
}

/// Validates and structurally inspects user-authored SQL.
pub trait SqlValidator {
    /// On success returns the structural analysis of the statement.
    fn validate(&self, sql: &str) -> Result<SqlAnalysis, ValidationError>;

    /// Best-effort analysis, also for statements that fail validation.
    fn analyze(&self, sql: &str) -> SqlAnalysis;
}

pub trait SourceMetadataProvider {
    /// The currently selected source, `None` when nothing is selected.
    fn current_source(&self) -> Option<SourceMetadata>;
}

/// Rows returned by the execution backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<serde_json::Value>,
}

/// Runs finished SQL against the data backend.
pub trait QueryExecutor {
    fn execute(&self, sql: &str) -> Result<QueryOutput, ExecutionFailure>;
}
