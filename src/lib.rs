//! Query state engine for a log-exploration editor.
//!
//! Tracks whether the editor differs from the last executed query, generates
//! time-bounded ClickHouse SQL for the structured filter builder, and switches the
//! editor between the filter syntax and raw SQL.

pub mod ast;
pub mod collaborators;
pub mod condition;
pub mod config;
pub mod dirty;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod mode_switch;
pub mod parser;
pub mod scheduling;
pub mod sql_analyzer;
pub mod sql_compiler;
pub mod sql_generator;
pub mod state;
pub mod token;

pub use collaborators::{
    ExecutionFailure, PrimarySyntaxValidator, QueryExecutor, QueryOutput, SourceMetadata,
    SourceMetadataProvider, SqlValidator, TranslationContext, TranslationError, Translator,
    ValidationError,
};
pub use condition::{FilterCondition, FilterOperator, FilterValue, Scalar};
pub use config::{EngineConfig, SourceCatalog};
pub use dirty::{evaluate_dirty, DirtyReasons, DirtyState};
pub use engine::{ExecutionOutcome, PendingExecution, QueryStateEngine, Recomputed};
pub use error::{ConfigError, EngineError, GenerationError};
pub use mode_switch::{ModeSwitchOutcome, ModeSwitcher, SqlBufferChange};
pub use sql_generator::{generate_default_sql, generate_sql, GeneratedSql, GenerationOptions, SortDirection, SortSpec};
pub use state::{EditOrigin, LastExecutedSnapshot, QueryMode, QueryState, TimeRange};
