//! Error types shared across the engine.

use thiserror::Error;

/// Failure of the SQL fragment generator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("timestamp {0} ms is out of the representable range")]
    TimestampOutOfRange(i64),

    #[error("database and table names must not be empty")]
    MissingTable,

    #[error("generated statement failed self-check: {0}")]
    SelfCheck(String),
}

/// Failure to load or validate an [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("配置文件不存在: {0}")]
    NotFound(String),

    #[error("无法读取配置文件 {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("无法解析JSON配置文件 {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("配置错误: {0}")]
    Invalid(String),
}

/// Errors surfaced by [`QueryStateEngine`](crate::engine::QueryStateEngine).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Execution was requested without a team or data source selected.
    #[error("cannot execute query: {0}")]
    MissingContext(&'static str),

    #[error("invalid query: {0}")]
    Validation(String),

    #[error("translation failed: {0}")]
    Translation(String),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("query execution failed: {0}")]
    Execution(String),
}
