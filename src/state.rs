//! Query state owned by the UI layer and the snapshot of the last executed query.

use serde::{Deserialize, Serialize};

/// Surface syntax of the query editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// The structured filter syntax, e.g. `level="error" and status>=500`.
    Filter,
    Sql,
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryMode::Filter => write!(f, "filter"),
            QueryMode::Sql => write!(f, "sql"),
        }
    }
}

impl std::str::FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "filter" => Ok(QueryMode::Filter),
            "sql" => Ok(QueryMode::Sql),
            other => Err(format!("unknown query mode '{}'", other)),
        }
    }
}

/// Time window in Unix epoch milliseconds, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Canonical serialized form used for change detection.
    pub fn serialized(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{}..{}", self.start, self.end))
    }
}

/// Where the current editor text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOrigin {
    /// Typed or explicitly changed by the user.
    User,
    /// Side effect of a programmatic transition such as a mode switch.
    Automatic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryState {
    pub mode: QueryMode,
    pub filter_text: String,
    pub sql_text: String,
    pub time_range: TimeRange,
    pub row_limit: u64,
    /// Set when the text was restored from a persisted or shared link rather than typed.
    pub from_persisted_source: bool,
}

impl QueryState {
    pub fn new(time_range: TimeRange, row_limit: u64) -> Self {
        Self {
            mode: QueryMode::Filter,
            filter_text: String::new(),
            sql_text: String::new(),
            time_range,
            row_limit,
            from_persisted_source: false,
        }
    }

    pub fn text_for(&self, mode: QueryMode) -> &str {
        match mode {
            QueryMode::Filter => &self.filter_text,
            QueryMode::Sql => &self.sql_text,
        }
    }

    pub fn active_text(&self) -> &str {
        self.text_for(self.mode)
    }

    /// Replaces the active-mode text as a user edit.
    pub fn edit_active_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        match self.mode {
            QueryMode::Filter => self.filter_text = text,
            QueryMode::Sql => self.sql_text = text,
        }
        self.from_persisted_source = false;
    }

    /// Restores text from a shared link or saved query.
    pub fn load_persisted(&mut self, mode: QueryMode, text: impl Into<String>) {
        self.mode = mode;
        match mode {
            QueryMode::Filter => self.filter_text = text.into(),
            QueryMode::Sql => self.sql_text = text.into(),
        }
        self.from_persisted_source = true;
    }
}

/// Copy of the [`QueryState`] taken at the last successful execution.
///
/// Snapshots are never mutated; each successful execution replaces the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastExecutedSnapshot {
    pub mode: QueryMode,
    pub filter_text: String,
    pub sql_text: String,
    /// [`TimeRange::serialized`] at execution time.
    pub time_range: String,
    pub row_limit: u64,
}

impl LastExecutedSnapshot {
    pub fn capture(state: &QueryState) -> Self {
        Self {
            mode: state.mode,
            filter_text: state.filter_text.clone(),
            sql_text: state.sql_text.clone(),
            time_range: state.time_range.serialized(),
            row_limit: state.row_limit,
        }
    }

    pub fn text_for(&self, mode: QueryMode) -> &str {
        match mode {
            QueryMode::Filter => &self.filter_text,
            QueryMode::Sql => &self.sql_text,
        }
    }
}

pub(crate) fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_time_range_is_exact() {
        let a = TimeRange::new(1_000, 2_000);
        assert_eq!(a.serialized(), r#"{"start":1000,"end":2000}"#);
        assert_ne!(a.serialized(), TimeRange::new(1_000, 2_001).serialized());
    }

    #[test]
    fn test_edit_and_load_track_origin() {
        let mut state = QueryState::new(TimeRange::new(0, 1), 100);
        state.load_persisted(QueryMode::Sql, "SELECT 1 FROM t");
        assert!(state.from_persisted_source);
        assert_eq!(state.active_text(), "SELECT 1 FROM t");

        state.edit_active_text("SELECT 2 FROM t");
        assert!(!state.from_persisted_source);
        assert_eq!(state.sql_text, "SELECT 2 FROM t");
        assert_eq!(state.filter_text, "");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("SQL".parse::<QueryMode>().unwrap(), QueryMode::Sql);
        assert_eq!(" filter ".parse::<QueryMode>().unwrap(), QueryMode::Filter);
        assert!("lucene".parse::<QueryMode>().is_err());
    }

    #[test]
    fn test_snapshot_captures_state() {
        let mut state = QueryState::new(TimeRange::new(5, 10), 25);
        state.filter_text = "a=1".to_string();
        let snapshot = LastExecutedSnapshot::capture(&state);
        assert_eq!(snapshot.mode, QueryMode::Filter);
        assert_eq!(snapshot.text_for(QueryMode::Filter), "a=1");
        assert_eq!(snapshot.time_range, state.time_range.serialized());
        assert_eq!(snapshot.row_limit, 25);
    }
}
