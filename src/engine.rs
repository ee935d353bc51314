//! [`QueryStateEngine`]: the facade a UI binding drives.
//!
//! The engine holds no editor state of its own. Every operation receives the caller's
//! [`QueryState`]; the engine only keeps what survives between operations: the last
//! executed snapshot, whether the first execution is still pending, the recompute
//! debouncer and the execution tracker.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::collaborators::{
    ExecutionFailure, PrimarySyntaxValidator, QueryExecutor, QueryOutput, SourceMetadataProvider,
    SqlValidator, TranslationContext, Translator,
};
use crate::condition::FilterCondition;
use crate::config::{EngineConfig, SourceCatalog};
use crate::dirty::{evaluate_dirty, DirtyState};
use crate::error::EngineError;
use crate::mode_switch::{ModeSwitchOutcome, ModeSwitcher};
use crate::scheduling::{ExecutionTracker, RecomputeDebouncer, RecomputeTicket, RequestId};
use crate::sql_analyzer::{rewrite_limit, rewrite_time_range, SqlAnalyzer};
use crate::sql_compiler::FilterSyntax;
use crate::sql_generator::{generate_default_sql, generate_sql, GeneratedSql, GenerationOptions, SortSpec};
use crate::state::{is_blank, EditOrigin, LastExecutedSnapshot, QueryMode, QueryState};

/// An execution that has been started but whose result has not been recorded yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingExecution {
    pub id: RequestId,
    pub sql: String,
    snapshot: LastExecutedSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(QueryOutput),
    /// A newer execution was started before this one finished; its result was discarded.
    Superseded,
}

/// Result of a debounced recomputation that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recomputed {
    pub ticket: RecomputeTicket,
    /// The SQL buffer was patched.
    pub sql_updated: bool,
}

pub struct QueryStateEngine<S = SourceCatalog> {
    sources: S,
    translator: Box<dyn Translator>,
    primary_validator: Box<dyn PrimarySyntaxValidator>,
    sql_validator: Box<dyn SqlValidator>,
    snapshot: Option<LastExecutedSnapshot>,
    initial_execution_pending: bool,
    debouncer: RecomputeDebouncer,
    tracker: ExecutionTracker,
}

impl QueryStateEngine<SourceCatalog> {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_defaults(SourceCatalog::from_config(config), config.debounce())
    }
}

impl<S: SourceMetadataProvider> QueryStateEngine<S> {
    pub fn new(
        sources: S,
        translator: Box<dyn Translator>,
        primary_validator: Box<dyn PrimarySyntaxValidator>,
        sql_validator: Box<dyn SqlValidator>,
        debounce: Duration,
    ) -> Self {
        Self {
            sources,
            translator,
            primary_validator,
            sql_validator,
            snapshot: None,
            initial_execution_pending: true,
            debouncer: RecomputeDebouncer::new(debounce),
            tracker: ExecutionTracker::new(),
        }
    }

    /// Engine using the built-in filter syntax and SQL analyzer.
    pub fn with_defaults(sources: S, debounce: Duration) -> Self {
        Self::new(
            sources,
            Box::new(FilterSyntax::new()),
            Box::new(FilterSyntax::new()),
            Box::new(SqlAnalyzer),
            debounce,
        )
    }

    pub fn sources(&self) -> &S {
        &self.sources
    }

    pub fn sources_mut(&mut self) -> &mut S {
        &mut self.sources
    }

    pub fn snapshot(&self) -> Option<&LastExecutedSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn initial_execution_pending(&self) -> bool {
        self.initial_execution_pending
    }

    /// Translation context for the selected source, `None` when no source is selected.
    pub fn context(&self, state: &QueryState) -> Option<TranslationContext> {
        self.sources.current_source().map(|source| TranslationContext {
            source,
            time_range: state.time_range,
            limit: state.row_limit,
        })
    }

    fn require_context(&self, state: &QueryState) -> Result<TranslationContext, EngineError> {
        self.context(state)
            .ok_or(EngineError::MissingContext("no data source selected"))
    }

    pub fn dirty_state(&self, state: &QueryState) -> DirtyState {
        let context = self.context(state);
        evaluate_dirty(
            state,
            self.snapshot.as_ref(),
            self.initial_execution_pending,
            self.translator.as_ref(),
            context.as_ref(),
        )
    }

    pub fn switch_mode(&self, state: &mut QueryState, target: QueryMode, origin: EditOrigin) -> ModeSwitchOutcome {
        let context = self.context(state);
        let switcher = ModeSwitcher {
            translator: self.translator.as_ref(),
            validator: self.primary_validator.as_ref(),
        };
        switcher.switch(state, target, origin, context.as_ref())
    }

    /// SQL for the structured filter builder over the selected source.
    pub fn generate_sql(
        &self,
        state: &QueryState,
        conditions: &[FilterCondition],
        sort: Option<SortSpec>,
    ) -> Result<GeneratedSql, EngineError> {
        let context = self.require_context(state)?;
        let mut options = GenerationOptions::from(&context);
        options.sort = sort;
        Ok(generate_sql(&options, conditions)?)
    }

    pub fn default_sql(&self, state: &QueryState) -> Result<GeneratedSql, EngineError> {
        let context = self.require_context(state)?;
        Ok(generate_default_sql(&GenerationOptions::from(&context))?)
    }

    /// The statement that would be sent to the backend for `state`.
    ///
    /// In SQL mode the user's statement is validated and its row limit is patched to
    /// `state.row_limit` where that can be done safely; otherwise it is used verbatim.
    pub fn sql_for_execution(&self, state: &QueryState) -> Result<String, EngineError> {
        match state.mode {
            QueryMode::Filter => {
                let context = self.require_context(state)?;
                if is_blank(&state.filter_text) {
                    return Ok(generate_default_sql(&GenerationOptions::from(&context))?.sql);
                }
                self.primary_validator
                    .validate(&state.filter_text)
                    .map_err(|e| EngineError::Validation(e.message))?;
                self.translator
                    .translate(&state.filter_text, &context)
                    .map_err(|e| EngineError::Translation(e.message))
            }
            QueryMode::Sql => {
                let analysis = self
                    .sql_validator
                    .validate(&state.sql_text)
                    .map_err(|e| EngineError::Validation(e.message))?;
                match rewrite_limit(&state.sql_text, &analysis, state.row_limit) {
                    Some(patched) => {
                        debug!(limit = state.row_limit, "patched LIMIT for execution");
                        Ok(patched)
                    }
                    None => Ok(state.sql_text.clone()),
                }
            }
        }
    }

    /// Starts an execution. Any execution started earlier becomes stale.
    ///
    /// Fails with [`EngineError::MissingContext`] when no team or source is selected.
    pub fn begin_execution(&mut self, state: &QueryState, team: Option<&str>) -> Result<PendingExecution, EngineError> {
        if team.map_or(true, is_blank) {
            return Err(EngineError::MissingContext("no team selected"));
        }
        self.require_context(state)?;

        let sql = self.sql_for_execution(state)?;
        let id = self.tracker.begin();
        debug!(request = ?id, %sql, "execution started");

        Ok(PendingExecution {
            id,
            sql,
            snapshot: LastExecutedSnapshot::capture(state),
        })
    }

    /// Records the backend's answer for `pending`.
    pub fn complete_execution(
        &mut self,
        pending: PendingExecution,
        result: Result<QueryOutput, ExecutionFailure>,
    ) -> Result<ExecutionOutcome, EngineError> {
        if !self.tracker.finish(pending.id) {
            return Ok(ExecutionOutcome::Superseded);
        }
        match result {
            Ok(output) => {
                info!(rows = output.rows.len(), "query executed");
                self.snapshot = Some(pending.snapshot);
                self.initial_execution_pending = false;
                Ok(ExecutionOutcome::Completed(output))
            }
            Err(e) => {
                warn!(error = %e, "query execution failed");
                Err(EngineError::Execution(e.message))
            }
        }
    }

    /// Runs `state` to completion on `executor`.
    pub fn execute(
        &mut self,
        state: &QueryState,
        team: Option<&str>,
        executor: &dyn QueryExecutor,
    ) -> Result<ExecutionOutcome, EngineError> {
        let pending = self.begin_execution(state, team)?;
        let result = executor.execute(&pending.sql);
        self.complete_execution(pending, result)
    }

    /// Replaces the snapshot as if `state` had just been executed successfully.
    pub fn record_execution(&mut self, state: &QueryState) {
        self.snapshot = Some(LastExecutedSnapshot::capture(state));
        self.initial_execution_pending = false;
    }

    /// Call after a time-range or limit edit. Earlier pending recomputations are dropped.
    pub fn schedule_recompute(&mut self, now: Instant) -> RecomputeTicket {
        self.debouncer.schedule(now)
    }

    pub fn cancel_recompute(&mut self) -> Option<RecomputeTicket> {
        self.debouncer.cancel()
    }

    /// Applies the pending recomputation once its delay has elapsed.
    ///
    /// In SQL mode the time-bound literals and the LIMIT of the statement are patched
    /// in place. Statements that cannot be patched safely are left unmodified. Filter
    /// text needs no recomputation since it is translated at execution time.
    pub fn poll_recompute(&mut self, state: &mut QueryState, now: Instant) -> Option<Recomputed> {
        let ticket = self.debouncer.poll(now)?;
        if state.mode != QueryMode::Sql || is_blank(&state.sql_text) {
            return Some(Recomputed { ticket, sql_updated: false });
        }

        let mut sql = state.sql_text.clone();
        let mut updated = false;

        let analysis = self.sql_validator.analyze(&sql);
        if let Some(patched) = rewrite_time_range(&sql, &analysis, &state.time_range) {
            sql = patched;
            updated = true;
        }

        let analysis = self.sql_validator.analyze(&sql);
        if let Some(patched) = rewrite_limit(&sql, &analysis, state.row_limit) {
            sql = patched;
            updated = true;
        }

        if updated {
            debug!(?ticket, "recomputed SQL buffer");
            state.sql_text = sql;
        } else {
            debug!(?ticket, "SQL left unmodified by recompute");
        }
        Some(Recomputed { ticket, sql_updated: updated })
    }

    /// Restores text from a shared link or saved query.
    pub fn load_persisted(&self, state: &mut QueryState, mode: QueryMode, text: &str) {
        state.load_persisted(mode, text);
    }

    /// Applies a user edit to the active editor.
    pub fn edit_text(&self, state: &mut QueryState, text: &str) {
        state.edit_active_text(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::SourceMetadata;
    use crate::mode_switch::SqlBufferChange;
    use crate::state::TimeRange;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    /// Records every statement and answers with one row.
    #[derive(Default)]
    struct RecordingExecutor {
        seen: RefCell<Vec<String>>,
    }

    impl QueryExecutor for RecordingExecutor {
        fn execute(&self, sql: &str) -> Result<QueryOutput, ExecutionFailure> {
            self.seen.borrow_mut().push(sql.to_string());
            Ok(QueryOutput { rows: vec![serde_json::json!({ "n": 1 })] })
        }
    }

    struct FailingExecutor;

    impl QueryExecutor for FailingExecutor {
        fn execute(&self, _sql: &str) -> Result<QueryOutput, ExecutionFailure> {
            Err(ExecutionFailure::new("backend timeout"))
        }
    }

    fn catalog() -> SourceCatalog {
        let mut sources = BTreeMap::new();
        sources.insert("app".to_string(), SourceMetadata::new("logs", "app"));
        SourceCatalog::new(sources, Some("app".to_string()))
    }

    fn engine() -> QueryStateEngine {
        QueryStateEngine::with_defaults(catalog(), Duration::from_millis(300))
    }

    fn state() -> QueryState {
        QueryState::new(TimeRange::new(0, 1000), 50)
    }

    const DEFAULT_SQL: &str = "SELECT *\nFROM logs.app\nWHERE timestamp >= toDateTime64('1970-01-01 00:00:00.000', 3)\n  AND timestamp <= toDateTime64('1970-01-01 00:00:01.000', 3)\nORDER BY timestamp DESC\nLIMIT 50";

    #[test]
    fn test_default_sql_matches_exact_format() {
        assert_eq!(engine().default_sql(&state()).unwrap().sql, DEFAULT_SQL);
    }

    #[test]
    fn test_generate_sql_uses_selected_source() {
        let conditions = vec![FilterCondition::new("status", "=", 200)];
        let generated = engine().generate_sql(&state(), &conditions, None).unwrap();
        assert!(generated.sql.contains("\n  AND status = 200\n"));
        assert_eq!(generated.applied_conditions, 1);
    }

    #[test]
    fn test_generation_without_source_is_refused() {
        let mut engine = engine();
        engine.sources_mut().clear_selection();
        assert_eq!(
            engine.default_sql(&state()),
            Err(EngineError::MissingContext("no data source selected"))
        );
    }

    #[test]
    fn test_execute_requires_team_and_source() {
        let mut engine = engine();
        let executor = RecordingExecutor::default();

        assert_eq!(
            engine.execute(&state(), None, &executor),
            Err(EngineError::MissingContext("no team selected"))
        );
        assert_eq!(
            engine.execute(&state(), Some("  "), &executor),
            Err(EngineError::MissingContext("no team selected"))
        );

        engine.sources_mut().clear_selection();
        assert_eq!(
            engine.execute(&state(), Some("core"), &executor),
            Err(EngineError::MissingContext("no data source selected"))
        );
        assert!(executor.seen.borrow().is_empty());
    }

    #[test]
    fn test_execute_blank_filter_runs_default_sql_and_records_snapshot() {
        let mut engine = engine();
        let executor = RecordingExecutor::default();
        let s = state();

        let outcome = engine.execute(&s, Some("core"), &executor).unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Completed(ref out) if out.rows.len() == 1));
        assert_eq!(executor.seen.borrow().as_slice(), [DEFAULT_SQL.to_string()]);
        assert_eq!(engine.snapshot(), Some(&LastExecutedSnapshot::capture(&s)));
        assert!(!engine.initial_execution_pending());
        assert!(!engine.dirty_state(&s).dirty);
    }

    #[test]
    fn test_invalid_filter_is_not_executed() {
        let mut engine = engine();
        let executor = RecordingExecutor::default();
        let mut s = state();
        s.filter_text = "level=".to_string();

        let result = engine.execute(&s, Some("core"), &executor);
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(executor.seen.borrow().is_empty());
        assert!(engine.snapshot().is_none());
    }

    #[test]
    fn test_failed_execution_keeps_previous_snapshot() {
        let mut engine = engine();
        let s = state();
        engine.record_execution(&s);

        let mut edited = s.clone();
        edited.row_limit = 10;
        let result = engine.execute(&edited, Some("core"), &FailingExecutor);
        assert_eq!(result, Err(EngineError::Execution("backend timeout".to_string())));
        assert_eq!(engine.snapshot(), Some(&LastExecutedSnapshot::capture(&s)));
    }

    #[test]
    fn test_superseded_execution_is_discarded() {
        let mut engine = engine();
        let mut first_state = state();
        first_state.filter_text = "a=1".to_string();
        let mut second_state = state();
        second_state.filter_text = "a=2".to_string();

        let first = engine.begin_execution(&first_state, Some("core")).unwrap();
        let second = engine.begin_execution(&second_state, Some("core")).unwrap();

        let late = engine.complete_execution(first, Ok(QueryOutput::default())).unwrap();
        assert_eq!(late, ExecutionOutcome::Superseded);
        assert!(engine.snapshot().is_none());

        let current = engine.complete_execution(second, Ok(QueryOutput::default())).unwrap();
        assert_eq!(current, ExecutionOutcome::Completed(QueryOutput::default()));
        assert_eq!(engine.snapshot().map(|s| s.filter_text.as_str()), Some("a=2"));
    }

    #[test]
    fn test_sql_mode_limit_is_patched_for_execution() {
        let engine = engine();
        let mut s = state();
        s.mode = QueryMode::Sql;
        s.sql_text = "SELECT * FROM logs.app WHERE level = 'error' LIMIT 10".to_string();

        assert_eq!(
            engine.sql_for_execution(&s).unwrap(),
            "SELECT * FROM logs.app WHERE level = 'error' LIMIT 50"
        );

        s.sql_text = "DELETE FROM logs.app".to_string();
        assert!(matches!(engine.sql_for_execution(&s), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_switch_then_unchanged_is_clean() {
        let mut engine = engine();
        let mut s = state();
        engine.edit_text(&mut s, r#"level="error""#);
        engine.record_execution(&s);

        let outcome = engine.switch_mode(&mut s, QueryMode::Sql, EditOrigin::User);
        assert_eq!(outcome, ModeSwitchOutcome::Switched { sql: SqlBufferChange::Translated });

        let dirty = engine.dirty_state(&s);
        assert!(!dirty.reasons.mode_changed);
        assert!(!dirty.dirty);

        s.row_limit = 10;
        let dirty = engine.dirty_state(&s);
        assert!(dirty.reasons.limit_changed);
        assert!(dirty.dirty);
    }

    #[test]
    fn test_persisted_load_is_clean_until_edited() {
        let engine = engine();
        let mut s = state();
        engine.load_persisted(&mut s, QueryMode::Filter, "a=1");
        assert!(!engine.dirty_state(&s).dirty);

        engine.edit_text(&mut s, "a=2");
        assert!(engine.dirty_state(&s).dirty);
    }

    #[test]
    fn test_recompute_patches_sql_after_debounce() {
        let mut engine = engine();
        let start = Instant::now();
        let mut s = state();
        s.mode = QueryMode::Sql;
        s.sql_text = DEFAULT_SQL.to_string();

        s.time_range = TimeRange::new(1_700_000_000_123, 1_700_000_060_000);
        engine.schedule_recompute(start);
        s.row_limit = 200;
        let ticket = engine.schedule_recompute(start + Duration::from_millis(100));

        assert_eq!(engine.poll_recompute(&mut s, start + Duration::from_millis(350)), None);
        let fired = engine.poll_recompute(&mut s, start + Duration::from_millis(400)).unwrap();
        assert_eq!(fired, Recomputed { ticket, sql_updated: true });

        assert!(s.sql_text.contains("timestamp >= toDateTime64('2023-11-14 22:13:20.123', 3)"));
        assert!(s.sql_text.contains("timestamp <= toDateTime64('2023-11-14 22:14:20.000', 3)"));
        assert!(s.sql_text.ends_with("LIMIT 200"));
        assert_eq!(engine.poll_recompute(&mut s, start + Duration::from_secs(10)), None);
    }

    #[test]
    fn test_sql_typed_after_default_switch_is_dirty() {
        let mut engine = engine();
        let mut s = state();
        engine.record_execution(&s);

        engine.switch_mode(&mut s, QueryMode::Sql, EditOrigin::User);
        assert_eq!(s.sql_text, DEFAULT_SQL);
        assert!(!engine.dirty_state(&s).dirty);

        engine.edit_text(&mut s, "SELECT * FROM logs.other WHERE level = 'error'");
        let dirty = engine.dirty_state(&s);
        assert!(dirty.dirty);
        assert!(dirty.reasons.query_changed);
    }

    #[test]
    fn test_recompute_patches_translated_sql() {
        let mut engine = engine();
        let start = Instant::now();
        let mut s = state();
        engine.edit_text(&mut s, r#"level="error""#);
        engine.switch_mode(&mut s, QueryMode::Sql, EditOrigin::User);
        assert!(s.sql_text.contains("toDateTime64('1970-01-01 00:00:00.000', 3)"));

        s.time_range = TimeRange::new(1_700_000_000_123, 1_700_000_060_000);
        engine.schedule_recompute(start);
        let fired = engine.poll_recompute(&mut s, start + Duration::from_secs(1)).unwrap();

        assert!(fired.sql_updated);
        assert!(s.sql_text.contains("`timestamp` >= toDateTime64('2023-11-14 22:13:20.123', 3)"));
        assert!(s.sql_text.contains("`timestamp` <= toDateTime64('2023-11-14 22:14:20.000', 3)"));
        assert!(!s.sql_text.contains("1970-01-01"));
    }

    #[test]
    fn test_recompute_leaves_filter_mode_alone() {
        let mut engine = engine();
        let start = Instant::now();
        let mut s = state();
        s.filter_text = "a=1".to_string();
        let before = s.clone();

        engine.schedule_recompute(start);
        let fired = engine.poll_recompute(&mut s, start + Duration::from_secs(1)).unwrap();
        assert!(!fired.sql_updated);
        assert_eq!(s, before);
    }

    #[test]
    fn test_cancelled_recompute_never_fires() {
        let mut engine = engine();
        let start = Instant::now();
        let mut s = state();
        engine.schedule_recompute(start);
        assert!(engine.cancel_recompute().is_some());
        assert_eq!(engine.poll_recompute(&mut s, start + Duration::from_secs(1)), None);
    }
}
