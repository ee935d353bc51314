//! Decides whether the editor state differs from the last executed query.
//!
//! The result is advisory: the UI uses `dirty` to enable the "run" affordance and shows
//! the individual reasons as diagnostics.

use serde::Serialize;
use tracing::debug;

use crate::collaborators::{TranslationContext, Translator};
use crate::sql_generator::{generate_default_sql, GenerationOptions};
use crate::state::{is_blank, LastExecutedSnapshot, QueryMode, QueryState};

/// Individual change factors, computed independently of each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirtyReasons {
    pub time_range_changed: bool,
    pub limit_changed: bool,
    pub query_changed: bool,
    /// Mode differs from the snapshot and no suppression rule applied.
    pub mode_changed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DirtyState {
    pub dirty: bool,
    pub reasons: DirtyReasons,
}

impl DirtyState {
    fn clean(reasons: DirtyReasons) -> Self {
        Self { dirty: false, reasons }
    }
}

/// Why a mode difference was not counted as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeSuppression {
    BothTextsBlank,
    SnapshotFilterBlank,
    PersistedFilterUnchanged,
    TranslationMatches,
}

/// Evaluate the dirty state of `state` against the last executed `snapshot`.
///
/// `initial_execution_pending` is true until the first execution after page load has
/// completed. `context` is only consulted when the current SQL has to be compared with a
/// fresh translation of the filter text.
pub fn evaluate_dirty(
    state: &QueryState,
    snapshot: Option<&LastExecutedSnapshot>,
    initial_execution_pending: bool,
    translator: &dyn Translator,
    context: Option<&TranslationContext>,
) -> DirtyState {
    if initial_execution_pending && state.from_persisted_source {
        return DirtyState::default();
    }

    let Some(snapshot) = snapshot else {
        let dirty = !is_blank(state.active_text()) && !state.from_persisted_source;
        return DirtyState {
            dirty,
            reasons: DirtyReasons { query_changed: dirty, ..DirtyReasons::default() },
        };
    };

    let time_range_changed = state.time_range.serialized() != snapshot.time_range;
    let limit_changed = state.row_limit != snapshot.row_limit;
    let query_changed = text_changed(state.active_text(), snapshot.text_for(state.mode));

    let mut reasons = DirtyReasons {
        time_range_changed,
        limit_changed,
        query_changed,
        mode_changed: false,
    };

    if snapshot.mode != state.mode {
        match mode_switch_suppression(state, snapshot, translator, context) {
            Some(ModeSuppression::BothTextsBlank) => {
                debug!("mode switch with blank editors, not dirty");
                reasons.query_changed = false;
                return DirtyState::clean(reasons);
            }
            Some(rule) => {
                // Same query in the other syntax unless the user has since edited the SQL.
                debug!(?rule, "mode switch suppressed");
                if sql_is_derived(state, snapshot, translator, context) {
                    reasons.query_changed = false;
                }
            }
            None => reasons.mode_changed = true,
        }
    }

    DirtyState {
        dirty: reasons.time_range_changed || reasons.limit_changed || reasons.query_changed || reasons.mode_changed,
        reasons,
    }
}

fn mode_switch_suppression(
    state: &QueryState,
    snapshot: &LastExecutedSnapshot,
    translator: &dyn Translator,
    context: Option<&TranslationContext>,
) -> Option<ModeSuppression> {
    if is_blank(&state.filter_text) && is_blank(&state.sql_text) {
        return Some(ModeSuppression::BothTextsBlank);
    }

    let filter_to_sql = snapshot.mode == QueryMode::Filter && state.mode == QueryMode::Sql;
    if filter_to_sql && is_blank(&snapshot.filter_text) {
        return Some(ModeSuppression::SnapshotFilterBlank);
    }
    if filter_to_sql
        && state.from_persisted_source
        && state.filter_text.trim() == snapshot.filter_text.trim()
    {
        return Some(ModeSuppression::PersistedFilterUnchanged);
    }

    if state.mode == QueryMode::Sql && !is_blank(&state.filter_text) {
        if let Some(context) = context {
            match translator.translate(&state.filter_text, context) {
                Ok(sql) if sql.trim() == state.sql_text.trim() => {
                    return Some(ModeSuppression::TranslationMatches);
                }
                Ok(_) => {}
                Err(e) => debug!(error = %e, "re-translation failed during dirty check"),
            }
        }
    }

    None
}

/// True while the SQL buffer still holds what a mode switch would install: the executed
/// SQL, the default query for a blank filter, or the translation of the filter text.
fn sql_is_derived(
    state: &QueryState,
    snapshot: &LastExecutedSnapshot,
    translator: &dyn Translator,
    context: Option<&TranslationContext>,
) -> bool {
    let current = state.sql_text.trim();
    if current == snapshot.sql_text.trim() {
        return true;
    }
    let Some(context) = context else {
        return false;
    };
    if is_blank(&state.filter_text) {
        generate_default_sql(&GenerationOptions::from(context)).is_ok_and(|generated| generated.sql.trim() == current)
    } else {
        translator
            .translate(&state.filter_text, context)
            .is_ok_and(|sql| sql.trim() == current)
    }
}

/// Trimmed comparison; two blank strings never count as a change.
fn text_changed(current: &str, previous: &str) -> bool {
    let current = current.trim();
    let previous = previous.trim();
    current != previous && !(current.is_empty() && previous.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{SourceMetadata, TranslationError};
    use crate::state::TimeRange;

    /// Translates `a=1` to a fixed statement and rejects everything else.
    struct FixedTranslator;

    const TRANSLATED: &str = "SELECT * FROM logs.app WHERE a = 1 LIMIT 100";

    impl Translator for FixedTranslator {
        fn translate(&self, text: &str, _context: &TranslationContext) -> Result<String, TranslationError> {
            if text.trim() == "a=1" {
                Ok(TRANSLATED.to_string())
            } else {
                Err(TranslationError::new("unsupported"))
            }
        }
    }

    fn context() -> TranslationContext {
        TranslationContext {
            source: SourceMetadata::new("logs", "app"),
            time_range: TimeRange::new(0, 1000),
            limit: 100,
        }
    }

    fn base_state() -> QueryState {
        let mut state = QueryState::new(TimeRange::new(0, 1000), 100);
        state.filter_text = "a=1".to_string();
        state
    }

    fn evaluate(state: &QueryState, snapshot: Option<&LastExecutedSnapshot>) -> DirtyState {
        evaluate_dirty(state, snapshot, false, &FixedTranslator, Some(&context()))
    }

    #[test]
    fn test_pending_persisted_load_is_never_dirty() {
        let mut state = base_state();
        state.from_persisted_source = true;
        state.row_limit = 7;
        let snapshot = LastExecutedSnapshot::capture(&base_state());
        let result = evaluate_dirty(&state, Some(&snapshot), true, &FixedTranslator, Some(&context()));
        assert_eq!(result, DirtyState::default());
    }

    #[test]
    fn test_no_snapshot() {
        let mut state = base_state();
        assert!(evaluate(&state, None).dirty);

        state.from_persisted_source = true;
        assert!(!evaluate(&state, None).dirty);

        state.from_persisted_source = false;
        state.filter_text = "   ".to_string();
        assert!(!evaluate(&state, None).dirty);
    }

    #[test]
    fn test_unchanged_state_is_clean() {
        let state = base_state();
        let snapshot = LastExecutedSnapshot::capture(&state);
        assert_eq!(evaluate(&state, Some(&snapshot)), DirtyState::default());
    }

    #[test]
    fn test_limit_change_only() {
        let snapshot = LastExecutedSnapshot::capture(&base_state());
        let mut state = base_state();
        state.row_limit = 500;

        let result = evaluate(&state, Some(&snapshot));
        assert!(result.dirty);
        assert!(result.reasons.limit_changed);
        assert!(!result.reasons.query_changed);
        assert!(!result.reasons.time_range_changed);
        assert!(!result.reasons.mode_changed);
    }

    #[test]
    fn test_time_range_change_is_exact() {
        let snapshot = LastExecutedSnapshot::capture(&base_state());
        let mut state = base_state();
        state.time_range = TimeRange::new(0, 1001);

        let result = evaluate(&state, Some(&snapshot));
        assert!(result.dirty);
        assert!(result.reasons.time_range_changed);
    }

    #[test]
    fn test_whitespace_edits_are_not_changes() {
        let snapshot = LastExecutedSnapshot::capture(&base_state());
        let mut state = base_state();
        state.filter_text = "  a=1 \n".to_string();
        assert!(!evaluate(&state, Some(&snapshot)).dirty);

        state.filter_text = "a=2".to_string();
        let result = evaluate(&state, Some(&snapshot));
        assert!(result.dirty);
        assert!(result.reasons.query_changed);
    }

    #[test]
    fn test_translation_match_suppresses_mode_switch() {
        let snapshot = LastExecutedSnapshot::capture(&base_state());
        let mut state = base_state();
        state.mode = QueryMode::Sql;
        state.sql_text = format!("  {}\n", TRANSLATED);

        let result = evaluate(&state, Some(&snapshot));
        assert!(!result.reasons.mode_changed);
        assert!(!result.dirty);
    }

    #[test]
    fn test_suppressed_switch_still_reports_limit_change() {
        let snapshot = LastExecutedSnapshot::capture(&base_state());
        let mut state = base_state();
        state.mode = QueryMode::Sql;
        state.sql_text = TRANSLATED.to_string();
        state.row_limit = 10;

        let result = evaluate(&state, Some(&snapshot));
        assert!(!result.reasons.mode_changed);
        assert!(result.reasons.limit_changed);
        assert!(result.dirty);
    }

    #[test]
    fn test_edited_sql_after_switch_is_dirty() {
        let snapshot = LastExecutedSnapshot::capture(&base_state());
        let mut state = base_state();
        state.mode = QueryMode::Sql;
        state.sql_text = "SELECT * FROM logs.app WHERE a = 2".to_string();

        let result = evaluate(&state, Some(&snapshot));
        assert!(result.reasons.mode_changed);
        assert!(result.dirty);
    }

    #[test]
    fn test_translation_error_falls_through() {
        let mut executed = base_state();
        executed.filter_text = "b=2".to_string();
        let snapshot = LastExecutedSnapshot::capture(&executed);

        let mut state = executed.clone();
        state.mode = QueryMode::Sql;
        state.sql_text = "SELECT 1 FROM t".to_string();

        let result = evaluate(&state, Some(&snapshot));
        assert!(result.reasons.mode_changed);
        assert!(result.dirty);
    }

    #[test]
    fn test_blank_to_blank_switch_is_never_dirty() {
        let mut executed = base_state();
        executed.filter_text = "  ".to_string();
        executed.sql_text = "SELECT 1 FROM t".to_string();
        executed.mode = QueryMode::Sql;
        let snapshot = LastExecutedSnapshot::capture(&executed);

        let mut state = QueryState::new(TimeRange::new(5, 6), 3);
        state.mode = QueryMode::Filter;

        let result = evaluate(&state, Some(&snapshot));
        assert!(!result.dirty);
        assert!(!result.reasons.mode_changed);
        assert!(!result.reasons.query_changed);
    }

    #[test]
    fn test_switch_from_blank_filter_snapshot() {
        let mut executed = base_state();
        executed.filter_text = String::new();
        let snapshot = LastExecutedSnapshot::capture(&executed);

        let mut state = executed.clone();
        state.mode = QueryMode::Sql;
        state.sql_text = generate_default_sql(&GenerationOptions::from(&context())).unwrap().sql;

        assert_eq!(evaluate(&state, Some(&snapshot)), DirtyState::default());
    }

    #[test]
    fn test_sql_edited_after_blank_filter_switch_is_dirty() {
        let mut executed = base_state();
        executed.filter_text = String::new();
        let snapshot = LastExecutedSnapshot::capture(&executed);

        let mut state = executed.clone();
        state.mode = QueryMode::Sql;
        state.sql_text = "SELECT * FROM logs.other WHERE level = 'error'".to_string();

        let result = evaluate(&state, Some(&snapshot));
        assert!(result.dirty);
        assert!(result.reasons.query_changed);
        assert!(!result.reasons.mode_changed);
    }

    #[test]
    fn test_persisted_filter_unchanged_after_switch() {
        let mut executed = base_state();
        executed.filter_text = "b=2".to_string();
        executed.sql_text = "SELECT something FROM elsewhere".to_string();
        let snapshot = LastExecutedSnapshot::capture(&executed);

        let mut state = executed.clone();
        state.mode = QueryMode::Sql;
        state.from_persisted_source = true;

        assert!(!evaluate(&state, Some(&snapshot)).dirty);

        state.sql_text = "SELECT something FROM somewhere_else".to_string();
        let edited = evaluate(&state, Some(&snapshot));
        assert!(edited.dirty);
        assert!(!edited.reasons.mode_changed);

        state.sql_text = executed.sql_text.clone();
        state.from_persisted_source = false;
        assert!(evaluate(&state, Some(&snapshot)).dirty);
    }
}
