//! Switching the editor between filter syntax and SQL.
//!
//! Filter → SQL translates the filter text and installs the result in the SQL buffer.
//! SQL → filter only flips the mode; SQL is never translated back.

use tracing::{debug, warn};

use crate::collaborators::{PrimarySyntaxValidator, TranslationContext, Translator, ValidationError};
use crate::sql_generator::{generate_default_sql, GenerationOptions};
use crate::state::{is_blank, EditOrigin, QueryMode, QueryState};

/// What happened to the SQL buffer during a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBufferChange {
    /// Overwritten with the translated filter.
    Translated,
    /// Filled with the time-bounded default query.
    DefaultInstalled,
    /// Existing SQL text kept.
    Kept,
    /// Still empty: no translation and no default query could be produced.
    LeftEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeSwitchOutcome {
    /// Already in the requested mode.
    Unchanged,
    Switched { sql: SqlBufferChange },
    /// The filter text is invalid; the state was not modified.
    Rejected(ValidationError),
}

pub struct ModeSwitcher<'a> {
    pub translator: &'a dyn Translator,
    pub validator: &'a dyn PrimarySyntaxValidator,
}

impl ModeSwitcher<'_> {
    /// Switch `state` to `target`.
    ///
    /// `context` describes the selected source; without one no SQL can be produced and
    /// the SQL buffer is left as it is. A `User` origin clears the persisted-source mark,
    /// an `Automatic` one preserves it.
    pub fn switch(
        &self,
        state: &mut QueryState,
        target: QueryMode,
        origin: EditOrigin,
        context: Option<&TranslationContext>,
    ) -> ModeSwitchOutcome {
        if state.mode == target {
            return ModeSwitchOutcome::Unchanged;
        }

        let change = match target {
            QueryMode::Sql => match self.sql_for_switch(state, context) {
                Ok((change, Some(sql))) => {
                    state.sql_text = sql;
                    change
                }
                Ok((change, None)) => change,
                Err(e) => {
                    debug!(error = %e, "mode switch rejected");
                    return ModeSwitchOutcome::Rejected(e);
                }
            },
            QueryMode::Filter => SqlBufferChange::Kept,
        };

        state.mode = target;
        if origin == EditOrigin::User {
            state.from_persisted_source = false;
        }
        debug!(mode = %target, ?change, "switched query mode");

        ModeSwitchOutcome::Switched { sql: change }
    }

    /// Works out the SQL buffer for a filter → SQL switch without touching the state.
    fn sql_for_switch(
        &self,
        state: &QueryState,
        context: Option<&TranslationContext>,
    ) -> Result<(SqlBufferChange, Option<String>), ValidationError> {
        let has_sql = !is_blank(&state.sql_text);

        if is_blank(&state.filter_text) {
            if has_sql {
                return Ok((SqlBufferChange::Kept, None));
            }
            return Ok(default_sql(context));
        }

        self.validator.validate(&state.filter_text)?;

        let Some(context) = context else {
            warn!("no source selected, cannot translate filter");
            return Ok(fallback(has_sql, None));
        };

        match self.translator.translate(&state.filter_text, context) {
            Ok(sql) => Ok((SqlBufferChange::Translated, Some(sql))),
            Err(e) => {
                warn!(error = %e, "filter translation failed during mode switch");
                Ok(fallback(has_sql, Some(context)))
            }
        }
    }
}

fn fallback(has_sql: bool, context: Option<&TranslationContext>) -> (SqlBufferChange, Option<String>) {
    if has_sql {
        (SqlBufferChange::Kept, None)
    } else {
        default_sql(context)
    }
}

fn default_sql(context: Option<&TranslationContext>) -> (SqlBufferChange, Option<String>) {
    let Some(context) = context else {
        return (SqlBufferChange::LeftEmpty, None);
    };
    match generate_default_sql(&GenerationOptions::from(context)) {
        Ok(generated) => (SqlBufferChange::DefaultInstalled, Some(generated.sql)),
        Err(e) => {
            warn!(error = %e, "default SQL generation failed");
            (SqlBufferChange::LeftEmpty, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{SourceMetadata, TranslationError};
    use crate::sql_compiler::FilterSyntax;
    use crate::state::TimeRange;

    struct FailingTranslator;

    impl Translator for FailingTranslator {
        fn translate(&self, _text: &str, _context: &TranslationContext) -> Result<String, TranslationError> {
            Err(TranslationError::new("backend unavailable"))
        }
    }

    fn context() -> TranslationContext {
        TranslationContext {
            source: SourceMetadata::new("logs", "app"),
            time_range: TimeRange::new(0, 1000),
            limit: 50,
        }
    }

    fn state(filter: &str, sql: &str) -> QueryState {
        let mut state = QueryState::new(TimeRange::new(0, 1000), 50);
        state.filter_text = filter.to_string();
        state.sql_text = sql.to_string();
        state
    }

    const DEFAULT_SQL: &str = "SELECT *\nFROM logs.app\nWHERE timestamp >= toDateTime64('1970-01-01 00:00:00.000', 3)\n  AND timestamp <= toDateTime64('1970-01-01 00:00:01.000', 3)\nORDER BY timestamp DESC\nLIMIT 50";

    #[test]
    fn test_same_mode_is_noop() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &syntax, validator: &syntax };
        let mut s = state("a=1", "");
        let before = s.clone();
        assert_eq!(
            switcher.switch(&mut s, QueryMode::Filter, EditOrigin::User, Some(&context())),
            ModeSwitchOutcome::Unchanged
        );
        assert_eq!(s, before);
    }

    #[test]
    fn test_blank_filter_installs_default_sql() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &syntax, validator: &syntax };
        let mut s = state("", "");
        let outcome = switcher.switch(&mut s, QueryMode::Sql, EditOrigin::User, Some(&context()));

        assert_eq!(outcome, ModeSwitchOutcome::Switched { sql: SqlBufferChange::DefaultInstalled });
        assert_eq!(s.mode, QueryMode::Sql);
        assert_eq!(s.sql_text, DEFAULT_SQL);
    }

    #[test]
    fn test_blank_filter_keeps_existing_sql() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &syntax, validator: &syntax };
        let mut s = state(" ", "SELECT 1 FROM t");
        let outcome = switcher.switch(&mut s, QueryMode::Sql, EditOrigin::User, Some(&context()));

        assert_eq!(outcome, ModeSwitchOutcome::Switched { sql: SqlBufferChange::Kept });
        assert_eq!(s.sql_text, "SELECT 1 FROM t");
    }

    #[test]
    fn test_valid_filter_overwrites_sql_with_translation() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &syntax, validator: &syntax };
        let mut s = state(r#"level="error""#, "SELECT 1 FROM t");
        let outcome = switcher.switch(&mut s, QueryMode::Sql, EditOrigin::User, Some(&context()));

        assert_eq!(outcome, ModeSwitchOutcome::Switched { sql: SqlBufferChange::Translated });
        assert_eq!(s.sql_text, syntax.translate(r#"level="error""#, &context()).unwrap());
    }

    #[test]
    fn test_invalid_filter_aborts_switch() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &syntax, validator: &syntax };
        let mut s = state("level=", "SELECT 1 FROM t");
        let before = s.clone();

        let outcome = switcher.switch(&mut s, QueryMode::Sql, EditOrigin::User, Some(&context()));
        assert!(matches!(outcome, ModeSwitchOutcome::Rejected(_)));
        assert_eq!(s, before);
    }

    #[test]
    fn test_translation_failure_fallbacks() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &FailingTranslator, validator: &syntax };

        let mut empty_sql = state("a=1", "");
        let outcome = switcher.switch(&mut empty_sql, QueryMode::Sql, EditOrigin::User, Some(&context()));
        assert_eq!(outcome, ModeSwitchOutcome::Switched { sql: SqlBufferChange::DefaultInstalled });
        assert_eq!(empty_sql.sql_text, DEFAULT_SQL);

        let mut existing = state("a=1", "SELECT 2 FROM t");
        let outcome = switcher.switch(&mut existing, QueryMode::Sql, EditOrigin::User, Some(&context()));
        assert_eq!(outcome, ModeSwitchOutcome::Switched { sql: SqlBufferChange::Kept });
        assert_eq!(existing.sql_text, "SELECT 2 FROM t");
    }

    #[test]
    fn test_without_source_sql_is_left_empty() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &syntax, validator: &syntax };
        let mut s = state("", "");
        let outcome = switcher.switch(&mut s, QueryMode::Sql, EditOrigin::User, None);
        assert_eq!(outcome, ModeSwitchOutcome::Switched { sql: SqlBufferChange::LeftEmpty });
        assert_eq!(s.mode, QueryMode::Sql);
    }

    #[test]
    fn test_sql_to_filter_only_flips_mode() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &syntax, validator: &syntax };
        let mut s = state("a=1", "SELECT 2 FROM t");
        s.mode = QueryMode::Sql;
        let outcome = switcher.switch(&mut s, QueryMode::Filter, EditOrigin::User, Some(&context()));
        assert_eq!(outcome, ModeSwitchOutcome::Switched { sql: SqlBufferChange::Kept });
        assert_eq!(s.filter_text, "a=1");
        assert_eq!(s.sql_text, "SELECT 2 FROM t");
    }

    #[test]
    fn test_origin_controls_persisted_mark() {
        let syntax = FilterSyntax::new();
        let switcher = ModeSwitcher { translator: &syntax, validator: &syntax };

        let mut automatic = state("a=1", "");
        automatic.from_persisted_source = true;
        switcher.switch(&mut automatic, QueryMode::Sql, EditOrigin::Automatic, Some(&context()));
        assert!(automatic.from_persisted_source);

        let mut user = state("a=1", "");
        user.from_persisted_source = true;
        switcher.switch(&mut user, QueryMode::Sql, EditOrigin::User, Some(&context()));
        assert!(!user.from_persisted_source);
    }
}
