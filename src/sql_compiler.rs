//! SQL compiler that converts filter-syntax ASTs to ClickHouse queries using sea-query.
//!
//! [`FilterSyntax`] is the engine's built-in [`Translator`] and [`PrimarySyntaxValidator`].

use sea_query::{Asterisk, Expr, Func, Iden, MysqlQueryBuilder, Order, Query, SimpleExpr, Value};
use tracing::debug;

use crate::ast::{CompOp, FilterExpr, Literal};
use crate::collaborators::{
    PrimarySyntaxValidator, TranslationContext, TranslationError, Translator, ValidationError,
};
use crate::parser::parse_filter;
use crate::sql_generator::{format_timestamp, TIMESTAMP_LITERAL_FORMAT};

/// Configuration for SQL optimization
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    /// Minimum number of OR'ed equality checks on one field before converting to IN
    pub max_or_conditions_for_in: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_or_conditions_for_in: 3,
        }
    }
}

/// Table identifier for sea-query
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}

/// Column identifier wrapper
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = s.write_str(&self.0);
    }
}

/// Represents an optimization applied during compilation
#[derive(Debug, Clone, PartialEq)]
pub enum Optimization {
    OrToIn { field: String, value_count: usize },
}

/// Result of SQL compilation with optimization information
#[derive(Debug)]
pub struct CompileResult {
    pub sql: String,
    pub optimizations: Vec<Optimization>,
}

/// Filter-syntax front end: validation plus translation to SQL.
#[derive(Debug, Clone, Default)]
pub struct FilterSyntax {
    config: OptimizationConfig,
}

impl FilterSyntax {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: OptimizationConfig) -> Self {
        Self { config }
    }

    /// Compile filter text into a complete `SELECT` for the context's source and window.
    pub fn compile(&self, text: &str, context: &TranslationContext) -> Result<CompileResult, TranslationError> {
        let filter = parse_filter(text).map_err(|e| TranslationError::new(e.message))?;
        let mut optimizations = Vec::new();

        let ts_field = context.source.timestamp_field.as_str();
        let start = to_datetime64(context.time_range.start)?;
        let end = to_datetime64(context.time_range.end)?;

        let mut condition = Expr::col(ColumnName(ts_field.to_string()))
            .gte(start)
            .and(Expr::col(ColumnName(ts_field.to_string())).lte(end));

        if let Some(filter) = &filter {
            condition = condition.and(self.compile_expr(filter, &mut optimizations));
        }

        let mut select = Query::select();
        select.column(Asterisk);
        if context.source.database.is_empty() {
            select.from(TableName(context.source.table.clone()));
        } else {
            select.from((
                TableName(context.source.database.clone()),
                TableName(context.source.table.clone()),
            ));
        }
        select
            .and_where(condition)
            .order_by(ColumnName(ts_field.to_string()), Order::Desc)
            .limit(context.limit);

        let sql = select.to_string(MysqlQueryBuilder);
        debug!(%sql, ?optimizations, "compiled filter query");

        Ok(CompileResult { sql, optimizations })
    }

    fn compile_expr(&self, expr: &FilterExpr, optimizations: &mut Vec<Optimization>) -> SimpleExpr {
        match expr {
            FilterExpr::Comparison { field, op, value } => self.compile_comparison(&field.0, *op, value),
            FilterExpr::And(left, right) => {
                let left_expr = self.compile_expr(left, optimizations);
                let right_expr = self.compile_expr(right, optimizations);
                left_expr.and(right_expr)
            }
            FilterExpr::Or(left, right) => {
                if let Some((in_expr, opt)) = self.try_optimize_or_to_in(expr) {
                    optimizations.push(opt);
                    in_expr
                } else {
                    let left_expr = self.compile_expr(left, optimizations);
                    let right_expr = self.compile_expr(right, optimizations);
                    left_expr.or(right_expr)
                }
            }
            // sea-query parenthesizes nested AND/OR on its own
            FilterExpr::Grouped(inner) => self.compile_expr(inner, optimizations),
        }
    }

    /// Try to optimize `f="a" or f="b" or f="c"` into `f IN ('a', 'b', 'c')`
    fn try_optimize_or_to_in(&self, expr: &FilterExpr) -> Option<(SimpleExpr, Optimization)> {
        let mut field = None;
        let mut values = Vec::new();
        if !collect_equality_values(expr, &mut field, &mut values) {
            return None;
        }
        let field = field?;

        if values.len() < self.config.max_or_conditions_for_in {
            return None;
        }

        let in_values: Vec<Value> = values.iter().map(|v| literal_to_value(v)).collect();
        let in_expr = Expr::col(ColumnName(field.to_string())).is_in(in_values);
        let optimization = Optimization::OrToIn {
            field: field.to_string(),
            value_count: values.len(),
        };
        Some((in_expr, optimization))
    }

    fn compile_comparison(&self, field: &str, op: CompOp, value: &Literal) -> SimpleExpr {
        let col = Expr::col(ColumnName(field.to_string()));
        let val = literal_to_value(value);

        match op {
            CompOp::Eq => col.eq(val),
            CompOp::NotEq => col.ne(val),
            CompOp::Gt => col.gt(val),
            CompOp::Lt => col.lt(val),
            CompOp::Gte => col.gte(val),
            CompOp::Lte => col.lte(val),
            CompOp::Contains => Expr::expr(position_case_insensitive(field, val)).gt(0),
            CompOp::NotContains => Expr::expr(position_case_insensitive(field, val)).eq(0),
        }
    }
}

/// Collects the values of an OR chain that only compares one field for equality.
/// Returns `false` as soon as the chain mixes fields or operators.
fn collect_equality_values<'a>(
    expr: &'a FilterExpr,
    field: &mut Option<&'a str>,
    values: &mut Vec<&'a Literal>,
) -> bool {
    match expr {
        FilterExpr::Comparison { field: name, op: CompOp::Eq, value } => {
            match *field {
                Some(existing) if existing != name.0.as_str() => return false,
                Some(_) => {}
                None => *field = Some(name.0.as_str()),
            }
            values.push(value);
            true
        }
        FilterExpr::Or(left, right) => {
            collect_equality_values(left, field, values) && collect_equality_values(right, field, values)
        }
        FilterExpr::Grouped(inner) => collect_equality_values(inner, field, values),
        _ => false,
    }
}

/// `toDateTime64('<literal>', 3)` as a function call, so sea-query emits it without parentheses.
fn to_datetime64(epoch_millis: i64) -> Result<SimpleExpr, TranslationError> {
    let literal = format_timestamp(epoch_millis, TIMESTAMP_LITERAL_FORMAT)
        .map_err(|e| TranslationError::new(e.to_string()))?;
    Ok(Func::cust(TableName("toDateTime64".to_string()))
        .arg(literal)
        .arg(3)
        .into())
}

fn position_case_insensitive(field: &str, needle: Value) -> SimpleExpr {
    Func::cust(TableName("positionCaseInsensitive".to_string()))
        .arg(Expr::col(ColumnName(field.to_string())))
        .arg(needle)
        .into()
}

/// Convert AST Literal to sea-query Value
fn literal_to_value(literal: &Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(Some(Box::new(s.clone()))),
        Literal::Integer(n) => Value::BigInt(Some(*n)),
        Literal::Float(f) => Value::Double(Some(*f)),
    }
}

impl Translator for FilterSyntax {
    fn translate(&self, text: &str, context: &TranslationContext) -> Result<String, TranslationError> {
        self.compile(text, context).map(|result| result.sql)
    }
}

impl PrimarySyntaxValidator for FilterSyntax {
    fn validate(&self, text: &str) -> Result<(), ValidationError> {
        parse_filter(text).map(|_| ()).map_err(|e| ValidationError {
            message: e.message,
            span: e.span,
        })
    }
}
