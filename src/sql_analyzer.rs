//! Structural analysis of user-authored SQL.
//!
//! The analyzer tokenizes the statement (string literals, quoted identifiers, comments and
//! parentheses are respected) and records where the top-level clauses sit. The rewrite
//! helpers use those spans to patch the LIMIT value or the `toDateTime64(...)` time bounds
//! in place. Anything the analyzer cannot pin down exactly (compound statements, computed
//! LIMIT expressions, time filters in another shape) is left untouched.

use tracing::debug;

use crate::collaborators::{SqlValidator, ValidationError};
use crate::sql_generator::{format_timestamp, DATETIME_LITERAL_FORMAT, TIMESTAMP_LITERAL_FORMAT};
use crate::state::TimeRange;
use crate::token::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlTokenKind {
    Word,
    Number,
    /// `'...'`
    Str,
    /// `` `...` `` or `"..."`
    QuotedIdent,
    LParen,
    RParen,
    Comma,
    Semicolon,
    Op,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlToken<'a> {
    pub kind: SqlTokenKind,
    pub text: &'a str,
    pub span: Span,
    /// Parenthesis nesting depth the token sits at.
    pub depth: usize,
}

impl SqlToken<'_> {
    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == SqlTokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

/// Which side of the time window a bound constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundSide {
    Lower,
    Upper,
}

/// A `<field> >= toDateTime64('<literal>', 3)` style predicate found in the WHERE clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBound {
    pub field: String,
    pub side: BoundSide,
    /// `toDateTime64` literal with milliseconds; `false` for second-precision `toDateTime`.
    pub subsecond: bool,
    /// Span of the literal's content, without the quotes.
    pub literal_span: Span,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlAnalysis {
    pub is_select: bool,
    pub has_from: bool,
    pub has_where: bool,
    pub has_order_by: bool,
    /// A row LIMIT is present (`LIMIT n BY ...` does not count).
    pub has_limit: bool,
    pub has_union: bool,
    pub limit_value: Option<u64>,
    /// Span of the LIMIT value when it is a plain integer literal.
    pub limit_span: Option<Span>,
    pub where_span: Option<Span>,
    /// Offset of the first top-level SETTINGS or FORMAT clause.
    pub tail_start: Option<usize>,
    /// End of the last token of the first statement.
    pub statement_end: usize,
    pub statement_count: usize,
    pub balanced_parens: bool,
    pub time_bounds: Vec<TimeBound>,
    /// Lexical error, e.g. an unterminated string literal.
    pub lex_error: Option<ValidationError>,
}

/// Clause keywords that terminate a WHERE clause.
const CLAUSE_KEYWORDS: &[&str] = &[
    "GROUP", "HAVING", "ORDER", "LIMIT", "SETTINGS", "FORMAT", "UNION", "INTERSECT", "WINDOW",
    "QUALIFY", "OFFSET",
];

struct SqlLexer<'a> {
    input: &'a str,
    position: usize,
}

impl<'a> SqlLexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        self.input[self.position..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if pred(c) {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Skips whitespace and comments.
    fn skip_trivia(&mut self) -> Result<(), ValidationError> {
        loop {
            match (self.peek(), self.peek_next()) {
                (Some(c), _) if c.is_whitespace() => {
                    self.bump();
                }
                (Some('-'), Some('-')) => self.eat_while(|c| c != '\n'),
                (Some('/'), Some('*')) => {
                    let start = self.position;
                    self.bump();
                    self.bump();
                    loop {
                        match self.bump() {
                            None => {
                                return Err(ValidationError::at(
                                    "unterminated block comment",
                                    Span::new(start, self.position),
                                ))
                            }
                            Some('*') if self.peek() == Some('/') => {
                                self.bump();
                                break;
                            }
                            Some(_) => {}
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Reads up to the closing `quote`. Doubled quotes and backslash escapes stay inside.
    fn read_quoted(&mut self, start: usize, quote: char) -> Result<(), ValidationError> {
        loop {
            match self.bump() {
                None => {
                    let what = if quote == '\'' { "string literal" } else { "quoted identifier" };
                    return Err(ValidationError::at(
                        format!("unterminated {}", what),
                        Span::new(start, self.position),
                    ));
                }
                Some('\\') => {
                    self.bump();
                }
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        self.bump();
                    } else {
                        return Ok(());
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn next_token(&mut self) -> Result<Option<(SqlTokenKind, Span)>, ValidationError> {
        self.skip_trivia()?;
        let start = self.position;
        let Some(c) = self.bump() else {
            return Ok(None);
        };

        let kind = match c {
            '(' => SqlTokenKind::LParen,
            ')' => SqlTokenKind::RParen,
            ',' => SqlTokenKind::Comma,
            ';' => SqlTokenKind::Semicolon,
            '\'' => {
                self.read_quoted(start, '\'')?;
                SqlTokenKind::Str
            }
            '`' | '"' => {
                self.read_quoted(start, c)?;
                SqlTokenKind::QuotedIdent
            }
            c if c.is_ascii_digit() => {
                self.eat_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_');
                SqlTokenKind::Number
            }
            c if c.is_alphabetic() || c == '_' => {
                self.eat_while(|c| c.is_alphanumeric() || c == '_' || c == '$');
                SqlTokenKind::Word
            }
            '<' | '>' | '!' | '=' => {
                if matches!(self.peek(), Some('=') | Some('>')) {
                    self.bump();
                }
                SqlTokenKind::Op
            }
            _ => SqlTokenKind::Op,
        };
        Ok(Some((kind, Span::new(start, self.position))))
    }
}

/// Tokenizes `sql`, returning the tokens read so far and the lexical error, if any.
pub fn tokenize(sql: &str) -> (Vec<SqlToken<'_>>, Option<ValidationError>) {
    let mut lexer = SqlLexer::new(sql);
    let mut tokens = Vec::new();
    let mut depth = 0usize;

    loop {
        match lexer.next_token() {
            Ok(Some((kind, span))) => {
                if kind == SqlTokenKind::RParen {
                    depth = depth.saturating_sub(1);
                }
                tokens.push(SqlToken { kind, text: &sql[span.start..span.end], span, depth });
                if kind == SqlTokenKind::LParen {
                    depth += 1;
                }
            }
            Ok(None) => return (tokens, None),
            Err(e) => return (tokens, Some(e)),
        }
    }
}

fn parens_balanced(tokens: &[SqlToken]) -> bool {
    let mut depth = 0i64;
    for token in tokens {
        match token.kind {
            SqlTokenKind::LParen => depth += 1,
            SqlTokenKind::RParen => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

pub fn analyze(sql: &str) -> SqlAnalysis {
    let (all_tokens, lex_error) = tokenize(sql);

    let mut analysis = SqlAnalysis {
        balanced_parens: parens_balanced(&all_tokens),
        lex_error,
        ..SqlAnalysis::default()
    };

    // Split off the first statement at a top-level semicolon.
    let first_semicolon = all_tokens
        .iter()
        .position(|t| t.kind == SqlTokenKind::Semicolon && t.depth == 0);
    let tokens = match first_semicolon {
        Some(idx) => &all_tokens[..idx],
        None => &all_tokens[..],
    };
    let trailing_significant = first_semicolon.is_some_and(|idx| {
        all_tokens[idx + 1..]
            .iter()
            .any(|t| t.kind != SqlTokenKind::Semicolon)
    });
    analysis.statement_count = match (tokens.is_empty(), trailing_significant) {
        (true, false) => 0,
        (true, true) | (false, false) => 1,
        (false, true) => 2,
    };
    analysis.statement_end = tokens.last().map_or(0, |t| t.span.end);

    let Some(first) = tokens.first() else {
        return analysis;
    };
    analysis.is_select = first.is_keyword("SELECT") || first.is_keyword("WITH");

    let top_level: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| t.depth == 0 && t.kind == SqlTokenKind::Word)
        .map(|(i, _)| i)
        .collect();

    let followed_by = |idx: usize, keyword: &str| tokens.get(idx + 1).is_some_and(|t| t.is_keyword(keyword));

    let mut where_idx = None;
    for &idx in &top_level {
        let token = &tokens[idx];
        if token.is_keyword("FROM") {
            analysis.has_from = true;
        } else if token.is_keyword("WHERE") && where_idx.is_none() {
            analysis.has_where = true;
            where_idx = Some(idx);
        } else if token.is_keyword("ORDER") && followed_by(idx, "BY") {
            analysis.has_order_by = true;
        } else if token.is_keyword("UNION") || token.is_keyword("INTERSECT") {
            analysis.has_union = true;
        } else if token.is_keyword("SETTINGS") || token.is_keyword("FORMAT") {
            analysis.tail_start.get_or_insert(token.span.start);
        } else if token.is_keyword("LIMIT") {
            inspect_limit(tokens, idx, &mut analysis);
        }
    }

    if let Some(where_idx) = where_idx {
        let end_idx = top_level
            .iter()
            .copied()
            .filter(|&i| i > where_idx)
            .find(|&i| {
                let t = &tokens[i];
                CLAUSE_KEYWORDS.iter().any(|k| t.is_keyword(k))
                    && (!(t.is_keyword("GROUP") || t.is_keyword("ORDER")) || followed_by(i, "BY"))
            });
        let span_end = end_idx.map_or(analysis.statement_end, |i| tokens[i].span.start);
        analysis.where_span = Some(Span::new(tokens[where_idx].span.end, span_end));
        let clause_end = end_idx.unwrap_or(tokens.len());
        analysis.time_bounds = find_time_bounds(&tokens[where_idx + 1..clause_end]);
    }

    analysis
}

/// `LIMIT n`, `LIMIT n OFFSET m` and `LIMIT n BY cols`; the last non-BY LIMIT wins.
fn inspect_limit(tokens: &[SqlToken], limit_idx: usize, analysis: &mut SqlAnalysis) {
    let value = tokens.get(limit_idx + 1);
    let after = tokens.get(limit_idx + 2);

    if after.is_some_and(|t| t.is_keyword("BY")) {
        return;
    }

    analysis.has_limit = true;
    analysis.limit_value = None;
    analysis.limit_span = None;

    let Some(value) = value else {
        return;
    };
    let plain_integer = value.kind == SqlTokenKind::Number && value.text.chars().all(|c| c.is_ascii_digit());
    let simple_follow = match after {
        None => true,
        Some(t) => t.is_keyword("OFFSET") || t.is_keyword("SETTINGS") || t.is_keyword("FORMAT"),
    };
    if plain_integer && simple_follow {
        analysis.limit_value = value.text.parse().ok();
        analysis.limit_span = analysis.limit_value.map(|_| value.span);
    }
}

fn find_time_bounds(where_tokens: &[SqlToken]) -> Vec<TimeBound> {
    let mut bounds = Vec::new();
    let base_depth = where_tokens.first().map_or(0, |t| t.depth);

    for (idx, field) in where_tokens.iter().enumerate() {
        if field.depth != base_depth {
            continue;
        }
        let field_name = match field.kind {
            SqlTokenKind::Word => field.text.to_string(),
            SqlTokenKind::QuotedIdent => field.text[1..field.text.len() - 1].to_string(),
            _ => continue,
        };
        let Some(op) = where_tokens.get(idx + 1) else {
            continue;
        };
        let side = match (op.kind, op.text) {
            (SqlTokenKind::Op, ">=") | (SqlTokenKind::Op, ">") => BoundSide::Lower,
            (SqlTokenKind::Op, "<=") | (SqlTokenKind::Op, "<") => BoundSide::Upper,
            _ => continue,
        };

        // the call may be wrapped: `ts >= (toDateTime64('..', 3))`
        let mut next = idx + 2;
        if where_tokens.get(next).is_some_and(|t| t.kind == SqlTokenKind::LParen) {
            next += 1;
        }
        let (Some(func), Some(open), Some(literal)) = (
            where_tokens.get(next),
            where_tokens.get(next + 1),
            where_tokens.get(next + 2),
        ) else {
            continue;
        };
        let subsecond = if func.is_keyword("toDateTime64") {
            true
        } else if func.is_keyword("toDateTime") {
            false
        } else {
            continue;
        };
        if open.kind != SqlTokenKind::LParen || literal.kind != SqlTokenKind::Str {
            continue;
        }
        bounds.push(TimeBound {
            field: field_name,
            side,
            subsecond,
            literal_span: Span::new(literal.span.start + 1, literal.span.end - 1),
        });
    }
    bounds
}

/// Sets the row limit of `sql`. Returns `None` when the statement is left as is, either
/// because it already has that limit or because it cannot be patched safely.
pub fn rewrite_limit(sql: &str, analysis: &SqlAnalysis, limit: u64) -> Option<String> {
    if !analysis.is_select || analysis.has_union || analysis.lex_error.is_some() || analysis.statement_count > 1 {
        debug!("statement not eligible for LIMIT patching");
        return None;
    }

    if analysis.has_limit {
        let span = analysis.limit_span?;
        if analysis.limit_value == Some(limit) {
            return None;
        }
        return Some(format!("{}{}{}", &sql[..span.start], limit, &sql[span.end..]));
    }

    let insert_at = analysis.tail_start.unwrap_or(analysis.statement_end);
    let head = sql[..insert_at].trim_end();
    let rest = &sql[insert_at..];
    let separator = if analysis.tail_start.is_some() { "\n" } else { "" };
    Some(format!("{}\nLIMIT {}{}{}", head, limit, separator, rest))
}

/// Replaces the literals of the recognized time-bound predicates with `range`.
pub fn rewrite_time_range(sql: &str, analysis: &SqlAnalysis, range: &TimeRange) -> Option<String> {
    if analysis.time_bounds.is_empty() || analysis.lex_error.is_some() {
        return None;
    }

    let mut bounds: Vec<&TimeBound> = analysis.time_bounds.iter().collect();
    bounds.sort_by_key(|b| std::cmp::Reverse(b.literal_span.start));

    let mut out = sql.to_string();
    for bound in bounds {
        let millis = match bound.side {
            BoundSide::Lower => range.start,
            BoundSide::Upper => range.end,
        };
        let format = if bound.subsecond { TIMESTAMP_LITERAL_FORMAT } else { DATETIME_LITERAL_FORMAT };
        let replacement = format_timestamp(millis, format).ok()?;
        out.replace_range(bound.literal_span.start..bound.literal_span.end, &replacement);
    }

    if out == sql {
        None
    } else {
        Some(out)
    }
}

/// Built-in [`SqlValidator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlAnalyzer;

impl SqlValidator for SqlAnalyzer {
    fn validate(&self, sql: &str) -> Result<SqlAnalysis, ValidationError> {
        if sql.trim().is_empty() {
            return Err(ValidationError::new("query is empty"));
        }

        let analysis = analyze(sql);
        if let Some(err) = &analysis.lex_error {
            return Err(err.clone());
        }
        if !analysis.balanced_parens {
            return Err(ValidationError::new("unbalanced parentheses"));
        }
        if analysis.statement_count > 1 {
            return Err(ValidationError::new("multiple statements are not supported"));
        }
        if !analysis.is_select {
            return Err(ValidationError::new("only SELECT queries are supported"));
        }
        if !analysis.has_from {
            return Err(ValidationError::new("query has no FROM clause"));
        }
        Ok(analysis)
    }

    fn analyze(&self, sql: &str) -> SqlAnalysis {
        analyze(sql)
    }
}
