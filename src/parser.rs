//! 过滤语法的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   ├─ 空输入 → Ok(None)
//!   └─ parse_or_expression()
//!        ├─ parse_and_expression()
//!        │    ├─ parse_primary_expression()
//!        │    │    ├─ "(" → 分组表达式 (递归调用parse_or_expression)
//!        │    │    └─ 字段名 → 比较运算符 → 字面值
//!        │    │
//!        │    └─ 遇到and时，继续解析右侧基础表达式
//!        │
//!        └─ 遇到or时，继续解析右侧and表达式
//! ```
//!
//! ## 语法优先级（从高到低）
//!
//! 1. **括号分组** `(expression)`
//! 2. **比较操作** `field=value`, `field~"text"`, `field>=10`
//! 3. **and操作** `expr1 and expr2`
//! 4. **or操作** `expr1 or expr2`
//!
//! ## 解析示例
//!
//! ```text
//! level="error"
//! level="error" and (service~"api" or status>=500)
//! msg!~'healthcheck' and duration_ms>12.5
//! ```

use thiserror::Error;

use crate::ast::{CompOp, FilterExpr, Identifier, Literal};
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};

pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    position: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
}

impl ParseError {
    fn new(message: String, span: Option<Span>) -> Self {
        Self { message, span }
    }

    fn at_position(message: String, span: Span) -> Self {
        Self { message, span: Some(span) }
    }
}

/// 对输入进行分词并解析，空白输入返回 `Ok(None)`
pub fn parse_filter(input: &str) -> Result<Option<FilterExpr>, ParseError> {
    let tokens: Vec<_> = Lexer::new(input).collect();
    Parser::new(&tokens).parse()
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    /// 返回当前 token，不推进位置
    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 返回当前 token 并推进位置
    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// 期望特定类型的 token 并推进，否则返回错误
    fn expect(&mut self, expected: TokenKind) -> Result<&'a Token<'a>, ParseError> {
        match self.peek() {
            Some(token) if std::mem::discriminant(&token.kind) == std::mem::discriminant(&expected) => {
                self.position += 1;
                Ok(token)
            }
            Some(token) => Err(ParseError::at_position(
                format!("Expected {:?}, found {:?}", expected, token.kind),
                token.span,
            )),
            None => Err(ParseError::new(
                format!("Expected {:?}, but reached end of input", expected),
                None,
            )),
        }
    }

    /// 检查当前 token 是否匹配给定类型
    fn match_token(&self, kind: &TokenKind) -> bool {
        self.peek()
            .is_some_and(|token| std::mem::discriminant(&token.kind) == std::mem::discriminant(kind))
    }

    pub fn parse(&mut self) -> Result<Option<FilterExpr>, ParseError> {
        if self.tokens.is_empty() {
            return Ok(None);
        }

        let expr = self.parse_or_expression()?;

        if let Some(token) = self.peek() {
            return Err(ParseError::at_position(
                format!("Unexpected token: {:?}", token.kind),
                token.span,
            ));
        }

        Ok(Some(expr))
    }

    /// 解析or表达式 (最低优先级)
    ///
    /// 语法: `and_expr (or and_expr)*`
    fn parse_or_expression(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.parse_and_expression()?;

        while self.match_token(&TokenKind::Or) {
            self.advance(); // 消费 or
            let right = self.parse_and_expression()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// 解析and表达式
    ///
    /// 语法: `primary (and primary)*`
    fn parse_and_expression(&mut self) -> Result<FilterExpr, ParseError> {
        let mut left = self.parse_primary_expression()?;

        while self.match_token(&TokenKind::And) {
            self.advance(); // 消费 and
            let right = self.parse_primary_expression()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    /// 解析基础表达式 (最高优先级)
    ///
    /// - `(expression)` - 分组表达式
    /// - `field op value` - 字段比较
    fn parse_primary_expression(&mut self) -> Result<FilterExpr, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError::new("Unexpected end of input".to_string(), None));
        };

        match &token.kind {
            TokenKind::LParen => {
                let expr = self.parse_or_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(FilterExpr::Grouped(Box::new(expr)))
            }
            TokenKind::Identifier(name) => {
                let field = Identifier(name.to_string());
                let op = self.parse_comparison_operator()?;
                let value = self.parse_literal()?;
                Ok(FilterExpr::Comparison { field, op, value })
            }
            TokenKind::UnterminatedString => Err(ParseError::at_position(
                "Unterminated string literal".to_string(),
                token.span,
            )),
            other => Err(ParseError::at_position(
                format!("Expected field name or '(', found {:?}", other),
                token.span,
            )),
        }
    }

    fn parse_comparison_operator(&mut self) -> Result<CompOp, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError::new("Expected comparison operator".to_string(), None));
        };
        match &token.kind {
            TokenKind::Eq => Ok(CompOp::Eq),
            TokenKind::NotEq => Ok(CompOp::NotEq),
            TokenKind::Gt => Ok(CompOp::Gt),
            TokenKind::Lt => Ok(CompOp::Lt),
            TokenKind::Gte => Ok(CompOp::Gte),
            TokenKind::Lte => Ok(CompOp::Lte),
            TokenKind::Contains => Ok(CompOp::Contains),
            TokenKind::NotContains => Ok(CompOp::NotContains),
            _ => Err(ParseError::at_position(
                format!("Expected comparison operator, found {:?}", token.kind),
                token.span,
            )),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError::new("Expected literal value".to_string(), None));
        };
        match &token.kind {
            TokenKind::String(s) => Ok(Literal::String(unescape(s))),
            TokenKind::Number(raw) => parse_number(raw).ok_or_else(|| {
                ParseError::at_position(format!("Invalid number literal '{}'", raw), token.span)
            }),
            // 不带引号的字符串
            TokenKind::Identifier(s) => Ok(Literal::String(s.to_string())),
            TokenKind::UnterminatedString => Err(ParseError::at_position(
                "Unterminated string literal".to_string(),
                token.span,
            )),
            kind if kind.is_comparison_operator() => Err(ParseError::at_position(
                "Duplicate comparison operator".to_string(),
                token.span,
            )),
            _ => Err(ParseError::at_position(
                format!("Expected literal value, found {:?}", token.kind),
                token.span,
            )),
        }
    }
}

fn parse_number(raw: &str) -> Option<Literal> {
    if raw.contains('.') {
        raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(Literal::Float)
    } else {
        raw.parse::<i64>().ok().map(Literal::Integer)
    }
}

/// 解析反斜杠转义：`\x` → `x`
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}
