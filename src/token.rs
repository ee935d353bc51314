//! The token definition for the filter language.

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Keywords
    And, // "and"
    Or,  // "or"

    // Literals
    Identifier(&'a str),
    /// The string content without the surrounding quotes. Escapes are
    /// resolved by the parser.
    String(&'a str),
    /// The raw numeric text, e.g. `-12.5`.
    Number(&'a str),

    // Punctuation
    LParen, // (
    RParen, // )

    // Operators
    Eq,          // =
    NotEq,       // !=
    Gt,          // >
    Lt,          // <
    Gte,         // >=
    Lte,         // <=
    Contains,    // ~
    NotContains, // !~

    // Special
    /// An illegal/unknown character
    Illegal,
    /// A string literal missing its closing quote
    UnterminatedString,
}

impl TokenKind<'_> {
    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            TokenKind::Eq
                | TokenKind::NotEq
                | TokenKind::Gt
                | TokenKind::Lt
                | TokenKind::Gte
                | TokenKind::Lte
                | TokenKind::Contains
                | TokenKind::NotContains
        )
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
