use thiserror::Error;

/// Failure modes for the default formula tokenizer/parser in [`crate::parsing`].
///
/// These never escape [`crate::Sheet::set`] as an error value — per §7 of
/// the design, a failed formula parse surfaces only as a `false` return and
/// clears the cell. The typed variants exist so the parser's internal
/// control flow stays `Result`-based instead of stringly-typed, and so a
/// caller who wants the reason can match on it before it is discarded.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("unexpected character: {0}")]
    UnexpectedCharacter(char),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number literal: {0}")]
    InvalidNumber(String),
    #[error("expected a reference such as A1 or $A$1, found: {0}")]
    InvalidReference(String),
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("{expected}, found {found}")]
    ExpectedToken { expected: String, found: String },
    #[error("unexpected trailing token: {0}")]
    TrailingToken(String),
}
