use thiserror::Error;

/// Failure modes for parsing a cell [`crate::Pos`] out of a label such as `"AA17"`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosError {
    #[error("position label is empty")]
    Empty,
    #[error("position label has no column letters")]
    MissingColumn,
    #[error("position label has no row digits")]
    MissingRow,
    #[error("position label has trailing characters after the row number")]
    TrailingCharacters,
    #[error("row number must be a positive integer")]
    NonPositiveRow,
}
