//! Error types shared by every interpreter.
//!
//! - [`ParseError`]: malformed source or a failed interpreter selection.
//!   Always raised before the first instruction runs.
//! - [`RuntimeFault`]: a program did something its machine cannot do
//!   (stack underflow, division by zero, reading past the end of input).
//!   Aborts the run.
//! - [`Error`]: everything a run can return, including stream I/O failures.

use std::io;

use thiserror::Error;

/// Which side of a bracket pair is missing its partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketKind {
    /// An opening bracket that never closes.
    Open,
    /// A closing bracket that never opens.
    Close,
}

impl BracketKind {
    fn missing(self) -> &'static str {
        match self {
            BracketKind::Open => "close",
            BracketKind::Close => "open",
        }
    }
}

/// Malformed source, detected before execution starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("bracket at char {index} doesn't {}", .kind.missing())]
    UnmatchedBracket { index: usize, kind: BracketKind },

    #[error("loop marker at char {index} has no partner")]
    UnmatchedLoop { index: usize },

    #[error("source character at line {line}, column {column} lies outside the {width}x{height} grid")]
    GridOverflow {
        line: usize,
        column: usize,
        width: usize,
        height: usize,
    },

    #[error("incorrectly commented source: {open} '(' but {close} ')'")]
    UnbalancedComments { open: usize, close: usize },

    #[error("incorrectly commented source: no valid rotation exists")]
    NoValidRotation,

    #[error("command '{command}' too short in transaction '{transaction}'")]
    CommandTooShort { command: String, transaction: String },

    #[error("unsupported register '{register}' in transaction '{transaction}'")]
    UnknownRegister { register: char, transaction: String },

    #[error("unsupported operation '{operator}' in transaction '{transaction}'")]
    UnknownOperator { operator: char, transaction: String },

    #[error("invalid integer '{operand}' in transaction '{transaction}'")]
    InvalidOperand { operand: String, transaction: String },

    #[error("no interpreter available for extension '{0}'")]
    UnknownExtension(String),

    #[error("multiple interpreters available for extension '{extension}': {}", .candidates.join(", "))]
    AmbiguousExtension {
        extension: String,
        candidates: Vec<&'static str>,
    },

    #[error("no interpreter available for language '{0}'")]
    UnknownLanguage(String),
}

/// A program fault raised while stepping. The run is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeFault {
    #[error("stack underflow executing '{op}'")]
    StackUnderflow { op: char },

    /// The operands are still on `stack` (top last).
    #[error("division by zero executing '{op}'")]
    DivisionByZero { op: char, stack: Vec<i64> },

    #[error("cell ({x}, {y}) is outside the grid")]
    OutOfBounds { x: i64, y: i64 },

    #[error("instruction '{0}' is reserved and not supported")]
    Unsupported(char),

    #[error("tried to read past the end of input")]
    EndOfInput,

    #[error("{0} is not a valid character code")]
    InvalidCharacter(i128),

    #[error("cell value overflowed the unbounded cell carrier")]
    CellOverflow,
}

/// Everything a run can fail with.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Fault(#[from] RuntimeFault),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// The parse error, if this is one.
    pub fn as_parse(&self) -> Option<&ParseError> {
        match self {
            Error::Parse(e) => Some(e),
            _ => None,
        }
    }

    /// The runtime fault, if this is one.
    pub fn as_fault(&self) -> Option<&RuntimeFault> {
        match self {
            Error::Fault(f) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bracket_messages_name_index() {
        let open = ParseError::UnmatchedBracket { index: 4, kind: BracketKind::Open };
        let close = ParseError::UnmatchedBracket { index: 7, kind: BracketKind::Close };
        assert_eq!(open.to_string(), "bracket at char 4 doesn't close");
        assert_eq!(close.to_string(), "bracket at char 7 doesn't open");
    }

    #[test]
    fn test_ambiguous_lists_candidates() {
        let e = ParseError::AmbiguousExtension {
            extension: ".x".into(),
            candidates: vec!["One", "Two"],
        };
        assert_eq!(e.to_string(), "multiple interpreters available for extension '.x': One, Two");
    }

    #[test]
    fn test_error_accessors() {
        let e: Error = RuntimeFault::EndOfInput.into();
        assert_eq!(e.as_fault(), Some(&RuntimeFault::EndOfInput));
        assert!(e.as_parse().is_none());

        let e: Error = ParseError::NoValidRotation.into();
        assert_eq!(e.as_parse(), Some(&ParseError::NoValidRotation));
    }
}
