use thiserror::Error;

use crate::mapping::{ParseError, ParseErrorKind};

/// Errors that abort parsing a mapping or retracing a stack trace.
#[derive(Debug, Error)]
pub enum Error {
    /// The mapping file contains a line that cannot be made sense of.
    #[error("malformed mapping at line {line_number}: {kind}: {line:?}")]
    MalformedMapping {
        /// 1-based number of the offending line.
        line_number: usize,
        /// The raw text of the offending line.
        line: String,
        /// What is wrong with the line.
        kind: ParseErrorKind,
    },
    /// Reading input or writing output failed.
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    /// Formatting output failed.
    #[error("failed to format output")]
    Format(#[from] std::fmt::Error),
}

impl From<ParseError<'_>> for Error {
    fn from(err: ParseError<'_>) -> Self {
        Error::MalformedMapping {
            line_number: err.line_number(),
            line: err.line().to_owned(),
            kind: err.kind(),
        }
    }
}
