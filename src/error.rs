/// Crate-wide error taxonomy.
///
/// Mirrors the error taxonomy table: user input, invariant violation, table
/// integrity, and I/O are distinct variants because callers (tests, `main`)
/// need to tell "bad input file" apart from "scheduler bug" when choosing an
/// exit code. Numeric guards and boundary-rounding recoveries are NOT errors
/// here — those are silently corrected in place and only logged.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("table integrity error at {location}: {reason}")]
    TableIntegrity { location: String, reason: String },

    #[error("malformed input at line {line}: {reason}")]
    UserInput { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown parameter: {0}")]
    UnknownParameter(String),
}

pub type SimResult<T> = Result<T, SimError>;
