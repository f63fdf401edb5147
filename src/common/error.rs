use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("State invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Solver exceeded its runtime limit: took {took_us}us, limit {limit_us}us")]
    SolverTimeout { took_us: u64, limit_us: u64 },
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<String> for FlowError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}

impl From<&str> for FlowError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}

/// Build an `InvariantViolation`. A misbehaving graph would produce unsafe
/// placements, so callers at the loop boundary log the error and abort the
/// process instead of trying to recover.
#[macro_export]
macro_rules! invariant_violation {
    ($($arg:tt)*) => {
        return Err($crate::FlowError::InvariantViolation(format!($($arg)*)))
    };
}

pub use invariant_violation;
