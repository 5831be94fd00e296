//! Draw command error types.

use thiserror::Error;

use crate::command::ScopeKind;

/// Errors produced by the draw command pipeline.
///
/// Protocol errors (`StackOverflow` through `Truncated`) are contained to the
/// single sub-stream being decoded: the stream is dropped and the error is
/// logged. The remaining variants are usage errors that cross the API
/// boundary because they indicate a lifetime bug in the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DrawError {
    #[error("{kind:?} stack overflow (max depth {max})")]
    StackOverflow { kind: ScopeKind, max: usize },
    #[error("{0:?} stack underflow: pop without matching push")]
    StackUnderflow(ScopeKind),
    #[error("stream ended with {open} unclosed scope(s)")]
    UnbalancedScopes { open: usize },
    #[error("unknown command tag {tag} at offset {offset}")]
    UnknownTag { tag: u32, offset: usize },
    #[error("truncated record at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("stale encoder handle {0:#x}")]
    StaleEncoder(u64),
    #[error("built-in encoder {0:#x} cannot be disposed by the caller")]
    BuiltinEncoder(u64),
    #[error("processed entry {0} was already released")]
    StaleEntry(usize),
    #[error("cannot block on a job from inside a worker thread")]
    BlockingOnWorker,
    #[error("job did not complete within {0:?}")]
    JobTimeout(std::time::Duration),
}

/// Result type used throughout the crate.
pub type DrawResult<T> = Result<T, DrawError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DrawError::StackUnderflow(ScopeKind::Color);
        assert_eq!(err.to_string(), "Color stack underflow: pop without matching push");

        let err = DrawError::StackOverflow {
            kind: ScopeKind::Matrix,
            max: 32,
        };
        assert_eq!(err.to_string(), "Matrix stack overflow (max depth 32)");

        let err = DrawError::StaleEncoder(0x10);
        assert_eq!(err.to_string(), "stale encoder handle 0x10");
    }
}
