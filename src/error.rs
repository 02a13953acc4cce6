//! Error types for the redundancy layer

use thiserror::Error;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by streams, members and behaviors.
///
/// Errors are small value types (`Clone`/`Eq`) so that per-task completion
/// records can carry them through fan-out joins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Canonical I/O failure, the moral equivalent of EIO
    #[error("i/o error")]
    Io,

    /// End of stream. Distinct from a failure and never degrades health.
    #[error("end of stream")]
    Eof,

    /// The stream ran out of room. `written` is the committed prefix, so a
    /// mid-write failover can resume with the unwritten suffix.
    #[error("out of space after {written} bytes")]
    OutOfSpace {
        /// Bytes committed before the stream filled up
        written: usize,
    },

    /// The spare pool is exhausted or shut down
    #[error("no spares left")]
    NoSpares,
}

impl Error {
    /// Whether this error counts as a failure for health aggregation.
    ///
    /// Only end-of-stream is non-fatal; it is carried through verbatim.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Eof)
    }

    /// Bytes committed despite the error, if the error carries that information
    pub fn committed(&self) -> usize {
        match self {
            Error::OutOfSpace { written } => *written,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatality() {
        assert!(Error::Io.is_fatal());
        assert!(Error::OutOfSpace { written: 4 }.is_fatal());
        assert!(Error::NoSpares.is_fatal());
        assert!(!Error::Eof.is_fatal());
    }

    #[test]
    fn test_committed_prefix() {
        assert_eq!(Error::OutOfSpace { written: 12 }.committed(), 12);
        assert_eq!(Error::Io.committed(), 0);
    }
}
