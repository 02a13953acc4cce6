//! The byte-stream contract and health model
//!
//! Everything in this crate speaks the same small capability set: open,
//! close, read, write. Leaf devices satisfy it, and so do the redundancy
//! behaviors themselves, which is what makes behaviors composable (a stripe
//! of mirrors, a mirror of stripes, and so on).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Health of a member or behavior.
///
/// Severity for aggregation purposes: `Failed` outranks
/// `Degraded`/`Rebuilding`/`Replaced`, which outrank `Ok`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    /// Working as intended
    #[default]
    Ok,
    /// Functional, but with reduced redundancy
    Degraded,
    /// Currently being rebuilt from a healthy peer
    Rebuilding,
    /// Replaced and awaiting rebuild
    Replaced,
    /// Not usable
    Failed,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Ok => "ok",
            State::Degraded => "degraded",
            State::Rebuilding => "rebuilding",
            State::Replaced => "replaced",
            State::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// An endpoint that moves bytes sequentially.
///
/// `open` is optional: streams without open semantics (plain in-memory
/// devices, sockets already connected by the caller) return `None` and any
/// previously known health is kept. Behaviors return `Some` with their
/// aggregate health, which is how a parent member learns the health of a
/// nested behavior.
#[async_trait]
pub trait ByteStream: Send {
    /// Prepare the stream for I/O, reporting its health.
    async fn open(&mut self) -> Option<State> {
        None
    }

    /// Release the stream. Position bookkeeping is reset by the next `open`.
    async fn close(&mut self) -> Result<()>;

    /// Read up to `buf.len()` bytes. `Error::Eof` marks the end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf`, returning the number of bytes committed.
    async fn write(&mut self, buf: &[u8]) -> Result<usize>;
}

impl std::fmt::Debug for dyn ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ByteStream")
    }
}

/// Implemented by redundancy behaviors to expose aggregate health.
#[async_trait(?Send)]
pub trait Behavior {
    /// Current aggregate health of the behavior
    async fn health(&self) -> State;
}
