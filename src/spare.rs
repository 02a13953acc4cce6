//! Spare pool: a finite, one-shot allocator of replacement streams
//!
//! Members share one pool by reference. Handoff is serialized internally so
//! each spare is handed to exactly one member, most recently added first.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::stream::ByteStream;

/// Hands out replacement streams until the inventory runs dry.
///
/// Once exhausted or shut down, every future [`get`](SparePool::get) fails
/// with [`Error::NoSpares`]. Streams handed out are owned by the caller; the
/// pool keeps no reference.
pub struct SparePool {
    spares: Mutex<Vec<Box<dyn ByteStream>>>,
    closed: AtomicBool,
}

impl SparePool {
    /// Create a pool over a fixed inventory of spare streams.
    pub fn new(streams: Vec<Box<dyn ByteStream>>) -> Self {
        SparePool {
            spares: Mutex::new(streams),
            closed: AtomicBool::new(false),
        }
    }

    /// Take one spare, most recently added first.
    pub fn get(&self) -> Result<Box<dyn ByteStream>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::NoSpares);
        }

        let mut spares = self.spares.lock();
        match spares.pop() {
            Some(spare) => {
                debug!(remaining = spares.len(), "spare handed out");
                Ok(spare)
            }
            None => Err(Error::NoSpares),
        }
    }

    /// Number of spares still in the inventory.
    pub fn remaining(&self) -> usize {
        self.spares.lock().len()
    }

    /// Drop the inventory and fail all future [`get`](SparePool::get) calls.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.spares.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::BlockDevice;

    #[tokio::test]
    async fn test_lifo_handoff() {
        let pool = SparePool::new(vec![
            Box::new(BlockDevice::new(8)),
            Box::new(BlockDevice::new(16)),
        ]);

        // the 16-byte device went in last, so it comes out first
        let mut first = pool.get().unwrap();
        assert_eq!(first.write(&[0u8; 16]).await, Ok(16));

        let mut second = pool.get().unwrap();
        assert_eq!(
            second.write(&[0u8; 16]).await,
            Err(Error::OutOfSpace { written: 8 })
        );
    }

    #[test]
    fn test_exhaustion() {
        let pool = SparePool::new(vec![Box::new(BlockDevice::new(8))]);

        assert!(pool.get().is_ok());
        assert_eq!(pool.get().unwrap_err(), Error::NoSpares);
        assert_eq!(pool.get().unwrap_err(), Error::NoSpares);
    }

    #[test]
    fn test_shutdown() {
        let pool = SparePool::new(vec![
            Box::new(BlockDevice::new(8)),
            Box::new(BlockDevice::new(8)),
        ]);

        pool.shutdown();
        assert_eq!(pool.get().unwrap_err(), Error::NoSpares);
        assert_eq!(pool.remaining(), 0);
    }

    #[test]
    fn test_empty_pool() {
        let pool = SparePool::new(Vec::new());
        assert_eq!(pool.get().unwrap_err(), Error::NoSpares);
    }
}
