//! In-memory test devices
//!
//! Bounded byte-buffer streams used by the scenario tests: a plain device
//! and a fault-injecting wrapper. Closing a device latches the end-of-stream
//! position at the current write head and rewinds to the start, which is
//! what lets the write/close/reopen/read cycles in the tests work without
//! any persistent state.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::stream::ByteStream;

/// Fixed-capacity in-memory device.
pub struct BlockDevice {
    buf: Vec<u8>,
    pos: usize,
    eof: Option<usize>,
}

impl BlockDevice {
    /// Create a device with `size` bytes of capacity.
    pub fn new(size: usize) -> Self {
        BlockDevice {
            buf: vec![0u8; size],
            pos: 0,
            eof: None,
        }
    }
}

#[async_trait]
impl ByteStream for BlockDevice {
    async fn close(&mut self) -> Result<()> {
        // latch the high-water mark so repeated open/close cycles keep the
        // end-of-stream position stable
        let mark = self.eof.map_or(self.pos, |eof| eof.max(self.pos));
        self.eof = Some(mark);
        self.pos = 0;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let limit = self.eof.unwrap_or(self.buf.len());
        if self.pos >= limit {
            return Err(Error::Eof);
        }

        let n = buf.len().min(limit - self.pos);
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;

        Ok(n)
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let room = self.buf.len() - self.pos;
        if buf.len() <= room {
            self.buf[self.pos..self.pos + buf.len()].copy_from_slice(buf);
            self.pos += buf.len();
            return Ok(buf.len());
        }

        // commit what fits, report the rest as out of space
        self.buf[self.pos..].copy_from_slice(&buf[..room]);
        self.pos += room;

        Err(Error::OutOfSpace { written: room })
    }
}

/// A [`BlockDevice`] that starts failing after a set number of operations.
///
/// By default reads and writes both count toward the limit;
/// [`failing_reads`](FaultyDevice::failing_reads) builds a device where only
/// reads count and trip, leaving the write path healthy. The counter resets
/// when the device is closed, mimicking a flaky device that recovers on
/// reattach.
pub struct FaultyDevice {
    inner: BlockDevice,
    fail_after: usize,
    reads_only: bool,
    ops: usize,
}

impl FaultyDevice {
    /// Create a faulty device: the first `fail_after` operations succeed,
    /// every operation after that fails with an I/O error.
    pub fn new(size: usize, fail_after: usize) -> Self {
        FaultyDevice {
            inner: BlockDevice::new(size),
            fail_after,
            reads_only: false,
            ops: 0,
        }
    }

    /// Create a device whose fault only manifests on reads.
    pub fn failing_reads(size: usize, fail_after: usize) -> Self {
        FaultyDevice {
            reads_only: true,
            ..Self::new(size, fail_after)
        }
    }
}

#[async_trait]
impl ByteStream for FaultyDevice {
    async fn close(&mut self) -> Result<()> {
        self.ops = 0;
        self.inner.close().await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.ops >= self.fail_after {
            return Err(Error::Io);
        }
        self.ops += 1;
        self.inner.read(buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.reads_only {
            if self.ops >= self.fail_after {
                return Err(Error::Io);
            }
            self.ops += 1;
        }
        self.inner.write(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_device_roundtrip() {
        let mut dev = BlockDevice::new(64);

        for i in 0..4u8 {
            let n = dev.write(&[i; 16]).await.unwrap();
            assert_eq!(n, 16);
        }

        dev.close().await.unwrap();

        let mut buf = [0u8; 16];
        for i in 0..4u8 {
            let n = dev.read(&mut buf).await.unwrap();
            assert_eq!(n, 16);
            assert_eq!(buf, [i; 16]);
        }

        assert_eq!(dev.read(&mut buf).await, Err(Error::Eof));
    }

    #[tokio::test]
    async fn test_device_eof_at_close_position() {
        let mut dev = BlockDevice::new(64);
        dev.write(&[7u8; 16]).await.unwrap();
        dev.close().await.unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(dev.read(&mut buf).await, Ok(16));
        assert_eq!(dev.read(&mut buf).await, Err(Error::Eof));
    }

    #[tokio::test]
    async fn test_device_out_of_space() {
        let mut dev = BlockDevice::new(8);
        assert_eq!(
            dev.write(&[0u8; 12]).await,
            Err(Error::OutOfSpace { written: 8 })
        );
        assert_eq!(dev.write(&[0u8; 4]).await, Err(Error::OutOfSpace { written: 0 }));
    }

    #[tokio::test]
    async fn test_faulty_device_trips_and_resets() {
        let mut dev = FaultyDevice::new(64, 2);

        assert_eq!(dev.write(&[1u8; 8]).await, Ok(8));
        assert_eq!(dev.write(&[2u8; 8]).await, Ok(8));
        assert_eq!(dev.write(&[3u8; 8]).await, Err(Error::Io));

        dev.close().await.unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(dev.read(&mut buf).await, Ok(8));
        assert_eq!(buf, [1u8; 8]);
    }
}
