//! Member: one underlying stream wrapped with health and failover
//!
//! A member owns an append-only chain of segments, each a contiguous prefix
//! of the member's logical address space served by one underlying stream.
//! The chain starts with a single open-ended segment and grows only on the
//! write path: when the active stream fails mid-write and the spare pool can
//! supply a replacement, the current segment is sealed at the exact position
//! reached and the remainder of the write continues on the spare. The read
//! path later replays the chain transparently by hopping to the next segment
//! whenever a request would cross a sealed boundary.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::spare::SparePool;
use crate::stream::{ByteStream, State};

/// Completion record for one fanned-out member request.
///
/// Behaviors start one task per participating member and drain exactly one
/// of these per task. `data` carries the scratch buffer for reads that
/// allocate their own; it is empty otherwise.
pub(crate) struct Completion {
    pub idx: usize,
    pub n: usize,
    pub err: Option<Error>,
    pub data: Vec<u8>,
}

impl Completion {
    fn new(idx: usize, n: usize, err: Option<Error>) -> Self {
        Completion {
            idx,
            n,
            err,
            data: Vec::new(),
        }
    }
}

/// Options applied to members at construction.
#[derive(Clone, Default)]
pub struct MemberOptions {
    spares: Option<Arc<SparePool>>,
}

impl MemberOptions {
    /// Options with no spare pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a shared spare pool for write failover.
    pub fn with_spare_pool(mut self, pool: Arc<SparePool>) -> Self {
        self.spares = Some(pool);
        self
    }
}

struct Segment {
    stream: Box<dyn ByteStream>,
    /// Absolute member offset at which this stream stopped accepting writes.
    /// `None` marks the open tail.
    upto: Option<u64>,
}

/// Wraps one underlying stream with health, position and a segment chain.
pub struct Member {
    segments: Vec<Segment>,
    current: usize,
    /// Member-absolute position, in bytes
    pos: u64,
    /// Cached end boundary of the current segment
    upto: Option<u64>,
    state: State,
    spares: Option<Arc<SparePool>>,
}

impl Member {
    /// Wrap a stream with default options.
    pub fn new(stream: Box<dyn ByteStream>) -> Self {
        Self::with_options(stream, MemberOptions::new())
    }

    /// Wrap a stream, attaching a spare pool if the options carry one.
    pub fn with_options(stream: Box<dyn ByteStream>, opts: MemberOptions) -> Self {
        Member {
            segments: vec![Segment { stream, upto: None }],
            current: 0,
            pos: 0,
            upto: None,
            state: State::Ok,
            spares: opts.spares,
        }
    }

    /// Current health of this member
    pub fn state(&self) -> State {
        self.state
    }

    /// Force the health of this member.
    pub fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub(crate) fn set_spare_pool(&mut self, pool: Arc<SparePool>) {
        self.spares = Some(pool);
    }

    /// Rewind to the head of the segment chain and reacquire health.
    ///
    /// Streams without open semantics keep whatever health the member
    /// already knew, so a member failed in one open/close cycle stays
    /// failed in the next unless its stream says otherwise.
    pub async fn open(&mut self) -> State {
        self.pos = 0;
        self.current = 0;
        self.upto = self.segments[0].upto;

        if let Some(state) = self.segments[0].stream.open().await {
            self.state = state;
        }

        self.state
    }

    /// Close the active stream. Earlier segments were already closed when
    /// the chain failed over past them.
    pub async fn close(&mut self) -> Result<()> {
        self.segments[self.current].stream.close().await
    }

    /// Write the whole of `buf`, failing over to a spare if the active
    /// stream gives out partway.
    pub(crate) async fn write(&mut self, idx: usize, buf: &[u8]) -> Completion {
        if self.state != State::Ok {
            return Completion::new(idx, 0, Some(Error::Io));
        }

        let mut off = 0;
        loop {
            match self.segments[self.current].stream.write(&buf[off..]).await {
                Ok(n) => {
                    self.pos += n as u64;
                    return Completion::new(idx, off + n, None);
                }
                Err(Error::Eof) => {
                    return Completion::new(idx, off, Some(Error::Eof));
                }
                Err(err) => {
                    let written = err.committed();
                    self.pos += written as u64;
                    off += written;

                    let spare = match self.spares.as_ref().map(|p| p.get()) {
                        Some(Ok(spare)) => spare,
                        _ => {
                            warn!(member = idx, error = %err, "no spare available, member failed");
                            self.state = State::Failed;
                            return Completion::new(idx, off, Some(err));
                        }
                    };

                    // seal the current segment at the position reached and
                    // continue the write on the spare
                    self.segments[self.current].upto = Some(self.pos);
                    if let Err(close_err) = self.segments[self.current].stream.close().await {
                        debug!(member = idx, error = %close_err, "closing failed stream");
                    }

                    self.segments.push(Segment {
                        stream: spare,
                        upto: None,
                    });
                    self.current += 1;
                    self.upto = None;

                    warn!(
                        member = idx,
                        segment = self.current,
                        pos = self.pos,
                        "write failover to spare"
                    );
                }
            }
        }
    }

    /// Read into `buf`, hopping to the next segment when the request would
    /// cross the current segment's sealed end.
    pub(crate) async fn read_into(&mut self, idx: usize, buf: &mut [u8]) -> Completion {
        if self.state != State::Ok {
            return Completion::new(idx, 0, Some(Error::Io));
        }

        match self.read_raw(buf).await {
            Ok(n) => Completion::new(idx, n, None),
            Err(err) => {
                if err.is_fatal() {
                    self.state = State::Failed;
                }
                Completion::new(idx, 0, Some(err))
            }
        }
    }

    /// Like [`read_into`](Member::read_into), but into a fresh buffer that
    /// rides back on the completion.
    pub(crate) async fn read_scratch(&mut self, idx: usize, len: usize) -> Completion {
        let mut data = vec![0u8; len];
        let mut cpl = self.read_into(idx, &mut data).await;
        cpl.data = data;
        cpl
    }

    /// Segment-aware read without the health gate. Used by the mirror
    /// rebuilder, which streams through members parked in other states.
    pub(crate) async fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(upto) = self.upto {
            if self.pos + buf.len() as u64 > upto {
                // the request would cross the sealed end, jump to the next
                // segment (the request itself is not split)
                self.current += 1;
                self.upto = self.segments[self.current].upto;
                self.segments[self.current].stream.open().await;
            }
        }

        let res = self.segments[self.current].stream.read(buf).await;
        if let Ok(n) = &res {
            self.pos += *n as u64;
        }

        res
    }

    /// Plain write to the active stream without the health gate or spare
    /// failover. Used by the mirror rebuilder.
    pub(crate) async fn write_raw(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.segments[self.current].stream.write(buf).await?;
        self.pos += n as u64;
        Ok(n)
    }
}
