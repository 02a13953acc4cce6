//! Stripe: N-way striping with no redundancy of its own
//!
//! Every request is split into N equal shares, one per member, and all
//! members must succeed. The stripe itself tolerates nothing; resilience
//! comes from below (members hot-sparing writes through a shared pool) or
//! from above (a mirror of stripes).

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::member::{Member, MemberOptions};
use crate::stream::{Behavior, ByteStream, State};
use crate::xor::{split, split_mut};

/// Stripes requests across a fixed-width group of members.
pub struct Stripe {
    members: Vec<Member>,
    seq: u64,
    state: State,
}

impl Stripe {
    /// Build a stripe over `streams`, one member per stream.
    pub fn new(streams: Vec<Box<dyn ByteStream>>) -> Self {
        Self::with_options(streams, MemberOptions::new())
    }

    /// Build a stripe, forwarding `opts` to every member.
    pub fn with_options(streams: Vec<Box<dyn ByteStream>>, opts: MemberOptions) -> Self {
        assert!(!streams.is_empty(), "stripe requires at least one member");

        Stripe {
            members: streams
                .into_iter()
                .map(|s| Member::with_options(s, opts.clone()))
                .collect(),
            seq: 0,
            state: State::Ok,
        }
    }

    /// Stripe width fixed at construction
    pub fn width(&self) -> usize {
        self.members.len()
    }

    /// Aggregate health of the stripe
    pub fn health(&self) -> State {
        self.state
    }

    /// Open every member and aggregate health. A degraded member degrades
    /// the stripe; any failed member fails it outright.
    pub async fn open(&mut self) -> State {
        self.state = State::Ok;

        for (i, member) in self.members.iter_mut().enumerate() {
            match member.open().await {
                State::Failed => {
                    warn!(member = i, "stripe member failed at open");
                    self.state = State::Failed;
                }
                State::Degraded if self.state != State::Failed => {
                    self.state = State::Degraded;
                }
                _ => {}
            }
        }

        self.state
    }

    /// Close every member, returning the last error observed.
    pub async fn close(&mut self) -> Result<()> {
        let mut res = Ok(());
        for member in &mut self.members {
            if let Err(err) = member.close().await {
                res = Err(err);
            }
        }
        res
    }

    /// Split `buf` into one share per member and write them concurrently.
    ///
    /// `buf` must be a non-zero multiple of `width * WORD_SIZE` bytes. The
    /// returned count is the sum across shares; any true I/O failure fails
    /// the stripe, while end-of-stream passes through without failing it.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.seq += 1;
        if self.state != State::Ok {
            return Err(Error::Io);
        }

        let shares = split(buf, self.width());
        let mut tasks: FuturesUnordered<_> = self
            .members
            .iter_mut()
            .zip(shares)
            .enumerate()
            .map(|(i, (member, share))| member.write(i, share))
            .collect();

        let mut n = 0;
        let mut eof = false;
        let mut fatal: Option<Error> = None;

        while let Some(cpl) = tasks.next().await {
            match cpl.err {
                Some(Error::Eof) => {
                    eof = true;
                    n += cpl.n;
                }
                Some(err) => {
                    warn!(seq = self.seq, member = cpl.idx, error = %err, "stripe write failed");
                    fatal.get_or_insert(err);
                }
                None => n += cpl.n,
            }
        }
        drop(tasks);

        if let Some(err) = fatal {
            self.state = State::Failed;
            return Err(err);
        }

        debug!(seq = self.seq, n, "stripe write");
        if eof && n == 0 {
            return Err(Error::Eof);
        }
        Ok(n)
    }

    /// Read one share per member directly into disjoint slices of `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.seq += 1;
        if self.state != State::Ok {
            return Err(Error::Io);
        }

        let shares = split_mut(buf, self.width());
        let mut tasks: FuturesUnordered<_> = self
            .members
            .iter_mut()
            .zip(shares)
            .enumerate()
            .map(|(i, (member, share))| member.read_into(i, share))
            .collect();

        let mut n = 0;
        let mut eof = false;
        let mut fatal: Option<Error> = None;

        while let Some(cpl) = tasks.next().await {
            match cpl.err {
                Some(Error::Eof) => {
                    eof = true;
                    n += cpl.n;
                }
                Some(err) => {
                    warn!(seq = self.seq, member = cpl.idx, error = %err, "stripe read failed");
                    fatal.get_or_insert(err);
                }
                None => n += cpl.n,
            }
        }
        drop(tasks);

        if let Some(err) = fatal {
            self.state = State::Failed;
            return Err(err);
        }

        if eof && n == 0 {
            return Err(Error::Eof);
        }
        Ok(n)
    }
}

#[async_trait]
impl ByteStream for Stripe {
    async fn open(&mut self) -> Option<State> {
        Some(Stripe::open(self).await)
    }

    async fn close(&mut self) -> Result<()> {
        Stripe::close(self).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Stripe::read(self, buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Stripe::write(self, buf).await
    }
}

#[async_trait(?Send)]
impl Behavior for Stripe {
    async fn health(&self) -> State {
        self.state
    }
}
