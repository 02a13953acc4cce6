//! Dedicated parity: striping plus one XOR parity member
//!
//! N data members carry equal shares of every request and a dedicated
//! parity member carries their XOR, RAID-4 style. Exactly one failure, of
//! any data member or the parity member, is tolerated: reads reconstruct a
//! missing data share from the N survivors, writes keep going as long as N
//! share-writes still land. A second failure fails the behavior.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::member::{Completion, Member, MemberOptions};
use crate::stream::{Behavior, ByteStream, State};
use crate::xor::{split, split_mut, xor_list};

/// Stripes data across N members with a dedicated XOR parity member.
pub struct DedicatedParity {
    stripe: Vec<Member>,
    parity: Member,
    state: State,
}

impl DedicatedParity {
    /// Build the behavior from a parity stream and at least two data streams.
    pub fn new(parity: Box<dyn ByteStream>, data: Vec<Box<dyn ByteStream>>) -> Self {
        Self::with_options(parity, data, MemberOptions::new())
    }

    /// Build the behavior, forwarding `opts` to every member.
    pub fn with_options(
        parity: Box<dyn ByteStream>,
        data: Vec<Box<dyn ByteStream>>,
        opts: MemberOptions,
    ) -> Self {
        assert!(data.len() >= 2, "dedicated parity requires at least two data members");

        DedicatedParity {
            stripe: data
                .into_iter()
                .map(|s| Member::with_options(s, opts.clone()))
                .collect(),
            parity: Member::with_options(parity, opts),
            state: State::Ok,
        }
    }

    /// Number of data members
    pub fn width(&self) -> usize {
        self.stripe.len()
    }

    /// Aggregate health of the behavior
    pub fn health(&self) -> State {
        self.state
    }

    /// Open all members. One failed member degrades the behavior, a second
    /// fails it.
    pub async fn open(&mut self) -> State {
        self.state = State::Ok;

        let mut failures = 0;
        let members = self.stripe.iter_mut().chain(std::iter::once(&mut self.parity));

        for member in members {
            match member.open().await {
                State::Failed => {
                    failures += 1;
                    self.state = if failures > 1 { State::Failed } else { State::Degraded };
                }
                State::Degraded if self.state == State::Ok => {
                    self.state = State::Degraded;
                }
                _ => {}
            }
        }

        self.state
    }

    /// Close all members, returning the last error observed.
    pub async fn close(&mut self) -> Result<()> {
        let mut res = Ok(());
        for member in &mut self.stripe {
            if let Err(err) = member.close().await {
                res = Err(err);
            }
        }
        if let Err(err) = self.parity.close().await {
            res = Err(err);
        }
        res
    }

    /// Split `buf` into data shares, compute their XOR, and write shares
    /// and parity concurrently.
    ///
    /// Success returns `buf.len()`: the stripe content is either fully
    /// committed or covered by parity. Fewer than N landed share-writes is
    /// a failure and returns the first error observed.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.state == State::Failed {
            return Err(Error::Io);
        }

        let width = self.width();
        let shares = split(buf, width);
        let parity_share = xor_list(&shares);

        let tasks: FuturesUnordered<BoxFuture<'_, Completion>> = FuturesUnordered::new();

        if self.parity.state() == State::Ok {
            tasks.push(self.parity.write(width, &parity_share).boxed());
        }
        for (i, (member, share)) in self.stripe.iter_mut().zip(&shares).enumerate() {
            if member.state() != State::Ok {
                continue;
            }
            tasks.push(member.write(i, share).boxed());
        }

        let completions: Vec<Completion> = tasks.collect().await;

        let mut good = 0;
        let mut first_err: Option<Error> = None;

        for cpl in completions {
            match cpl.err {
                Some(err) if err.is_fatal() => {
                    warn!(member = cpl.idx, error = %err, "parity-stripe write failed on member");
                    self.state = match self.state {
                        State::Degraded | State::Failed => State::Failed,
                        _ => State::Degraded,
                    };
                    first_err.get_or_insert(err);
                }
                _ => good += 1,
            }
        }

        if good < width {
            return Err(first_err.unwrap_or(Error::Io));
        }

        debug!(n = buf.len(), "parity-stripe write");
        Ok(buf.len())
    }

    /// Read all shares concurrently, reconstructing a missing data share
    /// from the N survivors when running degraded.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.state == State::Failed {
            return Err(Error::Io);
        }

        let width = self.width();
        let mut shares = split_mut(buf, width);
        let share_len = shares[0].len();

        // a member skipped here for bad health is the reconstruction
        // candidate; at most one can exist while we are not failed
        let mut missing: Option<usize> = None;

        let tasks: FuturesUnordered<BoxFuture<'_, Completion>> = FuturesUnordered::new();

        for (i, member) in self.stripe.iter_mut().enumerate() {
            if member.state() != State::Ok {
                missing = Some(i);
                continue;
            }
            tasks.push(member.read_scratch(i, share_len).boxed());
        }
        if self.parity.state() == State::Ok {
            tasks.push(self.parity.read_scratch(width, share_len).boxed());
        } else {
            missing = Some(width);
        }

        let completions: Vec<Completion> = tasks.collect().await;

        let mut slots: Vec<Option<Vec<u8>>> = (0..=width).map(|_| None).collect();
        let mut eof = false;
        let mut first_err: Option<Error> = None;

        for cpl in completions {
            match cpl.err {
                Some(err) if err.is_fatal() => {
                    warn!(member = cpl.idx, error = %err, "parity-stripe read failed on member");
                    match self.state {
                        State::Degraded | State::Failed => self.state = State::Failed,
                        _ => {
                            self.state = State::Degraded;
                            missing = Some(cpl.idx);
                        }
                    }
                    first_err.get_or_insert(err);
                }
                err => {
                    if matches!(err, Some(Error::Eof)) {
                        eof = true;
                    }
                    let mut data = cpl.data;
                    data.truncate(cpl.n);
                    slots[cpl.idx] = Some(data);
                }
            }
        }

        if self.state == State::Failed {
            return Err(first_err.unwrap_or(Error::Io));
        }

        let mut n = 0;

        match missing {
            // a data share is missing: rebuild it as the XOR of the
            // surviving shares and the parity share
            Some(miss) if self.state == State::Degraded && miss < width => {
                let survivors: Vec<&[u8]> = slots
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != miss)
                    .filter_map(|(_, slot)| slot.as_deref())
                    .collect();

                if survivors.len() != width {
                    return Err(first_err.unwrap_or(Error::Io));
                }

                let rebuilt = xor_list(&survivors);

                for (i, share) in shares.iter_mut().enumerate() {
                    if i == miss {
                        share[..rebuilt.len()].copy_from_slice(&rebuilt);
                        n += rebuilt.len();
                    } else if let Some(data) = &slots[i] {
                        share[..data.len()].copy_from_slice(data);
                        n += data.len();
                    }
                }
            }
            // healthy, or only parity is out: the data shares are all here
            _ => {
                for (i, share) in shares.iter_mut().enumerate() {
                    if let Some(data) = &slots[i] {
                        share[..data.len()].copy_from_slice(data);
                        n += data.len();
                    }
                }
            }
        }

        if eof && n == 0 {
            return Err(Error::Eof);
        }
        Ok(n)
    }
}

#[async_trait]
impl ByteStream for DedicatedParity {
    async fn open(&mut self) -> Option<State> {
        Some(DedicatedParity::open(self).await)
    }

    async fn close(&mut self) -> Result<()> {
        DedicatedParity::close(self).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        DedicatedParity::read(self, buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        DedicatedParity::write(self, buf).await
    }
}

#[async_trait(?Send)]
impl Behavior for DedicatedParity {
    async fn health(&self) -> State {
        self.state
    }
}
