//! Mirror: N-way replication with background rebuild
//!
//! Writes fan out to every healthy member; a single success is a success.
//! Reads race all healthy members and the first completion wins. A failed
//! member can be swapped for a fresh stream with [`Mirror::replace`], after
//! which a long-running rebuilder task copies a surviving member into the
//! replacement.
//!
//! The mirror is a cheap handle over shared state, so it can be cloned,
//! boxed into an outer behavior, and still be replaced through a retained
//! clone.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::member::Member;
use crate::spare::SparePool;
use crate::stream::{Behavior, ByteStream, State};

const REBUILD_CHUNK: usize = 32 * 1024;

struct ReplaceRequest {
    idx: usize,
    done: oneshot::Sender<Result<()>>,
}

struct MirrorCore {
    members: Vec<Member>,
    seq: u64,
    state: State,
    spares: Option<Arc<SparePool>>,
}

/// Replicates every write across all members.
///
/// Public operations serialize on an internal lock shared with the
/// rebuilder task; the lock is held per operation, never across calls.
#[derive(Clone)]
pub struct Mirror {
    core: Arc<Mutex<MirrorCore>>,
    replaced: mpsc::Sender<ReplaceRequest>,
}

impl Mirror {
    /// Build a mirror over `streams` and spawn its rebuilder task.
    ///
    /// Must be called from within a tokio runtime. The rebuilder exits once
    /// every handle to the mirror has been dropped.
    pub fn new(streams: Vec<Box<dyn ByteStream>>) -> Self {
        assert!(!streams.is_empty(), "mirror requires at least one member");

        let core = Arc::new(Mutex::new(MirrorCore {
            members: streams.into_iter().map(Member::new).collect(),
            seq: 0,
            state: State::Ok,
            spares: None,
        }));

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(rebuild_loop(Arc::clone(&core), rx));

        Mirror { core, replaced: tx }
    }

    /// Share a spare pool with every current and future member.
    pub async fn set_spare_pool(&self, pool: Arc<SparePool>) {
        let mut core = self.core.lock().await;
        for member in &mut core.members {
            member.set_spare_pool(Arc::clone(&pool));
        }
        core.spares = Some(pool);
    }

    /// Aggregate health of the mirror
    pub async fn health(&self) -> State {
        self.core.lock().await.state
    }

    /// Open every member and aggregate health.
    pub async fn open(&self) -> State {
        self.core.lock().await.open_all().await
    }

    /// Close every member, returning the last error observed.
    pub async fn close(&self) -> Result<()> {
        self.core.lock().await.close_all().await
    }

    /// Read from all healthy members; the first completion wins.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.core.lock().await.read(buf).await
    }

    /// Write `buf` to all healthy members; one success suffices.
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.core.lock().await.write(buf).await
    }

    /// Swap the member at `idx` for a fresh stream and resynchronize it.
    ///
    /// Blocks until the rebuilder has finished copying a surviving member
    /// into the replacement. The mirror is left closed afterwards and must
    /// be reopened before further I/O.
    pub async fn replace(&self, idx: usize, stream: Box<dyn ByteStream>) -> Result<()> {
        {
            let mut core = self.core.lock().await;

            // reset positions on the survivors so the rebuild copy starts
            // from the head of the stream
            core.open_all().await;

            core.members[idx].close().await?;

            let mut member = Member::new(stream);
            if let Some(pool) = &core.spares {
                member.set_spare_pool(Arc::clone(pool));
            }
            member.open().await;
            core.members[idx] = member;
        }

        let (done, ack) = oneshot::channel();
        self.replaced
            .send(ReplaceRequest { idx, done })
            .await
            .map_err(|_| Error::Io)?;

        ack.await.map_err(|_| Error::Io)?
    }
}

async fn rebuild_loop(core: Arc<Mutex<MirrorCore>>, mut signals: mpsc::Receiver<ReplaceRequest>) {
    while let Some(req) = signals.recv().await {
        let mut core = core.lock().await;

        let res = core.rebuild(req.idx).await;
        if let Err(err) = &res {
            warn!(member = req.idx, error = %err, "mirror rebuild failed");
        }

        // the mirror is left closed after a rebuild; the caller reopens it
        if let Err(err) = core.close_all().await {
            warn!(error = %err, "closing mirror after rebuild");
        }

        let _ = req.done.send(res);
    }
}

impl MirrorCore {
    async fn open_all(&mut self) -> State {
        self.state = State::Ok;

        let mut failed = 0;
        let mut degraded = false;

        for member in &mut self.members {
            match member.open().await {
                State::Degraded => degraded = true,
                State::Failed => failed += 1,
                _ => {}
            }
        }

        if failed == self.members.len() {
            self.state = State::Failed;
        } else if failed > 0 || degraded {
            self.state = State::Degraded;
        }

        self.state
    }

    async fn close_all(&mut self) -> Result<()> {
        let mut res = Ok(());
        for member in &mut self.members {
            if let Err(err) = member.close().await {
                res = Err(err);
            }
        }
        res
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.seq += 1;
        let seq = self.seq;

        let mut tasks: FuturesUnordered<_> = self
            .members
            .iter_mut()
            .enumerate()
            .filter(|(_, m)| m.state() == State::Ok)
            .map(|(i, m)| m.write(i, buf))
            .collect();

        let active = tasks.len();
        if active == 0 {
            return Err(Error::Io);
        }

        let mut outcome: Option<Result<usize>> = None;
        let mut succeeded = false;
        let mut degraded = false;

        while let Some(cpl) = tasks.next().await {
            match cpl.err {
                Some(err) if err.is_fatal() => {
                    warn!(seq, member = cpl.idx, error = %err, "mirror write failed on member");
                    degraded = true;
                    if !succeeded {
                        outcome = Some(Err(err));
                    }
                }
                err => {
                    if !succeeded {
                        outcome = Some(match err {
                            Some(Error::Eof) if cpl.n == 0 => Err(Error::Eof),
                            _ => Ok(cpl.n),
                        });
                    }
                    succeeded = true;
                }
            }
        }
        drop(tasks);

        if degraded {
            self.state = if active > 1 { State::Degraded } else { State::Failed };
        }

        debug!(seq, "mirror write joined");
        outcome.unwrap_or(Err(Error::Io))
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len();
        let mut tasks: FuturesUnordered<_> = self
            .members
            .iter_mut()
            .enumerate()
            .filter(|(_, m)| m.state() == State::Ok)
            .map(|(i, m)| m.read_scratch(i, len))
            .collect();

        let active = tasks.len();
        if active == 0 {
            return Err(Error::Io);
        }

        let mut winner: Option<(usize, Option<Error>, Vec<u8>)> = None;
        let mut first_err: Option<Error> = None;
        let mut degraded = false;

        while let Some(cpl) = tasks.next().await {
            match cpl.err {
                Some(err) if err.is_fatal() => {
                    warn!(member = cpl.idx, error = %err, "mirror read failed on member");
                    degraded = true;
                    first_err.get_or_insert(err);
                }
                err => {
                    if winner.is_none() {
                        winner = Some((cpl.n, err, cpl.data));
                    }
                }
            }
        }
        drop(tasks);

        if degraded {
            self.state = if active > 1 { State::Degraded } else { State::Failed };
        }

        match winner {
            Some((n, err, data)) => {
                buf[..n].copy_from_slice(&data[..n]);
                match err {
                    Some(Error::Eof) if n == 0 => Err(Error::Eof),
                    _ => Ok(n),
                }
            }
            None => Err(first_err.unwrap_or(Error::Io)),
        }
    }

    /// Copy a surviving member into the member at `idx` until end of stream.
    async fn rebuild(&mut self, idx: usize) -> Result<()> {
        let src = self
            .members
            .iter()
            .enumerate()
            .position(|(i, m)| i != idx && m.state() == State::Ok)
            .ok_or(Error::Io)?;

        self.members[idx].set_state(State::Rebuilding);

        let (src_m, dst_m) = pair_mut(&mut self.members, src, idx);
        let mut chunk = vec![0u8; REBUILD_CHUNK];
        let mut copied: u64 = 0;

        loop {
            let n = match src_m.read_raw(&mut chunk).await {
                Ok(0) | Err(Error::Eof) => break,
                Ok(n) => n,
                Err(err) => return Err(err),
            };

            dst_m.write_raw(&chunk[..n]).await?;
            copied += n as u64;
        }

        self.members[idx].set_state(State::Ok);
        info!(member = idx, copied, "mirror rebuild complete");

        Ok(())
    }
}

/// Mutable references to two distinct members of the slice.
fn pair_mut(members: &mut [Member], a: usize, b: usize) -> (&mut Member, &mut Member) {
    debug_assert_ne!(a, b);
    if a < b {
        let (lo, hi) = members.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = members.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

#[async_trait]
impl ByteStream for Mirror {
    async fn open(&mut self) -> Option<State> {
        Some(Mirror::open(self).await)
    }

    async fn close(&mut self) -> Result<()> {
        Mirror::close(self).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Mirror::read(self, buf).await
    }

    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Mirror::write(self, buf).await
    }
}

#[async_trait(?Send)]
impl Behavior for Mirror {
    async fn health(&self) -> State {
        self.core.lock().await.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{BlockDevice, FaultyDevice};

    #[tokio::test]
    async fn test_single_member_failure_fails_mirror() {
        let m = Mirror::new(vec![Box::new(FaultyDevice::new(64, 0))]);

        m.open().await;
        assert_eq!(m.write(&[0u8; 8]).await, Err(Error::Io));
        assert_eq!(m.health().await, State::Failed);
    }

    #[tokio::test]
    async fn test_survivor_absorbs_member_failure() {
        let m = Mirror::new(vec![
            Box::new(BlockDevice::new(64)),
            Box::new(FaultyDevice::new(64, 0)),
        ]);

        m.open().await;
        assert_eq!(m.write(&[6u8; 16]).await, Ok(16));
        assert_eq!(m.health().await, State::Degraded);

        // the failed member is skipped from here on
        assert_eq!(m.write(&[7u8; 16]).await, Ok(16));

        m.close().await.unwrap();
        m.open().await;

        let mut buf = [0u8; 16];
        assert_eq!(m.read(&mut buf).await, Ok(16));
        assert_eq!(buf, [6u8; 16]);
    }

    #[tokio::test]
    async fn test_no_healthy_members() {
        let m = Mirror::new(vec![Box::new(FaultyDevice::new(64, 0))]);

        m.open().await;
        let _ = m.write(&[0u8; 8]).await;

        assert_eq!(m.write(&[0u8; 8]).await, Err(Error::Io));
        let mut buf = [0u8; 8];
        assert_eq!(m.read(&mut buf).await, Err(Error::Io));
    }
}
