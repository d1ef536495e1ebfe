//! Thin façade over the message transport.
//!
//! Messages are contiguous byte slices. Handles are waitable but
//! non-blocking; callers `.wait()` before trusting a buffer. Delivery is
//! FIFO per (source, destination, tag) triple, matching MPI ordering, which
//! is what lets the executor reuse fixed phase tags across calls without
//! sequence numbers.
//!
//! Backends: [`NoComm`] for pure serial runs, [`MailboxComm`] for in-process
//! multi-rank tests (one thread per rank over a shared mailbox), and
//! `MpiComm` behind the `mpi-support` feature.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::GsError;

/// Typed base for a tag range. Each communication phase owns a disjoint
/// range so overlapped phases (pairwise data vs. tree reduction) never
/// collide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn base(self) -> u16 {
        self.0
    }
    pub const fn offset(self, off: u16) -> u16 {
        self.0 + off
    }
}

/// Build-time sanity collective.
pub const TAG_BUILD_SANITY: CommTag = CommTag(0x0100);
/// Neighbor-discovery mask rounds.
pub const TAG_BUILD_DISCOVER: CommTag = CommTag(0x0200);
/// Pairwise shared-id cross-check at build.
pub const TAG_BUILD_PAIRWISE_IDS: CommTag = CommTag(0x0300);
/// Tree reduction during `reduce*`.
pub const TAG_REDUCE_TREE: CommTag = CommTag(0x0400);
/// Pairwise value exchange during `reduce*`.
pub const TAG_REDUCE_PAIRWISE: CommTag = CommTag(0x0500);

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Blocking receive of exactly `buf.len()` bytes from `peer`.
pub fn recv_into<C: Communicator>(
    comm: &C,
    peer: usize,
    tag: u16,
    buf: &mut [u8],
) -> Result<(), GsError> {
    let h = comm.irecv(peer, tag, buf);
    match h.wait() {
        Some(data) if data.len() == buf.len() => {
            buf.copy_from_slice(&data);
            Ok(())
        }
        Some(data) => Err(GsError::CommError {
            neighbor: peer,
            detail: format!("expected {} bytes, got {}", buf.len(), data.len()),
        }),
        None => Err(GsError::CommError {
            neighbor: peer,
            detail: format!("receive with tag {tag} returned no data"),
        }),
    }
}

/// Send and drain the handle immediately.
pub fn send_now<C: Communicator>(comm: &C, peer: usize, tag: u16, buf: &[u8]) {
    let _ = comm.isend(peer, tag, buf).wait();
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

// --- MailboxComm: in-process multi-rank backend ---

type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = Arc<DashMap<Key, VecDeque<Bytes>>>;

static GLOBAL_MAILBOX: Lazy<Mailbox> = Lazy::new(|| Arc::new(DashMap::new()));

/// Handle for an in-flight mailbox receive.
pub struct LocalHandle {
    buf: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let mut guard = self.buf.lock();
        guard.take()
    }
}

/// One rank of an in-process cluster sharing a FIFO mailbox.
#[derive(Clone, Debug)]
pub struct MailboxComm {
    rank: usize,
    size: usize,
    mailbox: Mailbox,
}

impl MailboxComm {
    /// Attach to the process-global mailbox. Tests sharing it must not run
    /// concurrently; prefer [`MailboxCluster`] for isolated mailboxes.
    pub fn global(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: GLOBAL_MAILBOX.clone(),
        }
    }
}

impl Communicator for MailboxComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> LocalHandle {
        let key = (peer, self.rank, tag);
        let slot = Arc::new(Mutex::new(None));
        let slot_clone = slot.clone();
        let mailbox = self.mailbox.clone();
        // The message is delivered whole, whatever the posted buffer's size.
        // Length mismatches are the caller's to detect, as under MPI.
        let handle = std::thread::spawn(move || {
            loop {
                let msg = mailbox.get_mut(&key).and_then(|mut q| q.pop_front());
                if let Some(bytes) = msg {
                    *slot_clone.lock() = Some(bytes.to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            buf: slot,
            handle: Some(handle),
        }
    }
}

/// An isolated set of mailbox ranks, for multi-rank tests and examples.
#[derive(Clone, Debug)]
pub struct MailboxCluster {
    size: usize,
    mailbox: Mailbox,
}

impl MailboxCluster {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "cluster needs at least one rank");
        Self {
            size,
            mailbox: Arc::new(DashMap::new()),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn comm(&self, rank: usize) -> MailboxComm {
        assert!(rank < self.size, "rank {rank} out of range");
        MailboxComm {
            rank,
            size: self.size,
            mailbox: self.mailbox.clone(),
        }
    }

    /// Run `f` once per rank on its own thread; results come back in rank
    /// order. Panics in any rank propagate.
    pub fn run<T, F>(size: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(MailboxComm) -> T + Send + Sync,
    {
        let cluster = MailboxCluster::new(size);
        std::thread::scope(|s| {
            let handles: Vec<_> = (0..size)
                .map(|r| {
                    let comm = cluster.comm(r);
                    let f = &f;
                    s.spawn(move || f(comm))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("rank thread panicked"))
                .collect()
        })
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::Wait;
    use mpi::topology::{Communicator as _, SimpleCommunicator};
    use mpi::traits::*;

    /// MPI world adapter. Sends rely on eager delivery for the message sizes
    /// this library produces; receives block in `wait`, which is all the
    /// executor's post-recv-first discipline needs.
    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        world: std::sync::Arc<SimpleCommunicator>,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn world() -> Self {
            let universe = mpi::initialize().expect("MPI already initialized");
            let world = std::sync::Arc::new(universe.world());
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: universe,
                world,
                rank,
                size,
            }
        }
    }

    /// Deferred receive: the matching `receive_into` runs in `wait`, after
    /// the caller has posted its own sends.
    pub struct MpiRecvHandle {
        world: std::sync::Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
        len: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let mut data = vec![0u8; self.len];
            self.world
                .process_at_rank(self.peer)
                .receive_into_with_tag(&mut data[..], self.tag);
            Some(data)
        }
    }

    impl super::Communicator for MpiComm {
        type SendHandle = ();
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, tag as i32);
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: self.world.clone(),
                peer: peer as i32,
                tag: tag as i32,
                len: buf.len(),
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
