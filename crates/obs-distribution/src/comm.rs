//! Message-passing communicator with an in-process transport.
//!
//! Every rank owns a [`Comm`] handle. Messages are matched on
//! (communicator context, source rank, tag) and delivered in FIFO order per
//! match key. Collectives are built on point-to-point messages through rank
//! 0 of the communicator, so every rank sees identical results.
//!
//! [`LocalWorld::run`] executes one closure per rank on its own thread. A
//! rank that returns an error (or panics) aborts the world: every other rank
//! blocked in a receive observes [`CommError::Aborted`].

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use num_traits::Num;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{CommError, CommResult};

/// How often a blocked receive re-checks the abort flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Tags at and above this value are reserved for collectives.
pub const MAX_USER_TAG: u32 = u32::MAX - 16;

const TAG_GATHER: u32 = u32::MAX - 1;
const TAG_BROADCAST: u32 = u32::MAX - 2;

/// Reduction operator for [`Comm::all_reduce`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

/// Numeric types that can be reduced across ranks.
pub trait Reducible: Num + Copy + PartialOrd + Send + 'static {}

impl<T> Reducible for T where T: Num + Copy + PartialOrd + Send + 'static {}

impl ReduceOp {
    pub fn apply<T: Reducible>(&self, a: T, b: T) -> T {
        match self {
            Self::Sum => a + b,
            Self::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            Self::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
        }
    }
}

struct Envelope {
    context: u64,
    source: usize,
    tag: u32,
    payload: Box<dyn Any + Send>,
}

struct Mailbox {
    rx: Receiver<Envelope>,
    pending: Vec<Envelope>,
}

struct Fabric {
    senders: Vec<Sender<Envelope>>,
    mailboxes: Vec<Mutex<Mailbox>>,
    aborted: AtomicBool,
    first_failure: Mutex<Option<usize>>,
}

impl Fabric {
    fn new(size: usize) -> Self {
        let (senders, mailboxes) = (0..size)
            .map(|_| {
                let (tx, rx) = channel();
                (
                    tx,
                    Mutex::new(Mailbox {
                        rx,
                        pending: Vec::new(),
                    }),
                )
            })
            .unzip();
        Self {
            senders,
            mailboxes,
            aborted: AtomicBool::new(false),
            first_failure: Mutex::new(None),
        }
    }

    fn fail(&self, world_rank: usize) {
        let mut first = self.first_failure.lock();
        if first.is_none() {
            *first = Some(world_rank);
            warn!(rank = world_rank, "rank failed, aborting all ranks");
        }
        self.aborted.store(true, Ordering::SeqCst);
    }
}

/// A communicator: an ordered group of ranks sharing a message context.
#[derive(Clone)]
pub struct Comm {
    fabric: Arc<Fabric>,
    context: u64,
    rank: usize,
    /// World rank of every member, indexed by rank in this communicator.
    members: Arc<Vec<usize>>,
    splits: Arc<AtomicU64>,
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comm")
            .field("context", &self.context)
            .field("rank", &self.rank)
            .field("size", &self.size())
            .finish()
    }
}

fn derive_context(parent: u64, sequence: u64, color: u32) -> u64 {
    let mut hasher = DefaultHasher::new();
    (parent, sequence, color).hash(&mut hasher);
    hasher.finish()
}

impl Comm {
    fn world(fabric: Arc<Fabric>, rank: usize, size: usize) -> Self {
        Self {
            fabric,
            context: 0,
            rank,
            members: Arc::new((0..size).collect()),
            splits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A single-rank communicator.
    pub fn solo() -> Self {
        Self::world(Arc::new(Fabric::new(1)), 0, 1)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Rank of this process in the world communicator.
    pub fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    /// Abort every rank sharing this communicator's world.
    pub fn abort(&self) {
        self.fabric.fail(self.world_rank());
    }

    fn check_rank(&self, rank: usize) -> CommResult<()> {
        if rank >= self.size() {
            return Err(CommError::InvalidRank {
                rank,
                size: self.size(),
            });
        }
        Ok(())
    }

    /// Send a value to `dest`. Never blocks.
    pub fn send<T: Send + 'static>(&self, dest: usize, tag: u32, value: T) -> CommResult<()> {
        self.check_rank(dest)?;
        if self.fabric.aborted.load(Ordering::SeqCst) {
            return Err(CommError::Aborted);
        }
        let world_dest = self.members[dest];
        trace!(context = self.context, from = self.rank, to = dest, tag, "send");
        self.fabric.senders[world_dest]
            .send(Envelope {
                context: self.context,
                source: self.rank,
                tag,
                payload: Box::new(value),
            })
            .map_err(|_| CommError::Disconnected(dest))
    }

    /// Block until a message from `source` with `tag` arrives.
    pub fn recv<T: 'static>(&self, source: usize, tag: u32) -> CommResult<T> {
        self.check_rank(source)?;
        let envelope = self.recv_envelope(source, tag)?;
        envelope
            .payload
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| CommError::TypeMismatch {
                source_rank: source,
                tag,
                expected: std::any::type_name::<T>(),
            })
    }

    fn recv_envelope(&self, source: usize, tag: u32) -> CommResult<Envelope> {
        let mut mailbox = self.fabric.mailboxes[self.world_rank()].lock();
        loop {
            if let Some(pos) = mailbox
                .pending
                .iter()
                .position(|e| e.context == self.context && e.source == source && e.tag == tag)
            {
                return Ok(mailbox.pending.remove(pos));
            }
            if self.fabric.aborted.load(Ordering::SeqCst) {
                return Err(CommError::Aborted);
            }
            match mailbox.rx.recv_timeout(POLL_INTERVAL) {
                Ok(envelope) => mailbox.pending.push(envelope),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CommError::Disconnected(source))
                }
            }
        }
    }

    /// Block until every rank has reached the barrier.
    pub fn barrier(&self) -> CommResult<()> {
        self.all_gather(()).map(|_| ())
    }

    /// Distribute the root's value to every rank. Only the root supplies a value.
    pub fn broadcast<T: Clone + Send + 'static>(&self, root: usize, value: Option<T>) -> CommResult<T> {
        self.check_rank(root)?;
        if self.rank == root {
            let value = value.ok_or_else(|| {
                CommError::InvalidArgument("broadcast root must supply a value".to_string())
            })?;
            for r in (0..self.size()).filter(|&r| r != root) {
                self.send(r, TAG_BROADCAST, value.clone())?;
            }
            Ok(value)
        } else {
            self.recv(root, TAG_BROADCAST)
        }
    }

    /// Collect one value per rank at `root`, in rank order.
    pub fn gather<T: Send + 'static>(&self, root: usize, value: T) -> CommResult<Option<Vec<T>>> {
        self.check_rank(root)?;
        if self.rank != root {
            self.send(root, TAG_GATHER, value)?;
            return Ok(None);
        }
        let mut own = Some(value);
        let mut out = Vec::with_capacity(self.size());
        for r in 0..self.size() {
            if r == root {
                if let Some(v) = own.take() {
                    out.push(v);
                }
            } else {
                out.push(self.recv(r, TAG_GATHER)?);
            }
        }
        Ok(Some(out))
    }

    /// Every rank receives every rank's value, in rank order.
    pub fn all_gather<T: Clone + Send + 'static>(&self, value: T) -> CommResult<Vec<T>> {
        let gathered = self.gather(0, value)?;
        self.broadcast(0, gathered)
    }

    /// Concatenation of every rank's values, in rank order.
    pub fn all_gatherv<T: Clone + Send + 'static>(&self, values: Vec<T>) -> CommResult<Vec<T>> {
        Ok(self.all_gather(values)?.into_iter().flatten().collect())
    }

    pub fn all_reduce<T: Reducible>(&self, value: T, op: ReduceOp) -> CommResult<T> {
        let all = self.all_gather(value)?;
        let mut iter = all.into_iter();
        let first = iter.next().ok_or_else(|| {
            CommError::InvalidArgument("reduction over an empty communicator".to_string())
        })?;
        Ok(iter.fold(first, |acc, v| op.apply(acc, v)))
    }

    /// Element-wise reduction. Every rank must pass the same number of values.
    pub fn all_reduce_vec<T: Reducible>(&self, values: &[T], op: ReduceOp) -> CommResult<Vec<T>> {
        let all = self.all_gather(values.to_vec())?;
        if all.iter().any(|v| v.len() != values.len()) {
            return Err(CommError::InvalidArgument(format!(
                "element-wise reduction over vectors of different lengths {:?}",
                all.iter().map(Vec::len).collect::<Vec<_>>()
            )));
        }
        let mut out = values.to_vec();
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = all[0][i];
            for v in &all[1..] {
                *slot = op.apply(*slot, v[i]);
            }
        }
        Ok(out)
    }

    /// Sum of the values of all lower ranks; zero on rank 0.
    pub fn exclusive_scan<T: Reducible>(&self, value: T) -> CommResult<T> {
        let all = self.all_gather(value)?;
        Ok(all[..self.rank]
            .iter()
            .fold(T::zero(), |acc, v| acc + *v))
    }

    /// Partition this communicator. Ranks passing the same `color` form a new
    /// communicator ordered by `(key, rank)`; ranks passing `None` get `None`.
    pub fn split(&self, color: Option<u32>, key: usize) -> CommResult<Option<Comm>> {
        let sequence = self.splits.fetch_add(1, Ordering::Relaxed);
        let all = self.all_gather((color, key))?;
        let Some(color) = color else {
            return Ok(None);
        };

        let mut group: Vec<(usize, usize)> = all
            .iter()
            .enumerate()
            .filter(|(_, (c, _))| *c == Some(color))
            .map(|(r, (_, k))| (*k, r))
            .collect();
        group.sort_unstable();

        let rank = group
            .iter()
            .position(|(_, r)| *r == self.rank)
            .ok_or_else(|| CommError::InvalidArgument("rank missing from its own split".to_string()))?;
        let members: Vec<usize> = group.iter().map(|(_, r)| self.members[*r]).collect();
        debug!(color, rank, size = members.len(), "split communicator");

        Ok(Some(Comm {
            fabric: self.fabric.clone(),
            context: derive_context(self.context, sequence, color),
            rank,
            members: Arc::new(members),
            splits: Arc::new(AtomicU64::new(0)),
        }))
    }
}

/// In-process transport: one thread per rank.
pub struct LocalWorld;

impl LocalWorld {
    /// Run `f` on `size` ranks and collect the results in rank order.
    ///
    /// If any rank fails, the error of the first failing rank is returned.
    pub fn run<T, E, F>(size: usize, f: F) -> Result<Vec<T>, E>
    where
        T: Send,
        E: From<CommError> + Send,
        F: Fn(Comm) -> Result<T, E> + Sync,
    {
        if size == 0 {
            return Err(E::from(CommError::InvalidArgument(
                "world size must be at least 1".to_string(),
            )));
        }
        let fabric = Arc::new(Fabric::new(size));
        debug!(size, "starting local world");

        let results: Vec<Result<T, E>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..size)
                .map(|rank| {
                    let comm = Comm::world(fabric.clone(), rank, size);
                    let fabric = fabric.clone();
                    let f = &f;
                    scope.spawn(move || match catch_unwind(AssertUnwindSafe(|| f(comm))) {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(err)) => {
                            fabric.fail(rank);
                            Err(err)
                        }
                        Err(_) => {
                            fabric.fail(rank);
                            Err(E::from(CommError::RankPanicked(rank)))
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, h)| {
                    h.join()
                        .unwrap_or_else(|_| Err(E::from(CommError::RankPanicked(rank))))
                })
                .collect()
        });

        let first_failure = *fabric.first_failure.lock();
        let mut values = Vec::with_capacity(size);
        let mut errors = Vec::new();
        for (rank, result) in results.into_iter().enumerate() {
            match result {
                Ok(v) => values.push(v),
                Err(e) => errors.push((rank, e)),
            }
        }
        if errors.is_empty() {
            return Ok(values);
        }
        let index = first_failure
            .and_then(|first| errors.iter().position(|(r, _)| *r == first))
            .unwrap_or(0);
        Err(errors.swap_remove(index).1)
    }
}
