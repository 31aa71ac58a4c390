//! Pool of ranks performing file I/O on behalf of all ranks.
//!
//! ```text
//!   all ranks:   0   1   2 | 3   4   5   6   7
//!               ---------- + -------------------
//!   pool (K=3):  0   1   2 |
//!   contiguous:  0<-{3,4}  1<-{5,6}  2<-{7}
//!   round-robin: 0<-{3,6}  1<-{4,7}  2<-{5}
//! ```
//!
//! Setup runs as a fixed sequence of collective steps, each checked against
//! the current [`PoolState`]. [`IoPool::new`] runs them all.

use std::fmt;
use std::path::{Path, PathBuf};

use obs_common::TimeWindow;
use tracing::{debug, info};

use crate::comm::{Comm, ReduceOp};
use crate::config::{IoPoolConfig, RankGrouping};
use crate::error::{CommError, DistributionError, Result};

const TAG_ASSIGN: u32 = 100;
const TAG_GATHER: u32 = 101;
const TAG_SCATTER: u32 = 102;

/// Setup progress of an [`IoPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolState {
    Constructed,
    RanksGrouped,
    RanksAssigned,
    PoolCommunicatorCreated,
    TotalsCollected,
    SingleFileInfoCollected,
    Finalized,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Pool rank that `rank` reports to, for a pool of the first `pool_size`
/// ranks of a communicator of `size` ranks.
pub fn home_pool_rank(rank: usize, pool_size: usize, size: usize, grouping: RankGrouping) -> usize {
    if rank < pool_size {
        return rank;
    }
    let j = rank - pool_size;
    match grouping {
        RankGrouping::RoundRobin => j % pool_size,
        RankGrouping::Contiguous => {
            let clients = size - pool_size;
            let base = clients / pool_size;
            let rem = clients % pool_size;
            let big = rem * (base + 1);
            if j < big {
                j / (base + 1)
            } else {
                rem + (j - big) / base
            }
        }
    }
}

/// Insert `_NNNN` before the extension of `path`.
pub fn uniquify_file_name(path: &Path, n: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_{:04}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}_{:04}", stem, n),
    };
    path.with_file_name(name)
}

pub struct IoPool {
    state: PoolState,
    config: IoPoolConfig,
    comm_all: Comm,
    comm_time: Option<Comm>,
    comm_pool: Option<Comm>,
    window: TimeWindow,
    nlocs: usize,
    pool_size: usize,
    home: usize,
    /// Pool ranks: `(client, count)` of every client. Others: `(home, own count)`.
    rank_assignment: Vec<(usize, usize)>,
    total_nlocs: usize,
    global_nlocs: usize,
    nlocs_start: usize,
}

impl IoPool {
    /// Construct without running any setup step.
    pub fn build(
        comm_all: Comm,
        comm_time: Option<Comm>,
        config: IoPoolConfig,
        window: TimeWindow,
        nlocs: usize,
    ) -> Result<Self> {
        config.validate().map_err(DistributionError::config_error)?;
        Ok(Self {
            state: PoolState::Constructed,
            config,
            comm_all,
            comm_time,
            comm_pool: None,
            window,
            nlocs,
            pool_size: 0,
            home: 0,
            rank_assignment: Vec::new(),
            total_nlocs: 0,
            global_nlocs: 0,
            nlocs_start: 0,
        })
    }

    /// Construct and run the full setup sequence. Collective over `comm_all`.
    pub fn new(
        comm_all: Comm,
        comm_time: Option<Comm>,
        config: IoPoolConfig,
        window: TimeWindow,
        nlocs: usize,
    ) -> Result<Self> {
        let mut pool = Self::build(comm_all, comm_time, config, window, nlocs)?;
        pool.group_ranks()?;
        pool.assign_ranks_to_io_pool()?;
        pool.create_io_pool()?;
        pool.set_total_nlocs()?;
        if !pool.config.write_multiple_files {
            pool.collect_single_file_info()?;
        }
        pool.finalize()?;
        info!(%pool, "io pool ready");
        Ok(pool)
    }

    fn advance(&mut self, operation: &'static str, expected: &[PoolState], next: PoolState) -> Result<()> {
        if !expected.contains(&self.state) {
            return Err(DistributionError::PoolState {
                operation,
                expected: expected
                    .iter()
                    .map(PoolState::to_string)
                    .collect::<Vec<_>>()
                    .join(" or "),
                actual: self.state.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Choose pool ranks and each rank's home pool rank.
    pub fn group_ranks(&mut self) -> Result<()> {
        self.advance("group_ranks", &[PoolState::Constructed], PoolState::RanksGrouped)?;
        let size = self.comm_all.size();
        self.pool_size = self.config.max_pool_size.min(size);
        self.home = home_pool_rank(self.comm_all.rank(), self.pool_size, size, self.config.grouping);
        debug!(
            rank = self.comm_all.rank(),
            pool_size = self.pool_size,
            home = self.home,
            grouping = self.config.grouping.as_str(),
            "grouped ranks"
        );
        Ok(())
    }

    /// Clients report their location counts to their home pool rank.
    pub fn assign_ranks_to_io_pool(&mut self) -> Result<()> {
        self.advance(
            "assign_ranks_to_io_pool",
            &[PoolState::RanksGrouped],
            PoolState::RanksAssigned,
        )?;
        let rank = self.comm_all.rank();
        let size = self.comm_all.size();
        if self.is_pool_member() {
            let clients: Vec<usize> = (self.pool_size..size)
                .filter(|&r| home_pool_rank(r, self.pool_size, size, self.config.grouping) == rank)
                .collect();
            let mut assignment = Vec::with_capacity(clients.len());
            for client in clients {
                let count: usize = self.comm_all.recv(client, TAG_ASSIGN)?;
                assignment.push((client, count));
            }
            self.rank_assignment = assignment;
        } else {
            self.comm_all.send(self.home, TAG_ASSIGN, self.nlocs)?;
            self.rank_assignment = vec![(self.home, self.nlocs)];
        }
        Ok(())
    }

    /// Split the pool communicator off the all communicator.
    pub fn create_io_pool(&mut self) -> Result<()> {
        self.advance(
            "create_io_pool",
            &[PoolState::RanksAssigned],
            PoolState::PoolCommunicatorCreated,
        )?;
        let color = self.is_pool_member().then_some(0);
        self.comm_pool = self.comm_all.split(color, self.comm_all.rank())?;
        Ok(())
    }

    /// Pool ranks total their own and their clients' counts.
    pub fn set_total_nlocs(&mut self) -> Result<()> {
        self.advance(
            "set_total_nlocs",
            &[PoolState::PoolCommunicatorCreated],
            PoolState::TotalsCollected,
        )?;
        self.total_nlocs = if self.is_pool_member() {
            self.nlocs + self.rank_assignment.iter().map(|(_, n)| n).sum::<usize>()
        } else {
            0
        };
        Ok(())
    }

    /// Global total and this pool rank's offset in a single shared file.
    pub fn collect_single_file_info(&mut self) -> Result<()> {
        self.advance(
            "collect_single_file_info",
            &[PoolState::TotalsCollected],
            PoolState::SingleFileInfoCollected,
        )?;
        // Non-pool ranks contribute zero, and pool ranks are the lowest ranks
        // of the all communicator, so scans over it follow pool rank order.
        self.global_nlocs = self.comm_all.all_reduce(self.total_nlocs, ReduceOp::Sum)?;
        let start = self.comm_all.exclusive_scan(self.total_nlocs)?;
        self.nlocs_start = if self.is_pool_member() { start } else { 0 };
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<()> {
        self.advance(
            "finalize",
            &[PoolState::TotalsCollected, PoolState::SingleFileInfoCollected],
            PoolState::Finalized,
        )
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn config(&self) -> &IoPoolConfig {
        &self.config
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn comm_all(&self) -> &Comm {
        &self.comm_all
    }

    pub fn comm_pool(&self) -> Option<&Comm> {
        self.comm_pool.as_ref()
    }

    pub fn is_pool_member(&self) -> bool {
        self.comm_all.rank() < self.pool_size
    }

    /// Rank in the pool communicator; `None` for non-members.
    pub fn pool_rank(&self) -> Option<usize> {
        self.comm_pool.as_ref().map(Comm::rank)
    }

    /// Size of the pool communicator; `None` for non-members.
    pub fn pool_size(&self) -> Option<usize> {
        self.comm_pool.as_ref().map(Comm::size)
    }

    pub fn home_pool_rank(&self) -> usize {
        self.home
    }

    pub fn rank_assignment(&self) -> &[(usize, usize)] {
        &self.rank_assignment
    }

    pub fn nlocs(&self) -> usize {
        self.nlocs
    }

    pub fn total_nlocs(&self) -> usize {
        self.total_nlocs
    }

    pub fn global_nlocs(&self) -> usize {
        self.global_nlocs
    }

    pub fn nlocs_start(&self) -> usize {
        self.nlocs_start
    }

    fn require_finalized(&self, operation: &'static str) -> Result<()> {
        if self.state != PoolState::Finalized {
            return Err(DistributionError::PoolState {
                operation,
                expected: PoolState::Finalized.to_string(),
                actual: self.state.to_string(),
            });
        }
        Ok(())
    }

    /// Relay every rank's block to its pool rank. Pool ranks get their own
    /// block followed by their clients' blocks in assignment order.
    pub fn gather_to_pool<T: Send + 'static>(&self, own: Vec<T>) -> Result<Option<Vec<T>>> {
        self.require_finalized("gather_to_pool")?;
        if !self.is_pool_member() {
            self.comm_all.send(self.home, TAG_GATHER, own)?;
            return Ok(None);
        }
        let mut out = own;
        for &(client, _) in &self.rank_assignment {
            let block: Vec<T> = self.comm_all.recv(client, TAG_GATHER)?;
            out.extend(block);
        }
        Ok(Some(out))
    }

    /// Inverse of [`gather_to_pool`](Self::gather_to_pool). Pool ranks pass
    /// `total_nlocs * row_len` values; every rank gets back its own block.
    pub fn scatter_from_pool<T: Send + 'static>(&self, data: Option<Vec<T>>, row_len: usize) -> Result<Vec<T>> {
        self.require_finalized("scatter_from_pool")?;
        if !self.is_pool_member() {
            return Ok(self.comm_all.recv(self.home, TAG_SCATTER)?);
        }
        let mut data = data.ok_or_else(|| {
            CommError::InvalidArgument("pool ranks must supply data to scatter".to_string())
        })?;
        let expected = self.total_nlocs * row_len;
        if data.len() != expected {
            return Err(CommError::InvalidArgument(format!(
                "scatter of {} values, expected {}",
                data.len(),
                expected
            ))
            .into());
        }
        // Peel client blocks off the tail so each split is one allocation.
        let mut blocks = Vec::with_capacity(self.rank_assignment.len());
        for &(client, count) in self.rank_assignment.iter().rev() {
            let block = data.split_off(data.len() - count * row_len);
            blocks.push((client, block));
        }
        for (client, block) in blocks.into_iter().rev() {
            self.comm_all.send(client, TAG_SCATTER, block)?;
        }
        Ok(data)
    }

    /// Output path for this rank's pool: `_<timeRank>` is appended when the
    /// time communicator spans several ranks, `_<poolRank>` in multiple-file
    /// mode.
    pub fn output_file_name(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        if let Some(time) = &self.comm_time {
            if time.size() > 1 {
                path = uniquify_file_name(&path, time.rank());
            }
        }
        if self.config.write_multiple_files {
            if let Some(pool_rank) = self.pool_rank() {
                path = uniquify_file_name(&path, pool_rank);
            }
        }
        path
    }
}

impl fmt::Display for IoPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sentinel = |v: Option<usize>| v.map(|v| v as i64).unwrap_or(-1);
        write!(
            f,
            "IoPool(rank={}, pool_rank={}, pool_size={}, home={}, nlocs={}, total_nlocs={}, global_nlocs={}, nlocs_start={}, state={})",
            self.comm_all.rank(),
            sentinel(self.pool_rank()),
            sentinel(self.pool_size()),
            self.home,
            self.nlocs,
            self.total_nlocs,
            self.global_nlocs,
            self.nlocs_start,
            self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> TimeWindow {
        TimeWindow::parse(test_utils::window::BEGIN, test_utils::window::END).unwrap()
    }

    #[test]
    fn test_contiguous_grouping() {
        let homes: Vec<usize> = (0..8)
            .map(|r| home_pool_rank(r, 3, 8, RankGrouping::Contiguous))
            .collect();
        assert_eq!(homes, vec![0, 1, 2, 0, 0, 1, 1, 2]);
    }

    #[test]
    fn test_contiguous_grouping_fewer_clients_than_pool() {
        let homes: Vec<usize> = (0..5)
            .map(|r| home_pool_rank(r, 3, 5, RankGrouping::Contiguous))
            .collect();
        assert_eq!(homes, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_round_robin_grouping() {
        let homes: Vec<usize> = (0..8)
            .map(|r| home_pool_rank(r, 3, 8, RankGrouping::RoundRobin))
            .collect();
        assert_eq!(homes, vec![0, 1, 2, 0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_uniquify_file_name() {
        assert_eq!(
            uniquify_file_name(Path::new("/tmp/out.zarr"), 3),
            PathBuf::from("/tmp/out_0003.zarr")
        );
        assert_eq!(
            uniquify_file_name(Path::new("out"), 12),
            PathBuf::from("out_0012")
        );
    }

    #[test]
    fn test_solo_pool() {
        let pool = IoPool::new(Comm::solo(), None, IoPoolConfig::default(), window(), 7).unwrap();
        assert_eq!(pool.state(), PoolState::Finalized);
        assert_eq!(pool.pool_rank(), Some(0));
        assert_eq!(pool.total_nlocs(), 7);
        assert_eq!(pool.global_nlocs(), 7);
        assert_eq!(pool.nlocs_start(), 0);
        assert_eq!(pool.output_file_name(Path::new("o.zarr")), PathBuf::from("o.zarr"));

        let gathered = pool.gather_to_pool(vec![1, 2, 3]).unwrap();
        assert_eq!(gathered, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_steps_out_of_order() {
        let mut pool =
            IoPool::build(Comm::solo(), None, IoPoolConfig::default(), window(), 1).unwrap();
        let err = pool.create_io_pool().unwrap_err();
        assert!(matches!(
            err,
            DistributionError::PoolState { operation: "create_io_pool", .. }
        ));
        assert_eq!(pool.state(), PoolState::Constructed);

        pool.group_ranks().unwrap();
        assert!(pool.group_ranks().is_err());
        assert!(pool.gather_to_pool(vec![0u8]).is_err());
    }

    #[test]
    fn test_multiple_files_skip_single_file_info() {
        let config = IoPoolConfig {
            write_multiple_files: true,
            ..IoPoolConfig::default()
        };
        let pool = IoPool::new(Comm::solo(), None, config, window(), 4).unwrap();
        assert_eq!(pool.global_nlocs(), 0);
        assert_eq!(
            pool.output_file_name(Path::new("o.zarr")),
            PathBuf::from("o_0000.zarr")
        );
    }

    #[test]
    fn test_display_uses_sentinels() {
        let pool = IoPool::build(Comm::solo(), None, IoPoolConfig::default(), window(), 1).unwrap();
        assert!(pool.to_string().contains("pool_rank=-1"));
    }
}
