//! Record ownership across cooperating ranks.
//!
//! This crate provides:
//!
//! - **Communicator**: [`Comm`] point-to-point messages and blocking
//!   collectives, with an in-process thread-per-rank transport
//!   ([`LocalWorld`])
//! - **Distributions**: pluggable policies deciding which rank keeps which
//!   record, built by name through [`DistributionFactory`]
//! - **I/O pool**: [`IoPool`] groups ranks under a few I/O ranks that read
//!   and write files on behalf of the rest
//!
//! # Architecture
//!
//! ```text
//! frame reader ──► assign_record(rec, loc, point)
//!                        │
//!                        ▼
//!             ┌─────────────────────┐
//!             │  dyn Distribution   │──► is_my_record(rec)
//!             │ RoundRobin | Halo | │
//!             │     Replicated      │
//!             └──────────┬──────────┘
//!                        │ end of data
//!                        ▼
//!               compute_patch_locs()  ──► Comm::all_gather
//!                        │
//!                        ▼
//!           sum / min / max / dot_product over patch locations
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use obs_distribution::{DistributionConfig, DistributionFactory, LocalWorld};
//!
//! let owned = LocalWorld::run(3, |comm| {
//!     let dist = DistributionFactory::default()
//!         .create(comm, &DistributionConfig::named("RoundRobin"))?;
//!     Ok((0..10).filter(|&n| dist.is_my_record(n)).collect::<Vec<_>>())
//! })?;
//! assert_eq!(owned[1], vec![1, 4, 7]);
//! ```

pub mod comm;
pub mod config;
pub mod distribution;
pub mod error;
pub mod factory;
pub mod halo;
pub mod io_pool;
pub mod replicated;
pub mod round_robin;

// Re-export commonly used types at the crate root
pub use comm::{Comm, LocalWorld, ReduceOp, Reducible, MAX_USER_TAG};
pub use config::{DistributionConfig, HaloConfig, IoPoolConfig, RankGrouping};
pub use distribution::Distribution;
pub use error::{CommError, CommResult, DistributionError, Result};
pub use factory::{DistributionFactory, DistributionMaker};
pub use halo::Halo;
pub use io_pool::{home_pool_rank, uniquify_file_name, IoPool, PoolState};
pub use replicated::Replicated;
pub use round_robin::RoundRobin;
