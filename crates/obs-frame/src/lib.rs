//! Frame-chunked observation reading.
//!
//! This crate provides:
//!
//! - **Frame reader**: [`FrameReader`] walks a source in windows of at
//!   most `max_frame_size` locations, so memory stays bounded regardless of
//!   file size
//! - **Quality checks**: locations outside the time window or with missing
//!   geolocation are dropped before distribution
//! - **Records**: surviving locations are grouped into records, ungrouped
//!   or by the values of grouping variables
//! - **Observation space**: [`ObsSpace`] holds the locations this rank
//!   keeps, with a per-record (optionally sorted) location index
//! - **Writer**: [`ObsWriter`] sends rows through an I/O pool to one shared
//!   Zarr store or one store per pool rank
//!
//! # Architecture
//!
//! ```text
//!   ┌──────────────┐   ObsSource   ┌──────────────┐  frame by frame
//!   │ Zarr / list  │──────────────►│ FrameReader  │──────────────────┐
//!   └──────────────┘               └──────┬───────┘                  │
//!                                         │ filter, number, assign   ▼
//!                                         │                   ┌─────────────┐
//!                                         └──────────────────►│  ObsSpace   │
//!                                           dyn Distribution  └──────┬──────┘
//!                                                                    │ patch rows
//!                                                                    ▼
//!                                                             ┌─────────────┐
//!                                                             │  ObsWriter  │──► Zarr
//!                                                             │  (IoPool)   │
//!                                                             └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use obs_distribution::LocalWorld;
//! use obs_frame::{ObsSpace, ObsSpaceConfig};
//!
//! let config: ObsSpaceConfig = serde_yaml::from_str(&text)?;
//! let spaces = LocalWorld::run(4, |comm| ObsSpace::from_config(&config, comm))?;
//! let total: usize = spaces.iter().map(|s| s.nlocs()).sum();
//! assert_eq!(total, spaces[0].gnlocs());
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod records;
pub mod select;
pub mod sort;
pub mod source;
pub mod space;
pub mod writer;

// Re-export commonly used types at the crate root
pub use cache::{CacheStats, SelectionCache};
pub use config::{
    EngineConfig, MissingSortTreatment, ObsDataInConfig, ObsDataOutConfig, ObsGroupingConfig,
    ObsSpaceConfig, SortOrder, DEFAULT_MAX_FRAME_SIZE,
};
pub use error::{FrameError, Result};
pub use filter::{filter_locations, FilterOutcome, Geolocation, Survivor};
pub use frame::{DateTimeSource, FrameReader, ReaderState};
pub use records::{grouping_keys, RecordNumbering};
pub use select::SelectionTriple;
pub use sort::{build_record_index, sort_record_locations};
pub use source::{generate_list, ObsSource, CHANNEL, LOCATION};
pub use space::ObsSpace;
pub use writer::ObsWriter;
