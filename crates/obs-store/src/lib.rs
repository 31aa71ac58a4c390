//! Typed hierarchical storage for observation tables.
//!
//! A store holds named, typed, N-dimensional variables whose first dimension
//! is usually the resizable `Location` axis. Data moves in and out through
//! pairs of [`Selection`]s: one over a flat memory buffer and one over the
//! variable itself.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────────┐
//!            │        trait ObsStore        │
//!            │ dims / vars / read / write / │
//!            │ resize / attributes          │
//!            └──────────────┬───────────────┘
//!                 ┌─────────┴─────────┐
//!                 ▼                   ▼
//!         ┌──────────────┐    ┌──────────────┐
//!         │ MemoryStore  │    │  ZarrStore   │
//!         │ frame buffer │    │ Zarr V3 on   │
//!         │ working set  │    │ filesystem   │
//!         └──────────────┘    └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use obs_store::{ElementKind, MemoryStore, ObsStore, VariableSpec};
//!
//! let mut store = MemoryStore::new();
//! store.create_dimension("Location", ElementKind::Int32, 3, None)?;
//! store.create_variable(VariableSpec::new("MetaData/latitude", ElementKind::Float32, &["Location"]))?;
//! store.write_all("MetaData/latitude", &vec![10.0f32, 20.0, 30.0].into())?;
//! ```

pub mod element;
pub mod error;
pub mod memory;
pub mod selection;
pub mod store;
pub mod zarr;

// Re-export commonly used types at the crate root
pub use element::{Element, ElementKind, ElementValue, ElementValues, ElementVisitor};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use selection::{ResolvedSelection, SelectAction, Selection, SelectionOperator};
pub use store::{Attributes, DimensionInfo, ObsStore, VariableInfo, VariableSpec};
pub use zarr::{ZarrStore, ZarrStoreConfig};
