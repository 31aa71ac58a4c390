//! Name-keyed construction of distributions.
//!
//! # Example
//!
//! ```rust,ignore
//! use obs_distribution::{Comm, DistributionConfig, DistributionFactory};
//!
//! let factory = DistributionFactory::default();
//! let dist = factory.create(Comm::solo(), &DistributionConfig::named("Halo"))?;
//! assert_eq!(dist.name(), "Halo");
//! ```

use std::collections::BTreeMap;

use tracing::debug;

use crate::comm::Comm;
use crate::config::DistributionConfig;
use crate::distribution::Distribution;
use crate::error::{DistributionError, Result};
use crate::halo::Halo;
use crate::replicated::Replicated;
use crate::round_robin::RoundRobin;

/// Constructor signature for a registered distribution.
pub type DistributionMaker = fn(Comm, &DistributionConfig) -> Result<Box<dyn Distribution>>;

/// Registry of distribution policies by name.
pub struct DistributionFactory {
    makers: BTreeMap<String, DistributionMaker>,
}

impl Default for DistributionFactory {
    /// A factory with `RoundRobin`, `Halo` and `Replicated` registered.
    fn default() -> Self {
        let mut factory = Self::empty();
        factory.register(RoundRobin::NAME, |comm, _| Ok(Box::new(RoundRobin::new(comm))));
        factory.register(Halo::NAME, |comm, config| {
            Ok(Box::new(Halo::new(comm, &config.halo)?))
        });
        factory.register(Replicated::NAME, |comm, _| Ok(Box::new(Replicated::new(comm))));
        factory
    }
}

impl DistributionFactory {
    /// A factory with nothing registered.
    pub fn empty() -> Self {
        Self {
            makers: BTreeMap::new(),
        }
    }

    /// Register (or replace) a policy under `name`.
    pub fn register(&mut self, name: &str, maker: DistributionMaker) {
        self.makers.insert(name.to_string(), maker);
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.makers.keys().map(String::as_str).collect()
    }

    /// Build the distribution named in `config`.
    pub fn create(&self, comm: Comm, config: &DistributionConfig) -> Result<Box<dyn Distribution>> {
        let maker = self.makers.get(&config.name).ok_or_else(|| {
            DistributionError::UnknownDistribution {
                name: config.name.clone(),
                registered: self.names().join(", "),
            }
        })?;
        debug!(name = %config.name, rank = comm.rank(), size = comm.size(), "creating distribution");
        maker(comm, config)
    }
}
