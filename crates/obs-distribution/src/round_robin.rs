//! Round-robin record ownership.

use obs_common::GeoPoint;

use crate::comm::Comm;
use crate::distribution::Distribution;
use crate::error::Result;

/// Record `n` belongs to rank `n mod size`. Stateless.
#[derive(Debug, Clone)]
pub struct RoundRobin {
    comm: Comm,
}

impl RoundRobin {
    pub const NAME: &'static str = "RoundRobin";

    pub fn new(comm: Comm) -> Self {
        Self { comm }
    }
}

impl Distribution for RoundRobin {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn comm(&self) -> &Comm {
        &self.comm
    }

    fn assign_record(&mut self, _rec: usize, _global_loc: usize, _point: &GeoPoint) {}

    fn is_my_record(&self, rec: usize) -> bool {
        rec % self.comm.size() == self.comm.rank()
    }

    fn compute_patch_locs(&mut self) -> Result<()> {
        Ok(())
    }

    fn patch_obs(&self, patch: &mut [bool]) {
        patch.fill(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_rank_owns_everything() {
        let dist = RoundRobin::new(Comm::solo());
        assert!((0..20).all(|n| dist.is_my_record(n)));
        assert_eq!(dist.name(), "RoundRobin");
        assert!(dist.is_distributed());
    }

    #[test]
    fn test_patch_is_all_local() {
        let dist = RoundRobin::new(Comm::solo());
        let mut patch = vec![false; 4];
        dist.patch_obs(&mut patch);
        assert_eq!(patch, vec![true; 4]);
    }
}
