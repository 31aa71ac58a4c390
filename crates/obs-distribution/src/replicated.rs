//! Every rank owns every record.

use obs_common::GeoPoint;

use crate::comm::Comm;
use crate::distribution::Distribution;
use crate::error::Result;

/// Full replication. Collectives over a replicated distribution are local.
#[derive(Debug, Clone)]
pub struct Replicated {
    comm: Comm,
}

impl Replicated {
    pub const NAME: &'static str = "Replicated";

    pub fn new(comm: Comm) -> Self {
        Self { comm }
    }
}

impl Distribution for Replicated {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn comm(&self) -> &Comm {
        &self.comm
    }

    fn is_distributed(&self) -> bool {
        false
    }

    fn assign_record(&mut self, _rec: usize, _global_loc: usize, _point: &GeoPoint) {}

    fn is_my_record(&self, _rec: usize) -> bool {
        true
    }

    fn compute_patch_locs(&mut self) -> Result<()> {
        Ok(())
    }

    fn patch_obs(&self, patch: &mut [bool]) {
        patch.fill(true);
    }
}
