//! The record ownership contract and its collective helpers.

use obs_common::GeoPoint;
use tracing::trace;

use crate::comm::{Comm, ReduceOp, Reducible};
use crate::error::{CommError, Result};

/// A policy deciding which rank owns which record.
///
/// Records are offered one location at a time through [`assign_record`] in
/// frame order. [`is_my_record`] must be answered right after the matching
/// `assign_record` call. Once every frame has been read,
/// [`compute_patch_locs`] runs exactly once on every rank.
///
/// [`assign_record`]: Distribution::assign_record
/// [`is_my_record`]: Distribution::is_my_record
/// [`compute_patch_locs`]: Distribution::compute_patch_locs
pub trait Distribution: Send {
    /// Registered name of this policy.
    fn name(&self) -> &str;

    /// Communicator the policy distributes over.
    fn comm(&self) -> &Comm;

    /// Whether records are spread across ranks. Collectives only reduce
    /// when this is true.
    fn is_distributed(&self) -> bool {
        true
    }

    /// Offer one location of record `rec` to the policy.
    fn assign_record(&mut self, rec: usize, global_loc: usize, point: &GeoPoint);

    /// Whether this rank keeps record `rec`.
    fn is_my_record(&self, rec: usize) -> bool;

    /// Resolve patch ownership once all records have been assigned.
    fn compute_patch_locs(&mut self) -> Result<()>;

    /// Flag each kept location (in keep order) whose record this rank is the
    /// patch owner of.
    fn patch_obs(&self, patch: &mut [bool]);
}

impl dyn Distribution + '_ {
    /// Global sum of `value`.
    pub fn sum<T: Reducible>(&self, value: T) -> Result<T> {
        self.reduce(value, ReduceOp::Sum)
    }

    /// Global minimum of `value`.
    pub fn min<T: Reducible>(&self, value: T) -> Result<T> {
        self.reduce(value, ReduceOp::Min)
    }

    /// Global maximum of `value`.
    pub fn max<T: Reducible>(&self, value: T) -> Result<T> {
        self.reduce(value, ReduceOp::Max)
    }

    fn reduce<T: Reducible>(&self, value: T, op: ReduceOp) -> Result<T> {
        if !self.is_distributed() {
            return Ok(value);
        }
        Ok(self.comm().all_reduce(value, op)?)
    }

    pub fn all_reduce_in_place<T: Reducible>(&self, value: &mut T, op: ReduceOp) -> Result<()> {
        *value = self.reduce(*value, op)?;
        Ok(())
    }

    pub fn all_reduce_in_place_vec<T: Reducible>(&self, values: &mut [T], op: ReduceOp) -> Result<()> {
        if !self.is_distributed() {
            return Ok(());
        }
        let reduced = self.comm().all_reduce_vec(values, op)?;
        values.copy_from_slice(&reduced);
        Ok(())
    }

    /// Concatenation of every rank's values in rank order.
    pub fn all_gatherv<T: Clone + Send + 'static>(&self, values: Vec<T>) -> Result<Vec<T>> {
        if !self.is_distributed() {
            return Ok(values);
        }
        Ok(self.comm().all_gatherv(values)?)
    }

    /// Sum over lower ranks; zero when not distributed.
    pub fn exclusive_scan<T: Reducible>(&self, value: T) -> Result<T> {
        if !self.is_distributed() {
            return Ok(T::zero());
        }
        Ok(self.comm().exclusive_scan(value)?)
    }

    fn patch_flags(&self, n: usize) -> Vec<bool> {
        let mut patch = vec![false; n];
        self.patch_obs(&mut patch);
        patch
    }

    /// Global dot product over patch locations, skipping missing values.
    pub fn dot_product(&self, v1: &[f64], v2: &[f64], missing: f64) -> Result<f64> {
        if v1.len() != v2.len() {
            return Err(CommError::InvalidArgument(format!(
                "dot product of vectors with lengths {} and {}",
                v1.len(),
                v2.len()
            ))
            .into());
        }
        let patch = self.patch_flags(v1.len());
        let local: f64 = v1
            .iter()
            .zip(v2)
            .zip(&patch)
            .filter(|((a, b), p)| **p && **a != missing && **b != missing)
            .map(|((a, b), _)| a * b)
            .sum();
        trace!(local, "dot product");
        self.sum(local)
    }

    /// Global count of non-missing values at patch locations.
    pub fn global_num_non_missing_obs<T: PartialEq>(&self, values: &[T], missing: &T) -> Result<usize> {
        let patch = self.patch_flags(values.len());
        let local = values
            .iter()
            .zip(&patch)
            .filter(|(v, p)| **p && *v != missing)
            .count();
        self.sum(local)
    }
}
