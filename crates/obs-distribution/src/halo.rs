//! Geography-aware ownership with overlapping halos.
//!
//! Each rank has a centre point. Whether a rank keeps a record is decided
//! once, from the first location of the record it sees: the rank keeps it
//! when that location lies within `radius_km` of its centre, or when its
//! centre is the nearest one (lowest rank on ties). Every record is
//! therefore kept whole by its nearest rank, and halo overlap only adds
//! replicas. After all frames are read,
//! [`Halo::compute_patch_locs`](crate::Distribution::compute_patch_locs)
//! makes the closest keeping rank the single patch owner of each record.

use std::collections::{BTreeMap, HashMap, HashSet};

use obs_common::GeoPoint;
use tracing::{debug, warn};

use crate::comm::Comm;
use crate::config::HaloConfig;
use crate::distribution::Distribution;
use crate::error::{DistributionError, Result};

#[derive(Debug)]
pub struct Halo {
    comm: Comm,
    /// Centre of every rank, indexed by rank.
    centers: Vec<GeoPoint>,
    radius_km: f64,
    /// Decision per record seen: the distance of its first location when
    /// kept, `None` when not.
    decisions: HashMap<usize, Option<f64>>,
    /// Record of every kept location, in keep order.
    local_records: Vec<usize>,
    patch_records: HashSet<usize>,
    patch_computed: bool,
}

impl Halo {
    pub const NAME: &'static str = "Halo";

    pub fn new(comm: Comm, config: &HaloConfig) -> Result<Self> {
        config.validate().map_err(DistributionError::config_error)?;
        let size = comm.size();
        let centers = (0..size)
            .map(|rank| config.center_for(rank, size))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                DistributionError::config_error(format!(
                    "halo needs one centre per rank: {} given for {} ranks",
                    config.centers.as_ref().map_or(0, Vec::len),
                    size
                ))
            })?;
        debug!(
            rank = comm.rank(),
            center = %centers[comm.rank()],
            radius_km = config.radius_km,
            "halo distribution"
        );
        Ok(Self {
            comm,
            centers,
            radius_km: config.radius_km,
            decisions: HashMap::new(),
            local_records: Vec::new(),
            patch_records: HashSet::new(),
            patch_computed: false,
        })
    }

    pub fn center(&self) -> GeoPoint {
        self.centers[self.comm.rank()]
    }

    pub fn radius_km(&self) -> f64 {
        self.radius_km
    }

    /// Rank whose centre is closest to `point`, lowest rank on ties.
    pub fn nearest_rank(&self, point: &GeoPoint) -> usize {
        nearest_rank(&self.centers, point)
    }

    /// Record of every kept location, in keep order.
    pub fn local_records(&self) -> &[usize] {
        &self.local_records
    }

    /// Whether this rank is the patch owner of `rec`.
    pub fn is_patch_record(&self, rec: usize) -> bool {
        self.patch_records.contains(&rec)
    }
}

fn nearest_rank(centers: &[GeoPoint], point: &GeoPoint) -> usize {
    let mut best = (f64::INFINITY, 0);
    for (rank, center) in centers.iter().enumerate() {
        let distance = center.distance_km(point);
        if distance < best.0 {
            best = (distance, rank);
        }
    }
    best.1
}

impl Distribution for Halo {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn comm(&self) -> &Comm {
        &self.comm
    }

    fn assign_record(&mut self, rec: usize, _global_loc: usize, point: &GeoPoint) {
        let me = self.comm.rank();
        let centers = &self.centers;
        let radius_km = self.radius_km;
        let decision = *self.decisions.entry(rec).or_insert_with(|| {
            let distance = centers[me].distance_km(point);
            (distance <= radius_km || nearest_rank(centers, point) == me).then_some(distance)
        });
        if decision.is_some() {
            self.local_records.push(rec);
        }
    }

    fn is_my_record(&self, rec: usize) -> bool {
        matches!(self.decisions.get(&rec), Some(Some(_)))
    }

    fn compute_patch_locs(&mut self) -> Result<()> {
        let local: Vec<(usize, f64)> = self
            .decisions
            .iter()
            .filter_map(|(rec, d)| d.map(|d| (*rec, d)))
            .collect();
        let all = self.comm.all_gather(local)?;

        // Ranks are visited in order and only a strictly closer rank takes
        // over, so the lowest rank wins ties.
        let mut owner: BTreeMap<usize, (f64, usize)> = BTreeMap::new();
        for (rank, claims) in all.iter().enumerate() {
            for &(rec, distance) in claims {
                match owner.get_mut(&rec) {
                    Some(best) if distance < best.0 => *best = (distance, rank),
                    Some(_) => {}
                    None => {
                        owner.insert(rec, (distance, rank));
                    }
                }
            }
        }

        let me = self.comm.rank();
        self.patch_records = owner
            .into_iter()
            .filter(|(_, (_, rank))| *rank == me)
            .map(|(rec, _)| rec)
            .collect();
        self.patch_computed = true;
        debug!(
            rank = me,
            halo_records = self.decisions.values().filter(|d| d.is_some()).count(),
            patch_records = self.patch_records.len(),
            "halo patch ownership resolved"
        );
        Ok(())
    }

    fn patch_obs(&self, patch: &mut [bool]) {
        if !self.patch_computed {
            warn!("patch_obs called before compute_patch_locs");
        }
        if patch.len() != self.local_records.len() {
            warn!(
                expected = self.local_records.len(),
                actual = patch.len(),
                "patch buffer length differs from kept locations"
            );
        }
        for (flag, rec) in patch.iter_mut().zip(&self.local_records) {
            *flag = self.patch_records.contains(rec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{assert_approx_eq, points};

    fn point(p: (f64, f64)) -> GeoPoint {
        GeoPoint::new(p.0, p.1)
    }

    fn halo_at(center: (f64, f64), radius_km: f64) -> Halo {
        let config = HaloConfig {
            radius_km,
            centers: Some(vec![point(center)]),
        };
        Halo::new(Comm::solo(), &config).unwrap()
    }

    #[test]
    fn test_single_rank_keeps_everything() {
        let mut halo = halo_at(points::LONDON, 500.0);
        halo.assign_record(0, 0, &point(points::PARIS));
        halo.assign_record(1, 1, &point(points::BOULDER));
        assert!(halo.is_my_record(0));
        assert!(halo.is_my_record(1));
        assert_eq!(halo.local_records(), &[0, 1]);
    }

    #[test]
    fn test_default_config_keeps_distant_records() {
        let mut halo = Halo::new(Comm::solo(), &HaloConfig::default()).unwrap();
        assert_eq!(halo.center(), GeoPoint::new(0.0, 0.0));
        halo.assign_record(0, 0, &point(points::LONDON));
        halo.assign_record(1, 1, &point(points::BOULDER));
        halo.compute_patch_locs().unwrap();

        let mut patch = vec![false; 2];
        halo.patch_obs(&mut patch);
        assert_eq!(patch, vec![true, true]);
    }

    #[test]
    fn test_decision_fixed_by_first_location() {
        let config = HaloConfig {
            radius_km: 1000.0,
            centers: Some(vec![point(points::LONDON), point(points::BOULDER)]),
        };
        let kept = crate::LocalWorld::run(2, |comm| {
            let mut halo = Halo::new(comm, &config)?;
            // Record 3 starts near Boulder and continues near Paris.
            halo.assign_record(3, 0, &point(points::BOULDER));
            let first = halo.is_my_record(3);
            halo.assign_record(3, 1, &point(points::PARIS));
            assert_eq!(halo.is_my_record(3), first);
            Ok::<_, DistributionError>(halo.local_records().to_vec())
        })
        .unwrap();
        assert_eq!(kept[0], Vec::<usize>::new());
        assert_eq!(kept[1], vec![3, 3]);
    }

    #[test]
    fn test_nearest_rank_and_ties() {
        let config = HaloConfig {
            radius_km: 100.0,
            centers: Some(vec![point((-10.0, 0.0)), point((10.0, 0.0))]),
        };
        let nearest = crate::LocalWorld::run(2, |comm| {
            let halo = Halo::new(comm, &config)?;
            assert_approx_eq!(halo.radius_km(), 100.0, 1e-12);
            Ok::<_, DistributionError>((
                halo.nearest_rank(&point((-3.0, 5.0))),
                halo.nearest_rank(&point((4.0, -5.0))),
                halo.nearest_rank(&point((0.0, 20.0))),
            ))
        })
        .unwrap();
        assert!(nearest.iter().all(|n| *n == (0, 1, 0)));
    }

    #[test]
    fn test_overlap_resolves_to_one_patch_owner() {
        let config = HaloConfig {
            radius_km: 1000.0,
            centers: Some(vec![point(points::LONDON), point(points::PARIS)]),
        };
        let results = crate::LocalWorld::run(2, |comm| {
            let mut halo = Halo::new(comm, &config)?;
            halo.assign_record(0, 0, &point(points::LONDON));
            halo.assign_record(1, 1, &point(points::PARIS));
            halo.assign_record(2, 2, &point(points::BOULDER));
            halo.compute_patch_locs()?;
            let mut patch = vec![false; halo.local_records().len()];
            halo.patch_obs(&mut patch);
            Ok::<_, DistributionError>((halo.local_records().to_vec(), patch))
        })
        .unwrap();

        // Both centres are within the radius of London and Paris.
        assert_eq!(results[0].0, vec![0, 1, 2]);
        assert_eq!(results[1].0, vec![0, 1]);
        // Boulder is nearer London, so rank 0 also keeps it.
        assert_eq!(results[0].1, vec![true, false, true]);
        assert_eq!(results[1].1, vec![false, true]);
    }

    #[test]
    fn test_too_few_centers() {
        let config = HaloConfig {
            radius_km: 100.0,
            centers: Some(vec![GeoPoint::new(0.0, 0.0)]),
        };
        let result = crate::LocalWorld::run(2, |comm| {
            Halo::new(comm, &config).map(|_| ())
        });
        assert!(matches!(result, Err(DistributionError::ConfigError(_))));
    }
}
