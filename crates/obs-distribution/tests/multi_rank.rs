//! Integration tests running distributions and the I/O pool over several
//! in-process ranks.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use obs_common::{GeoPoint, TimeWindow};
use obs_distribution::{
    CommError, Distribution, DistributionConfig, DistributionError, DistributionFactory,
    HaloConfig, IoPool, IoPoolConfig, LocalWorld, RankGrouping, ReduceOp,
};
use test_utils::{assert_approx_eq, create_location_series, window};

fn test_window() -> TimeWindow {
    TimeWindow::parse(window::BEGIN, window::END).unwrap()
}

#[test]
fn test_round_robin_partition() {
    let owned = LocalWorld::run(3, |comm| {
        let dist = DistributionFactory::default()
            .create(comm, &DistributionConfig::named("RoundRobin"))?;
        Ok::<_, DistributionError>((0..10).filter(|&n| dist.is_my_record(n)).collect::<Vec<_>>())
    })
    .unwrap();

    assert_eq!(owned[0], vec![0, 3, 6, 9]);
    assert_eq!(owned[1], vec![1, 4, 7]);
    assert_eq!(owned[2], vec![2, 5, 8]);
}

#[test]
fn test_round_robin_collectives() {
    let results = LocalWorld::run(3, |comm| {
        let rank = comm.rank();
        let dist = DistributionFactory::default()
            .create(comm, &DistributionConfig::named("RoundRobin"))?;
        let local: Vec<f64> = (0..10)
            .filter(|&n| dist.is_my_record(n))
            .map(|n| n as f64)
            .collect();
        let count = dist.global_num_non_missing_obs(&local, &-1.0)?;
        let dot = dist.dot_product(&local, &local, -1.0)?;
        let mut extremes = [rank as i32, rank as i32];
        dist.all_reduce_in_place_vec(&mut extremes[..1], ReduceOp::Min)?;
        dist.all_reduce_in_place_vec(&mut extremes[1..], ReduceOp::Max)?;
        let offset = dist.exclusive_scan(local.len())?;
        Ok::<_, DistributionError>((count, dot, extremes, offset))
    })
    .unwrap();

    let expected_dot: f64 = (0..10).map(|n| (n * n) as f64).sum();
    for (count, dot, extremes, _) in &results {
        assert_eq!(*count, 10);
        assert_approx_eq!(*dot, expected_dot, 1e-9);
        assert_eq!(*extremes, [0, 2]);
    }
    let offsets: Vec<usize> = results.iter().map(|r| r.3).collect();
    assert_eq!(offsets, vec![0, 4, 7]);
}

#[test]
fn test_halo_unique_patch_ownership() {
    let (lats, lons) = create_location_series(40);
    let points: Vec<GeoPoint> = lats
        .iter()
        .zip(&lons)
        .map(|(lat, lon)| GeoPoint::new(*lon as f64, *lat as f64))
        .collect();

    let config = DistributionConfig {
        name: "Halo".to_string(),
        halo: HaloConfig {
            radius_km: 6000.0,
            centers: None,
        },
    };

    let results = LocalWorld::run(4, |comm| {
        let mut dist = DistributionFactory::default().create(comm, &config)?;
        let mut kept = Vec::new();
        for (rec, point) in points.iter().enumerate() {
            dist.assign_record(rec, rec, point);
            if dist.is_my_record(rec) {
                kept.push(rec);
            }
        }
        dist.compute_patch_locs()?;
        let mut patch = vec![false; kept.len()];
        dist.patch_obs(&mut patch);
        let patch_recs: Vec<usize> = kept
            .iter()
            .zip(&patch)
            .filter(|(_, p)| **p)
            .map(|(r, _)| *r)
            .collect();
        Ok::<_, DistributionError>((kept, patch_recs))
    })
    .unwrap();

    let claimed: BTreeSet<usize> = results.iter().flat_map(|(k, _)| k.clone()).collect();
    let mut patch_all: Vec<usize> = results.iter().flat_map(|(_, p)| p.clone()).collect();
    patch_all.sort_unstable();
    let patch_set: BTreeSet<usize> = patch_all.iter().copied().collect();

    // The polar ends of the series lie outside every halo.
    let config_halo = &config.halo;
    let outside = points
        .iter()
        .filter(|p| {
            (0..4).all(|rank| {
                config_halo
                    .center_for(rank, 4)
                    .is_some_and(|c| c.distance_km(p) > config_halo.radius_km)
            })
        })
        .count();
    assert!(outside > 0);

    assert_eq!(patch_all.len(), patch_set.len(), "a record has two patch owners");
    assert_eq!(claimed, (0..points.len()).collect::<BTreeSet<_>>());
    assert_eq!(patch_set, claimed);
    // Halos overlap, so some records are kept by more than one rank.
    let total_kept: usize = results.iter().map(|(k, _)| k.len()).sum();
    assert!(total_kept > claimed.len());
}

#[test]
fn test_pool_offsets_tile_global_range() {
    let config = IoPoolConfig {
        max_pool_size: 3,
        grouping: RankGrouping::Contiguous,
        write_multiple_files: false,
    };
    let pools = LocalWorld::run(7, |comm| {
        let nlocs = comm.rank() + 1;
        let pool = IoPool::new(comm, None, config.clone(), test_window(), nlocs)?;
        let summary = (
            pool.pool_rank(),
            pool.rank_assignment().to_vec(),
            pool.total_nlocs(),
            pool.global_nlocs(),
            pool.nlocs_start(),
        );
        Ok::<_, DistributionError>(summary)
    })
    .unwrap();

    assert_eq!(pools[0].1, vec![(3, 4), (4, 5)]);
    assert_eq!(pools[1].1, vec![(5, 6)]);
    assert_eq!(pools[2].1, vec![(6, 7)]);
    assert_eq!(pools[3].1, vec![(0, 4)]);

    let totals: Vec<usize> = pools.iter().map(|p| p.2).collect();
    assert_eq!(totals, vec![10, 8, 10, 0, 0, 0, 0]);
    assert!(pools.iter().all(|p| p.3 == 28));

    let starts: Vec<usize> = pools[..3].iter().map(|p| p.4).collect();
    assert_eq!(starts, vec![0, 10, 18]);
    assert_eq!(pools[6].0, None);
}

#[test]
fn test_gather_and_scatter_through_pool() {
    let config = IoPoolConfig {
        max_pool_size: 2,
        grouping: RankGrouping::RoundRobin,
        write_multiple_files: true,
    };
    let results = LocalWorld::run(5, |comm| {
        let rank = comm.rank();
        let nlocs = rank + 1;
        let pool = IoPool::new(comm, None, config.clone(), test_window(), nlocs)?;
        let own: Vec<usize> = vec![rank; nlocs * 2];
        let gathered = pool.gather_to_pool(own.clone())?;
        let back = pool.scatter_from_pool(gathered.clone(), 2)?;
        assert_eq!(back, own);
        Ok::<_, DistributionError>((gathered, pool.output_file_name(Path::new("out.zarr"))))
    })
    .unwrap();

    // Round robin: pool 0 serves ranks 2 and 4, pool 1 serves rank 3.
    let mut expected0 = vec![0; 2];
    expected0.extend(vec![2; 6]);
    expected0.extend(vec![4; 10]);
    assert_eq!(results[0].0, Some(expected0));
    assert_eq!(results[1].0.as_ref().map(Vec::len), Some(4 + 8));
    assert_eq!(results[3].0, None);

    assert_eq!(results[0].1, PathBuf::from("out_0000.zarr"));
    assert_eq!(results[1].1, PathBuf::from("out_0001.zarr"));
    assert_eq!(results[4].1, PathBuf::from("out.zarr"));
}

#[test]
fn test_time_communicator_in_file_name() {
    let names = LocalWorld::run(4, |comm| {
        let time = comm.split(Some((comm.rank() / 2) as u32), comm.rank())?;
        let pool = IoPool::new(comm, time, IoPoolConfig::default(), test_window(), 1)?;
        Ok::<_, DistributionError>(pool.output_file_name(Path::new("/data/obs.zarr")))
    })
    .unwrap();

    assert_eq!(names[0], PathBuf::from("/data/obs_0000.zarr"));
    assert_eq!(names[1], PathBuf::from("/data/obs_0001.zarr"));
    assert_eq!(names[2], PathBuf::from("/data/obs_0000.zarr"));
}

#[test]
fn test_failing_rank_aborts_blocked_ranks() {
    let result = LocalWorld::run(3, |comm| {
        if comm.rank() == 2 {
            return Err(DistributionError::config_error("bad input on rank 2"));
        }
        // Never sent: only the abort can release this receive.
        let _: usize = comm.recv(2, 9)?;
        Ok(())
    });

    match result {
        Err(DistributionError::ConfigError(msg)) => assert!(msg.contains("rank 2")),
        other => panic!("unexpected result {other:?}"),
    }
}

#[test]
fn test_abort_surfaces_as_comm_error() {
    let result: Result<Vec<()>, CommError> = LocalWorld::run(2, |comm| {
        if comm.rank() == 0 {
            comm.abort();
            return Ok(());
        }
        comm.barrier()
    });
    assert_eq!(result, Err(CommError::Aborted));
}
