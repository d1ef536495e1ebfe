//! Plan-construction behavior across ranks: classification stats,
//! determinism, and build-time desync detection.

use dof_gs::comm::{Communicator, MailboxCluster, MailboxComm};
use dof_gs::config::GsConfig;
use dof_gs::cube::Hypercube;
use dof_gs::error::GsError;
use dof_gs::plan::{Plan, PlanStats};

fn build_stats(size: usize, level: u32, cfg: GsConfig, ids: fn(usize) -> Vec<i64>) -> Vec<PlanStats> {
    MailboxCluster::run(size, move |comm: MailboxComm| {
        let rank = comm.rank();
        let cube = Hypercube::new(comm);
        let plan = Plan::build(&cube, &ids(rank), level, &cfg).unwrap();
        plan.stats().clone()
    })
}

#[test]
fn rebuild_is_deterministic() {
    let ids = |r: usize| vec![1, 5, 5, 9 + r as i64 % 2, 40];
    let a = build_stats(4, 1, GsConfig::default(), ids);
    let b = build_stats(4, 1, GsConfig::default(), ids);
    assert_eq!(a, b);
}

#[test]
fn level_moves_ids_between_paths() {
    // Id 30 owned by three of four ranks. level 1 admits two owners
    // pairwise, so it lands on the tree; level 2 admits three.
    let ids = |r: usize| {
        if r < 3 {
            vec![30, 100 + r as i64]
        } else {
            vec![100 + r as i64]
        }
    };
    let narrow = build_stats(4, 1, GsConfig::default(), ids);
    let wide = build_stats(4, 2, GsConfig::default(), ids);
    for r in 0..3 {
        assert_eq!(narrow[r].n_tree_ids, 1);
        assert_eq!(narrow[r].n_pairwise_ids, 0);
        assert_eq!(wide[r].n_tree_ids, 0);
        assert_eq!(wide[r].n_pairwise_ids, 1);
        assert_eq!(wide[r].n_peers, 2);
    }
    // The tree-id list is mesh-wide, so the non-owning rank sizes it too.
    assert_eq!(narrow[3].n_tree_ids, 1);
    assert_eq!(narrow[3].n_tree_local, 0);
}

#[test]
fn discovery_batch_size_does_not_change_classification() {
    let ids = |r: usize| vec![2, 64, 200 + r as i64];
    let coarse = build_stats(2, 1, GsConfig::default(), ids);
    let fine = build_stats(
        2,
        1,
        GsConfig {
            max_round_bytes: 1,
            ..Default::default()
        },
        ids,
    );
    for (c, f) in coarse.iter().zip(&fine) {
        assert_eq!(c.n_pairwise_ids, f.n_pairwise_ids);
        assert_eq!(c.n_tree_ids, f.n_tree_ids);
        assert_eq!(c.n_shared_groups, f.n_shared_groups);
        assert!(f.discovery_rounds > c.discovery_rounds);
    }
}

#[test]
fn disagreeing_level_is_rejected_on_every_rank() {
    let errs = MailboxCluster::run(2, |comm: MailboxComm| {
        let rank = comm.rank();
        let cube = Hypercube::new(comm);
        Plan::build(&cube, &[1], rank as u32, &GsConfig::default()).err()
    });
    for err in errs {
        assert!(matches!(
            err,
            Some(GsError::BuildDesync { field: "level", .. })
        ));
    }
}

#[test]
fn negative_id_is_rejected_before_any_exchange() {
    let cube = Hypercube::new(dof_gs::comm::NoComm);
    let err = Plan::build(&cube, &[3, -7, 5], 1, &GsConfig::default()).unwrap_err();
    assert_eq!(err, GsError::NegativeGlobalId { index: 1, id: -7 });
}

#[test]
fn unsorted_input_keeps_original_positions() {
    // The plan records where each id sits in the caller's order; a shuffled
    // input must still merge the right slots.
    let out = MailboxCluster::run(2, |comm: MailboxComm| {
        let rank = comm.rank();
        let cube = Hypercube::new(comm);
        let ids = if rank == 0 {
            vec![9, 3, 9]
        } else {
            vec![3, 9]
        };
        let mut plan = Plan::build(&cube, &ids, 1, &GsConfig::default()).unwrap();
        let mut v = if rank == 0 {
            vec![1.0, 10.0, 2.0]
        } else {
            vec![20.0, 4.0]
        };
        plan.reduce(&cube, &mut v, dof_gs::ops::GsOp::Add).unwrap();
        v
    });
    // Id 9: 1 + 2 + 4 = 7; id 3: 10 + 20 = 30.
    assert_eq!(out[0], vec![7.0, 30.0, 7.0]);
    assert_eq!(out[1], vec![30.0, 7.0]);
}

#[test]
fn stats_count_local_and_shared_groups_separately() {
    let stats = build_stats(2, 1, GsConfig::default(), |r| {
        if r == 0 {
            // 5 duplicated locally only; 8 duplicated and shared.
            vec![5, 5, 8, 8]
        } else {
            vec![8]
        }
    });
    assert_eq!(stats[0].n_local_groups, 1);
    assert_eq!(stats[0].n_shared_groups, 1);
    assert_eq!(stats[1].n_local_groups, 0);
    assert_eq!(stats[1].n_shared_groups, 0);
    assert_eq!(stats[1].n_pairwise_ids, 1);
}
