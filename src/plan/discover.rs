//! Stage 2 of plan construction: discover which ranks own each id.
//!
//! The global id range is walked in windows of `per_load` ids. Each round
//! builds a per-id rank bitmask (this rank's bit set for its own ids),
//! or-reduces it collectively, and classifies every id in the window from
//! the combined mask's population count: fewer than two owners means the id
//! never leaves this rank, up to `level + 1` owners takes the pairwise path,
//! anything wider is queued for the tree reduction. The tree queue is
//! appended in window order on every rank, so its ordering, and with it the
//! dense tree-buffer layout, is globally identical without further
//! agreement.

use crate::arena::Scratch;
use crate::bitmask;
use crate::comm::{Communicator, TAG_BUILD_DISCOVER};
use crate::cube::Hypercube;
use crate::error::GsError;
use crate::ops::{GsOp, OpSpec};

/// Per-id classification produced by neighbor discovery.
pub(crate) struct Classification {
    /// Per unique local id: does it also live on another rank?
    pub shared: Vec<bool>,
    /// Pairwise ids: (index into `unique`, peer ranks in canonical order),
    /// ascending by id.
    pub pairwise: Vec<(u32, Vec<usize>)>,
    /// Mesh-wide tree ids in canonical (ascending) order; identical on
    /// every rank.
    pub tree_ids: Vec<i64>,
    /// Collective rounds spent.
    pub rounds: usize,
}

pub(crate) fn discover<C: Communicator>(
    cube: &Hypercube<C>,
    scratch: &Scratch,
    unique: &[i64],
    gid_lo: i64,
    gid_hi: i64,
    level: u32,
    per_load: usize,
) -> Result<Classification, GsError> {
    let mut out = Classification {
        shared: vec![false; unique.len()],
        pairwise: Vec::new(),
        tree_ids: Vec::new(),
        rounds: 0,
    };
    if cube.size() < 2 || gid_hi < gid_lo {
        return Ok(out);
    }

    let rank = cube.rank();
    let mb = bitmask::mask_bytes(cube.size());
    let level_plus = level as usize + 1;
    let range = usize::try_from(gid_hi - gid_lo + 1).map_err(|_| GsError::IdRangeOverflow {
        lo: gid_lo,
        hi: gid_hi,
    })?;
    let rounds = range.div_ceil(per_load);

    let mut buf = scratch.buffer::<u8>(per_load.min(range) * mb)?;
    let mut ranks = Vec::with_capacity(level_plus);
    let mut cursor = 0usize; // into `unique`, advances monotonically

    for round in 0..rounds {
        let w0 = gid_lo + (round * per_load) as i64;
        let w1 = (w0 + per_load as i64 - 1).min(gid_hi);
        let win = (w1 - w0 + 1) as usize;
        let chunk = &mut buf[..win * mb];
        chunk.fill(0);

        let mut c = cursor;
        while c < unique.len() && unique[c] <= w1 {
            let slot = (unique[c] - w0) as usize;
            bitmask::set_bit(&mut chunk[slot * mb..(slot + 1) * mb], rank)?;
            c += 1;
        }

        cube.all_reduce(chunk, OpSpec::Uniform(GsOp::BitOr), TAG_BUILD_DISCOVER)?;

        for slot in 0..win {
            let gid = w0 + slot as i64;
            let mask = &chunk[slot * mb..(slot + 1) * mb];
            let owners = bitmask::count_bits(mask);
            if owners > level_plus {
                out.tree_ids.push(gid);
            }
            if cursor < unique.len() && unique[cursor] == gid {
                if owners >= 2 {
                    out.shared[cursor] = true;
                    if owners <= level_plus {
                        bitmask::expand_to_ranks(mask, &mut ranks);
                        let peers: Vec<usize> =
                            ranks.iter().copied().filter(|&p| p != rank).collect();
                        out.pairwise.push((cursor as u32, peers));
                    }
                }
                cursor += 1;
            }
        }
    }
    out.rounds = rounds;
    log::trace!(
        "gs discover: {} rounds, {} pairwise ids, {} tree ids",
        rounds,
        out.pairwise.len(),
        out.tree_ids.len()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::MailboxCluster;

    fn classify(size: usize, level: u32, per_load: usize, ids: fn(usize) -> Vec<i64>) -> Vec<Classification> {
        MailboxCluster::run(size, move |comm| {
            let cube = Hypercube::new(comm);
            let scratch = Scratch::new(false);
            let mine = ids(cube.rank());
            let lo = *mine.iter().min().unwrap();
            let hi = *mine.iter().max().unwrap();
            let mut fields = [lo, hi];
            let segs = [(GsOp::Min, 1), (GsOp::Max, 1)];
            cube.all_reduce(&mut fields, OpSpec::NonUniform(&segs), TAG_BUILD_DISCOVER)
                .unwrap();
            let out = discover(
                &cube, &scratch, &mine, fields[0], fields[1], level, per_load,
            )
            .unwrap();
            scratch.finish();
            out
        })
    }

    #[test]
    fn shared_wide_id_goes_to_tree() {
        // Id 50 on all 4 ranks (4 owners > level+1 = 2), private ids besides.
        let out = classify(4, 1, 64, |r| vec![r as i64, 50]);
        for (r, c) in out.iter().enumerate() {
            assert_eq!(c.tree_ids, vec![50]);
            assert!(c.pairwise.is_empty());
            // private id unshared, 50 shared
            let mine = [r as i64, 50];
            for (u, &gid) in mine.iter().enumerate() {
                assert_eq!(c.shared[u], gid == 50, "rank {r} id {gid}");
            }
        }
    }

    #[test]
    fn lightly_shared_id_goes_pairwise() {
        // Id 10 on ranks 0 and 1 only; level 1 admits two owners.
        let out = classify(2, 1, 64, |r| vec![5 * r as i64 + 1, 10]);
        for (r, c) in out.iter().enumerate() {
            assert!(c.tree_ids.is_empty());
            assert_eq!(c.pairwise.len(), 1);
            let (_, peers) = &c.pairwise[0];
            assert_eq!(peers, &vec![1 - r]);
        }
    }

    #[test]
    fn tiny_batches_only_cost_rounds() {
        // per_load = 1 forces one round per id in the range; the result
        // must not change.
        let a = classify(2, 0, 64, |r| vec![3, 7 + r as i64]);
        let b = classify(2, 0, 1, |r| vec![3, 7 + r as i64]);
        for (ca, cb) in a.iter().zip(&b) {
            assert_eq!(ca.tree_ids, cb.tree_ids);
            assert_eq!(ca.shared, cb.shared);
            assert!(cb.rounds > ca.rounds);
        }
    }

    #[test]
    fn level_zero_forces_tree() {
        let out = classify(2, 0, 64, |_| vec![10]);
        for c in &out {
            assert_eq!(c.tree_ids, vec![10]);
            assert!(c.pairwise.is_empty());
        }
    }
}
