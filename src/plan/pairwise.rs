//! Stage 3 of plan construction: resolve pairwise peers.
//!
//! Both ends of a pairwise relationship derive the ids they share from the
//! same or-reduced masks and scan them in the same ascending order, so each
//! side already knows the exact content and size of every message and can
//! post sends and receives without a handshake. The id lists are still
//! exchanged once here, purely as a desync detector: a mismatch means the
//! ranks classified differently and every later reduce would be corrupt.

use std::collections::BTreeMap;

use crate::comm::{Communicator, Wait, TAG_BUILD_PAIRWISE_IDS};
use crate::cube::Hypercube;
use crate::error::GsError;
use crate::wire::{cast_slice, WireGlobalId};

/// One peer's share of the pairwise exchange, ids as indices into the
/// builder's unique list, ascending.
pub(crate) struct PeerPlan {
    pub rank: usize,
    pub uidx: Vec<u32>,
}

pub(crate) fn resolve_pairwise<C: Communicator>(
    cube: &Hypercube<C>,
    unique: &[i64],
    pairwise: &[(u32, Vec<usize>)],
) -> Result<Vec<PeerPlan>, GsError> {
    // Regroup per peer; entries arrive ascending by id, so each peer's list
    // stays ascending, and BTreeMap iteration gives canonical peer order.
    let mut by_peer: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
    for (uidx, peers) in pairwise {
        for &p in peers {
            by_peer.entry(p).or_default().push(*uidx);
        }
    }
    let plans: Vec<PeerPlan> = by_peer
        .into_iter()
        .map(|(rank, uidx)| PeerPlan { rank, uidx })
        .collect();

    // Cross-check: post all receives, then all sends, then drain everything
    // before deciding the outcome.
    let mut recvs = Vec::with_capacity(plans.len());
    for p in &plans {
        let mut buf = vec![0u8; p.uidx.len() * std::mem::size_of::<WireGlobalId>()];
        let h = cube
            .comm()
            .irecv(p.rank, TAG_BUILD_PAIRWISE_IDS.base(), &mut buf);
        recvs.push((p.rank, h, buf.len()));
    }
    let mut sends = Vec::with_capacity(plans.len());
    let mut send_bufs = Vec::with_capacity(plans.len());
    for p in &plans {
        let wire: Vec<WireGlobalId> = p
            .uidx
            .iter()
            .map(|&u| WireGlobalId::of(unique[u as usize]))
            .collect();
        sends.push(cube.comm().isend(
            p.rank,
            TAG_BUILD_PAIRWISE_IDS.base(),
            cast_slice(&wire),
        ));
        send_bufs.push(wire);
    }

    let mut maybe_err = None;
    for ((peer, h, expect), plan) in recvs.into_iter().zip(&plans) {
        match h.wait() {
            Some(data) if data.len() == expect => {
                if maybe_err.is_none() {
                    let theirs: &[WireGlobalId] = bytemuck::cast_slice(&data);
                    let matches = theirs
                        .iter()
                        .zip(&plan.uidx)
                        .all(|(w, &u)| w.get() == unique[u as usize]);
                    if !matches {
                        maybe_err = Some(GsError::PairwiseDesync { peer });
                    }
                }
            }
            Some(_) if maybe_err.is_none() => {
                maybe_err = Some(GsError::PairwiseDesync { peer });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(GsError::CommError {
                    neighbor: peer,
                    detail: "pairwise id cross-check receive failed".into(),
                });
            }
            _ => {} // already failing; just drain
        }
    }
    for s in sends {
        let _ = s.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(plans),
    }
}
