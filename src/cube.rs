//! Hypercube fan-in/fan-out all-reduce over a [`Communicator`].
//!
//! The butterfly walks dimensions `0..log2(floor_pow2)`. On the way in, the
//! rank with the step bit set sends its partial to the partner with the bit
//! clear and goes quiet; on the way out the combined vector retraces the
//! same dimensions in reverse. For the full reduction, ranks at or above
//! the largest power of two below `size` first collapse their contribution
//! onto `rank - floor_pow2` and receive the final vector back from it
//! afterward, so non-power-of-two jobs see identical all-reduce semantics.
//! Restricted reductions skip the collapse: those remainder ranks belong to
//! no proper sub-cube and sit the exchange out.
//!
//! Every exchange is drained before a call returns; externally each entry
//! point is a blocking collective and all ranks must call it symmetrically.

use std::cell::Cell;

use bytemuck::Pod;

use crate::comm::{recv_into, send_now, CommTag, Communicator};
use crate::error::GsError;
use crate::ops::{apply_spec, GsScalar, OpSpec};
use crate::wire::{cast_slice, cast_slice_mut};

// Tag offsets inside one CommTag range. Fan-in and fan-out get disjoint
// per-step tags; 64 steps is enough for any usize rank space.
const OFF_COLLAPSE_IN: u16 = 0;
const OFF_COLLAPSE_OUT: u16 = 1;
const OFF_FANIN: u16 = 2;
const OFF_FANOUT: u16 = 2 + 64;

/// Communicator context: rank/size plus the derived hypercube geometry.
#[derive(Debug)]
pub struct Hypercube<C: Communicator> {
    comm: C,
    rank: usize,
    size: usize,
    floor_pow2: usize,
    log2_floor: u32,
    generation: Cell<u64>,
}

impl<C: Communicator> Hypercube<C> {
    pub fn new(comm: C) -> Self {
        let rank = comm.rank();
        let size = comm.size().max(1);
        let floor_pow2 = if size.is_power_of_two() {
            size
        } else {
            size.next_power_of_two() >> 1
        };
        Self {
            comm,
            rank,
            size,
            floor_pow2,
            log2_floor: floor_pow2.trailing_zeros(),
            generation: Cell::new(0),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }
    pub fn size(&self) -> usize {
        self.size
    }
    pub fn floor_pow2(&self) -> usize {
        self.floor_pow2
    }
    pub fn log2_floor_pow2(&self) -> u32 {
        self.log2_floor
    }
    pub fn comm(&self) -> &C {
        &self.comm
    }

    /// Monotone per-context build counter, echoed collectively by the plan
    /// builder as a cross-rank agreement check.
    pub(crate) fn next_generation(&self) -> u64 {
        let g = self.generation.get() + 1;
        self.generation.set(g);
        g
    }

    /// All-reduce `vals` in place under `spec`; every rank ends with the
    /// identical fully combined vector.
    pub fn all_reduce<T: GsScalar>(
        &self,
        vals: &mut [T],
        spec: OpSpec<'_>,
        tag: CommTag,
    ) -> Result<(), GsError> {
        check_spec(vals.len(), spec)?;
        self.all_reduce_with(vals, self.log2_floor, tag, |acc, inc| {
            apply_spec(acc, inc, spec)
        })
    }

    /// All-reduce restricted to the first `dim` hypercube dimensions. Ranks
    /// below `floor_pow2` that agree on all bits `>= dim` end with their
    /// sub-cube's combination. Remainder ranks (at or above `floor_pow2`)
    /// join only when `dim` names the full cube, where this call matches
    /// [`all_reduce`](Self::all_reduce); under any smaller `dim` they keep
    /// their input unchanged.
    pub fn all_reduce_subcube<T: GsScalar>(
        &self,
        vals: &mut [T],
        spec: OpSpec<'_>,
        dim: u32,
        tag: CommTag,
    ) -> Result<(), GsError> {
        if dim > self.log2_floor {
            return Err(GsError::InvalidDim {
                dim,
                max: self.log2_floor,
            });
        }
        check_spec(vals.len(), spec)?;
        self.all_reduce_with(vals, dim, tag, |acc, inc| apply_spec(acc, inc, spec))
    }

    /// Core exchange with a caller-supplied fuse, used directly for custom
    /// binary operators.
    pub fn all_reduce_with<T, F>(
        &self,
        vals: &mut [T],
        dim: u32,
        tag: CommTag,
        mut fuse: F,
    ) -> Result<(), GsError>
    where
        T: Pod,
        F: FnMut(&mut [T], &[T]) -> Result<(), GsError>,
    {
        if self.size == 1 || vals.is_empty() {
            return Ok(());
        }
        let fp = self.floor_pow2;
        let rank = self.rank;
        // The collapse pairs ranks that differ at the top bit, so it belongs
        // to the full reduction only. Under a restricted `dim` the remainder
        // ranks sit the exchange out, on both sides.
        let full = dim == self.log2_floor;

        // Collapse in: high ranks hand their contribution to a low partner
        // and sit out the butterfly.
        if rank >= fp {
            if !full {
                return Ok(());
            }
            let partner = rank - fp;
            send_now(&self.comm, partner, tag.offset(OFF_COLLAPSE_IN), cast_slice(vals));
            return recv_into(
                &self.comm,
                partner,
                tag.offset(OFF_COLLAPSE_OUT),
                cast_slice_mut(vals),
            );
        }
        let mut tmp = vec![T::zeroed(); vals.len()];
        if full && rank + fp < self.size {
            recv_into(
                &self.comm,
                rank + fp,
                tag.offset(OFF_COLLAPSE_IN),
                cast_slice_mut(&mut tmp),
            )?;
            fuse(vals, &tmp)?;
        }

        // Fan-in: a rank forwards its partial at its lowest set bit within
        // the walked dimensions, receiving from higher partners before that.
        let mut sent_at: Option<u32> = None;
        for step in 0..dim {
            if (rank >> step) & 1 == 1 {
                let partner = rank ^ (1 << step);
                send_now(
                    &self.comm,
                    partner,
                    tag.offset(OFF_FANIN + step as u16),
                    cast_slice(vals),
                );
                sent_at = Some(step);
                break;
            }
            let partner = rank | (1 << step);
            recv_into(
                &self.comm,
                partner,
                tag.offset(OFF_FANIN + step as u16),
                cast_slice_mut(&mut tmp),
            )?;
            fuse(vals, &tmp)?;
        }

        // Fan-out mirrors the fan-in: receive the combined vector from the
        // rank we fed, then retrace our own receives in reverse.
        let first_down = match sent_at {
            Some(step) => {
                recv_into(
                    &self.comm,
                    rank ^ (1 << step),
                    tag.offset(OFF_FANOUT + step as u16),
                    cast_slice_mut(vals),
                )?;
                step
            }
            None => dim,
        };
        for step in (0..first_down).rev() {
            send_now(
                &self.comm,
                rank | (1 << step),
                tag.offset(OFF_FANOUT + step as u16),
                cast_slice(vals),
            );
        }

        // Collapse out: return the final vector to the high partner.
        if full && rank + fp < self.size {
            send_now(
                &self.comm,
                rank + fp,
                tag.offset(OFF_COLLAPSE_OUT),
                cast_slice(vals),
            );
        }
        Ok(())
    }
}

fn check_spec(len: usize, spec: OpSpec<'_>) -> Result<(), GsError> {
    if let OpSpec::NonUniform(segments) = spec {
        let covered: usize = segments.iter().map(|&(_, n)| n).sum();
        if covered != len {
            return Err(GsError::NonUniformMismatch { covered, len });
        }
    }
    Ok(())
}
