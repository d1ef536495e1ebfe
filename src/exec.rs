//! Reduction executor: combine-and-redistribute over a built [`Plan`].
//!
//! One call runs four phases in order. Local-only duplicates are merged and
//! fanned back in place. Duplicates of exchanged ids are pre-merged into one
//! representative per id. The representatives then cross ranks: pairwise
//! receives and sends are posted non-blocking, the tree reduction runs while
//! they are in flight, and the pairwise results are drained and combined
//! last. Finally the exchanged result fans back to every local duplicate.
//! Every rank of the plan's communicator must call symmetrically; the call
//! returns only once all traffic issued on this rank is drained.

use crate::comm::{Communicator, Wait, TAG_REDUCE_PAIRWISE, TAG_REDUCE_TREE};
use crate::cube::Hypercube;
use crate::error::GsError;
use crate::ops::GsOp;
use crate::plan::Plan;
use crate::wire::{cast_slice, cast_slice_mut};

/// Combine seam shared by the opcode table and caller-supplied binary
/// functions.
trait Combine {
    fn combine(&self, a: f64, b: f64) -> f64;
    fn identity(&self) -> f64;
}

struct OpCombine(GsOp);

impl Combine for OpCombine {
    #[inline]
    fn combine(&self, a: f64, b: f64) -> f64 {
        self.0.combine(a, b)
    }
    #[inline]
    fn identity(&self) -> f64 {
        self.0.identity()
    }
}

struct FnCombine<'f> {
    f: &'f dyn Fn(f64, f64) -> f64,
    id: f64,
}

impl Combine for FnCombine<'_> {
    #[inline]
    fn combine(&self, a: f64, b: f64) -> f64 {
        (self.f)(a, b)
    }
    #[inline]
    fn identity(&self) -> f64 {
        self.id
    }
}

impl Plan {
    /// Combine every contribution to each shared id under `op` and leave
    /// the result at every local index of that id, on every rank.
    pub fn reduce<C: Communicator>(
        &mut self,
        cube: &Hypercube<C>,
        values: &mut [f64],
        op: GsOp,
    ) -> Result<(), GsError> {
        self.run(cube, values, &OpCombine(op), 1, None)
    }

    /// Strided variant: `values` holds a `width`-tuple per local index and
    /// the whole protocol applies lane by lane. `width` must not exceed the
    /// width the plan's buffers were sized for.
    pub fn reduce_vec<C: Communicator>(
        &mut self,
        cube: &Hypercube<C>,
        values: &mut [f64],
        op: GsOp,
        width: usize,
    ) -> Result<(), GsError> {
        self.run(cube, values, &OpCombine(op), width, None)
    }

    /// Restrict the inter-process exchange to the first `dim` hypercube
    /// dimensions. Ranks below the cube's `floor_pow2` combine when they
    /// agree on all bits `>= dim`; remainder ranks take part only when
    /// `dim` names the full cube, where the call is equivalent to
    /// [`reduce`](Self::reduce).
    pub fn reduce_subcube<C: Communicator>(
        &mut self,
        cube: &Hypercube<C>,
        values: &mut [f64],
        op: GsOp,
        dim: u32,
    ) -> Result<(), GsError> {
        if dim > cube.log2_floor_pow2() {
            return Err(GsError::InvalidDim {
                dim,
                max: cube.log2_floor_pow2(),
            });
        }
        self.run(cube, values, &OpCombine(op), 1, Some(dim))
    }

    /// Reduce under a caller-supplied associative, commutative binary
    /// function. `identity` must be neutral for `f`; it fills tree-buffer
    /// slots this rank does not own. Every rank must pass an equivalent
    /// function.
    pub fn reduce_custom<C: Communicator>(
        &mut self,
        cube: &Hypercube<C>,
        values: &mut [f64],
        f: impl Fn(f64, f64) -> f64,
        identity: f64,
    ) -> Result<(), GsError> {
        self.run(cube, values, &FnCombine { f: &f, id: identity }, 1, None)
    }

    fn run<C: Communicator>(
        &mut self,
        cube: &Hypercube<C>,
        values: &mut [f64],
        k: &dyn Combine,
        width: usize,
        dim: Option<u32>,
    ) -> Result<(), GsError> {
        if cube.size() != self.comm_size || cube.rank() != self.comm_rank {
            return Err(GsError::CommMismatch {
                plan_size: self.comm_size,
                plan_rank: self.comm_rank,
                comm_size: cube.size(),
                comm_rank: cube.rank(),
            });
        }
        if width == 0 || width > self.vec_width {
            return Err(GsError::WidthOutOfRange {
                width,
                max: self.vec_width,
            });
        }
        let expected = self.nel_total * width;
        if values.len() != expected {
            return Err(GsError::ValueLengthMismatch {
                expected,
                got: values.len(),
            });
        }

        // (a) Purely local duplicates: merge and fan back in one pass.
        for group in self.local.iter() {
            merge_group(values, group, k, width);
            fan_group(values, group, width);
        }
        // (b) Exchanged ids: pre-merge duplicates into the representative
        // (first original occurrence); fan-back happens after the exchange.
        for group in self.shared_local.iter() {
            merge_group(values, group, k, width);
        }

        // (c) Inter-process exchange. Pairwise receives and sends go out
        // first; the tree reduction runs while they are in flight. The
        // sub-cube membership test mirrors the tree's: remainder ranks (at
        // or above floor_pow2) join only the full-cube exchange.
        let rank = self.comm_rank;
        let fp = cube.floor_pow2();
        let log2 = cube.log2_floor_pow2();
        let in_subcube = |peer: usize| match dim {
            None => true,
            Some(d) if d == log2 => true,
            Some(d) => rank < fp && peer < fp && (peer >> d) == (rank >> d),
        };

        let mut recvs = Vec::with_capacity(self.peers.len());
        for (i, p) in self.peers.iter_mut().enumerate() {
            if p.reps.is_empty() || !in_subcube(p.rank) {
                continue;
            }
            let n = p.reps.len() * width;
            let h = cube
                .comm()
                .irecv(p.rank, TAG_REDUCE_PAIRWISE.base(), cast_slice_mut(&mut p.recv[..n]));
            recvs.push((i, h));
        }
        let mut sends = Vec::with_capacity(self.peers.len());
        for p in self.peers.iter_mut() {
            if p.reps.is_empty() || !in_subcube(p.rank) {
                continue;
            }
            for (j, &r) in p.reps.iter().enumerate() {
                let base = r as usize * width;
                p.send[j * width..(j + 1) * width].copy_from_slice(&values[base..base + width]);
            }
            sends.push(cube.comm().isend(
                p.rank,
                TAG_REDUCE_PAIRWISE.base(),
                cast_slice(&p.send[..p.reps.len() * width]),
            ));
        }

        let tree_result = self.run_tree(cube, values, k, width, dim);

        // Drain pairwise fully before reporting any outcome.
        let mut maybe_err = tree_result.err();
        for (i, h) in recvs {
            let p = &mut self.peers[i];
            let n = p.reps.len() * width;
            match h.wait() {
                Some(data) if data.len() == n * std::mem::size_of::<f64>() => {
                    if maybe_err.is_none() {
                        cast_slice_mut(&mut p.recv[..n]).copy_from_slice(&data);
                        for (j, &r) in p.reps.iter().enumerate() {
                            for lane in 0..width {
                                let v = &mut values[r as usize * width + lane];
                                *v = k.combine(*v, p.recv[j * width + lane]);
                            }
                        }
                    }
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(GsError::CommError {
                        neighbor: p.rank,
                        detail: format!(
                            "expected {} pairwise bytes, got {}",
                            n * std::mem::size_of::<f64>(),
                            data.len()
                        ),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(GsError::CommError {
                        neighbor: p.rank,
                        detail: "pairwise receive failed".into(),
                    });
                }
                _ => {}
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        if let Some(err) = maybe_err {
            return Err(err);
        }

        // (d) Fan the exchanged result back to every local duplicate.
        for group in self.shared_local.iter() {
            fan_group(values, group, width);
        }
        Ok(())
    }

    fn run_tree<C: Communicator>(
        &mut self,
        cube: &Hypercube<C>,
        values: &mut [f64],
        k: &dyn Combine,
        width: usize,
        dim: Option<u32>,
    ) -> Result<(), GsError> {
        let tree = &mut self.tree;
        if tree.slots == 0 {
            return Ok(());
        }
        let buf = &mut tree.buf[..tree.slots * width];
        buf.fill(k.identity());
        for &(slot, rep) in &tree.map {
            let (s, r) = (slot as usize * width, rep as usize * width);
            buf[s..s + width].copy_from_slice(&values[r..r + width]);
        }
        cube.all_reduce_with(
            buf,
            dim.unwrap_or_else(|| cube.log2_floor_pow2()),
            TAG_REDUCE_TREE,
            |acc, inc| {
                for (a, &b) in acc.iter_mut().zip(inc) {
                    *a = k.combine(*a, b);
                }
                Ok(())
            },
        )?;
        for &(slot, rep) in &tree.map {
            let (s, r) = (slot as usize * width, rep as usize * width);
            values[r..r + width].copy_from_slice(&buf[s..s + width]);
        }
        Ok(())
    }
}

fn merge_group(values: &mut [f64], group: &[u32], k: &dyn Combine, width: usize) {
    let rep = group[0] as usize * width;
    for lane in 0..width {
        let mut acc = values[rep + lane];
        for &m in &group[1..] {
            acc = k.combine(acc, values[m as usize * width + lane]);
        }
        values[rep + lane] = acc;
    }
}

fn fan_group(values: &mut [f64], group: &[u32], width: usize) {
    let rep = group[0] as usize * width;
    for lane in 0..width {
        let v = values[rep + lane];
        for &m in &group[1..] {
            values[m as usize * width + lane] = v;
        }
    }
}
