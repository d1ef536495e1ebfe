//! Elementwise operator primitives shared by the communicator and executor.
//!
//! The original dispatched combine functions through raw function pointers
//! keyed by opcode; here [`GsOp`] is a closed enum dispatched through
//! [`GsOp::combine`], which keeps the communicator operator-agnostic without
//! pointer casts. [`OpSpec::NonUniform`] lets one collective message carry
//! several concurrently computed reductions (e.g. a min, a max and a sum as
//! parallel fields) in a single round trip.

use bytemuck::Pod;
use num_traits::{One, Zero};

use crate::error::GsError;

/// Scalar kinds the gather-scatter machinery operates on.
///
/// `f64` carries caller values, `i64` the build-time sanity fields, `u8` the
/// or-reduced neighbor masks. On floats the bitwise ops degrade to their
/// logical forms.
pub trait GsScalar:
    Pod + Copy + PartialOrd + Zero + One + Send + Sync + std::fmt::Debug + 'static
{
    /// Identity for `Max`.
    const MIN_BOUND: Self;
    /// Identity for `Min` and `AbsMin`.
    const MAX_BOUND: Self;
    /// Identity for `BitAnd`.
    const ALL_ONES: Self;

    fn abs_val(self) -> Self;
    fn truthy(self) -> bool;
    fn from_bool(b: bool) -> Self;
    fn bit_or(a: Self, b: Self) -> Self;
    fn bit_and(a: Self, b: Self) -> Self;
    fn bit_xor(a: Self, b: Self) -> Self;
}

impl GsScalar for f64 {
    const MIN_BOUND: Self = f64::NEG_INFINITY;
    const MAX_BOUND: Self = f64::INFINITY;
    const ALL_ONES: Self = 1.0;

    #[inline]
    fn abs_val(self) -> Self {
        self.abs()
    }
    #[inline]
    fn truthy(self) -> bool {
        self != 0.0
    }
    #[inline]
    fn from_bool(b: bool) -> Self {
        if b { 1.0 } else { 0.0 }
    }
    #[inline]
    fn bit_or(a: Self, b: Self) -> Self {
        Self::from_bool(a.truthy() || b.truthy())
    }
    #[inline]
    fn bit_and(a: Self, b: Self) -> Self {
        Self::from_bool(a.truthy() && b.truthy())
    }
    #[inline]
    fn bit_xor(a: Self, b: Self) -> Self {
        Self::from_bool(a.truthy() ^ b.truthy())
    }
}

impl GsScalar for i64 {
    const MIN_BOUND: Self = i64::MIN;
    const MAX_BOUND: Self = i64::MAX;
    const ALL_ONES: Self = -1;

    #[inline]
    fn abs_val(self) -> Self {
        self.saturating_abs()
    }
    #[inline]
    fn truthy(self) -> bool {
        self != 0
    }
    #[inline]
    fn from_bool(b: bool) -> Self {
        b as i64
    }
    #[inline]
    fn bit_or(a: Self, b: Self) -> Self {
        a | b
    }
    #[inline]
    fn bit_and(a: Self, b: Self) -> Self {
        a & b
    }
    #[inline]
    fn bit_xor(a: Self, b: Self) -> Self {
        a ^ b
    }
}

impl GsScalar for u8 {
    const MIN_BOUND: Self = 0;
    const MAX_BOUND: Self = u8::MAX;
    const ALL_ONES: Self = u8::MAX;

    #[inline]
    fn abs_val(self) -> Self {
        self
    }
    #[inline]
    fn truthy(self) -> bool {
        self != 0
    }
    #[inline]
    fn from_bool(b: bool) -> Self {
        b as u8
    }
    #[inline]
    fn bit_or(a: Self, b: Self) -> Self {
        a | b
    }
    #[inline]
    fn bit_and(a: Self, b: Self) -> Self {
        a & b
    }
    #[inline]
    fn bit_xor(a: Self, b: Self) -> Self {
        a ^ b
    }
}

/// Combine opcodes.
///
/// `AbsMin`/`AbsMax` compare and keep magnitudes; `Exists` is the logical
/// "any contribution is nonzero" reduction, normalized to 0/1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GsOp {
    Add,
    Mul,
    Min,
    Max,
    AbsMin,
    AbsMax,
    Exists,
    BitOr,
    BitAnd,
    BitXor,
}

impl GsOp {
    #[inline]
    pub fn combine<T: GsScalar>(self, a: T, b: T) -> T {
        match self {
            GsOp::Add => a + b,
            GsOp::Mul => a * b,
            GsOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            GsOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
            GsOp::AbsMin => {
                let (x, y) = (a.abs_val(), b.abs_val());
                if y < x { y } else { x }
            }
            GsOp::AbsMax => {
                let (x, y) = (a.abs_val(), b.abs_val());
                if y > x { y } else { x }
            }
            GsOp::Exists => T::from_bool(a.truthy() || b.truthy()),
            GsOp::BitOr => T::bit_or(a, b),
            GsOp::BitAnd => T::bit_and(a, b),
            GsOp::BitXor => T::bit_xor(a, b),
        }
    }

    /// Neutral element: `combine(identity(), x)` leaves `x`'s contribution
    /// intact (for `AbsMin`/`AbsMax`/`Exists`, up to their normalization).
    #[inline]
    pub fn identity<T: GsScalar>(self) -> T {
        match self {
            GsOp::Add | GsOp::Exists | GsOp::BitOr | GsOp::BitXor | GsOp::AbsMax => T::zero(),
            GsOp::Mul => T::one(),
            GsOp::Min | GsOp::AbsMin => T::MAX_BOUND,
            GsOp::Max => T::MIN_BOUND,
            GsOp::BitAnd => T::ALL_ONES,
        }
    }
}

/// Operator shape for a collective payload: one opcode for the whole vector,
/// or one opcode per contiguous segment.
#[derive(Copy, Clone, Debug)]
pub enum OpSpec<'a> {
    Uniform(GsOp),
    NonUniform(&'a [(GsOp, usize)]),
}

/// Fold `incoming` into `acc` elementwise according to `spec`.
///
/// Non-uniform segments must tile the slices exactly; anything else is a
/// protocol error.
pub fn apply_spec<T: GsScalar>(acc: &mut [T], incoming: &[T], spec: OpSpec<'_>) -> Result<(), GsError> {
    if acc.len() != incoming.len() {
        return Err(GsError::LengthMismatch {
            left: acc.len(),
            right: incoming.len(),
        });
    }
    match spec {
        OpSpec::Uniform(op) => {
            for (a, &b) in acc.iter_mut().zip(incoming) {
                *a = op.combine(*a, b);
            }
            Ok(())
        }
        OpSpec::NonUniform(segments) => {
            let mut pos = 0usize;
            for &(op, n) in segments {
                let end = pos
                    .checked_add(n)
                    .filter(|&e| e <= acc.len())
                    .ok_or(GsError::NonUniformMismatch {
                        covered: pos.saturating_add(n),
                        len: acc.len(),
                    })?;
                for (a, &b) in acc[pos..end].iter_mut().zip(&incoming[pos..end]) {
                    *a = op.combine(*a, b);
                }
                pos = end;
            }
            if pos != acc.len() {
                return Err(GsError::NonUniformMismatch {
                    covered: pos,
                    len: acc.len(),
                });
            }
            Ok(())
        }
    }
}

/// Elementwise `dst[i] = combine(dst[i], src[i])` under a single opcode.
pub fn combine_into<T: GsScalar>(op: GsOp, dst: &mut [T], src: &[T]) -> Result<(), GsError> {
    apply_spec(dst, src, OpSpec::Uniform(op))
}

/// Fold a slice down to one value, starting from the op's identity.
pub fn reduce_all<T: GsScalar>(op: GsOp, src: &[T]) -> T {
    src.iter().fold(op.identity(), |acc, &v| op.combine(acc, v))
}

/// Leftmost position of `item` in an ascending slice, if present.
#[inline]
pub fn lower_bound(sorted: &[i64], item: i64) -> Option<usize> {
    let i = sorted.partition_point(|&x| x < item);
    (i < sorted.len() && sorted[i] == item).then_some(i)
}

const INSERTION_CUTOFF: usize = 16;

/// Sort `keys` ascending, permuting `companion` in lock-step.
///
/// Ties are broken by the companion value, which makes the result fully
/// deterministic and, when the companion holds each key's original position,
/// equivalent to a stable sort. Quicksort with an insertion-sort base case;
/// the recursion always descends into the smaller partition.
pub fn sort_with_companion(keys: &mut [i64], companion: &mut [u32]) -> Result<(), GsError> {
    if keys.len() != companion.len() {
        return Err(GsError::CompanionMismatch {
            keys: keys.len(),
            companion: companion.len(),
        });
    }
    quicksort_pair(keys, companion);
    Ok(())
}

#[inline]
fn pair_less(ka: i64, ca: u32, kb: i64, cb: u32) -> bool {
    ka < kb || (ka == kb && ca < cb)
}

fn insertion_pair(keys: &mut [i64], comp: &mut [u32]) {
    for i in 1..keys.len() {
        let (k, c) = (keys[i], comp[i]);
        let mut j = i;
        while j > 0 && pair_less(k, c, keys[j - 1], comp[j - 1]) {
            keys[j] = keys[j - 1];
            comp[j] = comp[j - 1];
            j -= 1;
        }
        keys[j] = k;
        comp[j] = c;
    }
}

fn quicksort_pair(mut keys: &mut [i64], mut comp: &mut [u32]) {
    loop {
        let n = keys.len();
        if n <= INSERTION_CUTOFF {
            insertion_pair(keys, comp);
            return;
        }
        // Median-of-three pivot, moved to the end.
        let (lo, mid, hi) = (0, n / 2, n - 1);
        if pair_less(keys[mid], comp[mid], keys[lo], comp[lo]) {
            keys.swap(lo, mid);
            comp.swap(lo, mid);
        }
        if pair_less(keys[hi], comp[hi], keys[lo], comp[lo]) {
            keys.swap(lo, hi);
            comp.swap(lo, hi);
        }
        if pair_less(keys[hi], comp[hi], keys[mid], comp[mid]) {
            keys.swap(mid, hi);
            comp.swap(mid, hi);
        }
        keys.swap(mid, n - 2);
        comp.swap(mid, n - 2);
        let (pk, pc) = (keys[n - 2], comp[n - 2]);

        let mut store = 0usize;
        for i in 0..n - 2 {
            if pair_less(keys[i], comp[i], pk, pc) {
                keys.swap(i, store);
                comp.swap(i, store);
                store += 1;
            }
        }
        keys.swap(store, n - 2);
        comp.swap(store, n - 2);

        // Recurse into the smaller side, iterate on the larger.
        let (kl, kr) = keys.split_at_mut(store);
        let (cl, cr) = comp.split_at_mut(store);
        let (kr, cr) = (&mut kr[1..], &mut cr[1..]);
        if kl.len() <= kr.len() {
            quicksort_pair(kl, cl);
            keys = kr;
            comp = cr;
        } else {
            quicksort_pair(kr, cr);
            keys = kl;
            comp = cl;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn combine_table() {
        assert_eq!(GsOp::Add.combine(2.0, 3.0), 5.0);
        assert_eq!(GsOp::Mul.combine(2.0, 3.0), 6.0);
        assert_eq!(GsOp::Min.combine(2.0, 3.0), 2.0);
        assert_eq!(GsOp::Max.combine(2.0, 3.0), 3.0);
        assert_eq!(GsOp::AbsMin.combine(-1.0, 4.0), 1.0);
        assert_eq!(GsOp::AbsMax.combine(-5.0, 4.0), 5.0);
        assert_eq!(GsOp::Exists.combine(0.0, -2.0), 1.0);
        assert_eq!(GsOp::Exists.combine(0.0, 0.0), 0.0);
        assert_eq!(GsOp::BitOr.combine(0b1010i64, 0b0110), 0b1110);
        assert_eq!(GsOp::BitAnd.combine(0b1010i64, 0b0110), 0b0010);
        assert_eq!(GsOp::BitXor.combine(0b1010i64, 0b0110), 0b1100);
    }

    #[test]
    fn identities_are_neutral() {
        for op in [
            GsOp::Add,
            GsOp::Mul,
            GsOp::Min,
            GsOp::Max,
            GsOp::AbsMax,
            GsOp::BitOr,
            GsOp::BitAnd,
            GsOp::BitXor,
        ] {
            for v in [-3i64, 0, 7] {
                let got = op.combine(op.identity::<i64>(), v);
                let want = match op {
                    GsOp::AbsMax => v.saturating_abs(),
                    GsOp::BitOr | GsOp::BitXor | GsOp::BitAnd => v,
                    _ => v,
                };
                assert_eq!(got, want, "{op:?} identity not neutral for {v}");
            }
        }
    }

    #[test]
    fn non_uniform_segments_apply_per_field() {
        let mut acc = vec![5i64, 1, 10, 3];
        let inc = vec![2i64, 4, 7, 3];
        let segs = [(GsOp::Min, 1), (GsOp::Max, 1), (GsOp::Add, 2)];
        apply_spec(&mut acc, &inc, OpSpec::NonUniform(&segs)).unwrap();
        assert_eq!(acc, vec![2, 4, 17, 6]);
    }

    #[test]
    fn non_uniform_must_tile_exactly() {
        let mut acc = vec![0i64; 3];
        let inc = vec![0i64; 3];
        let short = [(GsOp::Add, 2)];
        assert!(matches!(
            apply_spec(&mut acc, &inc, OpSpec::NonUniform(&short)),
            Err(GsError::NonUniformMismatch { covered: 2, len: 3 })
        ));
        let long = [(GsOp::Add, 4)];
        assert!(apply_spec(&mut acc, &inc, OpSpec::NonUniform(&long)).is_err());
    }

    #[test]
    fn mismatched_lengths_are_fatal() {
        let mut acc = vec![0.0; 2];
        assert!(matches!(
            combine_into(GsOp::Add, &mut acc, &[1.0]),
            Err(GsError::LengthMismatch { left: 2, right: 1 })
        ));
    }

    #[test]
    fn reduce_all_folds_from_identity() {
        assert_eq!(reduce_all(GsOp::Add, &[1.0, 2.0, 3.0]), 6.0);
        assert_eq!(reduce_all(GsOp::Min, &[3i64, -1, 2]), -1);
        assert_eq!(reduce_all::<f64>(GsOp::Max, &[]), f64::NEG_INFINITY);
    }

    #[test]
    fn lower_bound_finds_leftmost() {
        let v = [1i64, 3, 3, 3, 9];
        assert_eq!(lower_bound(&v, 3), Some(1));
        assert_eq!(lower_bound(&v, 1), Some(0));
        assert_eq!(lower_bound(&v, 9), Some(4));
        assert_eq!(lower_bound(&v, 4), None);
        assert_eq!(lower_bound(&[], 4), None);
    }

    #[test]
    fn companion_sort_matches_stable_sort() {
        let mut keys = vec![5i64, 1, 5, -2, 5, 1, 0];
        let mut comp: Vec<u32> = (0..keys.len() as u32).collect();
        sort_with_companion(&mut keys, &mut comp).unwrap();
        assert_eq!(keys, vec![-2, 0, 1, 1, 5, 5, 5]);
        // Equal keys keep their original relative order via the companion.
        assert_eq!(comp, vec![3, 6, 1, 5, 0, 2, 4]);
    }

    #[test]
    fn companion_length_mismatch_is_fatal() {
        let mut keys = vec![1i64, 2];
        let mut comp = vec![0u32];
        assert!(matches!(
            sort_with_companion(&mut keys, &mut comp),
            Err(GsError::CompanionMismatch { keys: 2, companion: 1 })
        ));
    }

    proptest! {
        #[test]
        fn companion_sort_agrees_with_std(keys in proptest::collection::vec(-50i64..50, 0..200)) {
            let mut k = keys.clone();
            let mut c: Vec<u32> = (0..k.len() as u32).collect();
            sort_with_companion(&mut k, &mut c).unwrap();

            let mut pairs: Vec<(i64, u32)> =
                keys.iter().copied().zip(0..keys.len() as u32).collect();
            pairs.sort(); // (key, original index), same tie-break rule
            let (ek, ec): (Vec<i64>, Vec<u32>) = pairs.into_iter().unzip();
            prop_assert_eq!(k, ek);
            prop_assert_eq!(c, ec);
        }

        #[test]
        fn exists_normalizes_to_boolean(a in any::<f64>(), b in any::<f64>()) {
            let r = GsOp::Exists.combine(a, b);
            prop_assert!(r == 0.0 || r == 1.0);
        }
    }
}
