//! Fixed little-endian wire types for the build-time exchanges.
//!
//! All multi-byte integers are little-endian on the wire: stored pre-LE with
//! `.to_le()` and decoded with `::from_le()`. Value payloads (f64 tuples)
//! travel as native `bytemuck` casts between ranks of one job, which is the
//! same assumption the original made.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// A global id carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireGlobalId {
    id_le: i64,
}

impl WireGlobalId {
    pub fn of(id: i64) -> Self {
        Self { id_le: id.to_le() }
    }
    pub fn get(&self) -> i64 {
        i64::from_le(self.id_le)
    }
}

const_assert_eq!(std::mem::size_of::<WireGlobalId>(), 8);
const_assert_eq!(std::mem::align_of::<WireGlobalId>(), 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrip_through_bytes() {
        let v = vec![WireGlobalId::of(7), WireGlobalId::of(i64::MAX)];
        let bytes = cast_slice(&v).to_vec();
        let mut out = vec![WireGlobalId::zeroed(); 2];
        cast_slice_mut(&mut out).copy_from_slice(&bytes);
        assert_eq!(out[0].get(), 7);
        assert_eq!(out[1].get(), i64::MAX);
    }
}
