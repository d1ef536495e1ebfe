//! Packed per-rank membership sets.
//!
//! Neighbor discovery represents "which ranks own this global id" as a packed
//! bitmask, one bit per rank. The enumeration order used when expanding a
//! mask back into ranks is load-bearing: message sizes and peer iteration
//! order on both sides of an exchange are derived from it, so there is
//! exactly one implementation ([`expand_to_ranks`]) and one canonical order:
//! ascending byte index, least-significant bit first within each byte.

use crate::error::GsError;

/// Bytes needed for a mask holding `comm_size` rank bits.
#[inline]
pub fn mask_bytes(comm_size: usize) -> usize {
    comm_size.div_ceil(8)
}

/// Set the bit for `rank`. Fails if the mask is too small to hold it.
#[inline]
pub fn set_bit(buf: &mut [u8], rank: usize) -> Result<(), GsError> {
    let byte = rank / 8;
    if byte >= buf.len() {
        return Err(GsError::BitMaskTooSmall {
            rank,
            len_bytes: buf.len(),
        });
    }
    buf[byte] |= 1 << (rank % 8);
    Ok(())
}

/// Whether the bit for `rank` is set. Out-of-range ranks read as unset.
#[inline]
pub fn test_bit(buf: &[u8], rank: usize) -> bool {
    buf.get(rank / 8)
        .is_some_and(|b| b & (1 << (rank % 8)) != 0)
}

/// Population count over the whole mask.
#[inline]
pub fn count_bits(buf: &[u8]) -> usize {
    buf.iter().map(|b| b.count_ones() as usize).sum()
}

/// Expand the set bits into ranks, appended to `out` in canonical order
/// (ascending byte, LSB-first). `out` is cleared first.
pub fn expand_to_ranks(buf: &[u8], out: &mut Vec<usize>) {
    out.clear();
    for (byte_idx, &byte) in buf.iter().enumerate() {
        let mut bits = byte;
        while bits != 0 {
            let bit = bits.trailing_zeros() as usize;
            out.push(byte_idx * 8 + bit);
            bits &= bits - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_bytes_rounds_up() {
        assert_eq!(mask_bytes(1), 1);
        assert_eq!(mask_bytes(8), 1);
        assert_eq!(mask_bytes(9), 2);
        assert_eq!(mask_bytes(64), 8);
    }

    #[test]
    fn set_and_test() {
        let mut m = [0u8; 2];
        set_bit(&mut m, 0).unwrap();
        set_bit(&mut m, 9).unwrap();
        assert!(test_bit(&m, 0));
        assert!(!test_bit(&m, 1));
        assert!(test_bit(&m, 9));
        assert!(!test_bit(&m, 100));
        assert_eq!(count_bits(&m), 2);
    }

    #[test]
    fn set_bit_rejects_undersized_mask() {
        let mut m = [0u8; 1];
        assert!(matches!(
            set_bit(&mut m, 8),
            Err(GsError::BitMaskTooSmall { rank: 8, len_bytes: 1 })
        ));
    }

    #[test]
    fn expansion_order_is_canonical() {
        // Bits set out of order must still expand ascending.
        let mut m = [0u8; 3];
        for r in [17, 2, 0, 15, 8] {
            set_bit(&mut m, r).unwrap();
        }
        let mut out = Vec::new();
        expand_to_ranks(&m, &mut out);
        assert_eq!(out, vec![0, 2, 8, 15, 17]);
    }

    #[test]
    fn expansion_clears_output() {
        let mut out = vec![99];
        expand_to_ranks(&[0u8], &mut out);
        assert!(out.is_empty());
    }
}
