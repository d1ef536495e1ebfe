//! Stage 1 of plan construction: validate and normalize the caller's ids.
//!
//! Sorts the (possibly repeated) id list while recording each id's original
//! position as a companion array, collapses runs of equal ids into duplicate
//! groups, and runs the single mesh-wide sanity collective. The collective
//! carries several independently reduced fields in one NON_UNIFORM message:
//! per-rank count statistics, the global id range, and echoes of `level`,
//! the plan-generation counter and the discovery batch size. Any echo
//! disagreement means the ranks are not building the same plan.

use itertools::Itertools;

use crate::comm::{Communicator, TAG_BUILD_SANITY};
use crate::cube::Hypercube;
use crate::error::GsError;
use crate::ops::{sort_with_companion, GsOp, OpSpec};

/// Output of the validation stage.
pub(crate) struct Validated {
    /// Original position of each id in ascending-id order (the load-bearing
    /// companion of the sort).
    pub order: Vec<u32>,
    /// Distinct ids, ascending.
    pub unique: Vec<i64>,
    /// CSR offsets into `order`, one slice per unique id.
    pub group_start: Vec<u32>,
    /// Mesh-wide id range, inclusive. `lo > hi` means no rank has ids.
    pub gid_lo: i64,
    pub gid_hi: i64,
}

const SANITY_FIELDS: usize = 11;
const SANITY_SEGS: [(GsOp, usize); SANITY_FIELDS] = [
    (GsOp::Min, 1), // count min
    (GsOp::Max, 1), // count max
    (GsOp::Add, 1), // count sum
    (GsOp::Min, 1), // gid lower bound
    (GsOp::Max, 1), // gid upper bound
    (GsOp::Min, 1), // level echo
    (GsOp::Max, 1),
    (GsOp::Min, 1), // generation echo
    (GsOp::Max, 1),
    (GsOp::Min, 1), // per-round batch echo
    (GsOp::Max, 1),
];

pub(crate) fn validate<C: Communicator>(
    cube: &Hypercube<C>,
    ids: &[i64],
    level: u32,
    per_load: usize,
    generation: u64,
) -> Result<Validated, GsError> {
    let n = ids.len();
    if n > u32::MAX as usize {
        return Err(GsError::TooManyIds { n });
    }
    for (index, &id) in ids.iter().enumerate() {
        if id < 0 {
            return Err(GsError::NegativeGlobalId { index, id });
        }
    }
    if n == 0 {
        log::warn!("rank {}: empty local id list", cube.rank());
    } else if !ids.windows(2).all(|w| w[0] <= w[1]) {
        log::warn!("rank {}: unsorted id list, sorting locally", cube.rank());
    }

    let mut sorted = ids.to_vec();
    let mut order: Vec<u32> = (0..n as u32).collect();
    sort_with_companion(&mut sorted, &mut order)?;

    let mut unique = Vec::new();
    let mut group_start = vec![0u32];
    for (count, gid) in sorted.iter().copied().dedup_with_count() {
        unique.push(gid);
        group_start.push(group_start.last().unwrap() + count as u32);
    }

    // Ranks with no ids contribute identities to the range fields.
    let lo_local = sorted.first().copied().unwrap_or(i64::MAX);
    let hi_local = sorted.last().copied().unwrap_or(-1);
    let mut fields = [
        n as i64,
        n as i64,
        n as i64,
        lo_local,
        hi_local,
        level as i64,
        level as i64,
        generation as i64,
        generation as i64,
        per_load as i64,
        per_load as i64,
    ];
    cube.all_reduce(&mut fields, OpSpec::NonUniform(&SANITY_SEGS), TAG_BUILD_SANITY)?;

    for (lo_at, hi_at, name) in [
        (5, 6, "level"),
        (7, 8, "plan generation"),
        (9, 10, "discovery batch size"),
    ] {
        if fields[lo_at] != fields[hi_at] {
            return Err(GsError::BuildDesync {
                field: name,
                min: fields[lo_at],
                max: fields[hi_at],
            });
        }
    }

    let (gid_lo, gid_hi) = (fields[3], fields[4]);
    if gid_hi >= gid_lo {
        // The window walk needs `hi - lo + 1` to be representable.
        gid_hi
            .checked_sub(gid_lo)
            .and_then(|r| r.checked_add(1))
            .ok_or(GsError::IdRangeOverflow {
                lo: gid_lo,
                hi: gid_hi,
            })?;
    }
    log::debug!(
        "gs build: counts min/max/sum = {}/{}/{}, gid range [{}, {}]",
        fields[0],
        fields[1],
        fields[2],
        gid_lo,
        gid_hi
    );

    Ok(Validated {
        order,
        unique,
        group_start,
        gid_lo,
        gid_hi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;

    fn serial_cube() -> Hypercube<NoComm> {
        Hypercube::new(NoComm)
    }

    #[test]
    fn groups_collapse_duplicates() {
        let cube = serial_cube();
        let v = validate(&cube, &[7, 3, 7, 7, 1], 1, 64, 1).unwrap();
        assert_eq!(v.order, vec![4, 1, 0, 2, 3]);
        assert_eq!(v.unique, vec![1, 3, 7]);
        assert_eq!(v.group_start, vec![0, 1, 2, 5]);
        assert_eq!((v.gid_lo, v.gid_hi), (1, 7));
    }

    #[test]
    fn negative_ids_are_fatal() {
        let cube = serial_cube();
        assert!(matches!(
            validate(&cube, &[3, -2, 5], 1, 64, 1),
            Err(GsError::NegativeGlobalId { index: 1, id: -2 })
        ));
    }

    #[test]
    fn empty_list_yields_empty_range() {
        let cube = serial_cube();
        let v = validate(&cube, &[], 1, 64, 1).unwrap();
        assert!(v.unique.is_empty());
        assert!(v.gid_lo > v.gid_hi);
    }

    #[test]
    fn sorted_input_keeps_original_order_on_ties() {
        let cube = serial_cube();
        let v = validate(&cube, &[2, 2, 9], 1, 64, 1).unwrap();
        assert_eq!(v.order, vec![0, 1, 2]);
    }
}
