//! Stage 4 of plan construction: map local ids into the dense tree buffer.
//!
//! The mesh-wide tree-id list is usually far shorter than the local unique
//! list (or occasionally the other way around on small ranks), so the
//! intersection binary-searches the longer list for each element of the
//! shorter one.

use crate::ops::lower_bound;

/// Pairs of (tree-buffer slot, index into the local unique list), ascending
/// by slot.
pub(crate) fn intersect_tree(tree_ids: &[i64], unique: &[i64]) -> Vec<(u32, u32)> {
    let mut out = Vec::new();
    if tree_ids.len() <= unique.len() {
        for (slot, &gid) in tree_ids.iter().enumerate() {
            if let Some(u) = lower_bound(unique, gid) {
                out.push((slot as u32, u as u32));
            }
        }
    } else {
        for (u, &gid) in unique.iter().enumerate() {
            if let Some(slot) = lower_bound(tree_ids, gid) {
                out.push((slot as u32, u as u32));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tree_list_side() {
        let tree = [10i64, 30];
        let unique = [5i64, 10, 20, 30, 40];
        assert_eq!(intersect_tree(&tree, &unique), vec![(0, 1), (1, 3)]);
    }

    #[test]
    fn short_unique_side() {
        let tree = [1i64, 2, 3, 4, 5];
        let unique = [2i64, 5];
        assert_eq!(intersect_tree(&tree, &unique), vec![(1, 0), (4, 1)]);
    }

    #[test]
    fn disjoint_lists_yield_nothing() {
        assert!(intersect_tree(&[1, 2], &[3, 4, 5]).is_empty());
        assert!(intersect_tree(&[], &[3]).is_empty());
        assert!(intersect_tree(&[3], &[]).is_empty());
    }
}
