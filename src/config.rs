//! GsConfig: explicit tuning context for plan construction.
//!
//! The original library kept these as process globals set before the first
//! plan build; here they travel as an explicit value so two plans with
//! different tuning can coexist. The echoable fields are cross-checked
//! collectively during [`Plan::build`](crate::plan::Plan::build), so ranks
//! that disagree on a config fail fast instead of desynchronizing the
//! neighbor-discovery rounds.

use serde::{Deserialize, Serialize};

use crate::bitmask;

/// Suggested default for the pairwise/tree threshold passed to `build`:
/// ids shared by at most `level + 1` ranks take the pairwise path, the rest
/// go through the tree reduction. There is no adaptive selection; tune per
/// mesh if profiling says so.
pub const DEFAULT_LEVEL: u32 = 1;

/// Tuning knobs fixed before a plan is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GsConfig {
    /// Maximum tuple width later `reduce_vec` calls may use. Per-peer and
    /// tree buffers are sized `count * vec_width` once at build.
    pub vec_width: usize,
    /// Cap on the per-round neighbor-discovery message size, in bytes.
    /// Smaller caps trade more collective rounds for lower peak memory on
    /// large id ranges.
    pub max_round_bytes: usize,
    /// When set, zero-size scratch requests are errors instead of warnings.
    pub strict_alloc: bool,
}

impl Default for GsConfig {
    fn default() -> Self {
        Self {
            vec_width: 1,
            max_round_bytes: 64 * 1024,
            strict_alloc: false,
        }
    }
}

impl GsConfig {
    /// Ids carried per discovery round: as many per-id rank masks as fit in
    /// `max_round_bytes`, never fewer than one.
    pub fn per_load(&self, comm_size: usize) -> usize {
        (self.max_round_bytes / bitmask::mask_bytes(comm_size)).max(1)
    }
}
