//! GsError: unified error type for dof-gs public APIs.
//!
//! Errors fall into two classes. Protocol-class conditions (shape mismatches,
//! cross-rank disagreement, undersized buffers) are returned as `Err`; a
//! caller should treat them as fatal, because a protocol violation on one
//! rank generally leaves the other ranks blocked in a collective. Soft
//! conditions (unsorted input, empty local contribution, zero-size scratch
//! requests outside strict mode) are logged via `log::warn!` and handled by a
//! transparent fallback instead of surfacing here.

use thiserror::Error;

/// Unified error type for gather-scatter operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GsError {
    /// Global ids must be non-negative; negatives indicate a corrupt mesh
    /// decomposition.
    #[error("global id at position {index} is negative ({id})")]
    NegativeGlobalId { index: usize, id: i64 },

    /// Local indices are stored as `u32`; more ids than that cannot be
    /// addressed by a plan.
    #[error("id list of length {n} exceeds the u32 local-index space")]
    TooManyIds { n: usize },

    /// The mesh-wide id range does not fit the window arithmetic.
    #[error("global id range [{lo}, {hi}] overflows window arithmetic")]
    IdRangeOverflow { lo: i64, hi: i64 },

    /// A build-time echo field disagreed across ranks. The plan builder is a
    /// collective; every rank must call it with matching arguments.
    #[error("cross-rank disagreement on {field} during plan build (min {min}, max {max})")]
    BuildDesync {
        field: &'static str,
        min: i64,
        max: i64,
    },

    /// The shared-id list exchanged with a peer at build time did not match
    /// the locally derived one.
    #[error("pairwise id list exchanged with rank {peer} does not match the local view")]
    PairwiseDesync { peer: usize },

    /// A reduction call passed a value slice whose length differs from the
    /// size fixed at plan build.
    #[error("value slice has {got} entries, plan requires exactly {expected}")]
    ValueLengthMismatch { expected: usize, got: usize },

    /// A strided reduction asked for a wider tuple than the plan's buffers
    /// were sized for.
    #[error("vector width {width} exceeds the plan's configured width {max}")]
    WidthOutOfRange { width: usize, max: usize },

    /// A sub-cube reduction named more dimensions than the communicator has.
    #[error("sub-cube dimension {dim} exceeds the hypercube's {max} dimensions")]
    InvalidDim { dim: u32, max: u32 },

    /// Elementwise combination of two slices of different lengths.
    #[error("slice length mismatch: {left} vs {right}")]
    LengthMismatch { left: usize, right: usize },

    /// A non-uniform operator list did not cover the data exactly.
    #[error("non-uniform operator segments cover {covered} entries of {len}")]
    NonUniformMismatch { covered: usize, len: usize },

    /// `set_bit` was handed a mask too small to hold the rank.
    #[error("bitmask of {len_bytes} bytes cannot hold rank {rank}")]
    BitMaskTooSmall { rank: usize, len_bytes: usize },

    /// Zero-size scratch request in strict allocation mode.
    #[error("zero-size scratch allocation (strict mode)")]
    ZeroSizeAlloc,

    /// Companion array passed to the index-companion sort has the wrong
    /// length.
    #[error("companion array has {companion} entries for {keys} keys")]
    CompanionMismatch { keys: usize, companion: usize },

    /// A plan was used with a communicator of a different shape than the one
    /// it was built on.
    #[error("plan was built on a {plan_size}-rank communicator (rank {plan_rank}), called on {comm_size} (rank {comm_rank})")]
    CommMismatch {
        plan_size: usize,
        plan_rank: usize,
        comm_size: usize,
        comm_rank: usize,
    },

    /// Transport failure while talking to a neighbor.
    #[error("communication with rank {neighbor} failed: {detail}")]
    CommError { neighbor: usize, detail: String },
}
