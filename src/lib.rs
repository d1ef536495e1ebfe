#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dof-gs
//!
//! dof-gs is a sparse gather-scatter library for distributed degrees of
//! freedom: ranks that share global ids combine their values under an
//! associative operator and every copy of an id ends up with the combined
//! result. It is the communication layer a domain-decomposed solver needs to
//! assemble and synchronize fields along partition boundaries.
//!
//! ## Features
//! - Build-once [`plan::Plan`]: classify ids as local, pairwise, or tree and
//!   size every buffer up front; each `reduce` call is then allocation-free
//! - Three-tier protocol (local merge, direct pairwise exchange, hypercube
//!   tree reduction) with the pairwise/tree split tuned per plan by a
//!   `level` threshold
//! - Built-in operators ([`ops::GsOp`]): sum, product, min/max, magnitude
//!   min/max, logical and bitwise variants, plus caller-supplied binary
//!   functions via [`Plan::reduce_custom`](plan::Plan::reduce_custom)
//! - Strided values (`reduce_vec`) and subcube-restricted exchanges
//!   (`reduce_subcube`)
//! - Pluggable communication backends (serial, in-process mailbox, MPI)
//!   behind one [`comm::Communicator`] trait
//! - Extensive serial, multi-rank, and property-based testing
//!
//! ## Lifecycle
//!
//! ```text
//! let cube = Hypercube::new(comm);
//! let mut plan = Plan::build(&cube, &ids, level, &cfg)?;   // collective
//! plan.reduce(&cube, &mut values, GsOp::Add)?;             // collective, repeatable
//! plan.destroy();                                          // consumes the plan
//! ```
//!
//! `build` and every `reduce*` are collectives: all ranks of the cube call
//! them in the same relative order. Cross-rank disagreement at build time is
//! reported as an error instead of silent corruption.
//!
//! ## Usage
//! Add `dof-gs` as a dependency in your `Cargo.toml` and enable features as
//! needed:
//!
//! ```toml
//! [dependencies]
//! dof-gs = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```

pub mod arena;
pub mod bitmask;
pub mod comm;
pub mod config;
pub mod cube;
pub mod error;
pub mod ops;
pub mod plan;
pub mod wire;

mod exec;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::{Communicator, MailboxCluster, MailboxComm, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::config::{GsConfig, DEFAULT_LEVEL};
    pub use crate::cube::Hypercube;
    pub use crate::error::GsError;
    pub use crate::ops::{GsOp, OpSpec};
    pub use crate::plan::{Plan, PlanStats};
}

pub use config::GsConfig;
pub use error::GsError;
pub use ops::GsOp;
pub use plan::Plan;
