//! The gather-scatter plan: a communication schedule built once from a
//! global-id list and reused by every reduction call.
//!
//! `build` is a strictly sequential pipeline (validate, discover, resolve
//! pairwise, resolve tree, finalize) and a collective: every rank must call
//! it in the same relative order with agreeing arguments. The resulting
//! [`Plan`] owns all its buffers; dropping it (or calling [`Plan::destroy`])
//! releases everything, and because `destroy` consumes the plan, any use
//! after destruction is a compile-time fault.

pub(crate) mod discover;
pub(crate) mod pairwise;
pub(crate) mod tree;
pub(crate) mod validate;

use crate::arena::Scratch;
use crate::comm::Communicator;
use crate::config::GsConfig;
use crate::cube::Hypercube;
use crate::error::GsError;

/// CSR-packed groups of local indices, one group per duplicated id.
#[derive(Debug, Default, Clone)]
pub struct IndexGroups {
    offsets: Vec<u32>,
    indices: Vec<u32>,
}

impl IndexGroups {
    pub fn new() -> Self {
        Self {
            offsets: vec![0],
            indices: Vec::new(),
        }
    }

    pub fn push_group(&mut self, group: &[u32]) {
        self.indices.extend_from_slice(group);
        self.offsets.push(self.indices.len() as u32);
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> {
        self.offsets
            .windows(2)
            .map(|w| &self.indices[w[0] as usize..w[1] as usize])
    }
}

/// Classification sizes fixed at build time; identical rebuilds yield
/// identical stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStats {
    /// Caller ids (`nel_total`).
    pub n_ids: usize,
    /// Distinct local ids.
    pub n_unique: usize,
    /// Duplicate groups merged purely locally.
    pub n_local_groups: usize,
    /// Duplicate groups pre-merged before an inter-process exchange.
    pub n_shared_groups: usize,
    /// Local ids on the pairwise path.
    pub n_pairwise_ids: usize,
    /// Mesh-wide tree ids (dense buffer slots).
    pub n_tree_ids: usize,
    /// Tree ids present on this rank.
    pub n_tree_local: usize,
    /// Pairwise peer ranks.
    pub n_peers: usize,
    /// Collective rounds spent in neighbor discovery.
    pub discovery_rounds: usize,
}

/// Per-peer pairwise schedule with value buffers sized once at build.
#[derive(Debug)]
pub(crate) struct PeerLink {
    pub rank: usize,
    /// Representative local index per shared id, ascending id order.
    pub reps: Vec<u32>,
    pub send: Vec<f64>,
    pub recv: Vec<f64>,
}

/// Dense tree-buffer mapping.
#[derive(Debug, Default)]
pub(crate) struct TreeLink {
    /// Mesh-wide slot count.
    pub slots: usize,
    /// (slot, representative local index) for ids present on this rank.
    pub map: Vec<(u32, u32)>,
    pub buf: Vec<f64>,
}

/// A built gather-scatter plan. See the module docs for the lifecycle.
#[derive(Debug)]
pub struct Plan {
    pub(crate) nel_total: usize,
    pub(crate) vec_width: usize,
    pub(crate) level: u32,
    pub(crate) comm_rank: usize,
    pub(crate) comm_size: usize,
    pub(crate) generation: u64,
    pub(crate) local: IndexGroups,
    pub(crate) shared_local: IndexGroups,
    pub(crate) peers: Vec<PeerLink>,
    pub(crate) tree: TreeLink,
    stats: PlanStats,
}

impl Plan {
    /// Build a plan for this rank's `ids`. Collective: every rank of the
    /// cube must call with an agreeing `level` and `cfg`.
    ///
    /// `level` is the pairwise/tree threshold: ids with at most `level + 1`
    /// owning ranks take the pairwise path. Values above the communicator
    /// size are clamped with a warning.
    pub fn build<C: Communicator>(
        cube: &Hypercube<C>,
        ids: &[i64],
        level: u32,
        cfg: &GsConfig,
    ) -> Result<Self, GsError> {
        let size = cube.size();
        let level = if level as usize > size {
            log::warn!("level {level} exceeds communicator size {size}, clamping");
            size as u32
        } else {
            level
        };
        let vec_width = if cfg.vec_width == 0 {
            log::warn!("vec_width 0 requested, using 1");
            1
        } else {
            cfg.vec_width
        };
        let per_load = cfg.per_load(size);
        let generation = cube.next_generation();
        let scratch = Scratch::new(cfg.strict_alloc);

        let v = validate::validate(cube, ids, level, per_load, generation)?;
        let cls = discover::discover(
            cube, &scratch, &v.unique, v.gid_lo, v.gid_hi, level, per_load,
        )?;
        let peer_plans = pairwise::resolve_pairwise(cube, &v.unique, &cls.pairwise)?;
        let tree_pairs = tree::intersect_tree(&cls.tree_ids, &v.unique);

        // Finalize: duplicate groups of exchanged ids move off the plain
        // local list onto the pre/post-exchange list; the first original
        // occurrence of each id is its representative.
        let rep = |u: usize| v.order[v.group_start[u] as usize];
        let mut local = IndexGroups::new();
        let mut shared_local = IndexGroups::new();
        for u in 0..v.unique.len() {
            let (s, e) = (v.group_start[u] as usize, v.group_start[u + 1] as usize);
            if e - s >= 2 {
                let group = &v.order[s..e];
                if cls.shared[u] {
                    shared_local.push_group(group);
                } else {
                    local.push_group(group);
                }
            }
        }

        let peers: Vec<PeerLink> = peer_plans
            .into_iter()
            .map(|p| {
                let n = p.uidx.len();
                PeerLink {
                    rank: p.rank,
                    reps: p.uidx.iter().map(|&u| rep(u as usize)).collect(),
                    send: vec![0.0; n * vec_width],
                    recv: vec![0.0; n * vec_width],
                }
            })
            .collect();

        let tree = TreeLink {
            slots: cls.tree_ids.len(),
            map: tree_pairs
                .iter()
                .map(|&(slot, u)| (slot, rep(u as usize)))
                .collect(),
            buf: vec![0.0; cls.tree_ids.len() * vec_width],
        };

        let stats = PlanStats {
            n_ids: ids.len(),
            n_unique: v.unique.len(),
            n_local_groups: local.len(),
            n_shared_groups: shared_local.len(),
            n_pairwise_ids: cls.pairwise.len(),
            n_tree_ids: tree.slots,
            n_tree_local: tree.map.len(),
            n_peers: peers.len(),
            discovery_rounds: cls.rounds,
        };
        scratch.finish();
        log::debug!(
            "gs plan #{generation} on rank {}: {:?}",
            cube.rank(),
            stats
        );

        Ok(Plan {
            nel_total: ids.len(),
            vec_width,
            level,
            comm_rank: cube.rank(),
            comm_size: size,
            generation,
            local,
            shared_local,
            peers,
            tree,
            stats,
        })
    }

    /// Number of value entries a width-1 reduction expects.
    pub fn len(&self) -> usize {
        self.nel_total
    }

    pub fn is_empty(&self) -> bool {
        self.nel_total == 0
    }

    /// Maximum tuple width `reduce_vec` accepts, fixed at build.
    pub fn vec_width(&self) -> usize {
        self.vec_width
    }

    /// The (possibly clamped) pairwise/tree threshold this plan was built
    /// with.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Build counter on the owning communicator context.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> &PlanStats {
        &self.stats
    }

    /// Release the plan. Consuming `self` makes any later use a compile
    /// error, which is this crate's answer to the original's
    /// use-after-destroy undefined behavior. Plain `drop` works too; this
    /// exists so release shows up by name at call sites.
    pub fn destroy(self) {}
}

impl Drop for Plan {
    fn drop(&mut self) {
        log::trace!(
            "gs plan #{} released on rank {}",
            self.generation,
            self.comm_rank
        );
    }
}
