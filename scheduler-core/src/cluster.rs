//! Per-node resource inventories and the allocation/free protocol.
//!
//! The cluster model is the single source of truth for core/way/bandwidth
//! occupancy. Only `JobDatabase::allocate_for` / `job_finish` are expected
//! to call into it.

use std::collections::HashMap;

use crate::config::ClusterConfig;
use crate::job::{DaemonId, Demand, JobId};

/// One node's core/way/bandwidth inventory. A slot holds `None` when free,
/// `Some(jobid)` when owned by exactly one running job.
#[derive(Debug, Clone)]
pub struct NodeInventory {
    pub hostname: String,
    pub core: Vec<Option<JobId>>,
    pub llcway: Vec<Option<JobId>>,
    pub membw: f64,
}

impl NodeInventory {
    fn new(hostname: String, cfg: &ClusterConfig) -> Self {
        NodeInventory {
            hostname,
            core: vec![None; cfg.core_per_node as usize],
            llcway: vec![None; cfg.llcway_per_node as usize],
            membw: cfg.membw_per_node,
        }
    }

    fn free_cores(&self) -> usize {
        self.core.iter().filter(|c| c.is_none()).count()
    }

    fn free_ways(&self) -> usize {
        self.llcway.iter().filter(|w| w.is_none()).count()
    }
}

/// A node-local grant: which core/way slots and how much bandwidth a
/// candidate placement would consume on this node, plus its fragmentation
/// penalty (lower is emptier, hence preferred).
#[derive(Debug, Clone, PartialEq)]
pub struct NodeAlloc {
    pub cores: Vec<usize>,
    pub ways: Vec<usize>,
    pub membw: f64,
}

/// The full cluster-wide allocation a successful `search` produces: one
/// `(daemon, grant, penalty)` tuple per participating node.
pub type ClusterAllocation = Vec<(DaemonId, NodeAlloc, f64)>;

#[derive(Debug, Clone, Default)]
pub struct ClusterModel {
    cfg: ClusterConfig,
    nodes: HashMap<DaemonId, NodeInventory>,
    /// insertion order, used to give `search` a stable, reproducible scan
    /// order (tie-breaking between equal-penalty nodes).
    order: Vec<DaemonId>,
}

impl ClusterModel {
    pub fn new(cfg: ClusterConfig) -> Self {
        ClusterModel { cfg, nodes: HashMap::new(), order: Vec::new() }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, daemon: &str) -> Option<&NodeInventory> {
        self.nodes.get(daemon)
    }

    /// Registers a new node, or does nothing if `daemon` is already known
    /// with the same hostname. A daemon handle reused for a different
    /// hostname is a fatal programming error.
    pub fn add_node(&mut self, daemon: DaemonId, hostname: String) {
        if let Some(existing) = self.nodes.get(&daemon) {
            assert_eq!(
                existing.hostname, hostname,
                "daemon {daemon} re-registered under a different hostname"
            );
            return;
        }
        self.nodes.insert(daemon.clone(), NodeInventory::new(hostname, &self.cfg));
        self.order.push(daemon);
    }

    /// A node satisfies a request iff it has enough free cores, ways, and
    /// bandwidth simultaneously. Way contiguity is not checked here; the
    /// downstream executor owns hardware contiguity.
    fn node_satisfy_req(&self, node: &NodeInventory, req: &Demand) -> Option<(NodeAlloc, f64)> {
        if node.free_cores() < req.c as usize {
            return None;
        }
        if node.free_ways() < req.w as usize {
            return None;
        }
        if node.membw < req.b {
            return None;
        }

        let used_cores = self.cfg.core_per_node as usize - node.free_cores();
        let used_ways = self.cfg.llcway_per_node as usize - node.free_ways();
        let penalty = used_cores as f64
            + 10.0 * used_ways as f64
            + (self.cfg.membw_per_node - node.membw) / self.cfg.membw_per_node;

        let cores = node
            .core
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_none())
            .map(|(i, _)| i)
            .take(req.c as usize)
            .collect();
        let ways = node
            .llcway
            .iter()
            .enumerate()
            .filter(|(_, w)| w.is_none())
            .map(|(i, _)| i)
            .take(req.w as usize)
            .collect();

        Some((NodeAlloc { cores, ways, membw: req.b }, penalty))
    }

    /// Finds `n` nodes each satisfying `req`, preferring emptier (lower
    /// penalty) nodes. Returns `None` if fewer than `n` nodes qualify.
    /// Short-circuits the scan once `n` zero-penalty nodes are found.
    pub fn search(&self, n: u32, req: &Demand) -> Option<ClusterAllocation> {
        let mut candidates: ClusterAllocation = Vec::new();
        let mut zero_penalty = 0usize;
        for daemon in &self.order {
            let node = &self.nodes[daemon];
            if let Some((alloc, penalty)) = self.node_satisfy_req(node, req) {
                if penalty == 0.0 {
                    zero_penalty += 1;
                }
                candidates.push((daemon.clone(), alloc, penalty));
                if zero_penalty >= n as usize {
                    break;
                }
            }
        }
        if candidates.len() < n as usize {
            return None;
        }
        candidates.sort_by(|a, b| a.2.partial_cmp(&b.2).expect("penalty is never NaN"));
        candidates.truncate(n as usize);
        Some(candidates)
    }

    /// Stamps `jobid` into every slot the allocation claims and reserves
    /// its bandwidth. Panics if any claimed slot is not actually free.
    /// That indicates the caller raced two allocations over one search.
    pub fn resource_alloc(&mut self, alloc: &ClusterAllocation, jobid: JobId) {
        for (daemon, grant, _) in alloc {
            let node = self.nodes.get_mut(daemon).expect("unknown daemon in allocation");
            for &c in &grant.cores {
                assert!(node.core[c].is_none(), "core slot already claimed");
                node.core[c] = Some(jobid);
            }
            for &w in &grant.ways {
                assert!(node.llcway[w].is_none(), "way slot already claimed");
                node.llcway[w] = Some(jobid);
            }
            node.membw -= grant.membw;
            assert!(node.membw >= 0.0, "bandwidth went negative");
        }
    }

    /// Restores every slot the allocation claimed. Freeing a non-held slot
    /// is a programming error, so panics if a slot was not actually held.
    pub fn resource_free(&mut self, alloc: &ClusterAllocation) {
        for (daemon, grant, _) in alloc {
            let node = self.nodes.get_mut(daemon).expect("unknown daemon in allocation");
            for &c in &grant.cores {
                assert!(node.core[c].is_some(), "freeing an already-free core slot");
                node.core[c] = None;
            }
            for &w in &grant.ways {
                assert!(node.llcway[w].is_some(), "freeing an already-free way slot");
                node.llcway[w] = None;
            }
            node.membw += grant.membw;
        }
    }
}
