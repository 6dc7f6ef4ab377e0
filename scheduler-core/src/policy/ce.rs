use crate::config::ClusterConfig;
use crate::job::{Demand, Mode};

use super::{common_nc, Candidate, JobProfile, Policy};

/// Compact-Exclusive: the job takes whole nodes, cache and bandwidth
/// included. Never profiles; a single candidate, never spread.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactExclusive;

impl Policy for CompactExclusive {
    fn name(&self) -> &'static str {
        "Compact-Exclusive (CE)"
    }

    fn sort_candidates(&self, profile: &JobProfile) -> Vec<Candidate> {
        vec![Candidate {
            parallelism: profile.parallelism,
            scale: 1,
            mode: Mode::Exclusive,
            alpha: 0.0,
            ipcs: Vec::new(),
            mbws: Vec::new(),
            toprofile: false,
        }]
    }

    fn calculate_resource_demand(&self, cfg: &ClusterConfig, candidate: &Candidate) -> Demand {
        match common_nc(cfg, candidate.parallelism, candidate.scale) {
            Some((n, c)) => Demand { n, c, w: cfg.llcway_per_node, b: cfg.membw_per_node },
            None => Demand::INFEASIBLE,
        }
    }

    fn estimate(&self, profile: &JobProfile, _scale: u32, _w: u32) -> Option<(f64, f64)> {
        profile.scales.get(&1).map(|e| (e.time, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn single_candidate_exclusive_scale_one() {
        let profile = JobProfile { parallelism: 16, alpha: 0.9, scales: HashMap::new() };
        let candidates = CompactExclusive.sort_candidates(&profile);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].scale, 1);
        assert_eq!(candidates[0].mode, Mode::Exclusive);
        assert!(!candidates[0].toprofile);
    }

    #[test]
    fn demand_takes_whole_nodes() {
        let cfg = ClusterConfig::default();
        let candidate = Candidate {
            parallelism: 16,
            scale: 1,
            mode: Mode::Exclusive,
            alpha: 0.0,
            ipcs: vec![],
            mbws: vec![],
            toprofile: false,
        };
        let demand = CompactExclusive.calculate_resource_demand(&cfg, &candidate);
        assert_eq!(demand, Demand { n: 1, c: 16, w: 20, b: 120.0 });
    }
}
