use crate::config::ClusterConfig;
use crate::job::{Demand, Mode};

use super::{common_nc, Candidate, JobProfile, Policy};

use crate::config::SCALES;

/// Compact-Share: spreads a job across `scale` node groups, each holding
/// `parallelism/scale` processes packed tightly, but makes no cache or
/// bandwidth reservation. Candidates differ only by scale.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompactShare;

impl Policy for CompactShare {
    fn name(&self) -> &'static str {
        "Compact-Share (CS)"
    }

    fn sort_candidates(&self, profile: &JobProfile) -> Vec<Candidate> {
        SCALES
            .iter()
            .map(|&scale| Candidate {
                parallelism: profile.parallelism,
                scale,
                mode: Mode::Share,
                alpha: 0.0,
                ipcs: Vec::new(),
                mbws: Vec::new(),
                toprofile: false,
            })
            .collect()
    }

    fn calculate_resource_demand(&self, cfg: &ClusterConfig, candidate: &Candidate) -> Demand {
        match common_nc(cfg, candidate.parallelism, candidate.scale) {
            Some((n, c)) => Demand { n, c, w: 0, b: 0.0 },
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
    fn candidates_ascend_through_fixed_scales() {
        let profile = JobProfile { parallelism: 16, alpha: 0.0, scales: HashMap::new() };
        let candidates = CompactShare.sort_candidates(&profile);
        assert_eq!(candidates.iter().map(|c| c.scale).collect::<Vec<_>>(), vec![1, 2, 4]);
        assert!(candidates.iter().all(|c| c.mode == Mode::Share && !c.toprofile));
    }

    #[test]
    fn demand_reserves_no_cache_or_bandwidth() {
        let cfg = ClusterConfig::default();
        let candidate = Candidate {
            parallelism: 56,
            scale: 2,
            mode: Mode::Share,
            alpha: 0.0,
            ipcs: vec![],
            mbws: vec![],
            toprofile: false,
        };
        let demand = CompactShare.calculate_resource_demand(&cfg, &candidate);
        assert_eq!(demand, Demand { n: 4, c: 14, w: 0, b: 0.0 });
    }
}
