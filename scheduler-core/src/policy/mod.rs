//! Placement policies: Compact-Exclusive (CE), Compact-Share (CS), and
//! Spread-Share (SS). Each implements the shared [`Policy`] contract:
//! generate an ordered candidate list from whatever profile data exists,
//! size a demand per candidate, and estimate runtime for whichever
//! candidate actually gets placed.

mod ce;
mod cs;
mod ss;

pub use ce::CompactExclusive;
pub use cs::CompactShare;
pub use ss::SpreadShare;

use std::collections::HashMap;

use crate::config::ClusterConfig;
use crate::job::{Demand, Mode};
use crate::profile::ProfileEntry;

/// `(parallelism, alpha, scale -> curve)` as handed to a policy by the
/// job database. Mirrors the original's `(parallelism, alpha, ps)`
/// profile tuple.
#[derive(Debug, Clone)]
pub struct JobProfile {
    pub parallelism: u32,
    pub alpha: f64,
    pub scales: HashMap<u32, ProfileEntry>,
}

/// One concrete `(scale, mode, curves)` option a policy offers for a
/// pending job.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub parallelism: u32,
    pub scale: u32,
    pub mode: Mode,
    pub alpha: f64,
    pub ipcs: Vec<f64>,
    pub mbws: Vec<f64>,
    pub toprofile: bool,
}

pub trait Policy {
    fn name(&self) -> &'static str;

    /// Candidates in the order the scheduler should try them; the first
    /// one whose demand the cluster can satisfy wins.
    fn sort_candidates(&self, profile: &JobProfile) -> Vec<Candidate>;

    /// `N == 0` means infeasible (the scheduler loop skips it).
    fn calculate_resource_demand(&self, cfg: &ClusterConfig, candidate: &Candidate) -> Demand;

    /// `(estimated_time, ratio_to_scale_1_baseline)`, or `None` when no
    /// profile is available to estimate from.
    fn estimate(&self, profile: &JobProfile, scale: u32, w: u32) -> Option<(f64, f64)>;
}

/// Selects a policy by its CLI short name (`CE`, `CS`, `SS`), the same
/// three tokens the original master/simulator drivers took as their
/// first positional argument.
pub fn by_name(name: &str, cfg: ClusterConfig) -> Option<Box<dyn Policy>> {
    match name {
        "CE" => Some(Box::new(CompactExclusive)),
        "CS" => Some(Box::new(CompactShare)),
        "SS" => Some(Box::new(SpreadShare::new(cfg))),
        _ => None,
    }
}

/// `N = scale * ceil(P / core_per_node)`; feasible only if processes
/// divide evenly across the resulting node count. Shared by all three
/// policies' demand calculation.
fn common_nc(cfg: &ClusterConfig, parallelism: u32, scale: u32) -> Option<(u32, u32)> {
    let per_node = cfg.core_per_node;
    let n = scale * parallelism.div_ceil(per_node);
    if n == 0 {
        return None;
    }
    if parallelism % n != 0 {
        return None;
    }
    Some((n, parallelism / n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_nc_rejects_uneven_division() {
        let cfg = ClusterConfig::default();
        // 17 does not divide evenly across any node count derived from scale.
        assert!(common_nc(&cfg, 17, 1).is_none());
    }

    #[test]
    fn common_nc_accepts_exact_division() {
        let cfg = ClusterConfig::default();
        assert_eq!(common_nc(&cfg, 16, 1), Some((1, 16)));
        assert_eq!(common_nc(&cfg, 56, 1), Some((2, 28)));
    }

    #[test]
    fn by_name_recognizes_the_three_short_codes_and_nothing_else() {
        assert_eq!(by_name("CE", ClusterConfig::default()).unwrap().name(), "Compact-Exclusive (CE)");
        assert_eq!(by_name("CS", ClusterConfig::default()).unwrap().name(), "Compact-Share (CS)");
        assert_eq!(by_name("SS", ClusterConfig::default()).unwrap().name(), "Spread-Share (SS)");
        assert!(by_name("bogus", ClusterConfig::default()).is_none());
    }
}
