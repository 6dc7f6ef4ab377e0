use crate::config::{ClusterConfig, SCALES};
use crate::job::{Demand, Mode};

use super::{common_nc, Candidate, JobProfile, Policy};

/// Spread-Share: shares cache ways and bandwidth across co-located jobs,
/// sizing the cache grant from the job's own `alpha`-scaled IPC curve. The
/// only policy that ever asks to profile an unprofiled scale.
///
/// Holds a copy of the cluster's resource knobs because [`Policy::estimate`]
/// needs the per-scale frequency factor and the trait gives it no `cfg`.
#[derive(Debug, Clone)]
pub struct SpreadShare {
    cfg: ClusterConfig,
}

impl SpreadShare {
    pub fn new(cfg: ClusterConfig) -> Self {
        SpreadShare { cfg }
    }
}

impl Policy for SpreadShare {
    fn name(&self) -> &'static str {
        "Spread-Share (SS)"
    }

    fn sort_candidates(&self, profile: &JobProfile) -> Vec<Candidate> {
        let baseline = profile.scales.get(&1);

        let mut candidates: Vec<(Candidate, f64)> = SCALES
            .iter()
            .map(|&scale| match (baseline, profile.scales.get(&scale)) {
                (Some(base), Some(entry)) => {
                    let speedup = base.time / (entry.time * self.cfg.freq_factor(scale));
                    let ipcs = entry.ipcs.iter().map(|x| x * speedup).collect();
                    let key = entry.time * self.cfg.freq_factor(scale);
                    (
                        Candidate {
                            parallelism: profile.parallelism,
                            scale,
                            mode: Mode::Share,
                            alpha: profile.alpha,
                            ipcs,
                            mbws: entry.mbws.clone(),
                            toprofile: false,
                        },
                        key,
                    )
                }
                _ => {
                    let key = 1.0 - 0.1 * scale as f64;
                    (
                        Candidate {
                            parallelism: profile.parallelism,
                            scale,
                            mode: Mode::Exclusive,
                            alpha: 0.0,
                            ipcs: Vec::new(),
                            mbws: Vec::new(),
                            toprofile: true,
                        },
                        key,
                    )
                }
            })
            .collect();

        candidates.sort_by(|a, b| a.1.partial_cmp(&b.1).expect("sort key is never NaN"));
        candidates.into_iter().map(|(c, _)| c).collect()
    }

    fn calculate_resource_demand(&self, cfg: &ClusterConfig, candidate: &Candidate) -> Demand {
        let Some((n, c)) = common_nc(cfg, candidate.parallelism, candidate.scale) else {
            return Demand::INFEASIBLE;
        };

        if candidate.mode == Mode::Exclusive {
            return Demand { n, c, w: cfg.llcway_per_node, b: cfg.membw_per_node };
        }

        let max_ipc = candidate.ipcs.iter().cloned().fold(f64::MIN, f64::max);
        let threshold = candidate.alpha * max_ipc;
        let wnode = cfg.llcway_per_node as usize;
        let w = (2..=wnode)
            .find(|&w| candidate.ipcs.get(w).copied().unwrap_or(f64::MIN) >= threshold)
            .unwrap_or(wnode);
        let b = candidate.mbws.get(w).copied().unwrap_or(cfg.membw_per_node);

        Demand { n, c, w: w as u32, b }
    }

    fn estimate(&self, profile: &JobProfile, scale: u32, w: u32) -> Option<(f64, f64)> {
        let entry = profile.scales.get(&scale)?;
        let baseline = profile.scales.get(&1)?;
        let max_ipc = entry.ipcs.iter().cloned().fold(f64::MIN, f64::max);
        let ipc_w = *entry.ipcs.get(w as usize)?;
        let est_time = max_ipc / ipc_w * entry.time * self.cfg.freq_factor(scale);
        let ratio = est_time / baseline.time;
        Some((est_time, ratio))
    }
}
