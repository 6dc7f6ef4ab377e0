//! The scheduler loop proper: a single entry point, `next_job`, that the
//! master and the simulator both drive.

use crate::database::JobDatabase;
use crate::job::JobId;
use crate::policy::Policy;

/// What one `next_job` pass accomplished: either a job was placed (with
/// its estimate, if the policy could produce one), or nothing could be
/// done this pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerOutcome {
    Placed { jobid: JobId, estimate: Option<(f64, f64)> },
    Idle,
}

/// Holds the policy behind a trait object so the master binary can pick
/// CE/CS/SS at runtime from a CLI argument.
pub struct Scheduler {
    policy: Box<dyn Policy>,
}

impl Scheduler {
    pub fn new(policy: impl Policy + 'static) -> Self {
        Scheduler { policy: Box::new(policy) }
    }

    /// For callers that already hold a `Box<dyn Policy>`, e.g. one
    /// selected at runtime via [`crate::policy::by_name`].
    pub fn new_boxed(policy: Box<dyn Policy>) -> Self {
        Scheduler { policy }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Runs exactly one scheduling pass:
    /// 1. empty pending queue or no nodes registered -> idle.
    /// 2. pick the highest-priority pending job.
    /// 3. walk its candidate list in order, committing the first whose
    ///    demand the cluster can satisfy.
    /// 4. nothing fit -> demote the job's stride and go idle.
    pub fn next_job(&self, db: &mut JobDatabase, now: f64) -> SchedulerOutcome {
        if db.pending().is_empty() || db.node_count() == 0 {
            return SchedulerOutcome::Idle;
        }

        let jobid = db.most_prior_job(now).expect("pending is non-empty");
        let profile = db.get_profile(jobid);
        let candidates = self.policy.sort_candidates(&profile);

        let cluster_cfg = db.cluster_cfg();
        for candidate in &candidates {
            let demand = self.policy.calculate_resource_demand(&cluster_cfg, candidate);
            if !demand.is_feasible() {
                continue;
            }
            if let Some(alloc) = db.allocate_for(jobid, demand, candidate.scale, candidate.mode, candidate.toprofile) {
                let estimate = self.policy.estimate(&profile, candidate.scale, demand.w);
                db.job_start(jobid, alloc, estimate, now);
                return SchedulerOutcome::Placed { jobid, estimate };
            }
        }

        db.job_stuck(jobid);
        SchedulerOutcome::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, DbConfig};
    use crate::database::JobDatabase;
    use crate::job::{Framework, JobAttrs, JobState};
    use crate::policy::CompactExclusive;
    use crate::profile::ProfileStore;

    fn attrs(name: &str, p: u32) -> JobAttrs {
        JobAttrs { jobname: name.to_string(), framework: Framework::infer(name), parallelism: p, alpha: 0.9 }
    }

    #[test]
    fn idle_when_no_nodes_registered() {
        let mut db = JobDatabase::new(ClusterConfig::default(), DbConfig::default(), ProfileStore::in_memory());
        db.add_user_job(attrs("mg-16", 16), 0.0);
        let scheduler = Scheduler::new(CompactExclusive);
        assert_eq!(scheduler.next_job(&mut db, 0.0), SchedulerOutcome::Idle);
    }

    #[test]
    fn places_the_only_pending_job_on_ce() {
        let mut db = JobDatabase::new(ClusterConfig::default(), DbConfig::default(), ProfileStore::in_memory());
        db.add_node("d1".into(), "node1".into());
        let jobid = db.add_user_job(attrs("mg-16", 16), 0.0);
        let scheduler = Scheduler::new(CompactExclusive);

        let outcome = scheduler.next_job(&mut db, 0.0);
        assert_eq!(outcome, SchedulerOutcome::Placed { jobid, estimate: None });
        assert_eq!(db.job(jobid).unwrap().state, JobState::Running);
    }

    #[test]
    fn ninth_identical_job_waits_when_eight_nodes_are_full() {
        let mut db = JobDatabase::new(ClusterConfig::default(), DbConfig::default(), ProfileStore::in_memory());
        for i in 0..8 {
            db.add_node(format!("d{i}"), format!("node{i}"));
        }
        let scheduler = Scheduler::new(CompactExclusive);
        let mut jobids = Vec::new();
        for _ in 0..9 {
            jobids.push(db.add_user_job(attrs("mg-16", 16), 0.0));
        }
        for _ in 0..8 {
            assert!(matches!(scheduler.next_job(&mut db, 0.0), SchedulerOutcome::Placed { .. }));
        }
        // the ninth has nowhere to go; it gets demoted instead of placed.
        assert_eq!(scheduler.next_job(&mut db, 0.0), SchedulerOutcome::Idle);
        assert_eq!(db.job(*jobids.last().unwrap()).unwrap().state, JobState::Pending);
    }
}
