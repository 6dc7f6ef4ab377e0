//! The job database: all job state, the profile store handle, and the
//! cluster model, fronted by the operations the scheduler loop calls.
//! Single-threaded-cooperative. Every method here runs to completion
//! without suspending, so no internal locking is needed.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::cluster::{ClusterAllocation, ClusterModel};
use crate::config::{ClusterConfig, DbConfig};
use crate::error::Result;
use crate::job::{DaemonId, Demand, Framework, JobAttrs, JobId, JobRecord, JobReturn, JobState, Mode, Priority};
use crate::policy::JobProfile;
use crate::profile::ProfileStore;

pub struct JobDatabase {
    cluster_cfg: ClusterConfig,
    db_cfg: DbConfig,
    cluster: ClusterModel,
    profiles: ProfileStore,
    jobs: HashMap<JobId, JobRecord>,
    priorities: HashMap<JobId, Priority>,
    pending: Vec<JobId>,
    outstanding: HashMap<JobId, HashSet<DaemonId>>,
    allocations: HashMap<JobId, ClusterAllocation>,
    next_jobid: JobId,
    history_path: Option<std::path::PathBuf>,
}

/// The JSON body of one history-file line.
#[derive(Debug, Serialize)]
struct HistoryRecord<'a> {
    submit: f64,
    start: Option<f64>,
    finish: Option<f64>,
    attrs: &'a JobAttrs,
    nodelist: &'a [DaemonId],
    ncwb: Option<Demand>,
    scale: Option<u32>,
    mode: Option<Mode>,
    toprofile: bool,
}

impl JobDatabase {
    pub fn new(cluster_cfg: ClusterConfig, db_cfg: DbConfig, profiles: ProfileStore) -> Self {
        let cluster = ClusterModel::new(cluster_cfg.clone());
        JobDatabase {
            cluster_cfg,
            db_cfg,
            cluster,
            profiles,
            jobs: HashMap::new(),
            priorities: HashMap::new(),
            pending: Vec::new(),
            outstanding: HashMap::new(),
            allocations: HashMap::new(),
            next_jobid: 1,
            history_path: None,
        }
    }

    /// Turns on history-file logging; off (the simulator's default) until
    /// called.
    pub fn enable_history(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new().create(true).append(true).open(&path)?;
        self.history_path = Some(path);
        Ok(())
    }

    pub fn add_node(&mut self, daemon: DaemonId, hostname: String) {
        self.cluster.add_node(daemon, hostname);
    }

    pub fn node_count(&self) -> usize {
        self.cluster.node_count()
    }

    /// A cheap clone of the cluster's resource knobs, for callers (the
    /// scheduler loop) that need to size a demand outside the database.
    pub fn cluster_cfg(&self) -> ClusterConfig {
        self.cluster_cfg.clone()
    }

    pub fn job(&self, jobid: JobId) -> Option<&JobRecord> {
        self.jobs.get(&jobid)
    }

    /// The per-node grant behind a running job's placement, for callers
    /// (the network layer) that need to translate it into per-daemon
    /// `NewJob` messages. `None` before `job_start` or after `job_finish`.
    pub fn allocation(&self, jobid: JobId) -> Option<&ClusterAllocation> {
        self.allocations.get(&jobid)
    }

    /// Every job that has reached `Completed`, for post-run statistics.
    pub fn completed_jobs(&self) -> Vec<&JobRecord> {
        self.jobs.values().filter(|j| j.state == JobState::Completed).collect()
    }

    pub fn pending(&self) -> &[JobId] {
        &self.pending
    }

    /// Jobs currently running (allocated, not yet finished). Used by the
    /// network front end to decide when the cluster has gone idle.
    pub fn running_count(&self) -> usize {
        self.outstanding.len()
    }

    /// Appends to `pending`, seeding a fresh stride-scheduler priority.
    pub fn add_user_job(&mut self, attrs: JobAttrs, now: f64) -> JobId {
        let jobid = self.next_jobid;
        self.next_jobid += 1;
        self.jobs.insert(jobid, JobRecord::new(jobid, attrs, now));
        self.priorities.insert(jobid, Priority::new(now, self.db_cfg.default_stride));
        self.pending.push(jobid);
        jobid
    }

    /// Ages every pending job's priority, then returns `argmax(value -
    /// jobid)`. Ties favor the lower (older) jobid. `None` iff `pending`
    /// is empty; callers must check `pending()` first.
    pub fn most_prior_job(&mut self, now: f64) -> Option<JobId> {
        if self.pending.is_empty() {
            return None;
        }
        for jobid in &self.pending {
            self.priorities.get_mut(jobid).expect("pending job missing a priority record").age(now);
        }
        self.pending.iter().copied().max_by(|a, b| {
            let score = |j: &JobId| self.priorities[j].value - *j as f64;
            score(a).partial_cmp(&score(b)).expect("priority value is never NaN")
        })
    }

    pub fn get_profile(&self, jobid: JobId) -> JobProfile {
        let job = &self.jobs[&jobid];
        JobProfile {
            parallelism: job.attrs.parallelism,
            alpha: job.attrs.alpha,
            scales: self.profiles.get(&job.attrs.jobname),
        }
    }

    /// Two gates on top of a plain `search`: TensorFlow jobs never spread
    /// past `scale==1`; big jobs (`P>32`) may not spread so wide that
    /// `N/scale` exceeds half the cluster. On success, stamps the chosen
    /// `(demand, scale, mode, toprofile)` tuple into the job record.
    /// `jobStart` later commits it against the cluster.
    pub fn allocate_for(
        &mut self,
        jobid: JobId,
        demand: Demand,
        scale: u32,
        mode: Mode,
        toprofile: bool,
    ) -> Option<ClusterAllocation> {
        if !demand.is_feasible() {
            return None;
        }
        let job = self.jobs.get(&jobid).expect("unknown jobid");
        if job.attrs.framework == Framework::TensorFlow && scale != 1 {
            return None;
        }
        if job.attrs.parallelism > 32 && scale > 1 {
            let nodecount = self.cluster.node_count() as f64;
            if nodecount > 0.0 && (demand.n as f64 / scale as f64) > 0.5 * nodecount {
                return None;
            }
        }

        let alloc = self.cluster.search(demand.n, &demand)?;

        let job = self.jobs.get_mut(&jobid).expect("unknown jobid");
        job.placement = Some(demand);
        job.scale = Some(scale);
        job.mode = Some(mode);
        job.toprofile = toprofile;
        Some(alloc)
    }

    /// Commits `alloc` on the cluster, moves the job `pending -> running`,
    /// and resets every *other* pending job's stride to the default.
    /// Starvation recovery: a newly started job can no longer crowd out
    /// the jobs still waiting behind it.
    pub fn job_start(&mut self, jobid: JobId, alloc: ClusterAllocation, est: Option<(f64, f64)>, now: f64) {
        self.cluster.resource_alloc(&alloc, jobid);

        let daemons: HashSet<DaemonId> = alloc.iter().map(|(d, _, _)| d.clone()).collect();
        let nodes: Vec<DaemonId> = alloc.iter().map(|(d, _, _)| d.clone()).collect();

        let job = self.jobs.get_mut(&jobid).expect("unknown jobid");
        job.state = JobState::Running;
        job.start = Some(now);
        job.nodes = nodes;
        job.estimate = est;

        self.outstanding.insert(jobid, daemons);
        self.allocations.insert(jobid, alloc);
        self.pending.retain(|&j| j != jobid);
        self.priorities.remove(&jobid);

        for pj in &self.pending {
            self.priorities.get_mut(pj).expect("pending job missing a priority record").stride =
                self.db_cfg.default_stride;
        }
    }

    /// Called whenever `allocateFor` returned `None` for the top job:
    /// slows its priority growth so other pending jobs can catch up.
    pub fn job_stuck(&mut self, jobid: JobId) {
        if let Some(p) = self.priorities.get_mut(&jobid) {
            p.stride = self.db_cfg.slow_stride;
        }
    }

    /// Removes `daemon` from the job's outstanding set; runs `jobFinish`
    /// once every assigned daemon has reported in.
    pub fn daemon_finish_job(&mut self, daemon: &str, jobid: JobId, ret: JobReturn, now: f64) -> Result<()> {
        let job = self.jobs.get_mut(&jobid).expect("unknown jobid");
        job.returns.push(ret);

        let outstanding = self.outstanding.get_mut(&jobid).expect("unknown jobid in outstanding set");
        outstanding.remove(daemon);
        let done = outstanding.is_empty();
        if done {
            self.job_finish(jobid, now)?;
        }
        Ok(())
    }

    /// A daemon has dropped off the network: every job still waiting on
    /// it is rejected outright rather than left pending a report that
    /// will never arrive. Suppresses profile recording for the affected
    /// jobs. A failed run's timing has nothing to teach the profile store.
    pub fn daemon_lost(&mut self, daemon: &str, now: f64) -> Result<()> {
        let affected: Vec<JobId> =
            self.outstanding.iter().filter(|(_, daemons)| daemons.contains(daemon)).map(|(&jobid, _)| jobid).collect();
        for jobid in affected {
            let job = self.jobs.get_mut(&jobid).expect("outstanding jobid missing its record");
            job.toprofile = false;
            job.returns.push(JobReturn { exitcode: -1, ipcs: None, mbws: None });
            self.job_finish(jobid, now)?;
        }
        Ok(())
    }

    fn job_finish(&mut self, jobid: JobId, now: f64) -> Result<()> {
        let alloc = self.allocations.remove(&jobid).expect("finishing job with no recorded allocation");
        self.outstanding.remove(&jobid);
        self.cluster.resource_free(&alloc);

        let toprofile = {
            let job = self.jobs.get_mut(&jobid).expect("unknown jobid");
            job.finish = Some(now);
            job.state = JobState::Completed;
            job.toprofile
        };

        if toprofile {
            let job = &self.jobs[&jobid];
            let scale = job.scale.expect("toprofile job missing its chosen scale");
            let jobtime = now - job.start.expect("finishing job that never started");
            self.profiles.record_finish(
                &job.attrs.jobname,
                scale,
                jobtime,
                &job.returns,
                self.cluster_cfg.llcway_per_node,
                &self.db_cfg.sample_ways,
            )?;
        }

        if let Some(path) = self.history_path.clone() {
            let job = &self.jobs[&jobid];
            let record = HistoryRecord {
                submit: job.submit,
                start: job.start,
                finish: job.finish,
                attrs: &job.attrs,
                nodelist: &job.nodes,
                ncwb: job.placement,
                scale: job.scale,
                mode: job.mode,
                toprofile: job.toprofile,
            };
            let mut file = OpenOptions::new().append(true).open(path)?;
            writeln!(file, "JOBID {:5}: {}", jobid, serde_json::to_string(&record)?)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobReturn;

    fn attrs(name: &str, p: u32) -> JobAttrs {
        JobAttrs { jobname: name.to_string(), framework: Framework::infer(name), parallelism: p, alpha: 0.9 }
    }

    fn fresh_db() -> JobDatabase {
        JobDatabase::new(ClusterConfig::default(), DbConfig::default(), ProfileStore::in_memory())
    }

    #[test]
    fn most_prior_job_prefers_lower_jobid_on_tie() {
        let mut db = fresh_db();
        let a = db.add_user_job(attrs("mg-16", 16), 0.0);
        let b = db.add_user_job(attrs("mg-16", 16), 0.0);
        assert!(a < b);
        // both age identically, so the tiebreak (value - jobid) favors `a`.
        assert_eq!(db.most_prior_job(10.0), Some(a));
    }

    #[test]
    fn job_start_resets_other_pending_strides_to_default() {
        let mut db = fresh_db();
        db.add_node("d1".into(), "node1".into());
        let a = db.add_user_job(attrs("mg-16", 16), 0.0);
        let b = db.add_user_job(attrs("mg-16", 16), 0.0);
        db.job_stuck(b);
        assert_eq!(db.priorities[&b].stride, db.db_cfg.slow_stride);

        let demand = Demand { n: 1, c: 16, w: 20, b: 120.0 };
        let alloc = db.allocate_for(a, demand, 1, Mode::Exclusive, false).unwrap();
        db.job_start(a, alloc, None, 0.0);

        assert_eq!(db.priorities[&b].stride, db.db_cfg.default_stride);
    }

    #[test]
    fn tensorflow_job_rejects_nonunit_scale() {
        let mut db = fresh_db();
        db.add_node("d1".into(), "node1".into());
        let jobid = db.add_user_job(attrs("gan-16", 16), 0.0);
        let demand = Demand { n: 1, c: 16, w: 0, b: 0.0 };
        assert!(db.allocate_for(jobid, demand, 2, Mode::Share, false).is_none());
    }

    #[test]
    fn big_job_wide_spread_is_rejected_on_small_cluster() {
        let mut db = fresh_db();
        db.add_node("d1".into(), "node1".into());
        db.add_node("d2".into(), "node2".into());
        let jobid = db.add_user_job(attrs("mg-64", 64), 0.0);
        // N/scale = 2/2 = 1 > 0.5*2 = 1.0 is false, so widen further to force the gate.
        let demand = Demand { n: 4, c: 16, w: 0, b: 0.0 };
        assert!(db.allocate_for(jobid, demand, 4, Mode::Share, false).is_none());
    }

    #[test]
    fn full_lifecycle_frees_resources_on_finish() {
        let mut db = fresh_db();
        db.add_node("d1".into(), "node1".into());
        let jobid = db.add_user_job(attrs("mg-16", 16), 0.0);
        let demand = Demand { n: 1, c: 16, w: 20, b: 120.0 };
        let alloc = db.allocate_for(jobid, demand, 1, Mode::Exclusive, false).unwrap();
        db.job_start(jobid, alloc, Some((100.0, 1.0)), 0.0);
        assert_eq!(db.job(jobid).unwrap().state, JobState::Running);

        let ret = JobReturn { exitcode: 0, ipcs: None, mbws: None };
        db.daemon_finish_job("d1", jobid, ret, 100.0).unwrap();

        assert_eq!(db.job(jobid).unwrap().state, JobState::Completed);
        let node = db.cluster.node("d1").unwrap();
        assert!(node.core.iter().all(|c| c.is_none()));
    }

    #[test]
    fn daemon_lost_fails_its_job_and_frees_resources() {
        let mut db = fresh_db();
        db.add_node("d1".into(), "node1".into());
        let jobid = db.add_user_job(attrs("mg-16", 16), 0.0);
        let demand = Demand { n: 1, c: 16, w: 20, b: 120.0 };
        let alloc = db.allocate_for(jobid, demand, 1, Mode::Exclusive, true).unwrap();
        db.job_start(jobid, alloc, Some((100.0, 1.0)), 0.0);

        db.daemon_lost("d1", 42.0).unwrap();

        let job = db.job(jobid).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.finish, Some(42.0));
        assert_eq!(job.returns.last().unwrap().exitcode, -1);
        let node = db.cluster.node("d1").unwrap();
        assert!(node.core.iter().all(|c| c.is_none()));
    }

    #[test]
    fn daemon_lost_on_unrelated_daemon_leaves_job_running() {
        let mut db = fresh_db();
        db.add_node("d1".into(), "node1".into());
        let jobid = db.add_user_job(attrs("mg-16", 16), 0.0);
        let demand = Demand { n: 1, c: 16, w: 20, b: 120.0 };
        let alloc = db.allocate_for(jobid, demand, 1, Mode::Exclusive, false).unwrap();
        db.job_start(jobid, alloc, None, 0.0);

        db.daemon_lost("d99", 42.0).unwrap();

        assert_eq!(db.job(jobid).unwrap().state, JobState::Running);
    }
}
