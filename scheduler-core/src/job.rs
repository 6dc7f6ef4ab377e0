//! Job attributes, lifecycle state, and the per-job priority-aging record.

use serde::{Deserialize, Serialize};

pub type JobId = u64;
pub type DaemonId = String;

/// The framework a job's program is launched with. Drives the
/// database-level placement gate (`TensorFlow` jobs never spread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Framework {
    Mpi,
    Spark,
    TensorFlow,
}

impl Framework {
    /// Classifies a program tag by its prefix before the first `-`, the
    /// same heuristic the original job sequence/trace ingestion used.
    pub fn infer(jobname: &str) -> Framework {
        let exe = jobname.split('-').next().unwrap_or(jobname);
        match exe {
            "gan" | "rnn" => Framework::TensorFlow,
            "ts" | "nw" | "wc" => Framework::Spark,
            _ => Framework::Mpi,
        }
    }
}

/// Pulls the trailing digit run off a program tag like `mg-16` -> `16`.
/// Both the job-sequence CLI and trace ingestion encode requested
/// parallelism this way; `None` if the name has no trailing digits.
pub fn trailing_parallelism(name: &str) -> Option<u32> {
    let digits: String = name.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let digits: String = digits.chars().rev().collect();
    digits.parse().ok()
}

/// Immutable attributes of a job, fixed at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAttrs {
    pub jobname: String,
    pub framework: Framework,
    pub parallelism: u32,
    pub alpha: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Exclusive,
    Share,
}

/// The `(N, C, W, B)` resource tuple a placement policy asks for and the
/// cluster model either grants in full or refuses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub n: u32,
    pub c: u32,
    pub w: u32,
    pub b: f64,
}

impl Demand {
    pub const INFEASIBLE: Demand = Demand { n: 0, c: 0, w: 0, b: 0.0 };

    pub fn is_feasible(&self) -> bool {
        self.n > 0
    }
}

/// One daemon's contribution to a completed job's profiling harvest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReturn {
    pub exitcode: i32,
    /// index 0 unused, index `w` is the IPC measured with `w` ways.
    pub ipcs: Option<Vec<f64>>,
    pub mbws: Option<Vec<f64>>,
}

/// Stride-scheduler pacing state for one pending job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Priority {
    pub value: f64,
    pub stride: f64,
    pub lastcheck: f64,
}

impl Priority {
    pub fn new(now: f64, default_stride: f64) -> Self {
        Priority { value: 0.0, stride: default_stride, lastcheck: now }
    }

    /// `value += stride * (now - lastcheck)`, in place.
    pub fn age(&mut self, now: f64) {
        self.value += self.stride * (now - self.lastcheck);
        self.lastcheck = now;
    }
}

/// Everything the database knows about one job, keyed by `JobId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub jobid: JobId,
    pub attrs: JobAttrs,
    pub state: JobState,
    pub submit: f64,
    pub start: Option<f64>,
    pub finish: Option<f64>,
    pub placement: Option<Demand>,
    pub scale: Option<u32>,
    pub mode: Option<Mode>,
    pub nodes: Vec<DaemonId>,
    pub toprofile: bool,
    pub returns: Vec<JobReturn>,
    /// estimated (time, ratio-to-baseline), if the policy could produce one.
    pub estimate: Option<(f64, f64)>,
}

impl JobRecord {
    pub fn new(jobid: JobId, attrs: JobAttrs, submit: f64) -> Self {
        JobRecord {
            jobid,
            attrs,
            state: JobState::Pending,
            submit,
            start: None,
            finish: None,
            placement: None,
            scale: None,
            mode: None,
            nodes: Vec::new(),
            toprofile: false,
            returns: Vec::new(),
            estimate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framework_inference_matches_original_mapping() {
        assert_eq!(Framework::infer("gan-16"), Framework::TensorFlow);
        assert_eq!(Framework::infer("rnn-16"), Framework::TensorFlow);
        assert_eq!(Framework::infer("ts-16"), Framework::Spark);
        assert_eq!(Framework::infer("nw-16"), Framework::Spark);
        assert_eq!(Framework::infer("wc-16"), Framework::Spark);
        assert_eq!(Framework::infer("mg-16"), Framework::Mpi);
        assert_eq!(Framework::infer("bw-28"), Framework::Mpi);
    }

    #[test]
    fn priority_ages_by_stride_times_elapsed() {
        let mut p = Priority::new(0.0, 100.0);
        p.age(2.5);
        assert_eq!(p.value, 250.0);
        assert_eq!(p.lastcheck, 2.5);
    }

    #[test]
    fn trailing_parallelism_reads_the_digit_suffix() {
        assert_eq!(trailing_parallelism("mg-16"), Some(16));
        assert_eq!(trailing_parallelism("bw-128"), Some(128));
        assert_eq!(trailing_parallelism("nodigits"), None);
    }
}
