//! Wire messages the core exchanges with the network layer. Framing
//! (length-prefixing, socket I/O) is the network layer's concern; this
//! module only owns the JSON shape, tagged by a `head` field.

use serde::{Deserialize, Serialize};

use crate::job::{DaemonId, Framework, JobAttrs, JobId, JobReturn, Mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Daemon,
    User,
}

/// A node's coremap on one daemon: which core indices and which LLC-way
/// indices the job was granted there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Affinity {
    pub cores: Vec<usize>,
    pub ways: Vec<usize>,
}

/// The job specification the core emits to a daemon when placing a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub jobid: JobId,
    pub jobattr: JobAttrs,
    pub coremap: Vec<usize>,
    pub llcwaymap: Vec<usize>,
    pub leadnode: DaemonId,
    pub toprofile: bool,
    pub mode: Mode,
    /// `affinity[hostname] = coremap`, letting the lead node launch a
    /// distributed program across every participating daemon.
    pub affinity: std::collections::HashMap<DaemonId, Affinity>,
}

/// One daemon's report of a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFinishPayload {
    pub jobid: JobId,
    pub returns: JobReturn,
}

/// Every message the core consumes or emits, tagged by `head` on the
/// wire. Unknown heads are a protocol violation: logged and dropped, not
/// fatal. `NewJob` only ever flows core -> daemon; a daemon or user
/// sending one upstream is itself a protocol violation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "head")]
pub enum Message {
    Greeting { role: Role, hostname: String },
    JobFinish(JobFinishPayload),
    NewJob(JobSpec),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_round_trips_through_json() {
        let msg = Message::Greeting { role: Role::Daemon, hostname: "node07".to_string() };
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn job_finish_carries_returns() {
        let msg = Message::JobFinish(JobFinishPayload {
            jobid: 7,
            returns: JobReturn { exitcode: 0, ipcs: Some(vec![0.0, 1.2]), mbws: Some(vec![0.0, 10.0]) },
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"head\":\"JobFinish\""));
    }

    #[test]
    fn new_job_carries_the_full_jobspec_round_trip() {
        let msg = Message::NewJob(JobSpec {
            jobid: 3,
            jobattr: JobAttrs { jobname: "mg-16".into(), framework: Framework::Mpi, parallelism: 16, alpha: 0.5 },
            coremap: vec![0, 1, 2, 3],
            llcwaymap: vec![0, 1],
            leadnode: "sn0".into(),
            toprofile: true,
            mode: Mode::Exclusive,
            affinity: std::collections::HashMap::new(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"head\":\"NewJob\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
