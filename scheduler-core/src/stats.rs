//! Post-hoc run statistics over completed jobs (grounded in the original
//! prototype's basic-stats pass): throughput-adjacent node occupation,
//! used/idle core-hours, and per-job wait/run times.

use std::collections::HashMap;

use crate::job::{JobRecord, JobState};

#[derive(Debug, Clone, PartialEq)]
pub struct BasicStats {
    pub max_turnaround_hours: f64,
    pub occupation_pct: f64,
    pub use_corehours: f64,
    pub bubble_corehours: f64,
    pub jobwaittimes: Vec<f64>,
    pub jobruntimes: Vec<f64>,
}

/// Merges overlapping or near-adjacent (≤1s gap) occupied ranges on one
/// node, the same tolerance the original used to treat back-to-back jobs
/// as one continuous occupied span.
fn merge_ranges(ranges: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut sorted = ranges.to_vec();
    sorted.sort();
    let mut merged: Vec<(i64, i64)> = Vec::new();
    for (begin, end) in sorted {
        if let Some(last) = merged.last_mut() {
            if last.1 >= begin - 1 {
                last.1 = last.1.max(end);
                continue;
            }
        }
        merged.push((begin, end));
    }
    merged
}

/// Computes cluster-wide occupation and per-job wait/run statistics over
/// a set of completed jobs. Panics if a record lacks `start`/`finish`.
/// Callers must filter to `JobState::Completed` first.
pub fn basic_stats(records: &[&JobRecord], core_per_node: u32) -> BasicStats {
    let mut recs: Vec<&JobRecord> = records.to_vec();
    recs.sort_by_key(|r| r.jobid);
    assert!(recs.iter().all(|r| r.state == JobState::Completed), "basic_stats requires completed jobs");

    let time_bias = recs
        .iter()
        .map(|r| r.start.expect("completed job missing a start time"))
        .fold(f64::INFINITY, f64::min);

    let mut jobruntimes = Vec::with_capacity(recs.len());
    let mut jobwaittimes = Vec::with_capacity(recs.len());
    let mut use_corehours = 0.0;
    let mut node_occupied: HashMap<&str, Vec<(i64, i64)>> = HashMap::new();

    for rec in &recs {
        let start = rec.start.expect("completed job missing a start time");
        let finish = rec.finish.expect("completed job missing a finish time");
        jobruntimes.push(finish - start);
        jobwaittimes.push(start - rec.submit);
        use_corehours += (finish - start) * rec.attrs.parallelism as f64 / 3600.0;
        for node in &rec.nodes {
            node_occupied
                .entry(node.as_str())
                .or_default()
                .push(((start - time_bias) as i64, (finish - time_bias) as i64));
        }
    }

    for ranges in node_occupied.values_mut() {
        *ranges = merge_ranges(ranges);
    }

    let max_turnaround_secs =
        node_occupied.values().filter_map(|rs| rs.last().map(|&(_, e)| e)).max().unwrap_or(0) as f64;
    let max_turnaround_hours = max_turnaround_secs / 3600.0;

    let used_nodesecs: i64 = node_occupied.values().flat_map(|rs| rs.iter()).map(|&(s, e)| e - s).sum();
    let used_nodehours = used_nodesecs as f64 / 3600.0;

    let total_nodehours = node_occupied.len() as f64 * max_turnaround_hours;
    let occupation = if total_nodehours > 0.0 { used_nodehours / total_nodehours } else { 0.0 };

    BasicStats {
        max_turnaround_hours,
        occupation_pct: occupation * 100.0,
        use_corehours,
        bubble_corehours: core_per_node as f64 * total_nodehours - use_corehours,
        jobwaittimes,
        jobruntimes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Framework, JobAttrs};

    fn completed(jobid: u64, nproc: u32, submit: f64, start: f64, finish: f64, nodes: &[&str]) -> JobRecord {
        let attrs = JobAttrs { jobname: "mg-16".into(), framework: Framework::Mpi, parallelism: nproc, alpha: 0.9 };
        let mut rec = JobRecord::new(jobid, attrs, submit);
        rec.state = JobState::Completed;
        rec.start = Some(start);
        rec.finish = Some(finish);
        rec.nodes = nodes.iter().map(|s| s.to_string()).collect();
        rec
    }

    #[test]
    fn single_job_fully_occupies_its_own_turnaround() {
        let rec = completed(0, 16, 0.0, 0.0, 3600.0, &["node1"]);
        let stats = basic_stats(&[&rec], 28);
        assert_eq!(stats.max_turnaround_hours, 1.0);
        assert!((stats.occupation_pct - 100.0).abs() < 1e-9);
        assert_eq!(stats.use_corehours, 16.0);
        assert_eq!(stats.bubble_corehours, 28.0 - 16.0);
        assert_eq!(stats.jobwaittimes, vec![0.0]);
        assert_eq!(stats.jobruntimes, vec![3600.0]);
    }

    #[test]
    fn back_to_back_jobs_on_one_node_merge_into_one_span() {
        let a = completed(0, 16, 0.0, 0.0, 100.0, &["node1"]);
        let b = completed(1, 16, 100.0, 100.0, 250.0, &["node1"]);
        let stats = basic_stats(&[&a, &b], 28);
        assert_eq!(stats.max_turnaround_hours, 250.0 / 3600.0);
        assert!((stats.occupation_pct - 100.0).abs() < 1e-9);
    }

    #[test]
    fn idle_gap_reduces_occupation_below_full() {
        let a = completed(0, 16, 0.0, 0.0, 100.0, &["node1"]);
        let b = completed(1, 16, 200.0, 200.0, 300.0, &["node1"]);
        let stats = basic_stats(&[&a, &b], 28);
        assert!(stats.occupation_pct < 100.0);
    }
}
