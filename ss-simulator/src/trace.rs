//! Submission trace ingestion: either a full `(program, nproc, submit,
//! duration)` trace file, or a bare comma-separated job-name sequence,
//! all submitted at `t=0` with `duration=0`, letting the scheduler's own
//! estimate stand in for wall time.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use scheduler_core::trailing_parallelism;

#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub program: String,
    pub nproc: u32,
    pub submit: f64,
    pub duration: f64,
}

/// `"mg-16,hc-28,ts-16"` -> three entries, each submitted at `t=0`.
pub fn parse_job_sequence(sequence: &str) -> Result<Vec<TraceEntry>> {
    sequence
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            let nproc = trailing_parallelism(name)
                .with_context(|| format!("job name {name:?} has no trailing parallelism digits"))?;
            Ok(TraceEntry { program: name.to_string(), nproc, submit: 0.0, duration: 0.0 })
        })
        .collect()
}

/// One `program,nproc,submitTime,duration` record per line; sorted by
/// submit time on return regardless of on-disk order.
pub fn load_trace_file(path: impl AsRef<Path>) -> Result<Vec<TraceEntry>> {
    let text = fs::read_to_string(path.as_ref())
        .with_context(|| format!("reading trace file {}", path.as_ref().display()))?;
    let mut entries: Vec<TraceEntry> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let mut fields = line.split(',');
            let program = fields.next().context("trace line missing program field")?.to_string();
            let nproc: u32 = fields.next().context("trace line missing nproc field")?.parse()?;
            let submit: f64 = fields.next().context("trace line missing submit field")?.parse()?;
            let duration: f64 = fields.next().context("trace line missing duration field")?.parse()?;
            Ok(TraceEntry { program, nproc, submit, duration })
        })
        .collect::<Result<_>>()?;
    entries.sort_by(|a, b| a.submit.partial_cmp(&b.submit).expect("submit time is never NaN"));
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_sequence_infers_parallelism_from_trailing_digits() {
        let trace = parse_job_sequence("mg-16,hc-28").unwrap();
        assert_eq!(trace[0], TraceEntry { program: "mg-16".into(), nproc: 16, submit: 0.0, duration: 0.0 });
        assert_eq!(trace[1].nproc, 28);
    }

    #[test]
    fn job_sequence_rejects_names_without_digits() {
        assert!(parse_job_sequence("nodigits").is_err());
    }

    #[test]
    fn trace_file_is_sorted_by_submit_time() {
        let path = std::env::temp_dir().join("ss_simulator_trace_sort_test.txt");
        std::fs::write(&path, "b-16,16,50,100\na-16,16,0,100\n").unwrap();
        let entries = load_trace_file(&path).unwrap();
        assert_eq!(entries[0].program, "a-16");
        assert_eq!(entries[1].program, "b-16");
        std::fs::remove_file(&path).ok();
    }
}
