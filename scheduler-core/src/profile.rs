//! The IPC/MBW profile store.
//!
//! Backed by an append-only text file, one JSON object per non-blank
//! line: `{"prog": ..., "scale": ..., "value": {"time", "ipcs", "mbws"}}`.
//! Read once at start; appended to (never rewritten) as fresh `(prog,
//! scale)` pairs are profiled.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::JobReturn;

/// One `(program, scale)` curve: runtime plus the IPC/MBW-vs-ways curves.
/// Index 0 of `ipcs`/`mbws` is unused; index `w` holds the value measured
/// (or interpolated) with `w` ways allocated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub time: f64,
    pub ipcs: Vec<f64>,
    pub mbws: Vec<f64>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ProfileLine {
    prog: String,
    scale: u32,
    value: ProfileEntry,
}

#[derive(Debug, Default)]
pub struct ProfileStore {
    path: Option<PathBuf>,
    map: HashMap<String, HashMap<u32, ProfileEntry>>,
}

fn round4(x: f64) -> f64 {
    (x * 10000.0).round() / 10000.0
}

impl ProfileStore {
    /// An in-memory-only store, used by the simulator (which never
    /// persists profile data across runs).
    pub fn in_memory() -> Self {
        ProfileStore { path: None, map: HashMap::new() }
    }

    /// Loads (creating if absent) the profile file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            File::create(&path)?;
        }
        let mut map: HashMap<String, HashMap<u32, ProfileEntry>> = HashMap::new();
        let reader = BufReader::new(File::open(&path)?);
        let mut count = 0usize;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: ProfileLine = serde_json::from_str(&line)?;
            map.entry(parsed.prog).or_default().insert(parsed.scale, parsed.value);
            count += 1;
        }
        tracing::info!(entries = count, "profile store loaded");
        Ok(ProfileStore { path: Some(path), map })
    }

    /// `map<scale, entry>` for `program`; empty if nothing is known yet.
    pub fn get(&self, program: &str) -> HashMap<u32, ProfileEntry> {
        self.map.get(program).cloned().unwrap_or_default()
    }

    /// Folds a completed profiling run's per-daemon returns into the
    /// store. First writer wins: if `(prog, scale)` is already present
    /// this is a no-op (the finish is still usable for job history, just
    /// not for the store). Returns the entry that ended up in the store,
    /// whether freshly inserted or pre-existing.
    pub fn record_finish(
        &mut self,
        prog: &str,
        scale: u32,
        jobtime: f64,
        returns: &[JobReturn],
        wnode: u32,
        sample_ways: &[u32],
    ) -> Result<ProfileEntry> {
        if let Some(existing) = self.map.get(prog).and_then(|m| m.get(&scale)) {
            return Ok(existing.clone());
        }

        let wcnt = wnode as usize + 1;
        let mut ipcs = vec![0.0f64; wcnt];
        let mut mbws = vec![0.0f64; wcnt];
        let mut ret_cnt = vec![0u32; wcnt];
        for ret in returns {
            let (Some(r_ipcs), Some(r_mbws)) = (&ret.ipcs, &ret.mbws) else { continue };
            for w in 1..wcnt {
                let (ipc, mbw) = (r_ipcs.get(w).copied().unwrap_or(0.0), r_mbws.get(w).copied().unwrap_or(0.0));
                if ipc > 0.0 && mbw > 0.0 {
                    ipcs[w] += ipc;
                    mbws[w] += mbw;
                    ret_cnt[w] += 1;
                }
            }
        }
        for w in 1..wcnt {
            if ret_cnt[w] > 0 {
                ipcs[w] = round4(ipcs[w] / ret_cnt[w] as f64);
                mbws[w] = round4(mbws[w] / ret_cnt[w] as f64);
            } else {
                ipcs[w] = -1.0;
                mbws[w] = -1.0;
            }
        }
        interpolate(&mut ipcs, sample_ways);
        interpolate(&mut mbws, sample_ways);

        let entry = ProfileEntry { time: round4(jobtime), ipcs, mbws };
        self.map.entry(prog.to_string()).or_default().insert(scale, entry.clone());

        if let Some(path) = &self.path {
            let mut file = OpenOptions::new().append(true).open(path)?;
            let line = ProfileLine { prog: prog.to_string(), scale, value: entry.clone() };
            writeln!(file, "{}", serde_json::to_string(&line)?)?;
        }

        Ok(entry)
    }
}

/// Linearly interpolates every way-index strictly between two consecutive
/// sample anchors. `sample_ways` is walked pairwise (e.g. `[20, 8, 4, 2]`
/// ⇒ fill 9..=19 from (8,20), then 5..=7 from (4,8), then 3..=3 from (2,4)).
fn interpolate(curve: &mut [f64], sample_ways: &[u32]) {
    for pair in sample_ways.windows(2) {
        let (cur_w, next_w) = (pair[0] as usize, pair[1] as usize);
        let (lo, hi) = (cur_w.min(next_w), cur_w.max(next_w));
        for k in (lo + 1)..hi {
            curve[k] = curve[next_w]
                + (curve[cur_w] - curve[next_w]) / (cur_w as f64 - next_w as f64) * (k as f64 - next_w as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ret(ipcs: Vec<f64>, mbws: Vec<f64>) -> JobReturn {
        JobReturn { exitcode: 0, ipcs: Some(ipcs), mbws: Some(mbws) }
    }

    #[test]
    fn interpolate_fills_gaps_between_anchors() {
        // wcnt = 21 (index 0 unused, 1..=20 ways)
        let mut curve = vec![-1.0; 21];
        curve[20] = 2.0;
        curve[8] = 1.0;
        curve[4] = 0.5;
        curve[2] = 0.2;
        interpolate(&mut curve, &[20, 8, 4, 2]);
        // midpoint of the 8..20 anchor pair
        let expected_14 = 1.0 + (2.0 - 1.0) / (20.0 - 8.0) * (14.0 - 8.0);
        assert!((curve[14] - expected_14).abs() < 1e-9);
        // single gap point between 4 and 8
        let expected_6 = 0.5 + (1.0 - 0.5) / (8.0 - 4.0) * (6.0 - 4.0);
        assert!((curve[6] - expected_6).abs() < 1e-9);
        // single gap point between 2 and 4
        let expected_3 = 0.2 + (0.5 - 0.2) / (4.0 - 2.0) * (3.0 - 2.0);
        assert!((curve[3] - expected_3).abs() < 1e-9);
        // index 1 is below the lowest anchor, left untouched
        assert_eq!(curve[1], -1.0);
    }

    #[test]
    fn record_finish_averages_and_interpolates_then_is_first_writer_wins() {
        let mut store = ProfileStore::in_memory();
        let wnode = 20;
        let mut ipcs_a = vec![0.0; 21];
        ipcs_a[20] = 2.0;
        ipcs_a[8] = 1.0;
        ipcs_a[4] = 0.4;
        ipcs_a[2] = 0.2;
        let mbws_a = ipcs_a.iter().map(|x| x * 10.0).collect::<Vec<_>>();

        let returns = vec![ret(ipcs_a.clone(), mbws_a.clone())];
        let entry = store
            .record_finish("mg-16", 1, 100.0, &returns, wnode, &[20, 8, 4, 2])
            .unwrap();
        assert_eq!(entry.time, 100.0);
        assert_eq!(entry.ipcs[20], 2.0);

        // a second finish with different numbers must not overwrite.
        let mut ipcs_b = ipcs_a.clone();
        ipcs_b[20] = 99.0;
        let returns_b = vec![ret(ipcs_b, mbws_a)];
        let entry2 = store.record_finish("mg-16", 1, 500.0, &returns_b, wnode, &[20, 8, 4, 2]).unwrap();
        assert_eq!(entry2.time, 100.0);
        assert_eq!(entry2.ipcs[20], 2.0);
    }

    #[test]
    fn get_is_empty_for_unknown_program() {
        let store = ProfileStore::in_memory();
        assert!(store.get("nope").is_empty());
    }
}
