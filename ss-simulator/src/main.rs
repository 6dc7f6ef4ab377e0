//! Discrete-event simulator: drives the same database and scheduler loop
//! as `ss-master`, but against a submission trace instead of a live
//! network, and never persists profile data across runs.

mod clock;
mod trace;

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use scheduler_core::{
    policy_by_name, stats, ClusterConfig, DbConfig, Framework, JobAttrs, JobDatabase, JobId, JobReturn,
    ProfileStore, Scheduler, SchedulerOutcome,
};

use clock::SimulationClock;

/// Replays a job sequence (or trace file) against CE/CS/SS and appends a
/// summary line to a results file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// placement algorithm: CE, CS, or SS
    algorithm: String,

    /// comma-separated job sequence, e.g. "mg-16,hc-28,ts-16" (ignored
    /// when --trace-file is given)
    jobs: String,

    /// minimum fraction of peak IPC the scheduler may inflict on a shared job
    alpha: f64,

    /// number of simulated daemon nodes
    #[arg(long, default_value_t = 8)]
    nodes: u32,

    /// full (program,nproc,submit,duration) trace file, overriding `jobs`
    #[arg(long)]
    trace_file: Option<PathBuf>,

    /// where the one-line run summary is appended
    #[arg(long, default_value = "results.txt")]
    results_file: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let cluster_cfg = ClusterConfig::default();
    let policy = policy_by_name(&args.algorithm, cluster_cfg.clone())
        .with_context(|| format!("no such algorithm {:?}, use CE/CS/SS", args.algorithm))?;
    let scheduler = Scheduler::new_boxed(policy);

    let mut db = JobDatabase::new(cluster_cfg.clone(), DbConfig::default(), ProfileStore::in_memory());
    for i in 0..args.nodes {
        let daemon = format!("sn{i}");
        db.add_node(daemon.clone(), daemon);
    }

    let mut trace = match &args.trace_file {
        Some(path) => trace::load_trace_file(path)?,
        None => trace::parse_job_sequence(&args.jobs)?,
    };
    tracing::info!(jobs = trace.len(), algorithm = %args.algorithm, nodes = args.nodes, "starting simulation");

    let mut clock = SimulationClock::new();
    let mut durations: HashMap<JobId, f64> = HashMap::new();
    let mut running: HashMap<JobId, (f64, Vec<String>)> = HashMap::new();
    let mut done = 0usize;

    while !(db.pending().is_empty() && running.is_empty() && trace.is_empty()) {
        while trace.first().is_some_and(|e| e.submit <= clock.now()) {
            let entry = trace.remove(0);
            let attrs = JobAttrs {
                jobname: entry.program.clone(),
                framework: Framework::infer(&entry.program),
                parallelism: entry.nproc,
                alpha: args.alpha,
            };
            let jobid = db.add_user_job(attrs, clock.now());
            durations.insert(jobid, entry.duration);
        }

        loop {
            match scheduler.next_job(&mut db, clock.now()) {
                SchedulerOutcome::Placed { jobid, estimate } => {
                    let duration = durations[&jobid];
                    // no profile yet -> fall back to the trace's own duration,
                    // otherwise scale it by the policy's predicted slowdown,
                    // or use the raw estimate for synthetic traces.
                    let est_time = match estimate {
                        Some((t0, ratio)) => if duration == 0.0 { t0 } else { duration * ratio },
                        None => duration,
                    };
                    let finish = clock.now() + est_time;
                    let daemons = db.job(jobid).expect("just started").nodes.clone();
                    running.insert(jobid, (finish, daemons));
                    clock.push_event(finish + 1.0);
                }
                SchedulerOutcome::Idle => break,
            }
        }

        let finished: Vec<JobId> =
            running.iter().filter(|(_, (finish, _))| *finish <= clock.now()).map(|(&jobid, _)| jobid).collect();
        for jobid in finished {
            let (_, daemons) = running.remove(&jobid).expect("just filtered from running");
            for daemon in &daemons {
                let ret = JobReturn { exitcode: 0, ipcs: None, mbws: None };
                db.daemon_finish_job(daemon, jobid, ret, clock.now())?;
            }
            done += 1;
            if done % 500 == 0 {
                tracing::info!(done, "simulation progress");
            }
        }

        // event set is {next submission time} union {every running job's
        // finish+1}. Only the next submission needs pushing here since
        // finishes are scheduled as they're placed, above.
        if let Some(entry) = trace.first() {
            clock.push_event(entry.submit);
        }
        clock.advance();
    }

    let completed = db.completed_jobs();
    if completed.is_empty() {
        tracing::warn!("simulation completed with no finished jobs; skipping results summary");
        return Ok(());
    }

    let basic = stats::basic_stats(&completed, cluster_cfg.core_per_node);
    let jobcount = completed.len() as f64;

    let header = format!(
        "{:>30}\t{:>8}\t{:>8}\t{:>8}\t{:>8}\t{:>8}\t{:>8}\t{:>8}",
        "Algo", "ALPHA", "OCC(%)", "MAX_TURN", "USE_CH", "BUB_CH", "JOB_WAIT", "JOB_RUN"
    );
    let result = format!(
        "{:>30}\t{:>8.2}\t{:>8.2}\t{:>8.2}\t{:>8.0}\t{:>8.0}\t{:>8.0}\t{:>8.0}",
        scheduler.policy_name(),
        args.alpha,
        basic.occupation_pct,
        basic.max_turnaround_hours,
        basic.use_corehours,
        basic.bubble_corehours,
        basic.jobwaittimes.iter().sum::<f64>() / jobcount,
        basic.jobruntimes.iter().sum::<f64>() / jobcount,
    );
    println!("{header}");
    println!("{result}");

    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(&args.results_file)?;
    writeln!(file, "Algorithm {} JobSequence {}", args.algorithm, args.jobs)?;
    writeln!(file, "{result}")?;

    Ok(())
}
