//! The live network-facing master: accepts daemon and user connections,
//! feeds their messages into the scheduling core, and dispatches placed
//! jobs back out as `NewJob` messages.

mod sched;
mod transport;

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use scheduler_core::{
    policy_by_name, stats, trailing_parallelism, ClusterConfig, DbConfig, Framework, JobAttrs, JobDatabase,
    ProfileStore, Scheduler,
};

use sched::CoreEvent;
use transport::{MessageReader, MessageWriter};

/// Runs the cluster job scheduler against live daemon/user connections.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// placement algorithm: CE, CS, or SS
    algorithm: String,

    /// comma-separated job sequence, e.g. "mg-16,hc-28,ts-16", all
    /// submitted up front (matches the original's job-sequence CLI: this
    /// scheduler has no network message for submitting a job)
    job_sequence: String,

    /// minimum fraction of peak IPC the scheduler may inflict on a shared job
    alpha: f64,

    /// address daemons and users connect to
    #[arg(long, default_value = "0.0.0.0:9000")]
    listen_addr: String,

    /// jobs are only scheduled once at least this many daemons registered
    #[arg(long, default_value_t = 8)]
    min_daemons: usize,

    /// append-only IPC/MBW curve store, shared across runs
    #[arg(long, default_value = "profile.txt")]
    profile_file: PathBuf,

    /// optional per-job history log
    #[arg(long)]
    history_file: Option<PathBuf>,

    /// where the one-line run summary is appended
    #[arg(long, default_value = "results.txt")]
    results_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let cluster_cfg = ClusterConfig::default();
    let policy = policy_by_name(&args.algorithm, cluster_cfg.clone())
        .with_context(|| format!("no such algorithm {:?}, use CE/CS/SS", args.algorithm))?;
    let scheduler = Scheduler::new_boxed(policy);

    let profiles =
        ProfileStore::load(&args.profile_file).with_context(|| format!("loading {}", args.profile_file.display()))?;
    let mut db = JobDatabase::new(cluster_cfg.clone(), DbConfig::default(), profiles);
    if let Some(history) = &args.history_file {
        db.enable_history(history)?;
    }

    for name in args.job_sequence.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parallelism = trailing_parallelism(name)
            .with_context(|| format!("job name {name:?} has no trailing parallelism digits"))?;
        let attrs = JobAttrs {
            jobname: name.to_string(),
            framework: Framework::infer(name),
            parallelism,
            alpha: args.alpha,
        };
        db.add_user_job(attrs, 0.0);
    }
    tracing::info!(
        algorithm = %args.algorithm,
        jobs = %args.job_sequence,
        min_daemons = args.min_daemons,
        "master started, will schedule jobs after daemons connect"
    );

    let listener = TcpListener::bind(&args.listen_addr).await.context("binding listen address")?;
    tracing::info!(addr = %args.listen_addr, "listening");

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(accept_loop(listener, tx));

    let db = sched::run(db, scheduler, rx, args.min_daemons).await?;

    let completed = db.completed_jobs();
    if completed.is_empty() {
        tracing::warn!("no jobs completed; skipping results summary");
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
        args.algorithm,
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
    writeln!(file, "Algorithm {} JobSequence {}", args.algorithm, args.job_sequence)?;
    writeln!(file, "{result}")?;

    Ok(())
}

/// Accepts connections forever, handing each off to its own reader task
/// and registering its write half with the core so placed jobs can be
/// dispatched back out.
async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<CoreEvent>) {
    let mut next_id: sched::ConnId = 0;
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let id = next_id;
        next_id += 1;

        let (read_half, write_half) = stream.into_split();
        if tx.send(CoreEvent::Connected(id, MessageWriter::new(write_half))).is_err() {
            return;
        }
        tracing::info!(conn = id, %addr, "accepted connection");

        let tx = tx.clone();
        tokio::spawn(async move {
            let mut reader = MessageReader::new(read_half);
            loop {
                match reader.recv().await {
                    Ok(Some(msg)) => {
                        if tx.send(CoreEvent::Message(id, msg)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(CoreEvent::Disconnected(id));
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(conn = id, error = %e, "connection read error");
                        let _ = tx.send(CoreEvent::Disconnected(id));
                        return;
                    }
                }
            }
        });
    }
}
