//! The single-threaded-cooperative scheduling core: one task owns the
//! job database, the scheduler, and every daemon's write half, so none
//! of it needs locking. Connections only ever reach this task through
//! the `CoreEvent` channel.

use std::collections::HashMap;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc::UnboundedReceiver;

use scheduler_core::protocol::{Affinity, JobSpec, Message, Role};
use scheduler_core::{ClusterAllocation, DaemonId, JobDatabase, JobId, JobRecord, Scheduler, SchedulerOutcome};

use crate::transport::MessageWriter;

pub type ConnId = usize;

/// Everything that can happen to the core from the outside world.
pub enum CoreEvent {
    Connected(ConnId, MessageWriter),
    Message(ConnId, Message),
    Disconnected(ConnId),
}

/// Drives the core loop until the cluster goes idle with no pending or
/// running jobs left. The same "isclean" exit condition the original
/// master polled in its run loop.
pub async fn run(
    mut db: JobDatabase,
    scheduler: Scheduler,
    mut events: UnboundedReceiver<CoreEvent>,
    min_daemons: usize,
) -> Result<JobDatabase> {
    let clock = Instant::now();
    let now = || clock.elapsed().as_secs_f64();

    let mut writers: HashMap<ConnId, MessageWriter> = HashMap::new();
    let mut daemon_of_conn: HashMap<ConnId, DaemonId> = HashMap::new();
    let mut conn_of_daemon: HashMap<DaemonId, ConnId> = HashMap::new();
    let mut users: Vec<ConnId> = Vec::new();

    while let Some(event) = events.recv().await {
        match event {
            CoreEvent::Connected(id, writer) => {
                writers.insert(id, writer);
            }
            CoreEvent::Message(id, msg) => match msg {
                Message::Greeting { role, hostname } => match role {
                    Role::Daemon => {
                        let daemon_id = format!("d{id}");
                        tracing::info!(conn = id, hostname, "daemon registered");
                        db.add_node(daemon_id.clone(), hostname);
                        daemon_of_conn.insert(id, daemon_id.clone());
                        conn_of_daemon.insert(daemon_id, id);
                    }
                    Role::User => {
                        tracing::info!(conn = id, "user connected");
                        users.push(id);
                    }
                },
                Message::JobFinish(payload) => {
                    if let Some(daemon_id) = daemon_of_conn.get(&id) {
                        db.daemon_finish_job(daemon_id, payload.jobid, payload.returns, now())?;
                    } else {
                        tracing::warn!(conn = id, "JobFinish from an unregistered connection, dropping");
                    }
                }
                Message::NewJob(_) => {
                    tracing::warn!(conn = id, "NewJob only ever flows core -> daemon, dropping");
                }
            },
            CoreEvent::Disconnected(id) => {
                writers.remove(&id);
                users.retain(|&u| u != id);
                if let Some(daemon_id) = daemon_of_conn.remove(&id) {
                    tracing::warn!(daemon = daemon_id, "daemon lost, failing its outstanding job");
                    conn_of_daemon.remove(&daemon_id);
                    db.daemon_lost(&daemon_id, now())?;
                }
            }
        }

        if daemon_of_conn.len() < min_daemons {
            continue;
        }

        loop {
            match scheduler.next_job(&mut db, now()) {
                SchedulerOutcome::Placed { jobid, .. } => {
                    dispatch(&mut db, &mut writers, &conn_of_daemon, jobid).await?;
                }
                SchedulerOutcome::Idle => break,
            }
        }

        if db.pending().is_empty() && db.running_count() == 0 {
            break;
        }
    }

    Ok(db)
}

/// Builds one `JobSpec` per participating daemon and sends each over its
/// own connection. Only the lead node's message carries a populated
/// `affinity` map. The rest only need their own coremap.
async fn dispatch(
    db: &mut JobDatabase,
    writers: &mut HashMap<ConnId, MessageWriter>,
    conn_of_daemon: &HashMap<DaemonId, ConnId>,
    jobid: JobId,
) -> Result<()> {
    let job = db.job(jobid).expect("just placed job has a record").clone();
    let alloc = db.allocation(jobid).expect("just placed job has an allocation").clone();

    for (daemon_id, spec) in build_specs(jobid, &job, &alloc) {
        let Some(&conn_id) = conn_of_daemon.get(&daemon_id) else {
            tracing::error!(daemon = daemon_id, "placed job on a daemon with no open connection");
            continue;
        };
        if let Some(writer) = writers.get_mut(&conn_id) {
            writer.send(&Message::NewJob(spec)).await?;
        }
    }
    Ok(())
}

fn build_specs(jobid: JobId, job: &JobRecord, alloc: &ClusterAllocation) -> Vec<(DaemonId, JobSpec)> {
    let leadnode = alloc.first().expect("allocation has at least one node").0.clone();
    let mode = job.mode.expect("started job has a mode");

    alloc
        .iter()
        .map(|(daemon, grant, _penalty)| {
            let affinity = if *daemon == leadnode {
                alloc
                    .iter()
                    .map(|(d, g, _)| (d.clone(), Affinity { cores: g.cores.clone(), ways: g.ways.clone() }))
                    .collect()
            } else {
                HashMap::new()
            };
            let spec = JobSpec {
                jobid,
                jobattr: job.attrs.clone(),
                coremap: grant.cores.clone(),
                llcwaymap: grant.ways.clone(),
                leadnode: leadnode.clone(),
                toprofile: job.toprofile,
                mode,
                affinity,
            };
            (daemon.clone(), spec)
        })
        .collect()
}
