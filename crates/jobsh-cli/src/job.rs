//! `jobsh daemon` and `jobsh job ...`

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;
use tracing::{debug, info};

use jobsh::daemon::{Daemon, DaemonClient, DaemonConfig, default_socket_path, default_state_dir};
use jobsh::jobs::{JobManager, JobSpec, NewJob, RetryPolicy, Schedule};
use jobsh::registry::{ExecutionStatus, RetentionPolicy, SearchQuery};

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Control socket path
    #[arg(long, env = "JOBSH_SOCKET")]
    socket: Option<PathBuf>,

    /// Directory for jobs.json, registry.json and the pid file
    #[arg(long, env = "JOBSH_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Scheduler tick in milliseconds
    #[arg(long, default_value_t = 1000)]
    tick_ms: u64,

    /// Grace period between SIGTERM and SIGKILL when stopping a job
    #[arg(long, default_value_t = 5000)]
    stop_grace_ms: u64,

    /// Output kept per stream per execution
    #[arg(long)]
    max_output_bytes: Option<usize>,

    /// Shell used to run job commands
    #[arg(long, env = "JOBSH_JOB_SHELL", default_value = "/bin/sh")]
    shell: PathBuf,

    /// Executions kept per job
    #[arg(long)]
    keep_per_job: Option<usize>,

    /// Executions kept in total
    #[arg(long)]
    keep_total: Option<usize>,
}

impl DaemonArgs {
    fn config(self) -> DaemonConfig {
        let mut retention = RetentionPolicy::default();
        if let Some(n) = self.keep_per_job {
            retention.max_per_job = n;
        }
        if let Some(n) = self.keep_total {
            retention.max_total = n;
        }
        let mut config = DaemonConfig::new()
            .socket_path(self.socket.unwrap_or_else(default_socket_path))
            .state_dir(self.state_dir.unwrap_or_else(default_state_dir))
            .tick_interval(Duration::from_millis(self.tick_ms.max(1)))
            .stop_grace(Duration::from_millis(self.stop_grace_ms))
            .shell(self.shell)
            .retention(retention);
        if let Some(bytes) = self.max_output_bytes {
            config = config.max_output_bytes(bytes);
        }
        config
    }
}

pub async fn run_daemon(args: DaemonArgs) -> Result<()> {
    let config = args.config();
    info!(
        socket = %config.socket_path.display(),
        state_dir = %config.state_dir.display(),
        "starting daemon"
    );
    let daemon = Daemon::start(config)
        .await
        .context("Failed to start daemon")?;
    daemon.run().await.context("Daemon failed")?;
    Ok(())
}

#[derive(Args, Debug)]
pub struct JobArgs {
    /// Control socket path
    #[arg(long, env = "JOBSH_SOCKET", global = true)]
    socket: Option<PathBuf>,

    /// Request timeout in milliseconds
    #[arg(long, default_value_t = 30_000, global = true)]
    timeout_ms: u64,

    /// Print raw JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    action: JobCmd,
}

#[derive(Subcommand, Debug)]
enum JobCmd {
    /// Daemon status
    Status,
    /// Create a job
    Add(AddArgs),
    /// Start a job without waiting for it
    Start { id: String },
    /// Run a job and wait for its output
    Trigger {
        id: String,
        /// How long to wait for the run to finish
        #[arg(long, default_value_t = 3_600_000)]
        wait_ms: u64,
    },
    /// Stop a running job
    Stop { id: String },
    /// List jobs
    List,
    /// Show one job
    Get { id: String },
    /// Delete a job
    Remove { id: String },
    /// Executions of a job, newest first
    History {
        id: String,
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },
    /// Success rate, durations, trend and failure clusters
    Stats { id: String },
    /// Search execution history
    Search {
        #[arg(long)]
        job: Option<String>,
        /// running, succeeded, failed, timed_out, stopped or killed
        #[arg(long)]
        status: Option<ExecutionStatus>,
        /// Text in the job name, output or error
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Stop all executions and reload the job table
    Restart,
    /// Stop the daemon
    Shutdown,
}

#[derive(Args, Debug)]
struct AddArgs {
    /// Job name
    name: String,
    /// Command line, run with the daemon's shell
    command: String,
    /// Five-field cron expression or @daily-style shorthand
    #[arg(long, conflicts_with = "every_ms")]
    cron: Option<String>,
    /// Fixed interval in milliseconds
    #[arg(long)]
    every_ms: Option<u64>,
    /// Total attempts per trigger, including the first
    #[arg(long)]
    attempts: Option<u32>,
    /// Delay between attempts in milliseconds
    #[arg(long, default_value_t = 1000)]
    backoff_ms: u64,
    /// Stop the run after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// KEY=VALUE, repeatable
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,
    /// Repeatable
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    priority: i32,
    /// Let a new run start while the previous one is still running
    #[arg(long)]
    allow_overlap: bool,
    /// Create the job without scheduling it
    #[arg(long)]
    disabled: bool,
}

impl AddArgs {
    fn into_request(self) -> NewJob {
        let mut job = NewJob::new(self.name, self.command).allow_overlap(self.allow_overlap);
        if let Some(expr) = self.cron {
            job = job.schedule(Schedule::Cron(expr));
        } else if let Some(ms) = self.every_ms {
            job = job.schedule(Schedule::IntervalMs(ms));
        }
        if let Some(max_attempts) = self.attempts {
            job = job.retry(RetryPolicy {
                max_attempts,
                backoff_ms: self.backoff_ms,
            });
        }
        if let Some(ms) = self.timeout_ms {
            job = job.timeout_ms(ms);
        }
        for tag in self.tags {
            job = job.tag(tag);
        }
        job.cwd = self.cwd;
        job.env = self.env.into_iter().collect::<BTreeMap<_, _>>();
        job.priority = self.priority;
        if self.disabled {
            job.enabled = Some(false);
        }
        job
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

/// Run one client command. Returns the process exit status.
pub async fn run(args: JobArgs) -> Result<i32> {
    let socket = args.socket.unwrap_or_else(default_socket_path);
    debug!(socket = %socket.display(), action = ?args.action, "sending job request");
    let client = DaemonClient::new(socket).with_timeout(Duration::from_millis(args.timeout_ms));
    let json = args.json;

    match args.action {
        JobCmd::Status => print_json(&client.status().await?)?,
        JobCmd::Add(add) => {
            let job = client.add(add.into_request()).await?;
            if json {
                print_json(&job)?;
            } else {
                println!("{}", job.id);
            }
        }
        JobCmd::Start { id } => print_job(&client.start(&id).await?, json)?,
        JobCmd::Stop { id } => print_job(&client.stop(&id).await?, json)?,
        JobCmd::Remove { id } => print_job(&client.remove(&id).await?, json)?,
        JobCmd::Get { id } => print_json(&client.get(&id).await?)?,
        JobCmd::List => {
            let jobs = client.list().await?;
            if json {
                print_json(&jobs)?;
            } else {
                print_table(&jobs);
            }
        }
        JobCmd::Trigger { id, wait_ms } => {
            let wait = Duration::from_millis(wait_ms);
            let result = client.trigger(&id, wait).await?;
            if json {
                print_json(&serde_json::json!({
                    "job": result.job,
                    "execution": result.execution,
                }))?;
            } else {
                print!("{}", result.execution.stdout);
                eprint!("{}", result.execution.stderr);
                if let Some(error) = &result.execution.error {
                    eprintln!("jobsh: {}: {}", id, error);
                }
            }
            return Ok(match result.execution.status {
                ExecutionStatus::Succeeded => 0,
                _ => result.execution.exit_code.filter(|c| *c != 0).unwrap_or(1),
            });
        }
        JobCmd::History { id, limit } => print_json(&client.history(&id, limit).await?)?,
        JobCmd::Stats { id } => print_json(&client.stats(&id).await?)?,
        JobCmd::Search {
            job,
            status,
            text,
            limit,
        } => {
            let mut query = SearchQuery::new();
            query.job_id = job;
            query.status = status;
            query.text = text;
            query.limit = limit;
            print_json(&client.search(&query).await?)?;
        }
        JobCmd::Restart => print_json(&client.restart().await?)?,
        JobCmd::Shutdown => {
            let status = client.shutdown().await?;
            if json {
                print_json(&status)?;
            } else {
                println!("daemon {} stopping", status.pid);
            }
        }
    }
    Ok(0)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let value: Value = serde_json::to_value(value).context("Failed to encode response")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_job(job: &JobSpec, json: bool) -> Result<()> {
    if json {
        return print_json(job);
    }
    println!("{}  {}  {}", job.id, job.name, job.status);
    Ok(())
}

fn print_table(jobs: &[JobSpec]) {
    if jobs.is_empty() {
        println!("no jobs");
        return;
    }
    println!(
        "{:<18} {:<20} {:<10} {:<18} {:<20} {:>6} {:>6}",
        "ID", "NAME", "STATUS", "SCHEDULE", "NEXT RUN", "RUNS", "FAILS"
    );
    for job in jobs {
        let next = job
            .next_run_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<18} {:<20} {:<10} {:<18} {:<20} {:>6} {:>6}",
            job.id,
            job.name,
            job.status,
            describe_schedule(job),
            next,
            job.run_count,
            job.failure_count
        );
    }
}

fn describe_schedule(job: &JobSpec) -> String {
    let schedule = match &job.schedule {
        Some(Schedule::Cron(expr)) => expr.clone(),
        Some(Schedule::IntervalMs(ms)) => format!("every {}ms", ms),
        None => "manual".to_string(),
    };
    if job.enabled {
        schedule
    } else {
        format!("{} (off)", schedule)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_env_pairs() {
        assert_eq!(
            parse_env_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert!(parse_env_pair("=x").is_err());
        assert!(parse_env_pair("novalue").is_err());
    }

    #[test]
    fn test_add_request() {
        let add = AddArgs {
            name: "backup".into(),
            command: "tar czf /tmp/b.tgz .".into(),
            cron: Some("0 3 * * *".into()),
            every_ms: None,
            attempts: Some(3),
            backoff_ms: 500,
            timeout_ms: Some(60_000),
            cwd: None,
            env: vec![("LEVEL".into(), "9".into())],
            tags: vec!["nightly".into()],
            priority: -1,
            allow_overlap: false,
            disabled: true,
        };
        let job = add.into_request();
        assert_eq!(job.schedule, Some(Schedule::Cron("0 3 * * *".into())));
        assert_eq!(job.retry.unwrap().max_attempts, 3);
        assert_eq!(job.env.get("LEVEL").map(String::as_str), Some("9"));
        assert!(job.tags.contains("nightly"));
        assert_eq!(job.enabled, Some(false));
        assert_eq!(job.priority, -1);
    }

    #[test]
    fn test_describe_schedule() {
        let job = JobSpec::create(
            NewJob::new("t", "true").schedule(Schedule::IntervalMs(5000)),
            chrono::Utc::now(),
        )
        .unwrap();
        assert_eq!(describe_schedule(&job), "every 5000ms");
    }
}
