//! The job daemon.
//!
//! One task owns every piece of mutable state: the job table, the registry
//! and the live executions. It selects over four sources:
//!
//! - the scheduler tick
//! - requests from client connections, each answered through a oneshot
//! - supervisor messages (output chunks and finished executions)
//! - new connections on the control socket
//!
//! Connection tasks only parse and forward, so requests from all clients
//! are applied one at a time in arrival order.

use std::collections::HashMap;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::config::DaemonConfig;
use super::events::{DaemonEvent, EventBus};
use super::lock::InstanceLock;
use super::protocol::{
    Command, DaemonStatus, HistoryArgs, JobIdArgs, MAX_LINE_BYTES, Request, Response,
    decode_line, encode_line,
};
use super::store::JobStore;
use super::supervisor::{RunningExecution, Supervisor, SupervisorMsg};
use crate::error::{DaemonError, Error, JobError, Result};
use crate::jobs::process::truncate_text;
use crate::jobs::{JobSpec, JobStatus, NewJob};
use crate::registry::{
    Completion, ExecutionRecord, ExecutionStatus, Registry, SearchQuery, Trigger,
};

/// Requests buffered between connection tasks and the owner loop.
const REQUEST_QUEUE: usize = 64;

/// Cap on `lastError` in job listings.
const MAX_ERROR_BYTES: usize = 4096;

/// Cap on each output stream in history and search responses.
const LISTING_OUTPUT_BYTES: usize = 64 * 1024;

/// Extra wait for executions to report after the stop grace period.
const DRAIN_SLACK: Duration = Duration::from_secs(2);

/// Everything the daemon's components share, built once at startup.
#[derive(Debug)]
pub struct DaemonContext {
    pub config: DaemonConfig,
    pub store: JobStore,
    pub registry: Registry,
    pub events: EventBus,
}

struct Envelope {
    request: Request,
    reply: oneshot::Sender<Response>,
}

/// A `triggerJob` caller waiting for its execution to finish.
struct PendingTrigger {
    request_id: u64,
    reply: oneshot::Sender<Response>,
}

enum Reply {
    Now(Value),
    /// Answer when this execution finishes
    OnFinish(String),
    /// Answer, then shut down
    Shutdown(Value),
}

enum Started {
    Running(String),
    SpawnFailed(ExecutionRecord),
}

pub struct Daemon {
    ctx: DaemonContext,
    jobs: Vec<JobSpec>,
    running: HashMap<String, RunningExecution>,
    waiters: HashMap<String, PendingTrigger>,
    supervisor: Supervisor,
    supervisor_rx: mpsc::UnboundedReceiver<SupervisorMsg>,
    requests_tx: mpsc::Sender<Envelope>,
    requests_rx: mpsc::Receiver<Envelope>,
    listener: UnixListener,
    started_at: DateTime<Utc>,
    // Dropped last: removes the pid file and socket
    lock: InstanceLock,
}

impl Daemon {
    /// Claim the instance lock, load state, reconcile leftovers from a
    /// previous run and bind the control socket.
    pub async fn start(config: DaemonConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.state_dir).await?;
        let lock = InstanceLock::acquire(&config.pid_path(), &config.socket_path).await?;

        let listener = UnixListener::bind(&config.socket_path).map_err(DaemonError::from)?;
        std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o600))?;

        let store = JobStore::new(config.jobs_path());
        let jobs = store.load().await?;
        let registry = Registry::open(config.registry_path(), config.retention)
            .await?
            .with_max_output_bytes(config.max_output_bytes);
        let events = EventBus::new();
        events.spawn_logger();

        let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor::new(&config.shell, config.stop_grace, supervisor_tx);
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE);

        let mut daemon = Self {
            ctx: DaemonContext {
                config,
                store,
                registry,
                events,
            },
            jobs,
            running: HashMap::new(),
            waiters: HashMap::new(),
            supervisor,
            supervisor_rx,
            requests_tx,
            requests_rx,
            listener,
            started_at: Utc::now(),
            lock,
        };
        daemon.reconcile(Utc::now());
        daemon.persist().await?;

        info!(
            pid = daemon.lock.pid(),
            socket = %daemon.ctx.config.socket_path.display(),
            jobs = daemon.jobs.len(),
            "daemon started"
        );
        Ok(daemon)
    }

    pub fn context(&self) -> &DaemonContext {
        &self.ctx
    }

    /// Serve until SIGINT, SIGTERM or a `stop` request.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` completes or a `stop` request arrives.
    pub async fn run_until(mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut tick = tokio::time::interval(self.ctx.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tokio::spawn(serve_connection(stream, self.requests_tx.clone()));
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
                Some(envelope) = self.requests_rx.recv() => {
                    if self.handle(envelope).await {
                        break;
                    }
                }
                Some(msg) = self.supervisor_rx.recv() => self.on_supervisor(msg).await,
                _ = tick.tick() => self.on_tick().await,
            }
        }

        self.shutdown().await
    }

    async fn shutdown(mut self) -> Result<()> {
        info!(running = self.running.len(), "daemon shutting down");
        self.stop_all_and_drain().await;
        // Unanswered triggers see the daemon go away
        self.waiters.clear();
        self.persist().await?;
        info!("daemon stopped");
        Ok(())
    }

    /// Settle state left by a previous run: running executions and jobs
    /// cannot be supervised any more, and missed schedule fires are skipped.
    fn reconcile(&mut self, now: DateTime<Utc>) {
        let orphaned = self.ctx.registry.reconcile_orphans(now);
        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "reconciled orphaned executions");
        }
        for job in &mut self.jobs {
            if job.status == JobStatus::Running {
                warn!(job_id = %job.id, "job was running when the daemon exited, marking killed");
                job.failure_count += 1;
                job.last_error = Some("daemon exited while the job was running".into());
                job.set_status(JobStatus::Killed, now);
            }
            if job.schedule.is_some() && job.next_run_at.is_none_or(|at| at < now) {
                job.advance_schedule(now);
            }
        }
    }

    /// Apply one request. Returns true when the daemon should stop.
    async fn handle(&mut self, envelope: Envelope) -> bool {
        let Envelope { request, reply } = envelope;
        let request_id = request.id;
        debug!(request_id, command = %request.command, "request");

        match self.dispatch(&request).await {
            Ok(Reply::Now(data)) => {
                let _ = reply.send(Response::ok(request_id, data));
                false
            }
            Ok(Reply::OnFinish(execution_id)) => {
                self.waiters
                    .insert(execution_id, PendingTrigger { request_id, reply });
                false
            }
            Ok(Reply::Shutdown(data)) => {
                let _ = reply.send(Response::ok(request_id, data));
                true
            }
            Err(e) => {
                debug!(request_id, error = %e, "request failed");
                let _ = reply.send(Response::error(request_id, &e));
                false
            }
        }
    }

    async fn dispatch(&mut self, request: &Request) -> Result<Reply> {
        let now = Utc::now();
        match request.command {
            Command::Status => Ok(Reply::Now(to_value(&self.status())?)),
            Command::AddJob => {
                let new_job: NewJob = request.args()?;
                let job = JobSpec::create(new_job, now)?;
                info!(
                    job_id = %job.id,
                    name = %job.name,
                    command = %self.ctx.config.log.format_command(&job.command),
                    env = %self.ctx.config.log.format_env(&job.env),
                    "adding job"
                );
                self.ctx.events.publish(DaemonEvent::JobAdded {
                    job_id: job.id.clone(),
                    name: job.name.clone(),
                });
                let data = to_value(&job)?;
                self.jobs.push(job);
                self.save_jobs().await?;
                Ok(Reply::Now(data))
            }
            Command::StartJob => {
                let id = self.resolve(&request.args::<JobIdArgs>()?.id)?;
                self.ensure_can_start(&id)?;
                self.start_execution(&id, Trigger::Manual, 1, now)?;
                self.persist().await?;
                Ok(Reply::Now(to_value(&sanitized_job(self.job(&id)?))?))
            }
            Command::TriggerJob => {
                let id = self.resolve(&request.args::<JobIdArgs>()?.id)?;
                self.ensure_can_start(&id)?;
                let started = self.start_execution(&id, Trigger::Manual, 1, now)?;
                self.persist().await?;
                match started {
                    Started::Running(execution_id) => Ok(Reply::OnFinish(execution_id)),
                    Started::SpawnFailed(record) => {
                        Ok(Reply::Now(self.trigger_result(&record)?))
                    }
                }
            }
            Command::StopJob => {
                let id = self.resolve(&request.args::<JobIdArgs>()?.id)?;
                if !self.is_running(&id) {
                    return Err(JobError::NotRunning(id).into());
                }
                self.request_stop(&id);
                Ok(Reply::Now(to_value(&sanitized_job(self.job(&id)?))?))
            }
            Command::ListJobs => {
                let jobs: Vec<JobSpec> = self.jobs.iter().map(sanitized_job).collect();
                Ok(Reply::Now(to_value(&jobs)?))
            }
            Command::GetJob => {
                let id = self.resolve(&request.args::<JobIdArgs>()?.id)?;
                Ok(Reply::Now(to_value(&sanitized_job(self.job(&id)?))?))
            }
            Command::RemoveJob => {
                let id = self.resolve(&request.args::<JobIdArgs>()?.id)?;
                if self.is_running(&id) {
                    self.request_stop(&id);
                }
                let index = self
                    .jobs
                    .iter()
                    .position(|j| j.id == id)
                    .ok_or_else(|| JobError::NotFound(id.clone()))?;
                let job = self.jobs.remove(index);
                self.save_jobs().await?;
                self.ctx
                    .events
                    .publish(DaemonEvent::JobRemoved { job_id: id });
                Ok(Reply::Now(to_value(&sanitized_job(&job))?))
            }
            Command::Restart => {
                info!("restarting: stopping executions and reloading job table");
                self.stop_all_and_drain().await;
                self.jobs = self.ctx.store.load().await?;
                self.reconcile(Utc::now());
                self.persist().await?;
                Ok(Reply::Now(to_value(&self.status())?))
            }
            Command::Stop => Ok(Reply::Shutdown(to_value(&self.status())?)),
            Command::JobHistory => {
                let args: HistoryArgs = request.args()?;
                let id = self.resolve_for_history(&args.id)?;
                let records: Vec<ExecutionRecord> = self
                    .ctx
                    .registry
                    .history(&id, args.limit)
                    .iter()
                    .map(|r| r.sanitized(LISTING_OUTPUT_BYTES))
                    .collect();
                Ok(Reply::Now(to_value(&records)?))
            }
            Command::JobStats => {
                let id = self.resolve_for_history(&request.args::<JobIdArgs>()?.id)?;
                Ok(Reply::Now(to_value(&self.ctx.registry.statistics(&id))?))
            }
            Command::SearchHistory => {
                let query: SearchQuery = request.args()?;
                let records: Vec<ExecutionRecord> = self
                    .ctx
                    .registry
                    .search(&query)
                    .iter()
                    .map(|r| r.sanitized(LISTING_OUTPUT_BYTES))
                    .collect();
                Ok(Reply::Now(to_value(&records)?))
            }
        }
    }

    async fn on_tick(&mut self) {
        let now = Utc::now();
        trace!("scheduler tick");
        let due: Vec<String> = self
            .jobs
            .iter()
            .filter(|j| j.is_due(now))
            .map(|j| j.id.clone())
            .collect();
        if due.is_empty() {
            return;
        }

        for id in due {
            let busy = self.is_running(&id);
            let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) else {
                continue;
            };
            let scheduled = job.next_run_at.is_some_and(|at| at <= now);
            let (trigger, attempt) = if scheduled {
                job.advance_schedule(now);
                (Trigger::Scheduled, 1)
            } else {
                (Trigger::Retry, job.attempt + 1)
            };
            job.retry_at = None;

            if busy && !job.allow_overlap {
                debug!(job_id = %id, "still running, skipping this fire");
                continue;
            }
            if let Err(e) = self.start_execution(&id, trigger, attempt, now) {
                error!(job_id = %id, error = %e, "failed to start scheduled execution");
            }
        }
        self.persist_logged().await;
    }

    async fn on_supervisor(&mut self, msg: SupervisorMsg) {
        match msg {
            SupervisorMsg::Output {
                execution_id,
                stream,
                chunk,
            } => {
                self.ctx
                    .registry
                    .record_output(&execution_id, stream, &chunk);
            }
            SupervisorMsg::Finished {
                execution_id,
                job_id,
                completion,
            } => {
                self.finish_execution(&execution_id, &job_id, completion)
                    .await;
            }
        }
    }

    async fn finish_execution(&mut self, execution_id: &str, job_id: &str, completion: Completion) {
        let now = Utc::now();
        self.running.remove(execution_id);
        let Some(record) = self
            .ctx
            .registry
            .record_completion(execution_id, completion, now)
        else {
            warn!(execution_id, "completion for unknown execution");
            return;
        };

        let still_running = self.is_running(job_id);
        let job_status = match self.jobs.iter_mut().find(|j| j.id == job_id) {
            Some(job) => {
                apply_outcome(job, &record, still_running, now);
                job.status
            }
            None => job_status_for(record.status),
        };
        self.persist_logged().await;

        self.ctx.events.publish(DaemonEvent::JobCompleted {
            job_id: job_id.to_string(),
            execution_id: execution_id.to_string(),
            status: record.status,
            job_status,
            exit_code: record.exit_code,
            duration_ms: record.duration_ms,
        });

        if let Some(pending) = self.waiters.remove(execution_id) {
            let response = match self.trigger_result(&record) {
                Ok(data) => Response::ok(pending.request_id, data),
                Err(e) => Response::error(pending.request_id, &e),
            };
            let _ = pending.reply.send(response);
        }
    }

    /// Open a record and spawn the process. A spawn failure is recorded as
    /// a failed execution, not returned as an error.
    fn start_execution(
        &mut self,
        id: &str,
        trigger: Trigger,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Result<Started> {
        let still_running = self.is_running(id);
        let job = self
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;

        let execution_id = self.ctx.registry.record_start(job, attempt, trigger, now);
        job.attempt = attempt;
        job.run_count += 1;
        job.last_run_at = Some(now);

        match self.supervisor.spawn(job, &execution_id) {
            Ok(handle) => {
                job.set_status(JobStatus::Running, now);
                info!(
                    job_id = %job.id,
                    %execution_id,
                    attempt,
                    pid = handle.pid,
                    command = %self.ctx.config.log.format_command(&job.command),
                    "starting job"
                );
                self.ctx.events.publish(DaemonEvent::JobStarted {
                    job_id: job.id.clone(),
                    execution_id: execution_id.clone(),
                    attempt,
                    pid: handle.pid,
                });
                self.running.insert(execution_id.clone(), handle);
                Ok(Started::Running(execution_id))
            }
            Err(e) => {
                error!(job_id = %job.id, %execution_id, error = %e, "failed to spawn job");
                let mut completion = Completion::new(ExecutionStatus::Failed);
                completion.error = Some(format!(
                    "failed to start {}: {}",
                    self.ctx.config.shell.display(),
                    e
                ));
                let record = self
                    .ctx
                    .registry
                    .record_completion(&execution_id, completion, now)
                    .ok_or_else(|| Error::Internal("execution record vanished".into()))?;
                apply_outcome(job, &record, still_running, now);
                self.ctx.events.publish(DaemonEvent::JobCompleted {
                    job_id: job.id.clone(),
                    execution_id,
                    status: record.status,
                    job_status: job.status,
                    exit_code: None,
                    duration_ms: record.duration_ms,
                });
                Ok(Started::SpawnFailed(record))
            }
        }
    }

    fn request_stop(&mut self, job_id: &str) {
        for execution in self.running.values_mut().filter(|e| e.job_id == job_id) {
            if execution.request_stop() {
                self.ctx.events.publish(DaemonEvent::JobStopped {
                    job_id: job_id.to_string(),
                    execution_id: execution.execution_id.clone(),
                });
            }
        }
    }

    /// Stop every execution and wait for them to report, up to the grace
    /// period plus some slack. Executions that never report are recorded as
    /// killed.
    async fn stop_all_and_drain(&mut self) {
        if self.running.is_empty() {
            return;
        }
        let job_ids: Vec<String> = self.running.values().map(|e| e.job_id.clone()).collect();
        for job_id in job_ids {
            self.request_stop(&job_id);
        }

        let deadline = Instant::now() + self.ctx.config.stop_grace + DRAIN_SLACK;
        while !self.running.is_empty() {
            match tokio::time::timeout_at(deadline, self.supervisor_rx.recv()).await {
                Ok(Some(msg)) => self.on_supervisor(msg).await,
                _ => break,
            }
        }

        let stuck: Vec<(String, String)> = self
            .running
            .values()
            .map(|e| (e.execution_id.clone(), e.job_id.clone()))
            .collect();
        for (execution_id, job_id) in stuck {
            warn!(%execution_id, %job_id, "execution did not report after stop");
            let mut completion = Completion::new(ExecutionStatus::Killed);
            completion.error = Some("did not exit after stop".into());
            self.finish_execution(&execution_id, &job_id, completion)
                .await;
        }
    }

    fn status(&self) -> DaemonStatus {
        let now = Utc::now();
        DaemonStatus {
            pid: self.lock.pid(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: self.started_at,
            uptime_ms: u64::try_from((now - self.started_at).num_milliseconds()).unwrap_or(0),
            jobs: self.jobs.len(),
            running: self.running.len(),
            socket_path: self.ctx.config.socket_path.display().to_string(),
            state_dir: self.ctx.config.state_dir.display().to_string(),
        }
    }

    fn trigger_result(&self, record: &ExecutionRecord) -> Result<Value> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.id == record.job_id)
            .map(sanitized_job);
        Ok(json!({
            "job": to_value(&job)?,
            "execution": to_value(&record.sanitized(self.ctx.config.max_output_bytes))?,
        }))
    }

    fn is_running(&self, job_id: &str) -> bool {
        self.running.values().any(|e| e.job_id == job_id)
    }

    fn ensure_can_start(&self, id: &str) -> Result<()> {
        let job = self.job(id)?;
        if self.is_running(id) && !job.allow_overlap {
            return Err(JobError::AlreadyRunning(id.to_string()).into());
        }
        Ok(())
    }

    fn job(&self, id: &str) -> Result<&JobSpec> {
        self.jobs
            .iter()
            .find(|j| j.id == id)
            .ok_or_else(|| JobError::NotFound(id.to_string()).into())
    }

    /// Accept a job id, or a name that exactly one job has.
    fn resolve(&self, key: &str) -> Result<String> {
        if self.jobs.iter().any(|j| j.id == key) {
            return Ok(key.to_string());
        }
        let mut named = self.jobs.iter().filter(|j| j.name == key);
        match (named.next(), named.next()) {
            (Some(job), None) => Ok(job.id.clone()),
            (Some(_), Some(_)) => Err(JobError::Invalid(format!(
                "name '{}' matches several jobs, use the id",
                key
            ))
            .into()),
            (None, _) => Err(JobError::NotFound(key.to_string()).into()),
        }
    }

    /// Like [`resolve`](Self::resolve), but history outlives removed jobs.
    fn resolve_for_history(&self, key: &str) -> Result<String> {
        match self.resolve(key) {
            Ok(id) => Ok(id),
            Err(Error::Job(JobError::NotFound(_)))
                if !self.ctx.registry.history(key, 1).is_empty() =>
            {
                Ok(key.to_string())
            }
            Err(e) => Err(e),
        }
    }

    async fn save_jobs(&self) -> Result<()> {
        self.ctx.store.save(&self.jobs).await
    }

    async fn persist(&self) -> Result<()> {
        self.save_jobs().await?;
        self.ctx.registry.save().await
    }

    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            error!(error = %e, "failed to persist daemon state");
        }
    }
}

/// Job status after an execution ends, when the job itself is gone.
fn job_status_for(status: ExecutionStatus) -> JobStatus {
    match status {
        ExecutionStatus::Running => JobStatus::Running,
        ExecutionStatus::Succeeded => JobStatus::Completed,
        ExecutionStatus::Failed | ExecutionStatus::TimedOut => JobStatus::Failed,
        ExecutionStatus::Stopped => JobStatus::Stopped,
        ExecutionStatus::Killed => JobStatus::Killed,
    }
}

/// Fold a finished execution into its job: status, counters, last error
/// and the next retry.
fn apply_outcome(
    job: &mut JobSpec,
    record: &ExecutionRecord,
    still_running: bool,
    now: DateTime<Utc>,
) {
    job.last_exit_code = record.exit_code;
    if record.status.is_failure() {
        job.failure_count += 1;
        job.last_error = record.failure_message();
        job.retry_at = job.retry.next_retry(record.attempt, now);
        if let Some(at) = job.retry_at {
            info!(job_id = %job.id, attempt = record.attempt, retry_at = %at, "retry scheduled");
        }
    } else {
        job.retry_at = None;
        if record.status == ExecutionStatus::Succeeded {
            job.last_error = None;
        }
    }
    let status = if still_running {
        JobStatus::Running
    } else {
        job_status_for(record.status)
    };
    job.set_status(status, now);
}

fn sanitized_job(job: &JobSpec) -> JobSpec {
    let mut job = job.clone();
    if let Some(error) = &job.last_error
        && error.len() > MAX_ERROR_BYTES
    {
        job.last_error = Some(truncate_text(error, MAX_ERROR_BYTES));
    }
    job
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::Internal(format!("serialize response: {}", e)))
}

/// Read request lines from one client and forward them to the owner loop.
async fn serve_connection(stream: UnixStream, requests: mpsc::Sender<Envelope>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let mut line = String::new();
        let limit = MAX_LINE_BYTES as u64 + 1;
        match (&mut reader).take(limit).read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "connection read failed");
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let oversized = line.len() > MAX_LINE_BYTES;
        let response = if oversized {
            let error = DaemonError::Protocol("request too large".into());
            Response::error(0, &error.into())
        } else {
            match decode_line::<Request>(&line) {
                Ok(request) => forward(request, &requests).await,
                Err(e) => Response::error(request_id_hint(&line), &e.into()),
            }
        };

        let bytes = match encode_line(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to encode response");
                break;
            }
        };
        if let Err(e) = write_half.write_all(&bytes).await {
            debug!(error = %e, "connection write failed");
            break;
        }
        if oversized {
            break;
        }
    }
}

async fn forward(request: Request, requests: &mpsc::Sender<Envelope>) -> Response {
    let request_id = request.id;
    let (reply, response) = oneshot::channel();
    let gone = || {
        let error = DaemonError::NotRunning("daemon is shutting down".into());
        Response::error(request_id, &error.into())
    };
    if requests.send(Envelope { request, reply }).await.is_err() {
        return gone();
    }
    response.await.unwrap_or_else(|_| gone())
}

/// Best-effort id of a request that failed to parse.
fn request_id_hint(line: &str) -> u64 {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("id")?.as_u64())
        .unwrap_or(0)
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::jobs::RetryPolicy;
    use crate::registry::Trigger;

    fn record(status: ExecutionStatus, attempt: u32) -> ExecutionRecord {
        ExecutionRecord {
            id: "exec-1".into(),
            job_id: "job-1".into(),
            job_name: "j".into(),
            attempt,
            trigger: Trigger::Scheduled,
            status,
            started_at: Utc::now(),
            ended_at: Some(Utc::now()),
            duration_ms: Some(0),
            exit_code: Some(if status == ExecutionStatus::Succeeded { 0 } else { 1 }),
            signal: None,
            stdout: String::new(),
            stderr: "boom\n".into(),
            error: None,
            usage: None,
        }
    }

    #[test]
    fn test_apply_outcome_failure_schedules_retry() {
        let now = Utc::now();
        let mut job = JobSpec::create(
            NewJob::new("j", "false").retry(RetryPolicy {
                max_attempts: 2,
                backoff_ms: 1000,
            }),
            now,
        )
        .unwrap();

        apply_outcome(&mut job, &record(ExecutionStatus::Failed, 1), false, now);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure_count, 1);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert!(job.retry_at.is_some());

        apply_outcome(&mut job, &record(ExecutionStatus::Failed, 2), false, now);
        assert_eq!(job.failure_count, 2);
        assert!(job.retry_at.is_none());

        apply_outcome(&mut job, &record(ExecutionStatus::Succeeded, 1), false, now);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.last_error, None);
        assert_eq!(job.failure_count, 2);
    }

    #[test]
    fn test_apply_outcome_statuses() {
        let now = Utc::now();
        let mut job = JobSpec::create(NewJob::new("j", "sleep 9"), now).unwrap();
        apply_outcome(&mut job, &record(ExecutionStatus::TimedOut, 1), false, now);
        assert_eq!(job.status, JobStatus::Failed);
        apply_outcome(&mut job, &record(ExecutionStatus::Stopped, 1), false, now);
        assert_eq!(job.status, JobStatus::Stopped);
        apply_outcome(&mut job, &record(ExecutionStatus::Killed, 1), false, now);
        assert_eq!(job.status, JobStatus::Killed);
        apply_outcome(&mut job, &record(ExecutionStatus::Succeeded, 1), true, now);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_sanitized_job_caps_error() {
        let mut job = JobSpec::create(NewJob::new("j", "x"), Utc::now()).unwrap();
        job.last_error = Some("e".repeat(MAX_ERROR_BYTES * 2));
        let clean = sanitized_job(&job);
        assert!(clean.last_error.unwrap().len() <= MAX_ERROR_BYTES + 32);
    }

    #[test]
    fn test_request_id_hint() {
        assert_eq!(request_id_hint(r#"{"id":42,"command":"nope"}"#), 42);
        assert_eq!(request_id_hint("garbage"), 0);
    }
}
