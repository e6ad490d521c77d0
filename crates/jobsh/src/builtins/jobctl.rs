//! Job control builtins: jobs, fg, bg, kill, disown

use async_trait::async_trait;
use nix::sys::signal::Signal;
use nix::unistd::Pid;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::{ControlFlow, ExecResult, JobState};
use crate::jobs::process::{parse_signal, signal_name};

/// Resolve the job argument of `fg`/`bg`/`disown`, defaulting to `%+`.
fn job_arg(name: &str, ctx: &Context<'_>) -> std::result::Result<usize, ExecResult> {
    let spec = ctx.args.first().map_or("%+", String::as_str);
    ctx.shell.jobs.resolve(spec).ok_or_else(|| {
        let shown = if ctx.args.is_empty() { "current" } else { spec };
        ExecResult::err(format!("jobsh: {}: {}: no such job\n", name, shown), 1)
    })
}

/// jobs builtin - list background jobs
///
/// `-l` adds the process group id, `-p` prints only the ids. Finished jobs
/// are reported once and then dropped.
pub struct Jobs;

#[async_trait]
impl Builtin for Jobs {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let long = ctx.args.iter().any(|a| a == "-l");
        let pids_only = ctx.args.iter().any(|a| a == "-p");

        let mut lines: Vec<(usize, String)> = Vec::new();
        for job in ctx.shell.jobs.iter().filter(|j| !j.is_finished()) {
            let pgid = job.group.pgid().map(|p| p.to_string()).unwrap_or_default();
            let line = if pids_only {
                format!("{}\n", pgid)
            } else if long {
                format!(
                    "[{}]{} {:>6} {:<24}{}\n",
                    job.id,
                    ctx.shell.jobs.marker(job.id),
                    pgid,
                    job.state.to_string(),
                    job.command
                )
            } else {
                format!(
                    "[{}]{}  {:<24}{}\n",
                    job.id,
                    ctx.shell.jobs.marker(job.id),
                    job.state.to_string(),
                    job.command
                )
            };
            lines.push((job.id, line));
        }
        if !pids_only {
            for (id, state, command) in ctx.shell.jobs.reap().await {
                lines.push((id, format!("[{}]   {:<24}{}\n", id, state.to_string(), command)));
            }
        }
        lines.sort_by_key(|(id, _)| *id);
        Ok(ExecResult::ok(
            lines.into_iter().map(|(_, line)| line).collect::<String>(),
        ))
    }
}

/// fg builtin - wait for a job in the foreground
///
/// Prints the job's command, continues it if stopped, and blocks until it
/// finishes. An interrupt while waiting is forwarded to the job's process
/// group.
pub struct Fg;

#[async_trait]
impl Builtin for Fg {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let id = match job_arg("fg", &ctx) {
            Ok(id) => id,
            Err(result) => return Ok(result),
        };
        let mut header = String::new();
        if let Some(job) = ctx.shell.jobs.get(id) {
            header = format!("{}\n", job.command);
            if job.state == JobState::Stopped {
                let _ = ctx.shell.jobs.signal(id, Signal::SIGCONT);
            }
        }

        let interactive = ctx.shell.interactive;
        match ctx.shell.jobs.foreground(id, interactive).await {
            Some(mut result) => {
                result.stdout.insert_str(0, &header);
                result.control = ControlFlow::None;
                Ok(result)
            }
            None => Ok(ExecResult {
                stdout: header,
                exit_code: 130,
                ..Default::default()
            }),
        }
    }
}

/// bg builtin - continue a stopped job in the background
pub struct Bg;

#[async_trait]
impl Builtin for Bg {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let id = match job_arg("bg", &ctx) {
            Ok(id) => id,
            Err(result) => return Ok(result),
        };
        if let Err(e) = ctx.shell.jobs.signal(id, Signal::SIGCONT) {
            return Ok(ExecResult::err(format!("jobsh: bg: %{}: {}\n", id, e.desc()), 1));
        }
        let marker = ctx.shell.jobs.marker(id);
        let command = ctx
            .shell
            .jobs
            .get(id)
            .map(|job| job.command.clone())
            .unwrap_or_default();
        Ok(ExecResult::ok(format!("[{}]{} {} &\n", id, marker, command)))
    }
}

/// kill builtin - send a signal to jobs or processes
///
/// `kill [-s SIG | -SIG] %JOB|PID...` and `kill -l`. Job targets signal the
/// whole process group.
pub struct Kill;

#[async_trait]
impl Builtin for Kill {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut signal = Signal::SIGTERM;
        let mut targets = Vec::new();
        let mut args = ctx.args.iter();
        while let Some(arg) = args.next() {
            if !targets.is_empty() || !arg.starts_with('-') || arg == "-" {
                targets.push(arg.as_str());
                continue;
            }
            match arg.as_str() {
                "-l" | "-L" => {
                    let names: Vec<String> = Signal::iterator()
                        .map(|s| signal_name(s as i32))
                        .collect();
                    return Ok(ExecResult::ok(format!("{}\n", names.join(" "))));
                }
                "-s" | "-n" => match args.next().and_then(|s| parse_signal(s)) {
                    Some(sig) => signal = sig,
                    None => return Ok(ExecResult::err("jobsh: kill: invalid signal specification\n", 1)),
                },
                "--" => targets.extend(args.by_ref().map(String::as_str)),
                spec => match parse_signal(&spec[1..]) {
                    Some(sig) => signal = sig,
                    None => {
                        return Ok(ExecResult::err(
                            format!("jobsh: kill: {}: invalid signal specification\n", &spec[1..]),
                            1,
                        ));
                    }
                },
            }
        }
        if targets.is_empty() {
            return Ok(ExecResult::err(
                "jobsh: kill: usage: kill [-s sigspec | -sigspec] pid | jobspec ... or kill -l\n",
                2,
            ));
        }

        let mut errors = String::new();
        for target in targets {
            let outcome = if target.starts_with('%') {
                match ctx.shell.jobs.resolve(target) {
                    Some(id) => ctx.shell.jobs.signal(id, signal),
                    None => {
                        errors.push_str(&format!("jobsh: kill: {}: no such job\n", target));
                        continue;
                    }
                }
            } else {
                match target.parse::<i32>() {
                    Ok(pid) => match ctx.shell.jobs.resolve(target) {
                        Some(id) => ctx.shell.jobs.signal(id, signal),
                        None => nix::sys::signal::kill(Pid::from_raw(pid), signal),
                    },
                    Err(_) => {
                        errors.push_str(&format!(
                            "jobsh: kill: {}: arguments must be process or job IDs\n",
                            target
                        ));
                        continue;
                    }
                }
            };
            if let Err(e) = outcome {
                errors.push_str(&format!("jobsh: kill: ({}) - {}\n", target, e.desc()));
            }
        }
        let status = i32::from(!errors.is_empty());
        Ok(ExecResult::err(errors, status))
    }
}

/// disown builtin - drop jobs from the table without signalling them
pub struct Disown;

#[async_trait]
impl Builtin for Disown {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if ctx.args.iter().any(|a| a == "-a") {
            let ids: Vec<usize> = ctx.shell.jobs.iter().map(|j| j.id).collect();
            for id in ids {
                ctx.shell.jobs.remove(id);
            }
            return Ok(ExecResult::code(0));
        }
        let id = match job_arg("disown", &ctx) {
            Ok(id) => id,
            Err(result) => return Ok(result),
        };
        ctx.shell.jobs.remove(id);
        Ok(ExecResult::code(0))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::{ProcessGroup, ShellContext, StdinSource};
    use std::time::Duration;

    fn sleeper(shell: &mut ShellContext, command: &str) -> usize {
        shell.jobs.spawn(
            command,
            ProcessGroup::new(),
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                ExecResult::code(0)
            }),
        )
    }

    #[tokio::test]
    async fn test_jobs_listing() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        sleeper(&mut shell, "sleep 30");
        sleeper(&mut shell, "make");
        let result = run_builtin(&Jobs, &[], &mut shell, &mut stdin).await;
        assert_eq!(
            result.stdout,
            format!("[1]-  {:<24}sleep 30\n[2]+  {:<24}make\n", "Running", "Running")
        );
        run_builtin(&Kill, &["%1"], &mut shell, &mut stdin).await;
        run_builtin(&Kill, &["-KILL", "%2"], &mut shell, &mut stdin).await;
        let result = run_builtin(&Jobs, &[], &mut shell, &mut stdin).await;
        assert!(result.stdout.contains("Exit 143"));
        assert!(result.stdout.contains("Exit 137"));
        assert!(!shell.jobs.has_jobs());
    }

    #[tokio::test]
    async fn test_kill_unknown_job_and_bad_signal() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        let result = run_builtin(&Kill, &["%4"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("%4: no such job"));
        let result = run_builtin(&Kill, &["-BOGUS", "1"], &mut shell, &mut stdin).await;
        assert!(result.stderr.contains("invalid signal specification"));
        let result = run_builtin(&Kill, &["-l"], &mut shell, &mut stdin).await;
        assert!(result.stdout.contains("TERM"));
    }

    #[tokio::test]
    async fn test_fg_returns_job_status() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        shell.jobs.spawn(
            "work",
            ProcessGroup::new(),
            tokio::spawn(async { ExecResult::code(5) }),
        );
        let result = run_builtin(&Fg, &[], &mut shell, &mut stdin).await;
        assert_eq!(result.stdout, "work\n");
        assert_eq!(result.exit_code, 5);
        let result = run_builtin(&Fg, &[], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("no such job"));
    }

    #[tokio::test]
    async fn test_disown_forgets_job() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        sleeper(&mut shell, "a");
        sleeper(&mut shell, "b");
        run_builtin(&Disown, &["%1"], &mut shell, &mut stdin).await;
        assert_eq!(shell.jobs.job_count(), 1);
        run_builtin(&Disown, &["-a"], &mut shell, &mut stdin).await;
        assert!(!shell.jobs.has_jobs());
    }

    #[tokio::test]
    async fn test_bg_prints_job() {
        let mut shell = test_shell();
        let id = sleeper(&mut shell, "sleep 30");
        let result = run_builtin(&Bg, &[], &mut shell, &mut StdinSource::Null).await;
        assert_eq!(result.stdout, "[1]+ sleep 30 &\n");
        shell.jobs.signal(id, Signal::SIGKILL).unwrap();
    }
}
