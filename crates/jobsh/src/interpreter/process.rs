//! External commands: PATH lookup, spawning and pipe wiring.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::fcntl::OFlag;
use nix::sys::signal::{SigHandler, Signal};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::builtins::resolve_path;
use crate::jobs::process::{exit_code, read_stream_with_limit};

use super::ExecResult;
use super::io::{InTarget, OutTarget, RedirectPlan};
use super::jobs::ProcessGroup;

/// Outcome of looking a command name up on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(PathBuf),
    NotExecutable(PathBuf),
    NotFound,
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Find `name` the way `execvp` would.
pub fn lookup_command(name: &str, path_var: Option<&str>, cwd: &Path) -> Lookup {
    if name.contains('/') {
        let path = resolve_path(cwd, name);
        return if is_executable(&path) {
            Lookup::Found(path)
        } else if path.exists() {
            Lookup::NotExecutable(path)
        } else {
            Lookup::NotFound
        };
    }

    let mut non_executable = None;
    for dir in path_var.unwrap_or("/usr/local/bin:/usr/bin:/bin").split(':') {
        let base = if dir.is_empty() {
            cwd.to_path_buf()
        } else {
            resolve_path(cwd, dir)
        };
        let candidate = base.join(name);
        if is_executable(&candidate) {
            return Lookup::Found(candidate);
        }
        if non_executable.is_none() && candidate.is_file() {
            non_executable = Some(candidate);
        }
    }
    match non_executable {
        Some(path) => Lookup::NotExecutable(path),
        None => Lookup::NotFound,
    }
}

/// Where a stage's standard input comes from.
#[derive(Debug)]
pub(crate) enum StageInput {
    /// The shell's current stdin
    Inherit,
    Text(String),
    /// Read end of a pipe from the previous external stage
    Pipe(OwnedFd),
    Null,
}

/// Which captured stream a reader task feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Stdout,
    Stderr,
}

/// An external command that has been started.
pub(crate) struct RunningProcess {
    pub name: String,
    child: Child,
    readers: Vec<(Capture, JoinHandle<std::io::Result<String>>)>,
    writer: Option<JoinHandle<()>>,
}

impl RunningProcess {
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for exit and collect captured output.
    pub async fn wait(mut self) -> ExecResult {
        let status = self.child.wait().await;
        let mut result = ExecResult::default();
        for (stream, reader) in self.readers {
            let text = match reader.await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    debug!(name = %self.name, error = %e, "reading child output failed");
                    String::new()
                }
                Err(_) => String::new(),
            };
            match stream {
                Capture::Stdout => result.stdout.push_str(&text),
                Capture::Stderr => result.stderr.push_str(&text),
            }
        }
        if let Some(writer) = self.writer {
            let _ = writer.await;
        }
        result.exit_code = match status {
            Ok(status) => exit_code(status),
            Err(e) => {
                result
                    .stderr
                    .push_str(&format!("jobsh: {}: {}\n", self.name, e));
                1
            }
        };
        result
    }
}

/// Everything needed to start one external command.
pub(crate) struct Launch<'a> {
    pub program: PathBuf,
    pub name: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: &'a Path,
    pub input: StageInput,
    pub plan: RedirectPlan,
    /// Write end of the pipe to the next stage
    pub pipe_out: Option<OwnedFd>,
    /// Collect output instead of writing to the terminal
    pub capture: bool,
    pub group: Option<&'a ProcessGroup>,
    pub max_output_bytes: usize,
}

/// Create a pipe whose ends are closed on exec.
pub(crate) fn pipe() -> std::io::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(std::io::Error::from)
}

enum Sink {
    Stdio(Stdio),
    Capture(Capture),
}

fn out_sink(
    target: OutTarget,
    default: Capture,
    pipe_out: Option<&OwnedFd>,
    capture: bool,
) -> std::io::Result<Sink> {
    let stream = match target {
        OutTarget::File(file) => return Ok(Sink::Stdio(Stdio::from(file))),
        OutTarget::Null => return Ok(Sink::Stdio(Stdio::null())),
        OutTarget::Stdout => Capture::Stdout,
        OutTarget::Stderr => Capture::Stderr,
    };
    if stream == Capture::Stdout
        && let Some(fd) = pipe_out
    {
        return Ok(Sink::Stdio(Stdio::from(fd.try_clone()?)));
    }
    if capture {
        return Ok(Sink::Capture(stream));
    }
    Ok(Sink::Stdio(match (stream, default) {
        (Capture::Stdout, Capture::Stdout) | (Capture::Stderr, Capture::Stderr) => Stdio::inherit(),
        (Capture::Stdout, Capture::Stderr) => Stdio::from(std::io::stdout()),
        (Capture::Stderr, Capture::Stdout) => Stdio::from(std::io::stderr()),
    }))
}

/// Start an external command.
pub(crate) async fn spawn(launch: Launch<'_>) -> std::io::Result<RunningProcess> {
    let Launch {
        program,
        name,
        args,
        env,
        cwd,
        input,
        plan,
        pipe_out,
        capture,
        group,
        max_output_bytes,
    } = launch;

    let mut cmd = Command::new(&program);
    cmd.arg0(&name)
        .args(&args)
        .env_clear()
        .envs(&env)
        .current_dir(cwd)
        .kill_on_drop(false);

    let mut feed = None;
    match (plan.stdin, input) {
        (Some(InTarget::File(file)), _) => {
            cmd.stdin(Stdio::from(file));
        }
        (Some(InTarget::Text(text)), _) | (None, StageInput::Text(text)) => {
            cmd.stdin(Stdio::piped());
            feed = Some(text);
        }
        (None, StageInput::Pipe(fd)) => {
            cmd.stdin(Stdio::from(fd));
        }
        (None, StageInput::Inherit) => {
            cmd.stdin(Stdio::inherit());
        }
        (None, StageInput::Null) => {
            cmd.stdin(Stdio::null());
        }
    }

    let mut captures = Vec::new();
    match out_sink(plan.stdout, Capture::Stdout, pipe_out.as_ref(), capture)? {
        Sink::Stdio(stdio) => {
            cmd.stdout(stdio);
        }
        Sink::Capture(stream) => {
            cmd.stdout(Stdio::piped());
            captures.push((Capture::Stdout, stream));
        }
    }
    match out_sink(plan.stderr, Capture::Stderr, pipe_out.as_ref(), capture)? {
        Sink::Stdio(stdio) => {
            cmd.stderr(stdio);
        }
        Sink::Capture(stream) => {
            cmd.stderr(Stdio::piped());
            captures.push((Capture::Stderr, stream));
        }
    }
    drop(pipe_out);

    if let Some(group) = group {
        cmd.process_group(group.pgid().unwrap_or(0));
    }
    // SAFETY: the closure runs between fork and exec and only calls
    // signal(2), which is async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            // Rust ignores SIGPIPE; commands expect the default
            let _ = nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigDfl);
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;
    drop(cmd);

    if let (Some(group), Some(pid)) = (group, child.id()) {
        group.claim(pid as i32);
    }
    debug!(name = %name, pid = ?child.id(), "spawned external command");

    let mut readers = Vec::new();
    for (fd, stream) in captures {
        let handle = match fd {
            Capture::Stdout => child.stdout.take().map(|out| {
                tokio::spawn(read_stream_with_limit(out, max_output_bytes))
            }),
            Capture::Stderr => child.stderr.take().map(|err| {
                tokio::spawn(read_stream_with_limit(err, max_output_bytes))
            }),
        };
        if let Some(handle) = handle {
            readers.push((stream, handle));
        }
    }

    let writer = match (feed, child.stdin.take()) {
        (Some(text), Some(mut stdin)) => Some(tokio::spawn(async move {
            // The reader may exit early; a broken pipe is not an error here
            let _ = stdin.write_all(text.as_bytes()).await;
            let _ = stdin.shutdown().await;
        })),
        _ => None,
    };

    Ok(RunningProcess {
        name,
        child,
        readers,
        writer,
    })
}

/// Read a pipe's read end to a string.
pub(crate) async fn read_pipe(fd: OwnedFd, max_bytes: usize) -> std::io::Result<String> {
    let file = tokio::fs::File::from_std(std::fs::File::from(fd));
    read_stream_with_limit(file, max_bytes).await
}
