//! Jobsh CLI - shell front end and job daemon control
//!
//! Usage:
//!   jobsh -c 'echo hello'          # Execute a command string
//!   jobsh script.sh a b            # Execute a script file with arguments
//!   jobsh                          # Interactive REPL
//!   jobsh daemon                   # Run the job daemon in the foreground
//!   jobsh job list                 # Talk to a running daemon

mod job;
#[cfg(feature = "interactive")]
mod repl;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use jobsh::{HistoryConfig, Shell};

/// Jobsh - POSIX-style shell with a persistent job daemon
#[derive(Parser, Debug)]
#[command(name = "jobsh")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Args {
    /// Execute the given command string
    #[arg(short = 'c')]
    command: Option<String>,

    /// Turn on a shell option (errexit, nounset, pipefail, ...)
    #[arg(short = 'o', value_name = "OPTION")]
    options: Vec<String>,

    /// History file for the interactive shell
    #[arg(long, env = "JOBSH_HISTFILE")]
    histfile: Option<PathBuf>,

    /// Number of history entries kept
    #[arg(long, env = "JOBSH_HISTSIZE", default_value_t = 1000)]
    histsize: usize,

    /// Script file to execute (with -c: the value of $0)
    #[arg()]
    script: Option<PathBuf>,

    /// Arguments to pass to the script
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    #[command(subcommand)]
    subcommand: Option<SubCmd>,
}

#[derive(Subcommand, Debug)]
enum SubCmd {
    /// Run the job daemon in the foreground
    Daemon(job::DaemonArgs),
    /// Manage jobs on a running daemon
    Job(job::JobArgs),
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_env("JOBSH_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.subcommand {
        Some(SubCmd::Daemon(daemon_args)) => {
            init_logging("info");
            return job::run_daemon(daemon_args).await;
        }
        Some(SubCmd::Job(job_args)) => {
            init_logging("warn");
            let code = job::run(job_args).await?;
            std::process::exit(code);
        }
        None => init_logging("warn"),
    }

    let mut builder = Shell::builder().inherit_env();
    for option in &args.options {
        builder = builder.option(option.clone(), true);
    }

    // Execute command string if provided
    if let Some(cmd) = args.command {
        let name = args
            .script
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "jobsh".to_string());
        let shell = builder.script(name, args.args).inherit_stdio(true).build();
        let code = run_script(shell, &cmd).await?;
        std::process::exit(code);
    }

    // Execute script file if provided
    if let Some(script_path) = args.script {
        let script = read_script(&script_path)?;
        let shell = builder
            .script(script_path.display().to_string(), args.args)
            .inherit_stdio(true)
            .build();
        let code = run_script(shell, &script).await?;
        std::process::exit(code);
    }

    let history = HistoryConfig::new()
        .max_size(args.histsize)
        .file(args.histfile.unwrap_or_else(default_histfile));
    let shell = builder.history(history).interactive(true).inherit_stdio(true);

    #[cfg(feature = "interactive")]
    {
        let code = repl::run(shell.build()).await?;
        std::process::exit(code);
    }

    #[cfg(not(feature = "interactive"))]
    {
        let _ = shell;
        eprintln!("jobsh: built without interactive support");
        eprintln!("Usage: jobsh -c 'command' or jobsh script.sh");
        std::process::exit(2);
    }
}

/// Run a whole script, then the EXIT trap. Returns the exit status.
async fn run_script(mut shell: Shell, script: &str) -> Result<i32> {
    let code = match shell.exec(script).await {
        Ok(result) => {
            print_captured(&result);
            result.exit_code
        }
        Err(e) if e.is_parse_error() => {
            eprintln!("jobsh: {}", e);
            2
        }
        Err(e) => {
            eprintln!("jobsh: {}", e);
            1
        }
    };
    match shell.finish().await {
        Ok(Some(trap)) => print_captured(&trap),
        Ok(None) => {}
        Err(e) => eprintln!("jobsh: EXIT trap: {}", e),
    }
    Ok(code)
}

fn read_script(path: &Path) -> Result<String> {
    let script = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script: {}", path.display()))?;
    debug!(path = %path.display(), bytes = script.len(), "read script");
    Ok(script)
}

/// Output the shell did not already write through inherited stdio.
pub(crate) fn print_captured(result: &jobsh::ExecResult) {
    print!("{}", result.stdout);
    if !result.stderr.is_empty() {
        eprint!("{}", result.stderr);
    }
}

fn default_histfile() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".jobsh_history")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_command_string_with_name_and_args() {
        let args = Args::try_parse_from(["jobsh", "-c", "echo $0 $1", "me", "one"]).unwrap();
        assert_eq!(args.command.as_deref(), Some("echo $0 $1"));
        assert_eq!(args.script, Some(PathBuf::from("me")));
        assert_eq!(args.args, vec!["one".to_string()]);
    }

    #[test]
    fn test_script_args_keep_hyphens() {
        let args = Args::try_parse_from(["jobsh", "run.sh", "-x", "--flag"]).unwrap();
        assert_eq!(args.script, Some(PathBuf::from("run.sh")));
        assert_eq!(args.args, vec!["-x".to_string(), "--flag".to_string()]);
    }

    #[test]
    fn test_job_subcommand() {
        let args = Args::try_parse_from(["jobsh", "job", "list"]).unwrap();
        assert!(matches!(args.subcommand, Some(SubCmd::Job(_))));
    }

    #[tokio::test]
    async fn test_run_script_parse_error_is_status_2() {
        let shell = Shell::builder().build();
        assert_eq!(run_script(shell, "if true; then echo").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_script_file_runs_with_status() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("run.sh");
        std::fs::write(&path, "echo ran\nexit 4\n").unwrap();
        let script = read_script(&path).unwrap();
        let shell = Shell::builder().build();
        assert_eq!(run_script(shell, &script).await.unwrap(), 4);

        let err = read_script(&dir.path().join("missing.sh")).unwrap_err();
        assert!(err.to_string().contains("missing.sh"), "{err}");
    }

    #[tokio::test]
    async fn test_run_script_exit_status() {
        let shell = Shell::builder().build();
        assert_eq!(run_script(shell, "exit 7").await.unwrap(), 7);
    }
}
