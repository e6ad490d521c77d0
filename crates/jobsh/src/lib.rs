//! Jobsh - POSIX-style shell with a persistent job daemon
//!
//! The crate has three layers:
//!
//! - the shell: [`parser`], [`expand`] (globs, ZSH-style parameters,
//!   arithmetic), [`history`], builtins and the executor behind [`Shell`];
//! - the job daemon ([`daemon`]): scheduled and on-demand jobs supervised as
//!   process groups, persisted across restarts, driven over a Unix socket;
//! - the execution [`registry`]: per-job history, statistics and retention.
//!
//! # Example
//!
//! ```rust
//! use jobsh::Shell;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut shell = Shell::new();
//!     let result = shell.exec("name=world; echo hello $name").await?;
//!     assert_eq!(result.stdout, "hello world\n");
//!     assert_eq!(result.exit_code, 0);
//!     Ok(())
//! }
//! ```

mod builtins;
pub mod daemon;
mod error;
pub mod expand;
pub mod history;
mod interpreter;
pub mod jobs;
mod limits;
mod logging_impl;
pub mod parser;
pub mod registry;

pub use async_trait::async_trait;
pub use builtins::{Builtin, Context as BuiltinContext};
pub use error::{DaemonError, Error, JobError, Result};
pub use history::{DuplicatePolicy, History, HistoryConfig};
pub use interpreter::{ControlFlow, ExecResult, JobState, ShellContext, ShellOptions, StdinSource};
pub use limits::{ExecutionLimits, LimitExceeded};
pub use logging_impl::{LogConfig, sanitize_for_log};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use interpreter::Interpreter;

/// An interactive or scripted shell session.
///
/// Output is captured into the returned [`ExecResult`] unless the shell was
/// built with [`ShellBuilder::inherit_stdio`].
pub struct Shell {
    interpreter: Interpreter,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    /// Create a shell with an empty environment in the current directory.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ShellBuilder {
        ShellBuilder::default()
    }

    /// Parse and run a script. Parse errors are returned before anything
    /// runs.
    pub async fn exec(&mut self, script: &str) -> Result<ExecResult> {
        self.interpreter.execute_text(script).await
    }

    /// Run one line typed at the prompt: expand history references, record
    /// the line, run it and record its status.
    ///
    /// Returns the expanded line alongside the result so a front end can
    /// echo it when it differs from what was typed.
    pub async fn exec_line(&mut self, line: &str) -> (String, Result<ExecResult>) {
        let expanded = self.interpreter.shell().history.expand(line);
        if expanded.trim().is_empty() {
            return (expanded, Ok(ExecResult::default()));
        }
        self.interpreter.shell_mut().history.add(&expanded, None);
        let result = self.exec(&expanded).await;
        let status = match &result {
            Ok(result) => result.exit_code,
            Err(e) if e.is_parse_error() => 2,
            Err(_) => 1,
        };
        self.interpreter.shell_mut().history.set_last_exit_code(status);
        (expanded, result)
    }

    /// Run the trap registered for `name`, if any.
    pub async fn run_trap(&mut self, name: &str) -> Result<Option<ExecResult>> {
        self.interpreter.run_trap(name).await
    }

    /// `[N]  Done  cmd` notices for background jobs finished since the last
    /// call.
    pub async fn reap_jobs(&mut self) -> Vec<String> {
        self.interpreter.reap_jobs().await
    }

    /// End the session: run the EXIT trap and save the history file.
    pub async fn finish(&mut self) -> Result<Option<ExecResult>> {
        let trap = self.interpreter.run_trap("EXIT").await?;
        self.interpreter.shell_mut().traps.remove("EXIT");
        if let Err(e) = self.interpreter.shell().history.save_configured() {
            warn!(error = %e, "failed to save history");
        }
        Ok(trap)
    }

    /// Feed scripts that read input (`read`, `cat`) from this source.
    pub fn set_stdin(&mut self, stdin: StdinSource) {
        self.interpreter.set_stdin(stdin);
    }

    pub fn context(&self) -> &ShellContext {
        self.interpreter.shell()
    }

    pub fn context_mut(&mut self) -> &mut ShellContext {
        self.interpreter.shell_mut()
    }

    pub fn history(&self) -> &History {
        &self.interpreter.shell().history
    }

    /// Status of the last command (`$?`).
    pub fn last_exit_code(&self) -> i32 {
        self.interpreter.shell().last_exit_code
    }
}

/// Builder for customized shell configuration.
#[derive(Default)]
pub struct ShellBuilder {
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    options: Vec<(String, bool)>,
    history: Option<HistoryConfig>,
    limits: ExecutionLimits,
    custom_builtins: HashMap<String, Arc<dyn Builtin>>,
    script_name: Option<String>,
    args: Vec<String>,
    interactive: bool,
    inherit_stdio: bool,
}

impl ShellBuilder {
    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Start from this process's environment and working directory.
    pub fn inherit_env(mut self) -> Self {
        self.env.extend(std::env::vars());
        if self.cwd.is_none() {
            self.cwd = std::env::current_dir().ok();
        }
        self
    }

    /// Set the current working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Turn a `set -o` option on or off (`errexit`, `pipefail`, ...).
    /// Unknown names are ignored with a warning at build time.
    pub fn option(mut self, name: impl Into<String>, on: bool) -> Self {
        self.options.push((name.into(), on));
        self
    }

    /// Configure history. A configured file is loaded by [`build`](Self::build).
    pub fn history(mut self, config: HistoryConfig) -> Self {
        self.history = Some(config);
        self
    }

    /// Set execution limits.
    pub fn limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Register a custom builtin, replacing any builtin of the same name.
    pub fn builtin(mut self, name: impl Into<String>, builtin: Box<dyn Builtin>) -> Self {
        self.custom_builtins.insert(name.into(), Arc::from(builtin));
        self
    }

    /// Set `$0` and the positional parameters.
    pub fn script(mut self, name: impl Into<String>, args: Vec<String>) -> Self {
        self.script_name = Some(name.into());
        self.args = args;
        self
    }

    /// Mark the session interactive: `fg` forwards interrupts and `read -p`
    /// shows its prompt.
    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Write output to this process's stdout and stderr as commands finish
    /// instead of capturing it.
    pub fn inherit_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }

    /// Build the shell.
    pub fn build(self) -> Shell {
        let cwd = self
            .cwd
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));
        let mut context = ShellContext::new(self.env, cwd);
        for (name, on) in &self.options {
            if !context.options.set_long(name, *on) {
                warn!(option = %name, "unknown shell option");
            }
        }
        if let Some(config) = self.history {
            context.history = History::new(config);
            if let Err(e) = context.history.load_configured() {
                warn!(error = %e, "failed to load history");
            }
        }
        if let Some(name) = self.script_name {
            context.script_name = name;
        }
        context.positional = self.args;
        context.interactive = self.interactive;

        let mut table = builtins::default_builtins();
        table.extend(self.custom_builtins);

        let mut interpreter = Interpreter::new(context, table, self.limits);
        interpreter.set_inherit_stdio(self.inherit_stdio);
        Shell { interpreter }
    }
}
