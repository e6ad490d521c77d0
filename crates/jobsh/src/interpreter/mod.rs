//! Interpreter for executing shell scripts
//!
//! The executor walks the AST one statement at a time. Builtins and
//! functions run in-process against [`ShellContext`]; other commands become
//! child processes. Pipelines start every stage before waiting on any of them.
//! Stages other than the last run in a forked copy of the shell, and the
//! last stage runs in the current shell, so `echo x | read v` sets `v`.
//!
//! Output is either captured into [`ExecResult`] (library use, command
//! substitution, redirected compounds) or, with inherited stdio, written to
//! the terminal as each pipeline finishes.

mod context;
mod expand;
mod io;
mod jobs;
mod process;
mod state;

pub use context::{ShellContext, ShellOptions, Variable};
pub use io::{InputBuffer, StdinSource};
pub use jobs::{Job, JobState, JobTable, ProcessGroup};
pub use process::{Lookup, lookup_command};
pub use state::{ControlFlow, ExecResult};

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::builtins::{self, Builtin, resolve_path};
use crate::error::{Error, Result};
use crate::expand::{Pattern, Value, arith};
use crate::limits::{ExecutionCounters, ExecutionLimits};
use crate::parser::{
    self, AndOrList, Assignment, AssignmentValue, CaseCommand, Command, CommandList,
    CompoundCommand, ForCommand, FunctionDef, IfCommand, ListOperator, Pipeline, Redirect,
    RedirectKind, Script, SimpleCommand, WhileCommand, Word,
};

use io::{InTarget, OutTarget, RedirectPlan, flush_to_terminal};
use process::{Launch, RunningProcess, StageInput};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Builtins by name.
pub type BuiltinTable = HashMap<String, Arc<dyn Builtin>>;

/// Commands the executor handles itself because they run shell code.
const SPECIAL_COMMANDS: &[&str] = &["eval", "source", ".", "type"];

const KEYWORDS: &[&str] = &[
    "if", "then", "elif", "else", "fi", "while", "until", "for", "in", "do", "done", "case",
    "esac", "function", "{", "}", "!",
];

/// How long `cmd &` waits for the job's first process to appear so `$!`
/// has a value.
const BACKGROUND_START_WAIT: Duration = Duration::from_millis(100);

enum Outcome {
    Done(ExecResult),
    Running(RunningProcess),
}

impl Outcome {
    async fn wait(self) -> ExecResult {
        match self {
            Outcome::Done(result) => result,
            Outcome::Running(process) => process.wait().await,
        }
    }
}

/// Something run in-process by a simple command.
enum Internal {
    Function(Arc<FunctionDef>),
    Builtin(Arc<dyn Builtin>),
    Special(String),
    /// Alias body, already parsed
    Script(Script),
}

/// Interpreter state.
pub struct Interpreter {
    pub(crate) shell: ShellContext,
    builtins: Arc<BuiltinTable>,
    limits: ExecutionLimits,
    pub(crate) counters: ExecutionCounters,
    stdin: StdinSource,
    /// >0 while output is collected rather than written to the terminal
    capture_depth: usize,
    /// Write output to the process's stdout/stderr when not capturing
    inherit_stdio: bool,
    /// Process group of the background job this interpreter runs
    job_group: Option<ProcessGroup>,
    /// Aliases being expanded
    alias_guard: Vec<String>,
    /// >0 inside `if`/`while` conditions, where errexit does not apply
    condition_depth: usize,
    /// Status of the last command substitution in the current command
    last_subst_status: Option<i32>,
    /// Diagnostics produced while capturing, attached to the next result
    pending_stderr: String,
    /// Source text of the script being run, for job descriptions
    source_text: Arc<str>,
    in_trap: bool,
}

impl Interpreter {
    /// Create an interpreter over the given shell state.
    pub fn new(shell: ShellContext, builtins: BuiltinTable, limits: ExecutionLimits) -> Self {
        Self {
            shell,
            builtins: Arc::new(builtins),
            limits,
            counters: ExecutionCounters::new(),
            stdin: StdinSource::Null,
            capture_depth: 0,
            inherit_stdio: false,
            job_group: None,
            alias_guard: Vec::new(),
            condition_depth: 0,
            last_subst_status: None,
            pending_stderr: String::new(),
            source_text: Arc::from(""),
            in_trap: false,
        }
    }

    pub fn shell(&self) -> &ShellContext {
        &self.shell
    }

    pub fn shell_mut(&mut self) -> &mut ShellContext {
        &mut self.shell
    }

    /// Let output go straight to the process's stdout and stderr.
    pub fn set_inherit_stdio(&mut self, inherit: bool) {
        self.inherit_stdio = inherit;
    }

    pub fn set_stdin(&mut self, stdin: StdinSource) {
        self.stdin = stdin;
    }

    fn capturing(&self) -> bool {
        !self.inherit_stdio || self.capture_depth > 0
    }

    /// Report a diagnostic now, or with the current command's output when
    /// capturing.
    pub(crate) fn emit_stderr(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if self.capturing() {
            self.pending_stderr.push_str(text);
        } else {
            let mut result = ExecResult::err(text, 0);
            flush_to_terminal(&mut result);
        }
    }

    /// Copy of this shell for a subshell, substitution or pipeline stage.
    fn subshell(&self) -> Interpreter {
        Interpreter {
            shell: self.shell.fork(),
            builtins: Arc::clone(&self.builtins),
            limits: self.limits.clone(),
            counters: self.counters.clone(),
            stdin: StdinSource::Null,
            capture_depth: self.capture_depth,
            inherit_stdio: self.inherit_stdio,
            job_group: self.job_group.clone(),
            alias_guard: self.alias_guard.clone(),
            condition_depth: self.condition_depth,
            last_subst_status: None,
            pending_stderr: String::new(),
            source_text: Arc::clone(&self.source_text),
            in_trap: self.in_trap,
        }
    }

    /// Parse and run `text`. Parse errors are returned before anything runs.
    pub async fn execute_text(&mut self, text: &str) -> Result<ExecResult> {
        let script = parser::parse(text)?;
        self.source_text = Arc::from(text);
        self.execute(&script).await
    }

    /// Execute a parsed script.
    pub async fn execute(&mut self, script: &Script) -> Result<ExecResult> {
        let mut result = self.run_list(&script.body).await?;
        if !self.pending_stderr.is_empty() {
            result.stderr.insert_str(0, &std::mem::take(&mut self.pending_stderr));
        }
        self.shell.last_exit_code = result.exit_code;
        Ok(result)
    }

    /// Run the trap registered for `name` (`EXIT`, `ERR`, `INT`, `TERM`).
    /// `$?` is preserved.
    pub async fn run_trap(&mut self, name: &str) -> Result<Option<ExecResult>> {
        if self.in_trap {
            return Ok(None);
        }
        let Some(command) = self.shell.traps.get(name).cloned() else {
            return Ok(None);
        };
        if command.is_empty() {
            return Ok(None);
        }
        let script = match parser::parse(&command) {
            Ok(script) => script,
            Err(e) => return Ok(Some(ExecResult::err(format!("jobsh: trap: {}\n", e), 2))),
        };
        let saved_status = self.shell.last_exit_code;
        self.in_trap = true;
        let result = self.run_list(&script.body).await;
        self.in_trap = false;
        self.shell.last_exit_code = saved_status;
        let mut result = result?;
        result.exit_code = saved_status;
        Ok(Some(result))
    }

    /// Collect finished background jobs; returns `jobs`-style notices.
    pub async fn reap_jobs(&mut self) -> Vec<String> {
        let done = self.shell.jobs.reap().await;
        done.into_iter()
            .map(|(id, state, command)| format!("[{}]  {:<24}{}", id, state.to_string(), command))
            .collect()
    }

    fn run_list<'a>(&'a mut self, list: &'a CommandList) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(self.execute_list(list))
    }

    fn run_command<'a>(&'a mut self, command: &'a Command) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(async move {
            let (outcome, _) = self.run_stage(command, StageInput::Inherit, false).await?;
            Ok(outcome.wait().await)
        })
    }

    async fn execute_list(&mut self, list: &CommandList) -> Result<ExecResult> {
        let mut acc = ExecResult::default();
        for item in &list.items {
            let result = if item.background {
                self.spawn_background(&item.list).await?
            } else {
                self.execute_and_or(&item.list).await?
            };
            acc.absorb(result);
            self.shell.last_exit_code = acc.exit_code;
            if acc.control != ControlFlow::None {
                break;
            }
        }
        Ok(acc)
    }

    async fn execute_and_or(&mut self, list: &AndOrList) -> Result<ExecResult> {
        let mut acc = ExecResult::default();
        let last = list.rest.len();
        let first = self.execute_checked(&list.first, last == 0).await?;
        acc.absorb(first);

        for (idx, (op, pipeline)) in list.rest.iter().enumerate() {
            if acc.control != ControlFlow::None {
                break;
            }
            let run = match op {
                ListOperator::And => acc.exit_code == 0,
                ListOperator::Or => acc.exit_code != 0,
            };
            if !run {
                continue;
            }
            let result = self.execute_checked(pipeline, idx + 1 == last).await?;
            acc.absorb(result);
        }
        Ok(acc)
    }

    /// Run a pipeline and apply the ERR trap and errexit. Neither applies to
    /// conditions, negated pipelines or non-final commands of `&&`/`||`.
    async fn execute_checked(&mut self, pipeline: &Pipeline, is_final: bool) -> Result<ExecResult> {
        let mut result = Box::pin(self.execute_pipeline(pipeline)).await?;
        let failed = result.exit_code != 0
            && result.control == ControlFlow::None
            && !pipeline.negated
            && is_final
            && self.condition_depth == 0;
        if failed {
            if let Some(trap) = self.run_trap("ERR").await? {
                let code = result.exit_code;
                result.absorb(trap);
                result.exit_code = code;
                self.flush_if_terminal(&mut result);
            }
            if self.shell.options.errexit {
                debug!(status = result.exit_code, "errexit");
                result.control = ControlFlow::Exit;
            }
        }
        Ok(result)
    }

    fn flush_if_terminal(&mut self, result: &mut ExecResult) {
        if !self.capturing() {
            flush_to_terminal(result);
        }
    }

    async fn execute_pipeline(&mut self, pipeline: &Pipeline) -> Result<ExecResult> {
        let mut result = match pipeline.commands.as_slice() {
            [] => ExecResult::default(),
            [single] => {
                let (outcome, _) = self.run_stage(single, StageInput::Inherit, false).await?;
                outcome.wait().await
            }
            commands => self.execute_multi(commands).await?,
        };
        if pipeline.negated {
            result.exit_code = i32::from(result.exit_code == 0);
        }
        if !self.pending_stderr.is_empty() {
            result.stderr.insert_str(0, &std::mem::take(&mut self.pending_stderr));
        }
        self.shell.last_exit_code = result.exit_code;
        self.flush_if_terminal(&mut result);
        Ok(result)
    }

    async fn execute_multi(&mut self, commands: &[Command]) -> Result<ExecResult> {
        let last = commands.len() - 1;
        let mut outcomes = Vec::with_capacity(commands.len());
        let mut input = StageInput::Inherit;

        for (idx, command) in commands.iter().enumerate() {
            let (outcome, next) = if idx == last {
                self.run_stage(command, input, false).await?
            } else {
                let mut sub = self.subshell();
                let lends_stdin = matches!(input, StageInput::Inherit);
                if lends_stdin {
                    sub.stdin = std::mem::take(&mut self.stdin);
                }
                let staged = sub.run_stage(command, input, true).await;
                if lends_stdin {
                    self.stdin = std::mem::take(&mut sub.stdin);
                }
                self.pending_stderr.push_str(&sub.pending_stderr);
                staged?
            };
            outcomes.push(outcome);
            input = next;
        }

        let mut result = ExecResult::default();
        let mut statuses = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            let stage = outcome.wait().await;
            statuses.push(stage.exit_code);
            result.stdout.push_str(&stage.stdout);
            result.stderr.push_str(&stage.stderr);
            result.control = stage.control;
        }
        result.exit_code = if self.shell.options.pipefail {
            statuses.iter().rev().find(|c| **c != 0).copied().unwrap_or(0)
        } else {
            statuses.last().copied().unwrap_or(0)
        };
        Ok(result)
    }

    /// Standard input for an in-process stage, or `None` to keep the
    /// current one.
    async fn stage_stdin(&mut self, input: StageInput) -> Result<Option<StdinSource>> {
        Ok(match input {
            StageInput::Inherit => None,
            StageInput::Text(text) => Some(StdinSource::text(text)),
            StageInput::Pipe(fd) => {
                let text = process::read_pipe(fd, self.limits.max_output_bytes).await?;
                Some(StdinSource::text(text))
            }
            StageInput::Null => Some(StdinSource::Null),
        })
    }

    fn next_input(pipe_out: bool, result: &mut ExecResult) -> StageInput {
        if pipe_out {
            StageInput::Text(std::mem::take(&mut result.stdout))
        } else {
            StageInput::Null
        }
    }

    /// Run one pipeline stage. Returns its outcome and the input for the
    /// next stage.
    ///
    /// Boxed so every function call level keeps a small native stack frame.
    fn run_stage<'a>(
        &'a mut self,
        command: &'a Command,
        input: StageInput,
        pipe_out: bool,
    ) -> BoxFuture<'a, Result<(Outcome, StageInput)>> {
        Box::pin(self.execute_stage(command, input, pipe_out))
    }

    async fn execute_stage(
        &mut self,
        command: &Command,
        input: StageInput,
        pipe_out: bool,
    ) -> Result<(Outcome, StageInput)> {
        match command {
            Command::Simple(simple) => Box::pin(self.execute_simple(simple, input, pipe_out)).await,
            Command::Function(def) => {
                self.shell
                    .functions
                    .insert(def.name.clone(), Arc::new(def.clone()));
                let mut result = ExecResult::default();
                let next = Self::next_input(pipe_out, &mut result);
                Ok((Outcome::Done(result), next))
            }
            Command::Compound(compound, redirects) => {
                let stdin = self.stage_stdin(input).await?;
                let saved = stdin.map(|s| std::mem::replace(&mut self.stdin, s));
                if pipe_out {
                    self.capture_depth += 1;
                }
                let result = Box::pin(self.execute_compound_redirected(compound, redirects)).await;
                if pipe_out {
                    self.capture_depth -= 1;
                }
                if let Some(saved) = saved {
                    self.stdin = saved;
                }
                let mut result = result?;
                let next = Self::next_input(pipe_out, &mut result);
                Ok((Outcome::Done(result), next))
            }
        }
    }

    async fn execute_compound_redirected(
        &mut self,
        compound: &CompoundCommand,
        redirects: &[Redirect],
    ) -> Result<ExecResult> {
        if redirects.is_empty() {
            return self.execute_compound(compound).await;
        }
        let mut plan = match self.plan_redirects(redirects).await? {
            Ok(plan) => plan,
            Err(message) => return Ok(ExecResult::err(message, 1)),
        };
        let stdin = self.redirected_stdin(&mut plan).await?;
        let saved = stdin.map(|s| std::mem::replace(&mut self.stdin, s));
        let redirected = !plan.is_default_output();
        if redirected {
            self.capture_depth += 1;
        }
        let result = self.execute_compound(compound).await;
        if redirected {
            self.capture_depth -= 1;
        }
        if let Some(saved) = saved {
            self.stdin = saved;
        }
        let mut result = result?;
        if let Err(e) = plan.route(&mut result) {
            result.stderr.push_str(&format!("jobsh: write error: {}\n", io_message(&e)));
            result.exit_code = 1;
        }
        Ok(result)
    }

    async fn execute_compound(&mut self, compound: &CompoundCommand) -> Result<ExecResult> {
        match compound {
            CompoundCommand::If(cmd) => self.execute_if(cmd).await,
            CompoundCommand::While(cmd) => self.execute_while(cmd).await,
            CompoundCommand::For(cmd) => self.execute_for(cmd).await,
            CompoundCommand::Case(cmd) => self.execute_case(cmd).await,
            CompoundCommand::BraceGroup(list) => self.run_list(list).await,
            CompoundCommand::Subshell(list) => {
                let mut sub = self.subshell();
                sub.stdin = std::mem::take(&mut self.stdin);
                let result = sub.run_list(list).await;
                self.stdin = std::mem::take(&mut sub.stdin);
                self.pending_stderr.push_str(&sub.pending_stderr);
                let mut result = result?;
                if let Some(trap) = sub.run_trap("EXIT").await? {
                    result.stdout.push_str(&trap.stdout);
                    result.stderr.push_str(&trap.stderr);
                }
                // exit, break and return stop at the subshell boundary
                result.control = ControlFlow::None;
                Ok(result)
            }
        }
    }

    async fn run_condition(&mut self, list: &CommandList) -> Result<ExecResult> {
        self.condition_depth += 1;
        let result = self.run_list(list).await;
        self.condition_depth -= 1;
        result
    }

    async fn execute_if(&mut self, cmd: &IfCommand) -> Result<ExecResult> {
        let mut acc = ExecResult::default();
        let branches = std::iter::once((&cmd.condition, &cmd.then_branch))
            .chain(cmd.elif_branches.iter().map(|(c, b)| (c, b)));

        for (condition, body) in branches {
            let cond = self.run_condition(condition).await?;
            acc.absorb(cond);
            if acc.control != ControlFlow::None {
                return Ok(acc);
            }
            if acc.exit_code == 0 {
                let result = self.run_list(body).await?;
                acc.absorb(result);
                return Ok(acc);
            }
        }
        match &cmd.else_branch {
            Some(body) => {
                let result = self.run_list(body).await?;
                acc.absorb(result);
            }
            None => acc.exit_code = 0,
        }
        Ok(acc)
    }

    /// Handle loop control after one body run. Returns true to leave the loop.
    fn loop_control(result: &mut ExecResult) -> bool {
        match result.control {
            ControlFlow::Break(n) => {
                result.control = if n > 1 {
                    ControlFlow::Break(n - 1)
                } else {
                    ControlFlow::None
                };
                true
            }
            ControlFlow::Continue(n) if n > 1 => {
                result.control = ControlFlow::Continue(n - 1);
                true
            }
            ControlFlow::Continue(_) => {
                result.control = ControlFlow::None;
                false
            }
            ControlFlow::Return | ControlFlow::Exit => true,
            ControlFlow::None => false,
        }
    }

    async fn execute_while(&mut self, cmd: &WhileCommand) -> Result<ExecResult> {
        let mut acc = ExecResult::default();
        let mut status = 0;
        let mut iterations = 0usize;
        loop {
            iterations += 1;
            self.counters.check_loop(iterations, &self.limits)?;

            let cond = self.run_condition(&cmd.condition).await?;
            let cond_status = cond.exit_code;
            acc.absorb(cond);
            if acc.control != ControlFlow::None {
                if Self::loop_control(&mut acc) {
                    break;
                }
                continue;
            }
            if (cond_status == 0) == cmd.until {
                break;
            }
            let body = self.run_list(&cmd.body).await?;
            acc.absorb(body);
            status = acc.exit_code;
            if Self::loop_control(&mut acc) {
                break;
            }
        }
        if acc.control == ControlFlow::None {
            acc.exit_code = status;
        }
        Ok(acc)
    }

    async fn execute_for(&mut self, cmd: &ForCommand) -> Result<ExecResult> {
        let items = match &cmd.words {
            Some(words) => self.expand_words(words).await?,
            None => self.shell.positional.clone(),
        };
        let mut acc = ExecResult::default();
        for (idx, item) in items.into_iter().enumerate() {
            self.counters.check_loop(idx + 1, &self.limits)?;
            if let Err(message) = self.shell.set_scalar(&cmd.variable, item) {
                return Ok(ExecResult::err(format!("jobsh: {}\n", message), 1));
            }
            let body = self.run_list(&cmd.body).await?;
            acc.absorb(body);
            if Self::loop_control(&mut acc) {
                break;
            }
        }
        Ok(acc)
    }

    async fn execute_case(&mut self, cmd: &CaseCommand) -> Result<ExecResult> {
        let subject = self.expand_word_string(&cmd.word).await?;
        for item in &cmd.cases {
            for pattern in &item.patterns {
                let pattern = self.expand_pattern(pattern).await?;
                if Pattern::new(&pattern).matches(&subject) {
                    return self.run_list(&item.commands).await;
                }
            }
        }
        Ok(ExecResult::default())
    }

    async fn call_function(&mut self, def: Arc<FunctionDef>, args: Vec<String>) -> Result<ExecResult> {
        self.counters.push_function(&self.limits)?;
        let saved_positional = std::mem::replace(&mut self.shell.positional, args);
        self.shell.push_frame();
        let result = self.run_command(&def.body).await;
        self.shell.pop_frame();
        self.shell.positional = saved_positional;
        self.counters.pop_function();

        let mut result = result?;
        if result.control == ControlFlow::Return {
            result.control = ControlFlow::None;
        }
        Ok(result)
    }

    /// A failed expansion fails the command, not the script.
    async fn execute_simple(
        &mut self,
        simple: &SimpleCommand,
        input: StageInput,
        pipe_out: bool,
    ) -> Result<(Outcome, StageInput)> {
        match self.expand_and_run(simple, input, pipe_out).await {
            Err(Error::Expansion(message)) => {
                let mut result = ExecResult::err(format!("jobsh: {}\n", message), 1);
                let next = Self::next_input(pipe_out, &mut result);
                Ok((Outcome::Done(result), next))
            }
            other => other,
        }
    }

    async fn expand_and_run(
        &mut self,
        simple: &SimpleCommand,
        input: StageInput,
        pipe_out: bool,
    ) -> Result<(Outcome, StageInput)> {
        self.last_subst_status = None;

        if let Some(alias) = simple.name.as_ref().and_then(|w| w.as_plain())
            && let Some(text) = self.shell.aliases.get(alias).cloned()
            && !self.alias_guard.iter().any(|a| a == alias)
        {
            return self.execute_alias(simple, alias, &text, input, pipe_out).await;
        }

        let mut argv = Vec::new();
        if let Some(name) = &simple.name {
            argv = self.expand_word_fields(name).await?;
            argv.extend(self.expand_words(&simple.args).await?);
        }
        if argv.is_empty() {
            let mut result = self.execute_assignments(simple).await?;
            let next = Self::next_input(pipe_out, &mut result);
            return Ok((Outcome::Done(result), next));
        }

        let mut prefix = Vec::with_capacity(simple.assignments.len());
        for assignment in &simple.assignments {
            let value = self.assignment_value(assignment).await?;
            prefix.push((assignment.name.clone(), value));
        }

        if self.shell.options.xtrace {
            self.emit_stderr(format!("+ {}\n", argv.join(" ")));
        }

        let plan = match self.plan_redirects(&simple.redirects).await? {
            Ok(plan) => plan,
            Err(message) => {
                let mut result = ExecResult::err(message, 1);
                let next = Self::next_input(pipe_out, &mut result);
                return Ok((Outcome::Done(result), next));
            }
        };

        let name = argv.remove(0);
        let target = if let Some(def) = self.shell.functions.get(&name) {
            Some(Internal::Function(Arc::clone(def)))
        } else if SPECIAL_COMMANDS.contains(&name.as_str()) {
            Some(Internal::Special(name.clone()))
        } else {
            self.builtins.get(&name).map(|b| Internal::Builtin(Arc::clone(b)))
        };

        match target {
            Some(target) => {
                Box::pin(self.run_internal(target, argv, prefix, plan, input, pipe_out)).await
            }
            None => Box::pin(self.run_external(name, argv, prefix, plan, input, pipe_out)).await,
        }
    }

    async fn execute_alias(
        &mut self,
        simple: &SimpleCommand,
        alias: &str,
        text: &str,
        input: StageInput,
        pipe_out: bool,
    ) -> Result<(Outcome, StageInput)> {
        let mut line = text.to_string();
        for arg in &simple.args {
            line.push(' ');
            line.push_str(&arg.raw);
        }
        let script = match parser::parse(&line) {
            Ok(script) => script,
            Err(e) => {
                let mut result = ExecResult::err(format!("jobsh: {}: {}\n", alias, e), 2);
                let next = Self::next_input(pipe_out, &mut result);
                return Ok((Outcome::Done(result), next));
            }
        };
        let plan = match self.plan_redirects(&simple.redirects).await? {
            Ok(plan) => plan,
            Err(message) => {
                let mut result = ExecResult::err(message, 1);
                let next = Self::next_input(pipe_out, &mut result);
                return Ok((Outcome::Done(result), next));
            }
        };
        let mut prefix = Vec::new();
        for assignment in &simple.assignments {
            let value = self.assignment_value(assignment).await?;
            prefix.push((assignment.name.clone(), value));
        }

        self.alias_guard.push(alias.to_string());
        let result = self
            .run_internal(Internal::Script(script), Vec::new(), prefix, plan, input, pipe_out)
            .await;
        self.alias_guard.pop();
        result
    }

    async fn run_internal(
        &mut self,
        target: Internal,
        args: Vec<String>,
        prefix: Vec<(String, Value)>,
        mut plan: RedirectPlan,
        input: StageInput,
        pipe_out: bool,
    ) -> Result<(Outcome, StageInput)> {
        let stdin = match self.redirected_stdin(&mut plan).await? {
            Some(stdin) => Some(stdin),
            None => self.stage_stdin(input).await?,
        };
        let saved_stdin = stdin.map(|s| std::mem::replace(&mut self.stdin, s));
        let captured = pipe_out || !plan.is_default_output();
        if captured {
            self.capture_depth += 1;
        }

        let mut saved_vars = Vec::with_capacity(prefix.len());
        for (name, value) in prefix {
            saved_vars.push((name.clone(), self.shell.save_var(&name)));
            if let Err(message) = self.shell.set(&name, value) {
                self.emit_stderr(format!("jobsh: {}\n", message));
            }
        }

        let result = match target {
            Internal::Function(def) => Box::pin(self.call_function(def, args)).await,
            Internal::Special(name) => Box::pin(self.run_special(&name, &args)).await,
            Internal::Script(script) => self.run_list(&script.body).await,
            Internal::Builtin(builtin) => {
                let ctx = builtins::Context {
                    args: &args,
                    shell: &mut self.shell,
                    stdin: &mut self.stdin,
                };
                builtin.execute(ctx).await
            }
        };

        for (name, saved) in saved_vars.into_iter().rev() {
            self.shell.restore_var(&name, saved);
        }
        if captured {
            self.capture_depth -= 1;
        }
        if let Some(saved) = saved_stdin {
            self.stdin = saved;
        }

        let mut result = result?;
        if let Err(e) = plan.route(&mut result) {
            result
                .stderr
                .push_str(&format!("jobsh: write error: {}\n", io_message(&e)));
            result.exit_code = 1;
        }
        let next = Self::next_input(pipe_out, &mut result);
        Ok((Outcome::Done(result), next))
    }

    async fn run_external(
        &mut self,
        name: String,
        args: Vec<String>,
        prefix: Vec<(String, Value)>,
        plan: RedirectPlan,
        input: StageInput,
        pipe_out: bool,
    ) -> Result<(Outcome, StageInput)> {
        let path_var = self.shell.get("PATH");
        let program = match lookup_command(&name, path_var.as_deref(), &self.shell.cwd) {
            Lookup::Found(program) => program,
            Lookup::NotFound => {
                let mut result = ExecResult::err(format!("jobsh: {}: command not found\n", name), 127);
                let next = Self::next_input(pipe_out, &mut result);
                return Ok((Outcome::Done(result), next));
            }
            Lookup::NotExecutable(path) => {
                let mut result =
                    ExecResult::err(format!("jobsh: {}: Permission denied\n", path.display()), 126);
                let next = Self::next_input(pipe_out, &mut result);
                return Ok((Outcome::Done(result), next));
            }
        };

        let mut env = self.shell.child_env();
        for (key, value) in prefix {
            env.insert(key, value.as_scalar());
        }
        let input = match input {
            StageInput::Inherit => match &mut self.stdin {
                StdinSource::Buffer(buf) => StageInput::Text(buf.take_rest()),
                StdinSource::Process => StageInput::Inherit,
                StdinSource::Null => StageInput::Null,
            },
            other => other,
        };
        let (next, pipe_write) = if pipe_out {
            let (read, write) = process::pipe()?;
            (StageInput::Pipe(read), Some(write))
        } else {
            (StageInput::Null, None)
        };

        let launch = Launch {
            program,
            name: name.clone(),
            args,
            env,
            cwd: &self.shell.cwd,
            input,
            plan,
            pipe_out: pipe_write,
            capture: self.capturing(),
            group: self.job_group.as_ref(),
            max_output_bytes: self.limits.max_output_bytes,
        };
        match process::spawn(launch).await {
            Ok(running) => Ok((Outcome::Running(running), next)),
            Err(e) => {
                warn!(command = %name, error = %e, "spawn failed");
                let mut result = ExecResult::err(format!("jobsh: {}: {}\n", name, io_message(&e)), 126);
                let next = Self::next_input(pipe_out, &mut result);
                Ok((Outcome::Done(result), next))
            }
        }
    }

    /// Assignments with no command name: they change the shell itself.
    async fn execute_assignments(&mut self, simple: &SimpleCommand) -> Result<ExecResult> {
        for assignment in &simple.assignments {
            if let Err(message) = self.apply_assignment(assignment).await? {
                return Ok(ExecResult::err(format!("jobsh: {}\n", message), 1));
            }
        }
        if self.shell.options.xtrace && !simple.assignments.is_empty() {
            let names: Vec<&str> = simple.assignments.iter().map(|a| a.name.as_str()).collect();
            self.emit_stderr(format!("+ {}\n", names.join(" ")));
        }
        // Redirections still create or truncate their files
        if let Err(message) = self.plan_redirects(&simple.redirects).await? {
            return Ok(ExecResult::err(message, 1));
        }
        Ok(ExecResult::code(self.last_subst_status.unwrap_or(0)))
    }

    async fn assignment_value(&mut self, assignment: &Assignment) -> Result<Value> {
        Ok(match &assignment.value {
            AssignmentValue::Scalar(word) => Value::Scalar(self.expand_word_string(word).await?),
            AssignmentValue::Array(words) => Value::Indexed(self.expand_words(words).await?),
        })
    }

    /// Apply `name=value`, `name+=value`, `name[i]=value` or `name=(...)`.
    /// The inner error is a user-facing message.
    async fn apply_assignment(
        &mut self,
        assignment: &Assignment,
    ) -> Result<std::result::Result<(), String>> {
        let name = assignment.name.as_str();
        let is_assoc = matches!(
            self.shell.var(name).map(|v| &v.value),
            Some(Value::Assoc(_))
        );

        if let Some(index) = &assignment.index {
            let parts = parser::parse_heredoc(index, self.counters.substitution_depth)?;
            let mut key = self.expand_parts_string(&parts).await?;
            if !is_assoc && key.trim().parse::<i64>().is_err() {
                key = arith::evaluate(&mut self.shell, &key)?.to_string();
            }
            let AssignmentValue::Scalar(word) = &assignment.value else {
                return Ok(Err(format!("{}[{}]: cannot assign list to array member", name, index)));
            };
            let mut value = self.expand_word_string(word).await?;
            if assignment.append {
                let current = self
                    .shell
                    .var(name)
                    .and_then(|v| match &v.value {
                        Value::Assoc(map) => map.get(&key).cloned(),
                        Value::Indexed(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
                        Value::Scalar(s) => (key == "0").then(|| s.clone()),
                    })
                    .unwrap_or_default();
                value = current + &value;
            }
            return Ok(self.shell.set_element(name, &key, value));
        }

        let value = match &assignment.value {
            AssignmentValue::Array(words) if is_assoc => {
                let mut map = std::collections::BTreeMap::new();
                for word in words {
                    let text = self.expand_word_string(word).await?;
                    if let Some((k, v)) = text
                        .strip_prefix('[')
                        .and_then(|rest| rest.split_once("]="))
                    {
                        map.insert(k.to_string(), v.to_string());
                    }
                }
                Value::Assoc(map)
            }
            _ => self.assignment_value(assignment).await?,
        };
        Ok(if assignment.append {
            self.shell.append(name, value)
        } else {
            self.shell.set(name, value)
        })
    }

    /// Take a redirected stdin out of the plan as an in-process source.
    async fn redirected_stdin(&mut self, plan: &mut RedirectPlan) -> Result<Option<StdinSource>> {
        Ok(match plan.stdin.take() {
            Some(InTarget::Text(text)) => Some(StdinSource::text(text)),
            Some(InTarget::File(file)) => {
                let mut file = tokio::fs::File::from_std(file);
                let mut text = String::new();
                tokio::io::AsyncReadExt::read_to_string(&mut file, &mut text).await?;
                Some(StdinSource::text(text))
            }
            None => None,
        })
    }

    /// Resolve redirections in order. The inner error is a message for the
    /// user; the command is not run.
    async fn plan_redirects(
        &mut self,
        redirects: &[Redirect],
    ) -> Result<std::result::Result<RedirectPlan, String>> {
        let mut plan = RedirectPlan::default();
        for redirect in redirects {
            let fd = redirect.fd;
            match redirect.kind {
                RedirectKind::Output | RedirectKind::Append | RedirectKind::OutputBoth => {
                    let path = self.expand_word_string(&redirect.target).await?;
                    let append = redirect.kind == RedirectKind::Append;
                    let target = match self.open_output(&path, append) {
                        Ok(target) => target,
                        Err(message) => return Ok(Err(message)),
                    };
                    if redirect.kind == RedirectKind::OutputBoth {
                        plan.stderr = target.try_clone()?;
                        plan.stdout = target;
                    } else if !set_output(&mut plan, fd.unwrap_or(1), target) {
                        debug!(fd = ?fd, "ignoring redirection of unsupported descriptor");
                    }
                }
                RedirectKind::DupOutput => {
                    let spec = self.expand_word_string(&redirect.target).await?;
                    let target = match spec.as_str() {
                        "1" => plan.stdout.try_clone()?,
                        "2" => plan.stderr.try_clone()?,
                        "-" => OutTarget::Null,
                        path if fd.is_none() && !path.chars().all(|c| c.is_ascii_digit()) => {
                            // `>&file` is `&>file`
                            let target = match self.open_output(path, false) {
                                Ok(target) => target,
                                Err(message) => return Ok(Err(message)),
                            };
                            plan.stderr = target.try_clone()?;
                            plan.stdout = target;
                            continue;
                        }
                        other => return Ok(Err(format!("jobsh: {}: bad file descriptor\n", other))),
                    };
                    set_output(&mut plan, fd.unwrap_or(1), target);
                }
                RedirectKind::Input => {
                    let path = self.expand_word_string(&redirect.target).await?;
                    let full = resolve_path(&self.shell.cwd, &path);
                    match std::fs::File::open(&full) {
                        Ok(file) => plan.stdin = Some(InTarget::File(file)),
                        Err(e) => return Ok(Err(format!("jobsh: {}: {}\n", path, io_message(&e)))),
                    }
                }
                RedirectKind::HereDoc => {
                    let text = self.expand_parts_string(&redirect.target.parts).await?;
                    plan.stdin = Some(InTarget::Text(text));
                }
                RedirectKind::HereString => {
                    let mut text = self.expand_word_string(&redirect.target).await?;
                    text.push('\n');
                    plan.stdin = Some(InTarget::Text(text));
                }
                RedirectKind::DupInput => {
                    let spec = self.expand_word_string(&redirect.target).await?;
                    match spec.as_str() {
                        "0" => {}
                        "-" => plan.stdin = Some(InTarget::Text(String::new())),
                        other => return Ok(Err(format!("jobsh: {}: bad file descriptor\n", other))),
                    }
                }
            }
        }
        Ok(Ok(plan))
    }

    fn open_output(&self, path: &str, append: bool) -> std::result::Result<OutTarget, String> {
        match path {
            "/dev/stdout" => return Ok(OutTarget::Stdout),
            "/dev/stderr" => return Ok(OutTarget::Stderr),
            "/dev/null" => return Ok(OutTarget::Null),
            _ => {}
        }
        let full = resolve_path(&self.shell.cwd, path);
        OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(&full)
            .map(OutTarget::File)
            .map_err(|e| format!("jobsh: {}: {}\n", path, io_message(&e)))
    }

    async fn run_special(&mut self, name: &str, args: &[String]) -> Result<ExecResult> {
        match name {
            "eval" => {
                let text = args.join(" ");
                let script = match parser::parse(&text) {
                    Ok(script) => script,
                    Err(e) => return Ok(ExecResult::err(format!("jobsh: eval: {}\n", e), 2)),
                };
                self.counters.push_substitution(&self.limits)?;
                let result = self.run_list(&script.body).await;
                self.counters.pop_substitution();
                result
            }
            "source" | "." => self.source_file(name, args).await,
            "type" => Ok(self.type_of(args)),
            _ => Ok(ExecResult::err(format!("jobsh: {}: not supported\n", name), 2)),
        }
    }

    async fn source_file(&mut self, name: &str, args: &[String]) -> Result<ExecResult> {
        let Some(file) = args.first() else {
            return Ok(ExecResult::err(
                format!("jobsh: {}: filename argument required\n", name),
                2,
            ));
        };
        let path = if file.contains('/') {
            resolve_path(&self.shell.cwd, file)
        } else {
            let local = resolve_path(&self.shell.cwd, file);
            if local.is_file() {
                local
            } else {
                let path_var = self.shell.get("PATH").unwrap_or_default();
                path_var
                    .split(':')
                    .filter(|d| !d.is_empty())
                    .map(|d| resolve_path(&self.shell.cwd, d).join(file))
                    .find(|p| p.is_file())
                    .unwrap_or(local)
            }
        };
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                return Ok(ExecResult::err(
                    format!("jobsh: {}: {}\n", file, io_message(&e)),
                    1,
                ));
            }
        };
        let script = match parser::parse(&text) {
            Ok(script) => script,
            Err(e) => return Ok(ExecResult::err(format!("jobsh: {}: {}\n", file, e), 2)),
        };

        self.counters.push_substitution(&self.limits)?;
        let saved_positional = (args.len() > 1)
            .then(|| std::mem::replace(&mut self.shell.positional, args[1..].to_vec()));
        let result = self.run_list(&script.body).await;
        if let Some(saved) = saved_positional {
            self.shell.positional = saved;
        }
        self.counters.pop_substitution();

        let mut result = result?;
        if result.control == ControlFlow::Return {
            result.control = ControlFlow::None;
        }
        Ok(result)
    }

    fn type_of(&self, names: &[String]) -> ExecResult {
        let mut result = ExecResult::default();
        for name in names {
            if let Some(text) = self.shell.aliases.get(name) {
                result.stdout.push_str(&format!("{} is aliased to `{}'\n", name, text));
            } else if KEYWORDS.contains(&name.as_str()) {
                result.stdout.push_str(&format!("{} is a shell keyword\n", name));
            } else if self.shell.functions.contains_key(name) {
                result.stdout.push_str(&format!("{} is a function\n", name));
            } else if SPECIAL_COMMANDS.contains(&name.as_str()) || self.builtins.contains_key(name) {
                result.stdout.push_str(&format!("{} is a shell builtin\n", name));
            } else {
                let path_var = self.shell.get("PATH");
                match lookup_command(name, path_var.as_deref(), &self.shell.cwd) {
                    Lookup::Found(path) => {
                        result
                            .stdout
                            .push_str(&format!("{} is {}\n", name, path.display()));
                    }
                    _ => {
                        result
                            .stderr
                            .push_str(&format!("jobsh: type: {}: not found\n", name));
                        result.exit_code = 1;
                    }
                }
            }
        }
        result
    }

    /// Start `list &` on its own task.
    async fn spawn_background(&mut self, list: &AndOrList) -> Result<ExecResult> {
        let group = ProcessGroup::new();
        let mut job = self.subshell();
        job.job_group = Some(group.clone());
        job.condition_depth = 0;
        let owned = list.clone();
        let command = self.describe(list);

        let task: BoxFuture<'static, ExecResult> = Box::pin(async move {
            match job.execute_and_or(&owned).await {
                Ok(mut result) => {
                    if !job.pending_stderr.is_empty() {
                        result.stderr.insert_str(0, &job.pending_stderr);
                    }
                    result
                }
                Err(e) => ExecResult::err(format!("jobsh: {}\n", e), 1),
            }
        });
        let handle = tokio::spawn(task);
        let id = self.shell.jobs.spawn(command.clone(), group.clone(), handle);
        let pgid = group.wait_claimed(BACKGROUND_START_WAIT).await;
        debug!(job = id, pgid = ?pgid, command = %command, "started background job");

        if self.shell.interactive {
            let pid = pgid.map(|p| p.to_string()).unwrap_or_default();
            self.emit_stderr(format!("[{}] {}\n", id, pid));
        }
        Ok(ExecResult::default())
    }

    /// Source text of an and-or list, for `jobs`.
    fn describe(&self, list: &AndOrList) -> String {
        let start = list.first.span.start.offset;
        let end = list
            .rest
            .last()
            .map_or(list.first.span.end.offset, |(_, p)| p.span.end.offset);
        self.source_text
            .get(start..end)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| first_word(list))
    }
}

fn first_word(list: &AndOrList) -> String {
    match list.first.commands.first() {
        Some(Command::Simple(simple)) => simple
            .name
            .as_ref()
            .map(|w: &Word| w.raw.clone())
            .unwrap_or_default(),
        _ => "job".to_string(),
    }
}

fn set_output(plan: &mut RedirectPlan, fd: i32, target: OutTarget) -> bool {
    match fd {
        1 => plan.stdout = target,
        2 => plan.stderr = target,
        _ => return false,
    }
    true
}

/// An I/O error as the shell prints it, without the `(os error N)` suffix.
pub(crate) fn io_message(e: &std::io::Error) -> String {
    let text = e.to_string();
    match text.find(" (os error") {
        Some(idx) => text[..idx].to_string(),
        None => text,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::default_builtins;

    fn interpreter() -> Interpreter {
        let env: HashMap<String, String> = std::env::vars().collect();
        let cwd = std::env::current_dir().unwrap();
        Interpreter::new(
            ShellContext::new(env, cwd),
            default_builtins(),
            ExecutionLimits::default(),
        )
    }

    async fn run(script: &str) -> ExecResult {
        interpreter().execute_text(script).await.unwrap()
    }

    #[tokio::test]
    async fn test_and_or_lists() {
        assert_eq!(run("true && echo yes").await.stdout, "yes\n");
        assert_eq!(run("false && echo yes").await.stdout, "");
        assert_eq!(run("false || echo fallback").await.stdout, "fallback\n");
        assert_eq!(run("false && echo a || echo b").await.stdout, "b\n");
        assert_eq!(run("false && true").await.exit_code, 1);
    }

    #[tokio::test]
    async fn test_negation() {
        assert_eq!(run("! false").await.exit_code, 0);
        assert_eq!(run("! true").await.exit_code, 1);
    }

    #[tokio::test]
    async fn test_pipeline_status_and_pipefail() {
        let result = run("false | true").await;
        assert_eq!(result.exit_code, 0);
        let result = run("set -o pipefail; false | true").await;
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_last_stage_runs_in_current_shell() {
        let result = run("echo hello | read greeting; echo \"got $greeting\"").await;
        assert_eq!(result.stdout, "got hello\n");
    }

    #[tokio::test]
    async fn test_builtin_to_external_pipe() {
        let result = run("printf 'b\\na\\n' | sort").await;
        assert_eq!(result.stdout, "a\nb\n");
    }

    #[tokio::test]
    async fn test_external_to_builtin_pipe() {
        let result = run("printf 'x y\\n' | cat | while read a b; do echo \"$b $a\"; done").await;
        assert_eq!(result.stdout, "y x\n");
    }

    #[tokio::test]
    async fn test_loops_and_control() {
        let result = run("for i in 1 2 3 4; do if [ $i = 3 ]; then break; fi; echo $i; done").await;
        assert_eq!(result.stdout, "1\n2\n");
        let result = run("for i in 1 2 3; do [ $i = 2 ] && continue; echo $i; done").await;
        assert_eq!(result.stdout, "1\n3\n");
        let result = run("i=0; while [ $i -lt 3 ]; do i=$((i+1)); done; echo $i").await;
        assert_eq!(result.stdout, "3\n");
        let result = run("i=0; until [ $i -ge 2 ]; do i=$((i+1)); echo $i; done").await;
        assert_eq!(result.stdout, "1\n2\n");
    }

    #[tokio::test]
    async fn test_nested_break() {
        let result =
            run("for a in 1 2; do for b in x y; do echo $a$b; break 2; done; done; echo end").await;
        assert_eq!(result.stdout, "1x\nend\n");
    }

    #[tokio::test]
    async fn test_case() {
        let script = "for f in a.txt b.md c; do case $f in *.txt) echo text;; *.md|*.rst) echo doc;; *) echo other;; esac; done";
        assert_eq!(run(script).await.stdout, "text\ndoc\nother\n");
        assert_eq!(run("x='*'; case a in \"$x\") echo lit;; *) echo glob;; esac").await.stdout, "glob\n");
    }

    #[tokio::test]
    async fn test_functions_and_locals() {
        let script = r#"
            x=global
            f() { local x=inner; y=set; echo "$1:$x"; return 3; }
            f arg
            echo "$?:$x:$y"
        "#;
        assert_eq!(run(script).await.stdout, "arg:inner\n3:global:set\n");
    }

    #[tokio::test]
    async fn test_recursion_limit() {
        let mut interp = Interpreter::new(
            ShellContext::new(HashMap::new(), std::env::current_dir().unwrap()),
            default_builtins(),
            ExecutionLimits::default().max_function_depth(10),
        );
        let err = interp.execute_text("f() { f; }; f").await.unwrap_err();
        assert!(matches!(err, Error::ResourceLimit(_)));
    }

    #[tokio::test]
    async fn test_subshell_isolation() {
        let result = run("x=1; (x=2; echo $x); echo $x").await;
        assert_eq!(result.stdout, "2\n1\n");
        let result = run("(exit 4); echo $?").await;
        assert_eq!(result.stdout, "4\n");
    }

    #[tokio::test]
    async fn test_command_substitution() {
        let result = run("x=$(echo hi; echo there); echo \"[$x]\"").await;
        assert_eq!(result.stdout, "[hi\nthere]\n");
        let result = run("echo $(echo a   b)").await;
        assert_eq!(result.stdout, "a b\n");
        let result = run("x=$(false); echo $?").await;
        assert_eq!(result.stdout, "1\n");
    }

    #[tokio::test]
    async fn test_errexit() {
        let result = run("set -e; echo one; false; echo two").await;
        assert_eq!(result.stdout, "one\n");
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.control, ControlFlow::Exit);
        // conditions do not trip errexit
        let result = run("set -e; if false; then :; fi; false || true; echo ok").await;
        assert_eq!(result.stdout, "ok\n");
    }

    #[tokio::test]
    async fn test_err_trap() {
        let result = run("trap 'echo caught' ERR; false; echo after").await;
        assert_eq!(result.stdout, "caught\nafter\n");
    }

    #[tokio::test]
    async fn test_exit_stops_script() {
        let result = run("echo a; exit 7; echo b").await;
        assert_eq!(result.stdout, "a\n");
        assert_eq!(result.exit_code, 7);
    }

    #[tokio::test]
    async fn test_redirections() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter();
        interp.shell_mut().cwd = dir.path().to_path_buf();
        let result = interp
            .execute_text("echo one > out; echo two >> out; cat < out; echo err >&2 2>/dev/null")
            .await
            .unwrap();
        assert_eq!(result.stdout, "one\ntwo\n");
        assert_eq!(result.stderr, "err\n");
        let contents = std::fs::read_to_string(dir.path().join("out")).unwrap();
        assert_eq!(contents, "one\ntwo\n");

        let result = interp
            .execute_text("{ echo a; echo b >&2; } > both 2>&1; cat both")
            .await
            .unwrap();
        assert_eq!(result.stdout, "a\nb\n");

        let result = interp.execute_text("cat < missing").await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("missing: No such file or directory"));
    }

    #[tokio::test]
    async fn test_heredoc_and_herestring() {
        let result = run("name=world\ncat <<EOF\nhello $name\nEOF\ncat <<'EOF'\n$name\nEOF").await;
        assert_eq!(result.stdout, "hello world\n$name\n");
        let result = run("read a b <<< 'x y'; echo $b$a").await;
        assert_eq!(result.stdout, "yx\n");
    }

    #[tokio::test]
    async fn test_command_not_found() {
        let result = run("no-such-command-xyz arg").await;
        assert_eq!(result.exit_code, 127);
        assert_eq!(result.stderr, "jobsh: no-such-command-xyz: command not found\n");
    }

    #[tokio::test]
    async fn test_prefix_assignment_is_temporary() {
        let result = run("x=outer; x=inner sh -c 'echo $x'; echo $x").await;
        assert_eq!(result.stdout, "inner\nouter\n");
    }

    #[tokio::test]
    async fn test_aliases() {
        let result = run("alias greet='echo hello'\ngreet world").await;
        assert_eq!(result.stdout, "hello world\n");
        let result = run("alias echo='echo [x]'\necho hi").await;
        assert_eq!(result.stdout, "[x] hi\n");
    }

    #[tokio::test]
    async fn test_eval_and_type() {
        let result = run("cmd='echo evaluated'; eval $cmd").await;
        assert_eq!(result.stdout, "evaluated\n");
        let result = run("f() { :; }; type f cd if").await;
        assert_eq!(
            result.stdout,
            "f is a function\ncd is a shell builtin\nif is a shell keyword\n"
        );
    }

    #[tokio::test]
    async fn test_source_with_args() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.sh"), "greeting=\"hi $1\"\nreturn 0\necho unreachable\n").unwrap();
        let mut interp = interpreter();
        interp.shell_mut().cwd = dir.path().to_path_buf();
        let result = interp.execute_text(". ./lib.sh bob; echo $greeting").await.unwrap();
        assert_eq!(result.stdout, "hi bob\n");
    }

    #[tokio::test]
    async fn test_background_and_wait() {
        let result = run("sh -c 'exit 5' & wait $!; echo $?").await;
        assert_eq!(result.stdout, "5\n");
        let result = run("echo bg & wait").await;
        assert_eq!(result.stdout, "bg\n");
    }

    #[tokio::test]
    async fn test_parse_error_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut interp = interpreter();
        interp.shell_mut().cwd = dir.path().to_path_buf();
        let err = interp.execute_text("echo x > made; if true; then").await.unwrap_err();
        assert!(err.is_parse_error());
        assert!(!dir.path().join("made").exists());
    }

    #[tokio::test]
    async fn test_arrays() {
        let result = run("a=(one two three); echo ${#a}; echo ${a[1]}; a[5]=six; echo ${#a[@]}").await;
        assert_eq!(result.stdout, "3\ntwo\n6\n");
        let result = run("declare -A m; m[k]=v; m[j]=w; echo ${(k)m}").await;
        assert_eq!(result.stdout, "j k\n");
        let result = run("set -- a 'b c'; for x in \"$@\"; do echo \"<$x>\"; done").await;
        assert_eq!(result.stdout, "<a>\n<b c>\n");
    }

    #[tokio::test]
    async fn test_xtrace() {
        let result = run("set -x; echo traced").await;
        assert_eq!(result.stdout, "traced\n");
        assert!(result.stderr.contains("+ echo traced\n"));
    }

    #[test]
    fn test_io_message_strips_os_error() {
        let e = std::io::Error::from_raw_os_error(2);
        assert_eq!(io_message(&e), "No such file or directory");
    }
}
