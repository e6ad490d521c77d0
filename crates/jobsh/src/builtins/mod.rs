//! Built-in shell commands
//!
//! This module provides the [`Builtin`] trait, the [`Context`] a builtin
//! runs with, and the fixed dispatch table returned by [`default_builtins`].
//! Names missing from the table fall through to function lookup and then to
//! external command resolution.
//!
//! # Custom Builtins
//!
//! ```rust
//! use jobsh::{Builtin, BuiltinContext, ExecResult, async_trait};
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Builtin for Hello {
//!     async fn execute(&self, _ctx: BuiltinContext<'_>) -> jobsh::Result<ExecResult> {
//!         Ok(ExecResult::ok("Hello!\n"))
//!     }
//! }
//! ```
//!
//! Register via [`ShellBuilder::builtin`](crate::ShellBuilder::builtin).

mod alias;
mod echo;
mod export;
mod flow;
mod history;
mod jobctl;
mod navigation;
mod printf;
mod read;
mod test;
mod trap;
mod vars;
mod wait;

pub use alias::{Alias, Unalias};
pub use echo::Echo;
pub use export::Export;
pub use flow::{Break, Colon, Continue, Exit, False, Return, True};
pub use history::HistoryCmd;
pub use jobctl::{Bg, Disown, Fg, Jobs, Kill};
pub use navigation::{Cd, Pwd};
pub use printf::Printf;
pub use read::Read;
pub use test::{Bracket, Test};
pub use trap::Trap;
pub use vars::{Declare, Local, Readonly, Set, Shift, Unset};
pub use wait::Wait;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::interpreter::{ExecResult, ShellContext, StdinSource};

/// Resolve a path relative to the current working directory.
///
/// If the path is absolute, returns it unchanged.
/// If relative, joins it with the cwd.
///
/// # Example
///
/// ```ignore
/// let abs = resolve_path(Path::new("/home"), "/etc/passwd");
/// assert_eq!(abs, PathBuf::from("/etc/passwd"));
///
/// // Paths are normalized (. and .. resolved)
/// let dot = resolve_path(Path::new("/"), ".");
/// assert_eq!(dot, PathBuf::from("/"));
/// ```
pub fn resolve_path(cwd: &Path, path_str: &str) -> PathBuf {
    let path = Path::new(path_str);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    normalize_path(&joined)
}

/// Resolve `.` and `..` lexically: `/tmp/../home` becomes `/home`.
fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir => result.push("/"),
            Component::Normal(name) => result.push(name),
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir | Component::Prefix(_) => {}
        }
    }
    if result.as_os_str().is_empty() {
        result.push("/");
    }
    result
}

/// Execution context for builtin commands.
///
/// Builtins run in the shell's own process and may change its state
/// directly: variables, options, the working directory, traps and jobs.
pub struct Context<'a> {
    /// Command arguments (not including the command name)
    pub args: &'a [String],
    pub shell: &'a mut ShellContext,
    /// Standard input of the command (pipeline text, redirect or terminal)
    pub stdin: &'a mut StdinSource,
}

/// Trait for implementing builtin commands.
///
/// Return [`ExecResult::err`] for user-facing failures; an `Err` aborts the
/// whole script and is reserved for fatal conditions.
#[async_trait]
pub trait Builtin: Send + Sync {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult>;
}

/// The builtin dispatch table.
pub fn default_builtins() -> HashMap<String, Arc<dyn Builtin>> {
    let table: Vec<(&str, Arc<dyn Builtin>)> = vec![
        (":", Arc::new(Colon)),
        ("true", Arc::new(True)),
        ("false", Arc::new(False)),
        ("exit", Arc::new(Exit)),
        ("return", Arc::new(Return)),
        ("break", Arc::new(Break)),
        ("continue", Arc::new(Continue)),
        ("echo", Arc::new(Echo)),
        ("printf", Arc::new(Printf)),
        ("cd", Arc::new(Cd)),
        ("pwd", Arc::new(Pwd)),
        ("export", Arc::new(Export)),
        ("unset", Arc::new(Unset)),
        ("set", Arc::new(Set)),
        ("local", Arc::new(Local)),
        ("declare", Arc::new(Declare)),
        ("typeset", Arc::new(Declare)),
        ("readonly", Arc::new(Readonly)),
        ("shift", Arc::new(Shift)),
        ("read", Arc::new(Read)),
        ("test", Arc::new(Test)),
        ("[", Arc::new(Bracket)),
        ("alias", Arc::new(Alias)),
        ("unalias", Arc::new(Unalias)),
        ("history", Arc::new(HistoryCmd)),
        ("trap", Arc::new(Trap)),
        ("jobs", Arc::new(Jobs)),
        ("fg", Arc::new(Fg)),
        ("bg", Arc::new(Bg)),
        ("kill", Arc::new(Kill)),
        ("wait", Arc::new(Wait)),
        ("disown", Arc::new(Disown)),
    ];
    table
        .into_iter()
        .map(|(name, builtin)| (name.to_string(), builtin))
        .collect()
}

/// Run a builtin against a shell for unit tests.
#[cfg(test)]
pub(crate) async fn run_builtin(
    builtin: &dyn Builtin,
    args: &[&str],
    shell: &mut ShellContext,
    stdin: &mut StdinSource,
) -> ExecResult {
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let ctx = Context {
        args: &args,
        shell,
        stdin,
    };
    match builtin.execute(ctx).await {
        Ok(result) => result,
        Err(e) => panic!("builtin failed: {e}"),
    }
}

#[cfg(test)]
pub(crate) fn test_shell() -> ShellContext {
    ShellContext::new(HashMap::new(), PathBuf::from("/"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path_absolute() {
        let cwd = PathBuf::from("/home/user");
        let result = resolve_path(&cwd, "/tmp/file.txt");
        assert_eq!(result, PathBuf::from("/tmp/file.txt"));
    }

    #[test]
    fn test_resolve_path_relative() {
        let cwd = PathBuf::from("/home/user");
        let result = resolve_path(&cwd, "downloads/file.txt");
        assert_eq!(result, PathBuf::from("/home/user/downloads/file.txt"));
    }

    #[test]
    fn test_resolve_path_dot_and_dotdot() {
        assert_eq!(resolve_path(Path::new("/"), "."), PathBuf::from("/"));
        assert_eq!(resolve_path(Path::new("/"), ".."), PathBuf::from("/"));
        assert_eq!(
            resolve_path(Path::new("/home/user"), ".."),
            PathBuf::from("/home")
        );
        assert_eq!(
            resolve_path(Path::new("/home/user"), "./a/../b/./c"),
            PathBuf::from("/home/user/b/c")
        );
    }

    #[test]
    fn test_dispatch_table_has_job_control() {
        let table = default_builtins();
        for name in ["jobs", "fg", "bg", "kill", "wait", "disown", "trap", "["] {
            assert!(table.contains_key(name), "missing {name}");
        }
        assert!(!table.contains_key("ls"));
    }
}
