//! history builtin

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// history builtin - show or manage the command history
///
/// Usage: `history [N]`, `history -c`, `history -w`, `history -r`
///
/// `-w` and `-r` write and read the configured history file.
pub struct HistoryCmd;

#[async_trait]
impl Builtin for HistoryCmd {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let history = &mut ctx.shell.history;
        match ctx.args.first().map(String::as_str) {
            Some("-c") => {
                history.clear();
                return Ok(ExecResult::code(0));
            }
            Some("-w") => {
                return Ok(match history.save_configured() {
                    Ok(()) => ExecResult::code(0),
                    Err(e) => ExecResult::err(format!("jobsh: history: {}\n", e), 1),
                });
            }
            Some("-r") => {
                return Ok(match history.load_configured() {
                    Ok(_) => ExecResult::code(0),
                    Err(e) => ExecResult::err(format!("jobsh: history: {}\n", e), 1),
                });
            }
            _ => {}
        }

        let count = match ctx.args.first() {
            None => history.len(),
            Some(arg) => match arg.parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    return Ok(ExecResult::err(
                        format!("jobsh: history: {}: numeric argument required\n", arg),
                        2,
                    ));
                }
            },
        };

        let entries = history.entries();
        let skip = entries.len().saturating_sub(count);
        let listing: String = entries[skip..]
            .iter()
            .map(|entry| format!("{:>5}  {}\n", entry.number, entry.command))
            .collect();
        Ok(ExecResult::ok(listing))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::history::{History, HistoryConfig};
    use crate::interpreter::StdinSource;

    #[tokio::test]
    async fn test_lists_numbered_entries() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        shell.history.add("ls", Some(0));
        shell.history.add("pwd", Some(0));
        shell.history.add("echo hi", Some(0));

        let result = run_builtin(&HistoryCmd, &[], &mut shell, &mut stdin).await;
        assert_eq!(result.stdout, "    1  ls\n    2  pwd\n    3  echo hi\n");

        let result = run_builtin(&HistoryCmd, &["2"], &mut shell, &mut stdin).await;
        assert_eq!(result.stdout, "    2  pwd\n    3  echo hi\n");

        let result = run_builtin(&HistoryCmd, &["x"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 2);
    }

    #[tokio::test]
    async fn test_clear_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist");
        let mut shell = test_shell();
        shell.history = History::new(HistoryConfig::new().file(&path));
        let mut stdin = StdinSource::Null;
        shell.history.add("make", None);

        run_builtin(&HistoryCmd, &["-w"], &mut shell, &mut stdin).await;
        run_builtin(&HistoryCmd, &["-c"], &mut shell, &mut stdin).await;
        assert!(shell.history.is_empty());

        run_builtin(&HistoryCmd, &["-r"], &mut shell, &mut stdin).await;
        assert_eq!(shell.history.last().unwrap().command, "make");
    }
}
