//! trap builtin

use async_trait::async_trait;
use nix::sys::signal::Signal;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;
use crate::jobs::process::parse_signal;

/// Canonical trap name: `EXIT`, `ERR`, or a signal name without `SIG`.
fn trap_name(spec: &str) -> Option<String> {
    match spec.to_ascii_uppercase().as_str() {
        "EXIT" | "0" => return Some("EXIT".to_string()),
        "ERR" => return Some("ERR".to_string()),
        _ => {}
    }
    let signal = parse_signal(spec)?;
    match signal {
        Signal::SIGKILL | Signal::SIGSTOP => None,
        other => Some(other.as_str().trim_start_matches("SIG").to_string()),
    }
}

/// trap builtin - run a command on shell exit, errors or signals
///
/// `trap CMD NAME...` sets, `trap - NAME...` resets, `trap '' NAME...`
/// ignores. Without arguments (or with `-p`) prints the traps in a form
/// that can be re-read.
pub struct Trap;

#[async_trait]
impl Builtin for Trap {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let args: Vec<&str> = ctx.args.iter().map(String::as_str).collect();
        match args.as_slice() {
            [] | ["-p"] => return Ok(ExecResult::ok(listing(ctx.shell.traps.iter()))),
            ["-p", names @ ..] => {
                let wanted: Vec<String> = names.iter().filter_map(|n| trap_name(n)).collect();
                let shown = ctx.shell.traps.iter().filter(|(k, _)| wanted.contains(k));
                return Ok(ExecResult::ok(listing(shown)));
            }
            ["-l"] => {
                let names: Vec<&str> = Signal::iterator()
                    .map(|s| s.as_str().trim_start_matches("SIG"))
                    .collect();
                return Ok(ExecResult::ok(format!("{}\n", names.join(" "))));
            }
            _ => {}
        }

        let args = match args.as_slice() {
            ["--", rest @ ..] => rest,
            all => all,
        };
        // A lone signal name resets that trap
        let (action, names) = match args {
            [name] if trap_name(name).is_some() => (None, &args[..]),
            [action, names @ ..] if !names.is_empty() => {
                let action = if *action == "-" { None } else { Some(*action) };
                (action, names)
            }
            _ => {
                return Ok(ExecResult::err(
                    "jobsh: trap: usage: trap [-lp] [[arg] signal_spec ...]\n",
                    2,
                ));
            }
        };

        let mut result = ExecResult::default();
        for spec in names {
            let Some(name) = trap_name(spec) else {
                result.stderr.push_str(&format!(
                    "jobsh: trap: {}: invalid signal specification\n",
                    spec
                ));
                result.exit_code = 1;
                continue;
            };
            match action {
                Some(command) => {
                    ctx.shell.traps.insert(name, command.to_string());
                }
                None => {
                    ctx.shell.traps.remove(&name);
                }
            }
        }
        Ok(result)
    }
}

fn listing<'a>(traps: impl Iterator<Item = (&'a String, &'a String)>) -> String {
    traps
        .map(|(name, command)| {
            let command = if command.is_empty() {
                "''".to_string()
            } else {
                format!("'{}'", command.replace('\'', "'\\''"))
            };
            format!("trap -- {} {}\n", command, name)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::StdinSource;

    #[test]
    fn test_trap_names() {
        assert_eq!(trap_name("0").as_deref(), Some("EXIT"));
        assert_eq!(trap_name("exit").as_deref(), Some("EXIT"));
        assert_eq!(trap_name("SIGINT").as_deref(), Some("INT"));
        assert_eq!(trap_name("2").as_deref(), Some("INT"));
        assert_eq!(trap_name("term").as_deref(), Some("TERM"));
        assert_eq!(trap_name("KILL"), None);
        assert_eq!(trap_name("NOPE"), None);
    }

    #[tokio::test]
    async fn test_set_list_reset() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        run_builtin(&Trap, &["echo bye", "EXIT", "SIGTERM"], &mut shell, &mut stdin).await;
        run_builtin(&Trap, &["", "INT"], &mut shell, &mut stdin).await;
        let result = run_builtin(&Trap, &[], &mut shell, &mut stdin).await;
        assert_eq!(
            result.stdout,
            "trap -- 'echo bye' EXIT\ntrap -- '' INT\ntrap -- 'echo bye' TERM\n"
        );

        run_builtin(&Trap, &["-", "EXIT"], &mut shell, &mut stdin).await;
        run_builtin(&Trap, &["TERM"], &mut shell, &mut stdin).await;
        assert_eq!(shell.traps.len(), 1);
        assert_eq!(shell.traps.get("INT").map(String::as_str), Some(""));
    }

    #[tokio::test]
    async fn test_invalid_signal() {
        let mut shell = test_shell();
        let result = run_builtin(&Trap, &["x", "BOGUS"], &mut shell, &mut StdinSource::Null).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("invalid signal specification"));
    }
}
