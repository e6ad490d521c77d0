//! export builtin - mark variables for export

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::expand::Value;
use crate::interpreter::ExecResult;
use crate::parser::is_valid_name;

/// export builtin - mark variables for export to child processes
///
/// `export NAME=VALUE` assigns and exports, `export NAME` exports,
/// `export -n NAME` removes the export flag, and `export` / `export -p`
/// lists exported variables.
pub struct Export;

#[async_trait]
impl Builtin for Export {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut unexport = false;
        let mut names = Vec::new();
        for arg in ctx.args {
            match arg.as_str() {
                "-n" => unexport = true,
                "-p" => {}
                _ => names.push(arg),
            }
        }

        if names.is_empty() {
            let mut output = String::new();
            for (name, value) in ctx.shell.exported() {
                output.push_str(&format!("export {}={}\n", name, quote(&value)));
            }
            return Ok(ExecResult::ok(output));
        }

        let mut errors = String::new();
        for arg in names {
            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (arg.as_str(), None),
            };
            if !is_valid_name(name) {
                errors.push_str(&format!("jobsh: export: `{}': not a valid identifier\n", arg));
                continue;
            }
            if unexport {
                ctx.shell.unexport(name);
                continue;
            }
            if let Some(value) = value
                && let Err(message) = ctx.shell.set(name, Value::Scalar(value.to_string()))
            {
                errors.push_str(&format!("jobsh: export: {}\n", message));
                continue;
            }
            ctx.shell.export(name);
        }

        let status = i32::from(!errors.is_empty());
        Ok(ExecResult::err(errors, status))
    }
}

/// Single-quote a value for re-input.
pub(crate) fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_/.:-=+@,%".contains(c));
    if plain {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::StdinSource;

    #[tokio::test]
    async fn test_export_assign_and_list() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        let result = run_builtin(&Export, &["GREETING=hello world"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(shell.child_env().get("GREETING").map(String::as_str), Some("hello world"));

        let result = run_builtin(&Export, &[], &mut shell, &mut stdin).await;
        assert_eq!(result.stdout, "export GREETING='hello world'\n");
    }

    #[tokio::test]
    async fn test_export_existing_and_unexport() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        shell.set_scalar("X", "1").unwrap();
        assert!(!shell.child_env().contains_key("X"));
        run_builtin(&Export, &["X"], &mut shell, &mut stdin).await;
        assert!(shell.child_env().contains_key("X"));
        run_builtin(&Export, &["-n", "X"], &mut shell, &mut stdin).await;
        assert!(!shell.child_env().contains_key("X"));
        assert_eq!(shell.get("X").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_export_invalid_name() {
        let mut shell = test_shell();
        let result = run_builtin(&Export, &["1X=2"], &mut shell, &mut StdinSource::Null).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("not a valid identifier"));
    }
}
