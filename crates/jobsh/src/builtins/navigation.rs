//! Navigation builtins (cd, pwd)

use async_trait::async_trait;

use super::{Builtin, Context, resolve_path};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The cd builtin - change directory.
///
/// `cd` alone goes to `$HOME`, `cd -` to `$OLDPWD` (printing it). `PWD` and
/// `OLDPWD` are updated on success.
pub struct Cd;

#[async_trait]
impl Builtin for Cd {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut print_target = false;
        let target = match ctx.args.first().map(String::as_str) {
            None => match ctx.shell.home() {
                Some(home) => home,
                None => return Ok(ExecResult::err("jobsh: cd: HOME not set\n", 1)),
            },
            Some("-") => match ctx.shell.get("OLDPWD") {
                Some(old) => {
                    print_target = true;
                    old
                }
                None => return Ok(ExecResult::err("jobsh: cd: OLDPWD not set\n", 1)),
            },
            Some(dir) => dir.to_string(),
        };

        let new_path = resolve_path(&ctx.shell.cwd, &target);
        match tokio::fs::metadata(&new_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Ok(ExecResult::err(
                    format!("jobsh: cd: {}: Not a directory\n", target),
                    1,
                ));
            }
            Err(_) => {
                return Ok(ExecResult::err(
                    format!("jobsh: cd: {}: No such file or directory\n", target),
                    1,
                ));
            }
        }

        let old = ctx.shell.cwd.to_string_lossy().to_string();
        let new = new_path.to_string_lossy().to_string();
        let _ = ctx.shell.set_scalar("OLDPWD", old);
        let _ = ctx.shell.set_scalar("PWD", new.clone());
        ctx.shell.cwd = new_path;

        if print_target {
            return Ok(ExecResult::ok(format!("{}\n", new)));
        }
        Ok(ExecResult::code(0))
    }
}

/// The pwd builtin - print working directory.
pub struct Pwd;

#[async_trait]
impl Builtin for Pwd {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::ok(format!("{}\n", ctx.shell.cwd.display())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::StdinSource;

    #[tokio::test]
    async fn test_cd_and_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let mut shell = test_shell();
        shell.cwd = dir.path().to_path_buf();
        let mut stdin = StdinSource::Null;

        let result = run_builtin(&Cd, &["sub"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(shell.cwd, dir.path().join("sub"));
        assert_eq!(shell.get("PWD"), Some(dir.path().join("sub").display().to_string()));

        let result = run_builtin(&Cd, &["-"], &mut shell, &mut stdin).await;
        assert_eq!(result.stdout, format!("{}\n", dir.path().display()));
        assert_eq!(shell.cwd, dir.path());

        let result = run_builtin(&Pwd, &[], &mut shell, &mut stdin).await;
        assert_eq!(result.stdout, format!("{}\n", dir.path().display()));
    }

    #[tokio::test]
    async fn test_cd_errors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file"), "").unwrap();
        let mut shell = test_shell();
        shell.cwd = dir.path().to_path_buf();
        let mut stdin = StdinSource::Null;

        let result = run_builtin(&Cd, &["missing"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("No such file or directory"));
        let result = run_builtin(&Cd, &["file"], &mut shell, &mut stdin).await;
        assert!(result.stderr.contains("Not a directory"));
        assert_eq!(shell.cwd, dir.path());
    }
}
