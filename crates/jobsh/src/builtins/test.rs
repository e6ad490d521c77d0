//! test builtin command ([ and test)

use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::Path;

use async_trait::async_trait;

use super::{Builtin, Context, resolve_path};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The test builtin command.
pub struct Test;

#[async_trait]
impl Builtin for Test {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        Ok(outcome("test", evaluate(ctx.args, &ctx.shell.cwd)))
    }
}

/// The [ builtin (alias for test, but expects ] as last arg)
pub struct Bracket;

#[async_trait]
impl Builtin for Bracket {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let Some((_, args)) = ctx.args.split_last().filter(|(l, _)| l.as_str() == "]") else {
            return Ok(ExecResult::err("jobsh: [: missing `]'\n", 2));
        };
        Ok(outcome("[", evaluate(args, &ctx.shell.cwd)))
    }
}

fn outcome(name: &str, result: std::result::Result<bool, String>) -> ExecResult {
    match result {
        Ok(true) => ExecResult::code(0),
        Ok(false) => ExecResult::code(1),
        Err(message) => ExecResult::err(format!("jobsh: {}: {}\n", name, message), 2),
    }
}

/// Evaluate a test expression. `Err` is a usage error (status 2).
fn evaluate(args: &[String], cwd: &Path) -> std::result::Result<bool, String> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match args.as_slice() {
        [] => Ok(false),
        _ => Expr { args: &args, pos: 0, cwd }.parse(),
    }
}

/// Recursive descent over `-o`, `-a`, `!` and `( )`.
struct Expr<'a> {
    args: &'a [&'a str],
    pos: usize,
    cwd: &'a Path,
}

impl<'a> Expr<'a> {
    fn parse(mut self) -> std::result::Result<bool, String> {
        let value = self.or()?;
        match self.args.get(self.pos) {
            None => Ok(value),
            Some(extra) => Err(format!("{}: unexpected argument", extra)),
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.args.get(self.pos).copied()
    }

    fn remaining(&self) -> usize {
        self.args.len() - self.pos
    }

    fn or(&mut self) -> std::result::Result<bool, String> {
        let mut value = self.and()?;
        while self.peek() == Some("-o") {
            self.pos += 1;
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> std::result::Result<bool, String> {
        let mut value = self.not()?;
        while self.peek() == Some("-a") {
            self.pos += 1;
            let rhs = self.not()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn not(&mut self) -> std::result::Result<bool, String> {
        // `! x` negates unless `!` is itself the operand of a binary test
        if self.peek() == Some("!") && !(self.remaining() == 3 && is_binary(self.args[self.pos + 1])) {
            self.pos += 1;
            return Ok(!self.not()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> std::result::Result<bool, String> {
        let Some(first) = self.peek() else {
            return Err("argument expected".to_string());
        };

        if self.remaining() >= 3 && is_binary(self.args[self.pos + 1]) {
            let (lhs, op, rhs) = (first, self.args[self.pos + 1], self.args[self.pos + 2]);
            self.pos += 3;
            return binary(lhs, op, rhs, self.cwd);
        }

        if first == "(" {
            self.pos += 1;
            let value = self.or()?;
            if self.peek() != Some(")") {
                return Err("`)' expected".to_string());
            }
            self.pos += 1;
            return Ok(value);
        }

        if self.remaining() >= 2 && is_unary(first) {
            let operand = self.args[self.pos + 1];
            self.pos += 2;
            return Ok(unary(first, operand, self.cwd));
        }

        self.pos += 1;
        Ok(!first.is_empty())
    }
}

fn is_unary(op: &str) -> bool {
    matches!(
        op,
        "-z" | "-n" | "-e" | "-f" | "-d" | "-s" | "-r" | "-w" | "-x" | "-L" | "-h" | "-p" | "-S"
    )
}

fn is_binary(op: &str) -> bool {
    matches!(
        op,
        "=" | "==" | "!=" | "<" | ">" | "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" | "-nt" | "-ot"
    )
}

fn unary(op: &str, arg: &str, cwd: &Path) -> bool {
    match op {
        "-z" => return arg.is_empty(),
        "-n" => return !arg.is_empty(),
        _ => {}
    }
    let path = resolve_path(cwd, arg);
    if matches!(op, "-L" | "-h") {
        return std::fs::symlink_metadata(&path).is_ok_and(|m| m.file_type().is_symlink());
    }
    let Ok(meta) = std::fs::metadata(&path) else {
        return false;
    };
    let mode = meta.permissions().mode();
    match op {
        "-e" => true,
        "-f" => meta.is_file(),
        "-d" => meta.is_dir(),
        "-s" => meta.len() > 0,
        "-p" => meta.file_type().is_fifo(),
        "-S" => meta.file_type().is_socket(),
        "-r" => access(&path, nix::unistd::AccessFlags::R_OK, mode & 0o444 != 0),
        "-w" => access(&path, nix::unistd::AccessFlags::W_OK, mode & 0o222 != 0),
        "-x" => access(&path, nix::unistd::AccessFlags::X_OK, mode & 0o111 != 0),
        _ => false,
    }
}

/// Permission check for the current user, falling back to mode bits.
fn access(path: &Path, flags: nix::unistd::AccessFlags, fallback: bool) -> bool {
    match nix::unistd::access(path, flags) {
        Ok(()) => true,
        Err(nix::errno::Errno::EACCES) => false,
        Err(_) => fallback,
    }
}

fn binary(lhs: &str, op: &str, rhs: &str, cwd: &Path) -> std::result::Result<bool, String> {
    let int = |s: &str| {
        s.trim()
            .parse::<i64>()
            .map_err(|_| format!("{}: integer expression expected", s))
    };
    Ok(match op {
        "=" | "==" => lhs == rhs,
        "!=" => lhs != rhs,
        "<" => lhs < rhs,
        ">" => lhs > rhs,
        "-eq" => int(lhs)? == int(rhs)?,
        "-ne" => int(lhs)? != int(rhs)?,
        "-lt" => int(lhs)? < int(rhs)?,
        "-le" => int(lhs)? <= int(rhs)?,
        "-gt" => int(lhs)? > int(rhs)?,
        "-ge" => int(lhs)? >= int(rhs)?,
        "-nt" | "-ot" => {
            let mtime = |s: &str| std::fs::metadata(resolve_path(cwd, s)).ok().map(|m| m.mtime());
            match (mtime(lhs), mtime(rhs)) {
                (Some(a), Some(b)) if op == "-nt" => a > b,
                (Some(a), Some(b)) => a < b,
                (Some(_), None) => op == "-nt",
                (None, Some(_)) => op == "-ot",
                (None, None) => false,
            }
        }
        _ => return Err(format!("{}: binary operator expected", op)),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::StdinSource;

    fn eval(args: &[&str]) -> std::result::Result<bool, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        evaluate(&args, Path::new("/"))
    }

    #[test]
    fn test_strings() {
        assert_eq!(eval(&[]), Ok(false));
        assert_eq!(eval(&["x"]), Ok(true));
        assert_eq!(eval(&[""]), Ok(false));
        assert_eq!(eval(&["-z", ""]), Ok(true));
        assert_eq!(eval(&["-n", ""]), Ok(false));
        assert_eq!(eval(&["a", "=", "a"]), Ok(true));
        assert_eq!(eval(&["a", "!=", "a"]), Ok(false));
        assert_eq!(eval(&["a", "<", "b"]), Ok(true));
    }

    #[test]
    fn test_integers() {
        assert_eq!(eval(&["3", "-lt", "10"]), Ok(true));
        assert_eq!(eval(&["-5", "-ge", "-5"]), Ok(true));
        assert_eq!(eval(&["2", "-ne", "2"]), Ok(false));
        assert!(eval(&["abc", "-eq", "1"]).unwrap_err().contains("integer expression expected"));
    }

    #[test]
    fn test_logic_and_grouping() {
        assert_eq!(eval(&["!", "a", "=", "b"]), Ok(true));
        assert_eq!(eval(&["a", "-a", ""]), Ok(false));
        assert_eq!(eval(&["", "-o", "a"]), Ok(true));
        assert_eq!(eval(&["(", "", "-o", "x", ")", "-a", "y"]), Ok(true));
        assert_eq!(eval(&["!", "=", "!"]), Ok(true));
    }

    #[test]
    fn test_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "data").unwrap();
        std::fs::write(dir.path().join("empty"), "").unwrap();
        let args = |op: &str, name: &str| vec![op.to_string(), name.to_string()];
        let run = |a: Vec<String>| evaluate(&a, dir.path()).unwrap();
        assert!(run(args("-e", "f")));
        assert!(run(args("-f", "f")));
        assert!(!run(args("-d", "f")));
        assert!(run(args("-d", ".")));
        assert!(run(args("-s", "f")));
        assert!(!run(args("-s", "empty")));
        assert!(run(args("-r", "f")));
        assert!(!run(args("-e", "missing")));
        assert!(!run(args("-x", "f")));
    }

    #[tokio::test]
    async fn test_bracket_requires_closing() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        let result = run_builtin(&Bracket, &["a", "=", "a"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 2);
        let result = run_builtin(&Bracket, &["a", "=", "a", "]"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 0);
        let result = run_builtin(&Bracket, &["]"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 1);
    }
}
