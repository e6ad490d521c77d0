//! read builtin - read a line of input

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::expand::Value;
use crate::interpreter::ExecResult;

/// read builtin - read a line of input into variables
///
/// `read [-r] [-p PROMPT] [-a ARRAY] [NAME...]`. Fields are split on `$IFS`;
/// the last name receives the rest of the line. Without names the line goes
/// to `REPLY`. Returns 1 at end of input.
pub struct Read;

#[async_trait]
impl Builtin for Read {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut raw = false;
        let mut prompt = None;
        let mut array = None;
        let mut names = Vec::new();
        let mut args = ctx.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-r" => raw = true,
                "-p" => prompt = args.next().cloned(),
                "-a" => array = args.next().cloned(),
                flag if flag.starts_with('-') && flag.len() > 1 && names.is_empty() => {
                    return Ok(ExecResult::err(
                        format!("jobsh: read: {}: invalid option\n", flag),
                        2,
                    ));
                }
                _ => names.push(arg.clone()),
            }
        }

        let mut stderr = String::new();
        if let Some(prompt) = prompt
            && ctx.shell.interactive
        {
            stderr.push_str(&prompt);
        }

        // Without -r a trailing backslash joins the next line
        let mut line = String::new();
        let mut complete = false;
        while let Some(chunk) = ctx.stdin.read_line().await? {
            let (body, had_newline) = match chunk.strip_suffix('\n') {
                Some(body) => (body.to_string(), true),
                None => (chunk, false),
            };
            if !raw && had_newline && body.ends_with('\\') {
                line.push_str(&body[..body.len() - 1]);
                continue;
            }
            line.push_str(&body);
            complete = had_newline;
            break;
        }
        if line.is_empty() && !complete {
            return Ok(ExecResult::err(stderr, 1));
        }
        if !raw {
            line = unescape(&line);
        }

        let ifs = ctx.shell.get("IFS").unwrap_or_else(|| " \t\n".to_string());
        let status = i32::from(!complete);

        if let Some(array) = array {
            let fields = split_fields(&line, &ifs, usize::MAX);
            if let Err(message) = ctx.shell.set(&array, Value::Indexed(fields)) {
                stderr.push_str(&format!("jobsh: read: {}\n", message));
                return Ok(ExecResult::err(stderr, 1));
            }
            return Ok(ExecResult::err(stderr, status));
        }

        if names.is_empty() {
            names.push("REPLY".to_string());
            if let Err(message) = ctx.shell.set_scalar("REPLY", line) {
                stderr.push_str(&format!("jobsh: read: {}\n", message));
                return Ok(ExecResult::err(stderr, 1));
            }
            return Ok(ExecResult::err(stderr, status));
        }

        let mut fields = split_fields(&line, &ifs, names.len()).into_iter();
        for name in &names {
            let value = fields.next().unwrap_or_default();
            if let Err(message) = ctx.shell.set_scalar(name, value) {
                stderr.push_str(&format!("jobsh: read: {}\n", message));
                return Ok(ExecResult::err(stderr, 1));
            }
        }
        Ok(ExecResult::err(stderr, status))
    }
}

/// Drop backslashes, keeping the character they escape.
fn unescape(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Split into at most `max` fields; the last one keeps the remainder with
/// surrounding IFS whitespace trimmed.
fn split_fields(line: &str, ifs: &str, max: usize) -> Vec<String> {
    if ifs.is_empty() {
        return vec![line.to_string()];
    }
    let is_ifs = |c: char| ifs.contains(c);
    let is_ws = |c: char| ifs.contains(c) && c.is_whitespace();

    let mut fields = Vec::new();
    let mut rest = line.trim_start_matches(is_ws);
    while !rest.is_empty() {
        if fields.len() + 1 == max {
            fields.push(rest.trim_end_matches(is_ws).to_string());
            break;
        }
        match rest.find(is_ifs) {
            Some(idx) => {
                fields.push(rest[..idx].to_string());
                let sep = rest[idx..].chars().next().map_or(1, char::len_utf8);
                rest = rest[idx + sep..].trim_start_matches(is_ws);
            }
            None => {
                fields.push(rest.to_string());
                break;
            }
        }
    }
    fields
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::StdinSource;

    #[tokio::test]
    async fn test_read_splits_fields() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::text("  one two   three four\nnext\n");
        let result = run_builtin(&Read, &["a", "b"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(shell.get("a").as_deref(), Some("one"));
        assert_eq!(shell.get("b").as_deref(), Some("two   three four"));

        run_builtin(&Read, &[], &mut shell, &mut stdin).await;
        assert_eq!(shell.get("REPLY").as_deref(), Some("next"));

        let result = run_builtin(&Read, &["x"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_read_custom_ifs_and_array() {
        let mut shell = test_shell();
        shell.set_scalar("IFS", ":").unwrap();
        let mut stdin = StdinSource::text("a:b:c\n");
        run_builtin(&Read, &["-a", "parts"], &mut shell, &mut stdin).await;
        assert_eq!(
            shell.var("parts").unwrap().value,
            Value::Indexed(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[tokio::test]
    async fn test_read_backslashes() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::text("a\\\nb c\\d\n");
        run_builtin(&Read, &["v"], &mut shell, &mut stdin).await;
        assert_eq!(shell.get("v").as_deref(), Some("ab cd"));

        let mut stdin = StdinSource::text("a\\b\n");
        run_builtin(&Read, &["-r", "v"], &mut shell, &mut stdin).await;
        assert_eq!(shell.get("v").as_deref(), Some("a\\b"));
    }

    #[tokio::test]
    async fn test_read_last_line_without_newline() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::text("tail");
        let result = run_builtin(&Read, &["v"], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 1);
        assert_eq!(shell.get("v").as_deref(), Some("tail"));
    }
}
