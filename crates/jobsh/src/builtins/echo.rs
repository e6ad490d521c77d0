//! echo builtin command

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// The echo builtin command.
pub struct Echo;

#[async_trait]
impl Builtin for Echo {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut add_newline = true;
        let mut interpret_escapes = false;
        let mut args = ctx.args.iter().peekable();

        // Flags only count when every letter is one of n, e, E
        while let Some(arg) = args.peek() {
            let Some(flags) = arg.strip_prefix('-') else {
                break;
            };
            if flags.is_empty() || !flags.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
                break;
            }
            for flag in flags.chars() {
                match flag {
                    'n' => add_newline = false,
                    'e' => interpret_escapes = true,
                    _ => interpret_escapes = false,
                }
            }
            args.next();
        }

        let mut output = String::new();
        for (i, arg) in args.enumerate() {
            if i > 0 {
                output.push(' ');
            }
            if interpret_escapes {
                let (text, stop) = interpret_escape_sequences(arg);
                output.push_str(&text);
                if stop {
                    return Ok(ExecResult::ok(output));
                }
            } else {
                output.push_str(arg);
            }
        }

        if add_newline {
            output.push('\n');
        }
        Ok(ExecResult::ok(output))
    }
}

/// Expand backslash escapes. The flag is set when `\c` ended the output.
pub(crate) fn interpret_escape_sequences(s: &str) -> (String, bool) {
    let mut result = String::new();
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('\\') => result.push('\\'),
            Some('a') => result.push('\x07'),
            Some('b') => result.push('\x08'),
            Some('e') => result.push('\x1b'),
            Some('f') => result.push('\x0c'),
            Some('v') => result.push('\x0b'),
            Some('0') => {
                let mut value = 0u32;
                for _ in 0..3 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            value = value * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                result.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            Some('x') => {
                let mut value = 0u32;
                let mut seen = 0;
                while seen < 2 {
                    match chars.peek().and_then(|d| d.to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            chars.next();
                            seen += 1;
                        }
                        None => break,
                    }
                }
                if seen == 0 {
                    result.push_str("\\x");
                } else {
                    result.push(char::from_u32(value).unwrap_or('\u{fffd}'));
                }
            }
            Some('c') => return (result, true),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    (result, false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::StdinSource;

    async fn echo(args: &[&str]) -> String {
        let mut shell = test_shell();
        run_builtin(&Echo, args, &mut shell, &mut StdinSource::Null)
            .await
            .stdout
    }

    #[test]
    fn test_escape_sequences() {
        assert_eq!(interpret_escape_sequences("hello\\nworld").0, "hello\nworld");
        assert_eq!(interpret_escape_sequences("tab\\there").0, "tab\there");
        assert_eq!(interpret_escape_sequences("\\x41\\0101").0, "AA");
        assert_eq!(interpret_escape_sequences("stop\\chere"), ("stop".to_string(), true));
    }

    #[tokio::test]
    async fn test_echo_flags() {
        assert_eq!(echo(&["a", "b"]).await, "a b\n");
        assert_eq!(echo(&["-n", "a"]).await, "a");
        assert_eq!(echo(&["-ne", "a\\tb"]).await, "a\tb");
        assert_eq!(echo(&["-x", "a"]).await, "-x a\n");
        assert_eq!(echo(&["-e", "a\\cb", "c"]).await, "a");
    }
}
