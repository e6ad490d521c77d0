//! printf builtin - formatted output

use async_trait::async_trait;

use super::echo::interpret_escape_sequences;
use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// printf builtin - formatted string output
///
/// Supports `%s %b %c %d %i %u %o %x %X %f %%` with `-`, `0`, `+` flags,
/// width and precision, and `-v NAME` to assign instead of print. The
/// format is reused until every argument is consumed.
pub struct Printf;

#[async_trait]
impl Builtin for Printf {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut args = ctx.args;
        let mut target = None;
        if args.first().map(String::as_str) == Some("-v") {
            let Some(name) = args.get(1) else {
                return Ok(ExecResult::err("jobsh: printf: -v: option requires an argument\n", 2));
            };
            target = Some(name.clone());
            args = &args[2..];
        }
        if args.first().map(String::as_str) == Some("--") {
            args = &args[1..];
        }
        let Some((format, values)) = args.split_first() else {
            return Ok(ExecResult::err("jobsh: printf: usage: printf [-v var] format [arguments]\n", 2));
        };

        let mut formatter = Formatter {
            values,
            next: 0,
            errors: String::new(),
        };
        let mut output = String::new();
        loop {
            let start = formatter.next;
            if formatter.render(format, &mut output) {
                break;
            }
            if formatter.next == start || formatter.next >= values.len() {
                break;
            }
        }

        let status = i32::from(!formatter.errors.is_empty());
        if let Some(name) = target {
            if let Err(message) = ctx.shell.set_scalar(&name, output) {
                return Ok(ExecResult::err(format!("jobsh: printf: {}\n", message), 1));
            }
            return Ok(ExecResult::err(formatter.errors, status));
        }
        Ok(ExecResult {
            stdout: output,
            stderr: formatter.errors,
            exit_code: status,
            ..Default::default()
        })
    }
}

/// Flags, width and precision of one conversion.
#[derive(Default)]
struct FormatSpec {
    left_align: bool,
    zero_pad: bool,
    sign_plus: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl FormatSpec {
    fn parse(spec: &str) -> Self {
        let mut out = FormatSpec::default();
        let mut rest = spec;
        while let Some(c) = rest.chars().next() {
            match c {
                '-' => out.left_align = true,
                '0' => out.zero_pad = true,
                '+' => out.sign_plus = true,
                ' ' | '#' => {}
                _ => break,
            }
            rest = &rest[1..];
        }
        let (width, precision) = match rest.split_once('.') {
            Some((w, p)) => (w, Some(p)),
            None => (rest, None),
        };
        out.width = width.parse().ok();
        out.precision = precision.map(|p| p.parse().unwrap_or(0));
        out
    }

    fn pad(&self, text: &str, numeric: bool) -> String {
        let len = text.chars().count();
        let Some(width) = self.width.filter(|w| *w > len) else {
            return text.to_string();
        };
        let fill = width - len;
        if self.left_align {
            format!("{}{}", text, " ".repeat(fill))
        } else if self.zero_pad && numeric {
            let (sign, digits) = match text.chars().next() {
                Some(c @ ('-' | '+')) => (c.to_string(), &text[1..]),
                _ => (String::new(), text),
            };
            format!("{}{}{}", sign, "0".repeat(fill), digits)
        } else {
            format!("{}{}", " ".repeat(fill), text)
        }
    }

    fn signed(&self, n: i64) -> String {
        if self.sign_plus && n >= 0 {
            format!("+{}", n)
        } else {
            n.to_string()
        }
    }
}

struct Formatter<'a> {
    values: &'a [String],
    next: usize,
    errors: String,
}

impl Formatter<'_> {
    fn take(&mut self) -> &str {
        let value = self.values.get(self.next).map_or("", String::as_str);
        self.next += 1;
        value
    }

    /// Numeric argument; `'c` gives the character code.
    fn number(&mut self) -> i64 {
        let raw = self.take().to_string();
        let text = raw.trim();
        if text.is_empty() {
            return 0;
        }
        if let Some(c) = text.strip_prefix('\'').or_else(|| text.strip_prefix('"')) {
            return c.chars().next().map_or(0, |c| i64::from(u32::from(c)));
        }
        let parsed = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()
        } else {
            text.parse::<i64>().ok()
        };
        parsed.unwrap_or_else(|| {
            self.errors
                .push_str(&format!("jobsh: printf: {}: invalid number\n", raw));
            0
        })
    }

    /// Render the format once. Returns true when `\c` stopped output.
    fn render(&mut self, format: &str, out: &mut String) -> bool {
        let mut chars = format.char_indices().peekable();
        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' => {
                    // Reuse echo's escape handling on the escape alone
                    let end = chars
                        .peek()
                        .map_or(format.len(), |(i, c)| i + c.len_utf8());
                    let mut escape_end = end;
                    if matches!(format.get(idx + 1..end), Some("0" | "x")) {
                        let radix_digits = if &format[idx + 1..end] == "0" { 3 } else { 2 };
                        let mut taken = 0;
                        chars.next();
                        while taken < radix_digits {
                            match chars.peek() {
                                Some((i, c)) if c.is_ascii_hexdigit() => {
                                    escape_end = i + 1;
                                    chars.next();
                                    taken += 1;
                                }
                                _ => break,
                            }
                        }
                    } else {
                        chars.next();
                    }
                    let (text, stop) = interpret_escape_sequences(&format[idx..escape_end]);
                    out.push_str(&text);
                    if stop {
                        return true;
                    }
                }
                '%' => {
                    if let Some((_, '%')) = chars.peek() {
                        chars.next();
                        out.push('%');
                        continue;
                    }
                    let mut spec = String::new();
                    while let Some((_, c)) = chars.peek() {
                        if c.is_ascii_digit() || matches!(c, '-' | '+' | ' ' | '#' | '.') {
                            spec.push(*c);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let Some((_, conversion)) = chars.next() else {
                        out.push('%');
                        out.push_str(&spec);
                        break;
                    };
                    if self.convert(conversion, &FormatSpec::parse(&spec), out) {
                        return true;
                    }
                }
                _ => out.push(ch),
            }
        }
        false
    }

    fn convert(&mut self, conversion: char, spec: &FormatSpec, out: &mut String) -> bool {
        match conversion {
            's' => {
                let value = self.take();
                let value: String = match spec.precision {
                    Some(p) => value.chars().take(p).collect(),
                    None => value.to_string(),
                };
                out.push_str(&spec.pad(&value, false));
            }
            'b' => {
                let (text, stop) = interpret_escape_sequences(self.take());
                out.push_str(&spec.pad(&text, false));
                return stop;
            }
            'c' => {
                let value: String = self.take().chars().take(1).collect();
                out.push_str(&spec.pad(&value, false));
            }
            'd' | 'i' => {
                let n = self.number();
                out.push_str(&spec.pad(&spec.signed(n), true));
            }
            'u' => {
                let n = self.number() as u64;
                out.push_str(&spec.pad(&n.to_string(), true));
            }
            'o' => {
                let n = self.number();
                out.push_str(&spec.pad(&format!("{:o}", n), true));
            }
            'x' => {
                let n = self.number();
                out.push_str(&spec.pad(&format!("{:x}", n), true));
            }
            'X' => {
                let n = self.number();
                out.push_str(&spec.pad(&format!("{:X}", n), true));
            }
            'f' => {
                let raw = self.take().trim().to_string();
                let value = if raw.is_empty() {
                    0.0
                } else {
                    raw.parse::<f64>().unwrap_or_else(|_| {
                        self.errors
                            .push_str(&format!("jobsh: printf: {}: invalid number\n", raw));
                        0.0
                    })
                };
                let precision = spec.precision.unwrap_or(6);
                let mut text = format!("{:.*}", precision, value);
                if spec.sign_plus && value >= 0.0 {
                    text.insert(0, '+');
                }
                out.push_str(&spec.pad(&text, true));
            }
            other => {
                out.push('%');
                out.push(other);
            }
        }
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::StdinSource;

    async fn printf(args: &[&str]) -> ExecResult {
        let mut shell = test_shell();
        run_builtin(&Printf, args, &mut shell, &mut StdinSource::Null).await
    }

    #[tokio::test]
    async fn test_basic_conversions() {
        assert_eq!(printf(&["%s-%d%%\\n", "a", "7"]).await.stdout, "a-7%\n");
        assert_eq!(printf(&["%05d|%-4s|%x", "42", "ab", "255"]).await.stdout, "00042|ab  |ff");
        assert_eq!(printf(&["%06d", "-42"]).await.stdout, "-00042");
        assert_eq!(printf(&["%.2f", "3.14159"]).await.stdout, "3.14");
        assert_eq!(printf(&["%.3s", "abcdef"]).await.stdout, "abc");
    }

    #[tokio::test]
    async fn test_format_reuse() {
        assert_eq!(printf(&["%s\\n", "a", "b", "c"]).await.stdout, "a\nb\nc\n");
        assert_eq!(printf(&["%s=%s ", "k"]).await.stdout, "k= ");
    }

    #[tokio::test]
    async fn test_escapes_and_b() {
        assert_eq!(printf(&["a\\tb\\x41\\0101"]).await.stdout, "a\tbAA");
        assert_eq!(printf(&["%b", "x\\ny"]).await.stdout, "x\ny");
    }

    #[tokio::test]
    async fn test_invalid_number() {
        let result = printf(&["%d\\n", "abc"]).await;
        assert_eq!(result.stdout, "0\n");
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("abc: invalid number"));
    }

    #[tokio::test]
    async fn test_assign_with_v() {
        let mut shell = test_shell();
        let result =
            run_builtin(&Printf, &["-v", "out", "%s!", "hi"], &mut shell, &mut StdinSource::Null).await;
        assert_eq!(result.stdout, "");
        assert_eq!(shell.get("out").as_deref(), Some("hi!"));
    }
}
