//! Word expansion inside the executor.
//!
//! Order: tilde, parameter, command substitution and arithmetic, then field
//! splitting of unquoted expansion results on `$IFS`, then pathname expansion
//! of fields with active glob characters.

use crate::error::{Error, Result};
use crate::expand::{arith, glob, param};
use crate::parser::{self, Word, WordPart};

use super::Interpreter;

const DEFAULT_IFS: &str = " \t\n";

/// Text making up part of a field.
#[derive(Debug)]
struct Piece {
    text: String,
    /// Glob characters in `text` are live
    glob: bool,
}

#[derive(Debug, Default)]
struct Field {
    pieces: Vec<Piece>,
    /// Contains quoting, so it survives even when empty
    quoted: bool,
}

impl Field {
    fn is_started(&self) -> bool {
        self.quoted || self.pieces.iter().any(|p| !p.text.is_empty())
    }

    fn text(&self) -> String {
        self.pieces.iter().map(|p| p.text.as_str()).collect()
    }

    fn has_glob(&self) -> bool {
        self.pieces
            .iter()
            .any(|p| p.glob && glob::has_glob_chars(&p.text))
    }

    /// Pattern with quoted pieces escaped.
    fn pattern(&self) -> String {
        let mut out = String::new();
        for piece in &self.pieces {
            if piece.glob {
                out.push_str(&piece.text);
            } else {
                out.push_str(&escape_glob(&piece.text));
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct FieldBuilder {
    done: Vec<Field>,
    current: Field,
}

impl FieldBuilder {
    fn push(&mut self, text: impl Into<String>, glob: bool) {
        self.current.pieces.push(Piece {
            text: text.into(),
            glob,
        });
    }

    fn mark_quoted(&mut self) {
        self.current.quoted = true;
    }

    fn break_field(&mut self) {
        let field = std::mem::take(&mut self.current);
        if field.is_started() {
            self.done.push(field);
        }
    }

    /// Add an unquoted expansion result, splitting it on `ifs`.
    fn push_split(&mut self, value: &str, ifs: &str) {
        if ifs.is_empty() {
            self.push(value, true);
            return;
        }
        let is_ws = |c: char| ifs.contains(c) && c.is_whitespace();
        let is_delim = |c: char| ifs.contains(c) && !c.is_whitespace();

        let mut word = String::new();
        let mut chars = value.chars().peekable();
        // Leading IFS whitespace ends the field in progress
        if value.starts_with(is_ws) {
            self.break_field();
        }
        while let Some(c) = chars.next() {
            if is_delim(c) {
                self.push(std::mem::take(&mut word), true);
                // A delimiter always yields a field, even an empty one
                self.mark_quoted();
                self.break_field();
                while chars.peek().is_some_and(|c| is_ws(*c)) {
                    chars.next();
                }
            } else if is_ws(c) {
                while chars.peek().is_some_and(|c| is_ws(*c)) {
                    chars.next();
                }
                if chars.peek().is_some_and(|c| is_delim(*c)) {
                    continue;
                }
                self.push(std::mem::take(&mut word), true);
                self.break_field();
            } else {
                word.push(c);
            }
        }
        if !word.is_empty() {
            self.push(word, true);
        }
    }

    fn finish(mut self) -> Vec<Field> {
        self.break_field();
        self.done
    }
}

/// Escape glob metacharacters so they match literally.
pub(crate) fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | ',' | '\\' | '!' | '^') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Interpreter {
    fn ifs(&self) -> String {
        self.shell.get("IFS").unwrap_or_else(|| DEFAULT_IFS.to_string())
    }

    /// Expand words into command arguments: splitting and globbing apply.
    pub(crate) async fn expand_words(&mut self, words: &[Word]) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for word in words {
            out.extend(self.expand_word_fields(word).await?);
        }
        Ok(out)
    }

    /// Expand one word into zero or more fields.
    pub(crate) async fn expand_word_fields(&mut self, word: &Word) -> Result<Vec<String>> {
        let ifs = self.ifs();
        let mut builder = FieldBuilder::default();

        for part in &word.parts {
            match part {
                WordPart::Literal(text) => builder.push(text.clone(), true),
                WordPart::Quoted(text) => {
                    builder.mark_quoted();
                    builder.push(text.clone(), false);
                }
                WordPart::Tilde(user) => {
                    let home = self.shell.home();
                    let text = glob::home_dir(user, home.as_deref())
                        .unwrap_or_else(|| format!("~{}", user));
                    builder.push(text, false);
                }
                WordPart::DoubleQuoted(inner) => {
                    self.expand_double_quoted(inner, &mut builder).await?;
                }
                WordPart::Parameter(expr) => {
                    let fields = self.expand_parameter_fields(expr).await?;
                    for (idx, value) in fields.values.iter().enumerate() {
                        if idx > 0 {
                            builder.break_field();
                        }
                        builder.push_split(value, &ifs);
                    }
                }
                WordPart::CommandSubstitution(script) => {
                    let output = self.command_substitution(script).await?;
                    builder.push_split(&output, &ifs);
                }
                WordPart::Arithmetic(expr) => {
                    let value = self.arithmetic(expr).await?;
                    builder.push_split(&value.to_string(), &ifs);
                }
            }
        }

        let mut out = Vec::new();
        for field in builder.finish() {
            if self.shell.options.noglob || !field.has_glob() {
                out.push(field.text());
                continue;
            }
            let pattern = field.pattern();
            let matches = glob::matching_paths(&pattern, &self.shell.cwd);
            if !matches.is_empty() {
                out.extend(matches);
            } else if !self.shell.options.nullglob {
                out.push(field.text());
            }
        }
        Ok(out)
    }

    async fn expand_double_quoted(
        &mut self,
        parts: &[WordPart],
        builder: &mut FieldBuilder,
    ) -> Result<()> {
        let mut produced = parts.is_empty();
        for part in parts {
            match part {
                WordPart::Parameter(expr) => {
                    let fields = self.expand_parameter_fields(expr).await?;
                    if fields.separate {
                        for (idx, value) in fields.values.iter().enumerate() {
                            if idx > 0 {
                                builder.mark_quoted();
                                builder.break_field();
                            }
                            builder.push(value.clone(), false);
                            produced = true;
                        }
                    } else {
                        builder.push(fields.joined(), false);
                        produced = true;
                    }
                }
                other => {
                    let text = self.expand_part_string(other).await?;
                    builder.push(text, false);
                    produced = true;
                }
            }
        }
        // "$@" with no arguments produces no field at all
        if produced {
            builder.mark_quoted();
        }
        Ok(())
    }

    /// Expand a word to a single string: no splitting or globbing.
    pub(crate) async fn expand_word_string(&mut self, word: &Word) -> Result<String> {
        self.expand_parts_string(&word.parts).await
    }

    pub(crate) async fn expand_parts_string(&mut self, parts: &[WordPart]) -> Result<String> {
        let mut out = String::new();
        for part in parts {
            out.push_str(&self.expand_part_string(part).await?);
        }
        Ok(out)
    }

    fn expand_parts_boxed<'a>(
        &'a mut self,
        parts: &'a [WordPart],
    ) -> super::BoxFuture<'a, Result<String>> {
        Box::pin(self.expand_parts_string(parts))
    }

    async fn expand_part_string(&mut self, part: &WordPart) -> Result<String> {
        Ok(match part {
            WordPart::Literal(text) | WordPart::Quoted(text) => text.clone(),
            WordPart::Tilde(user) => {
                let home = self.shell.home();
                glob::home_dir(user, home.as_deref()).unwrap_or_else(|| format!("~{}", user))
            }
            WordPart::DoubleQuoted(inner) => self.expand_parts_boxed(inner).await?,
            WordPart::Parameter(expr) => self.expand_parameter_fields(expr).await?.joined(),
            WordPart::CommandSubstitution(script) => self.command_substitution(script).await?,
            WordPart::Arithmetic(expr) => self.arithmetic(expr).await?.to_string(),
        })
    }

    /// Expand a word as a pattern (`case`): quoted text matches literally.
    pub(crate) async fn expand_pattern(&mut self, word: &Word) -> Result<String> {
        let mut out = String::new();
        for part in &word.parts {
            match part {
                WordPart::Literal(text) => out.push_str(text),
                WordPart::Parameter(expr) => {
                    out.push_str(&self.expand_parameter_fields(expr).await?.joined());
                }
                other => {
                    let text = self.expand_part_string(other).await?;
                    out.push_str(&escape_glob(&text));
                }
            }
        }
        Ok(out)
    }

    async fn expand_parameter_fields(&mut self, expr: &str) -> Result<param::Fields> {
        let expr = if expr.contains("$(") || expr.contains('`') {
            self.presubstitute(expr).await?
        } else {
            expr.to_string()
        };
        param::expand_fields(&mut self.shell, &expr)
    }

    /// Replace `$(...)`, backquotes and `$((...))` inside a parameter
    /// expression with their results.
    async fn presubstitute(&mut self, text: &str) -> Result<String> {
        let mut out = String::new();
        let mut rest = text;
        while let Some(c) = rest.chars().next() {
            let starts_subst = rest.starts_with("$(") || c == '`';
            if c == '\'' {
                let len = crate::parser::construct_len(rest)?;
                out.push_str(&rest[..len]);
                rest = &rest[len..];
            } else if starts_subst {
                let len = crate::parser::construct_len(rest)?;
                let construct = &rest[..len];
                if let Some(expr) = construct
                    .strip_prefix("$((")
                    .and_then(|s| s.strip_suffix("))"))
                {
                    out.push_str(&self.arithmetic(expr).await?.to_string());
                } else {
                    let body = if c == '`' {
                        &construct[1..len - 1]
                    } else {
                        &construct[2..len - 1]
                    };
                    let script = parser::Parser::nested(body, self.counters.substitution_depth + 1)
                        .parse()?;
                    out.push_str(&self.command_substitution(&script).await?);
                }
                rest = &rest[len..];
            } else {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
        Ok(out)
    }

    /// Evaluate `$((expr))`.
    pub(crate) async fn arithmetic(&mut self, expr: &str) -> Result<i64> {
        let expanded = if expr.contains('$') || expr.contains('`') {
            let parts = parser::parse_heredoc(expr, self.counters.substitution_depth)?;
            self.expand_parts_boxed(&parts).await?
        } else {
            expr.to_string()
        };
        arith::evaluate(&mut self.shell, &expanded)
    }

    /// Run `$(...)` and return its output without trailing newlines.
    pub(crate) async fn command_substitution(&mut self, script: &parser::Script) -> Result<String> {
        self.counters
            .push_substitution(&self.limits)
            .map_err(Error::ResourceLimit)?;
        let mut sub = self.subshell();
        sub.capture_depth = 1;
        let result = sub.run_list(&script.body).await;
        self.counters.pop_substitution();
        let mut result = result?;

        self.last_subst_status = Some(result.exit_code);
        if !result.stderr.is_empty() {
            // Diagnostics from the substitution still reach the user
            self.emit_stderr(std::mem::take(&mut result.stderr));
        }
        let mut output = result.stdout;
        let trimmed = output.trim_end_matches('\n').len();
        output.truncate(trimmed);
        Ok(output)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn split(value: &str, ifs: &str) -> Vec<String> {
        let mut b = FieldBuilder::default();
        b.push_split(value, ifs);
        b.finish().iter().map(Field::text).collect()
    }

    #[test]
    fn test_whitespace_splitting() {
        assert_eq!(split("  a  b\tc\n", DEFAULT_IFS), vec!["a", "b", "c"]);
        assert!(split("   ", DEFAULT_IFS).is_empty());
    }

    #[test]
    fn test_delimiter_splitting_keeps_empty_fields() {
        assert_eq!(split("a::b", ":"), vec!["a", "", "b"]);
        assert_eq!(split("a : b", ": "), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_ifs_disables_splitting() {
        assert_eq!(split("a b", ""), vec!["a b"]);
    }

    #[test]
    fn test_split_joins_surrounding_text() {
        let mut b = FieldBuilder::default();
        b.push("pre", true);
        b.push_split(" x ", DEFAULT_IFS);
        b.push("post", true);
        let fields: Vec<String> = b.finish().iter().map(Field::text).collect();
        assert_eq!(fields, vec!["pre", "x", "post"]);
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("a*b?[c]"), r"a\*b\?\[c\]");
    }
}
