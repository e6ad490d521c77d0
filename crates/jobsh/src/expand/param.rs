//! Parameter expansion
//!
//! Resolves the text between `${` and `}` (or a bare `$name`). Forms are
//! tried by shape, in this order:
//!
//! | form | meaning |
//! |------|---------|
//! | `#name`, `#name[@]` | length (elements for arrays, characters for scalars) |
//! | `(k)name`, `(v)name` | keys / values of an array or association |
//! | `(t)name` | `scalar`, `array`, `association` or `unset` |
//! | `name[start,end]` | 1-based inclusive slice of an array (or string) |
//! | `name:l`, `name:u` | lower / upper case |
//! | `name:gs/old/new` | replace every match of the glob `old` |
//! | `name:-w` `name:=w` `name:+w` `name:?w` | defaults (also without `:`) |
//! | `name#p` `name##p` `name%p` `name%%p` | prefix / suffix removal |
//! | `name/p/r` `name//p/r` | first / all pattern replacement |
//! | `name:offset[:length]` | substring |
//! | `name[i]`, `name[@]`, `name[*]` | element / all elements |
//! | `name` | plain lookup |
//!
//! Unset names expand to the empty string. Nested `${...}` are resolved
//! innermost first before the outer form is dispatched.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::glob::Pattern;
use crate::error::{Error, Result};

/// Rounds of nested `${...}` resolution before giving up.
const MAX_NESTED_ROUNDS: usize = 64;

static SLICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*|[0-9]+|[@*])\[\s*(-?[0-9]+)\s*,\s*(-?[0-9]+)\s*\]$")
        .unwrap_or_else(|e| panic!("slice regex: {e}"))
});

static CASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*|[0-9]+):([lu])$")
        .unwrap_or_else(|e| panic!("case regex: {e}"))
});

static GSUB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*|[0-9]+):gs/(.*)$")
        .unwrap_or_else(|e| panic!("gsub regex: {e}"))
});

/// Value stored in a shell variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    /// Indexed array, 0-based for `name[i]`
    Indexed(Vec<String>),
    /// Associative array (`declare -A`)
    Assoc(BTreeMap<String, String>),
}

impl Value {
    /// Element values in order.
    pub fn elements(&self) -> Vec<String> {
        match self {
            Value::Scalar(s) => vec![s.clone()],
            Value::Indexed(v) => v.clone(),
            Value::Assoc(m) => m.values().cloned().collect(),
        }
    }

    /// Scalar view: arrays join their elements with a space.
    pub fn as_scalar(&self) -> String {
        match self {
            Value::Scalar(s) => s.clone(),
            other => other.elements().join(" "),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Scalar(_) => "scalar",
            Value::Indexed(_) => "array",
            Value::Assoc(_) => "association",
        }
    }
}

/// Variables visible to the expander.
pub trait ParamContext {
    /// Look up a parameter: arrays, then shell variables, then the
    /// environment. Also answers positional (`1`, `@`) and special (`?`, `$`)
    /// parameters.
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Assign a scalar, as `${name:=word}` does.
    fn assign(&mut self, name: &str, value: String);

    /// Whether referencing an unset parameter is an error (`set -u`).
    fn nounset(&self) -> bool {
        false
    }
}

/// Result of expanding one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Fields {
    pub values: Vec<String>,
    /// Elements stay separate words even inside double quotes (`"$@"`,
    /// `"${arr[@]}"`, `"${(k)map}"`)
    pub separate: bool,
}

impl Fields {
    fn scalar(s: impl Into<String>) -> Self {
        Self {
            values: vec![s.into()],
            separate: false,
        }
    }

    fn list(values: Vec<String>, separate: bool) -> Self {
        Self { values, separate }
    }

    /// All values joined with a space.
    pub fn joined(&self) -> String {
        self.values.join(" ")
    }
}

/// Expand a parameter expression to a single string.
pub fn expand(ctx: &mut dyn ParamContext, expr: &str) -> Result<String> {
    Ok(expand_fields(ctx, expr)?.joined())
}

/// Expand a parameter expression, keeping array elements apart.
pub fn expand_fields(ctx: &mut dyn ParamContext, expr: &str) -> Result<Fields> {
    let expr = resolve_nested(ctx, expr)?;
    dispatch(ctx, &expr)
}

/// Replace innermost `${...}` occurrences until none remain.
fn resolve_nested(ctx: &mut dyn ParamContext, expr: &str) -> Result<String> {
    let mut expr = expr.to_string();
    for _ in 0..MAX_NESTED_ROUNDS {
        let Some(start) = expr.rfind("${") else {
            return Ok(expr);
        };
        let Some(len) = expr[start + 2..].find('}') else {
            return Ok(expr);
        };
        let inner = expr[start + 2..start + 2 + len].to_string();
        let value = dispatch(ctx, &inner)?.joined();
        expr.replace_range(start..start + 2 + len + 1, &value);
    }
    Err(Error::Expansion(format!("${{{}}}: nested too deeply", expr)))
}

fn is_name(s: &str) -> bool {
    crate::parser::is_valid_name(s)
}

/// Split a leading parameter name (identifier, digits or one special char).
fn split_name(expr: &str) -> Option<(&str, &str)> {
    let first = expr.chars().next()?;
    let len = if first.is_ascii_alphabetic() || first == '_' {
        expr.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(expr.len())
    } else if first.is_ascii_digit() {
        expr.find(|c: char| !c.is_ascii_digit())
            .unwrap_or(expr.len())
    } else if matches!(first, '@' | '*' | '#' | '?' | '$' | '!' | '-') {
        1
    } else {
        return None;
    };
    Some((&expr[..len], &expr[len..]))
}

/// `-`, `=`, `+` and `?` (with or without `:`) test whether the parameter
/// is set, so `set -u` does not apply to them.
fn tests_set(op: &str) -> bool {
    op.strip_prefix(':')
        .unwrap_or(op)
        .starts_with(['-', '=', '+', '?'])
}

fn lookup(ctx: &dyn ParamContext, name: &str) -> Result<Option<Value>> {
    let value = ctx.lookup(name);
    if value.is_none() && ctx.nounset() && !matches!(name, "@" | "*") {
        return Err(Error::Expansion(format!("{}: unbound variable", name)));
    }
    Ok(value)
}

fn dispatch(ctx: &mut dyn ParamContext, expr: &str) -> Result<Fields> {
    // ${#} is the positional parameter count, ${#name} a length
    if let Some(rest) = expr.strip_prefix('#') {
        if !rest.is_empty() {
            return length(ctx, rest);
        }
    }

    if let Some(rest) = expr.strip_prefix("(k)") {
        return keys_or_values(ctx, rest, true);
    }
    if let Some(rest) = expr.strip_prefix("(v)") {
        return keys_or_values(ctx, rest, false);
    }
    if let Some(rest) = expr.strip_prefix("(t)") {
        let kind = ctx
            .lookup(rest)
            .map(|v| v.type_name())
            .unwrap_or("unset");
        return Ok(Fields::scalar(kind));
    }

    if let Some(caps) = SLICE_RE.captures(expr) {
        let start: i64 = caps[2].parse().unwrap_or(1);
        let end: i64 = caps[3].parse().unwrap_or(-1);
        return slice(ctx, &caps[1], start, end);
    }

    if let Some(caps) = CASE_RE.captures(expr) {
        let values = lookup(ctx, &caps[1])?
            .map(|v| v.elements())
            .unwrap_or_default();
        let upper = &caps[2] == "u";
        let converted = values
            .into_iter()
            .map(|s| if upper { s.to_uppercase() } else { s.to_lowercase() })
            .collect();
        return Ok(Fields::list(converted, false));
    }

    if let Some(caps) = GSUB_RE.captures(expr) {
        let (old, new) = split_unescaped_slash(&caps[2]);
        let new = new.strip_suffix('/').unwrap_or(new);
        let pattern = Pattern::new(old);
        let values = lookup(ctx, &caps[1])?
            .map(|v| v.elements())
            .unwrap_or_default();
        let replaced = values
            .iter()
            .map(|s| pattern.replace_all(s, new))
            .collect();
        return Ok(Fields::list(replaced, false));
    }

    let Some((name, rest)) = split_name(expr) else {
        return Err(Error::Expansion(format!("${{{}}}: bad substitution", expr)));
    };

    if rest.is_empty() {
        return plain(ctx, name);
    }

    if let Some(sub) = rest.strip_prefix('[') {
        let Some(close) = sub.find(']') else {
            return Err(Error::Expansion(format!("${{{}}}: bad substitution", expr)));
        };
        let index = &sub[..close];
        let after = &sub[close + 1..];
        let fields = subscript(ctx, name, index, !tests_set(after))?;
        if after.is_empty() {
            return Ok(fields);
        }
        return apply_operator(ctx, name, fields, after, expr);
    }

    let fields = plain_if_set(ctx, name, !tests_set(rest))?;
    apply_operator(ctx, name, fields, rest, expr)
}

fn plain(ctx: &dyn ParamContext, name: &str) -> Result<Fields> {
    Ok(plain_if_set(ctx, name, true)?.unwrap_or_default())
}

/// Plain lookup; `None` when unset. `strict` applies `set -u`.
fn plain_if_set(ctx: &dyn ParamContext, name: &str, strict: bool) -> Result<Option<Fields>> {
    let separate = name == "@";
    let value = if strict { lookup(ctx, name)? } else { ctx.lookup(name) };
    Ok(value.map(|value| match value {
        Value::Scalar(s) => Fields::scalar(s),
        other => Fields::list(other.elements(), separate),
    }))
}

fn length(ctx: &dyn ParamContext, rest: &str) -> Result<Fields> {
    let (name, subscript) = match rest.find('[') {
        Some(idx) => (&rest[..idx], Some(&rest[idx..])),
        None => (rest, None),
    };
    if !(is_name(name) || name.chars().all(|c| c.is_ascii_digit()) || name == "@" || name == "*")
    {
        return Err(Error::Expansion(format!("${{#{}}}: bad substitution", rest)));
    }
    let value = lookup(ctx, name)?;
    let len = match (value, subscript) {
        (None, _) => 0,
        (Some(Value::Scalar(s)), None) => s.chars().count(),
        (Some(v), Some("[@]") | Some("[*]")) | (Some(v), None) => v.elements().len(),
        (Some(v), Some(sub)) => {
            let index = sub.trim_start_matches('[').trim_end_matches(']');
            element(&v, index).map(|s| s.chars().count()).unwrap_or(0)
        }
    };
    Ok(Fields::scalar(len.to_string()))
}

fn keys_or_values(ctx: &dyn ParamContext, name: &str, keys: bool) -> Result<Fields> {
    let values = match lookup(ctx, name)? {
        None => Vec::new(),
        Some(Value::Assoc(map)) => {
            if keys {
                map.keys().cloned().collect()
            } else {
                map.values().cloned().collect()
            }
        }
        Some(Value::Indexed(v)) => {
            if keys {
                (0..v.len()).map(|i| i.to_string()).collect()
            } else {
                v
            }
        }
        Some(Value::Scalar(s)) => vec![s],
    };
    Ok(Fields::list(values, true))
}

/// 1-based inclusive `[start, end]` bounds into a 0-based half-open range.
/// Negative indices count from the end; out-of-range values clamp.
pub fn slice_range(len: usize, start: i64, end: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let normalize = |i: i64| {
        if i < 0 {
            len + i + 1
        } else if i == 0 {
            1
        } else {
            i
        }
    };
    let s = normalize(start).max(1);
    let e = normalize(end).min(len);
    if s > e {
        return None;
    }
    Some(((s - 1) as usize, e as usize))
}

fn slice(ctx: &dyn ParamContext, name: &str, start: i64, end: i64) -> Result<Fields> {
    match lookup(ctx, name)? {
        None => Ok(Fields::default()),
        Some(Value::Scalar(s)) => {
            let chars: Vec<char> = s.chars().collect();
            let text: String = slice_range(chars.len(), start, end)
                .map(|(a, b)| chars[a..b].iter().collect())
                .unwrap_or_default();
            Ok(Fields::scalar(text))
        }
        Some(value) => {
            let elements = value.elements();
            let picked = slice_range(elements.len(), start, end)
                .map(|(a, b)| elements[a..b].to_vec())
                .unwrap_or_default();
            Ok(Fields::list(picked, false))
        }
    }
}

fn element(value: &Value, index: &str) -> Option<String> {
    match value {
        Value::Assoc(map) => map.get(index).cloned(),
        Value::Indexed(v) => {
            let i: i64 = index.trim().parse().ok()?;
            let i = if i < 0 { v.len() as i64 + i } else { i };
            usize::try_from(i).ok().and_then(|i| v.get(i).cloned())
        }
        Value::Scalar(s) => match index.trim() {
            "0" => Some(s.clone()),
            _ => None,
        },
    }
}

fn subscript(ctx: &dyn ParamContext, name: &str, index: &str, strict: bool) -> Result<Fields> {
    let value = if strict { lookup(ctx, name)? } else { ctx.lookup(name) };
    let Some(value) = value else {
        return Ok(Fields::default());
    };
    Ok(match index {
        "@" => Fields::list(value.elements(), true),
        "*" => Fields::list(value.elements(), false),
        _ => Fields::scalar(element(&value, index).unwrap_or_default()),
    })
}

/// Apply a POSIX operator (`:-`, `#`, `/`, ...) to an already looked-up
/// value. `fields` is `None` when the parameter is unset.
fn apply_operator(
    ctx: &mut dyn ParamContext,
    name: &str,
    fields: impl Into<Option<Fields>>,
    op: &str,
    expr: &str,
) -> Result<Fields> {
    let fields: Option<Fields> = fields.into();
    let is_set = fields.is_some();
    let non_empty = fields
        .as_ref()
        .is_some_and(|f| f.values.iter().any(|v| !v.is_empty()));
    let current = fields.clone().unwrap_or_default();

    let (colon, body) = match op.strip_prefix(':') {
        Some(body) => (true, body),
        None => (false, op),
    };
    let present = if colon { non_empty } else { is_set };

    if let Some(word) = body.strip_prefix('-') {
        return Ok(if present {
            current
        } else {
            Fields::scalar(operand(ctx, word)?)
        });
    }
    if let Some(word) = body.strip_prefix('=') {
        if present {
            return Ok(current);
        }
        let value = operand(ctx, word)?;
        ctx.assign(name, value.clone());
        return Ok(Fields::scalar(value));
    }
    if let Some(word) = body.strip_prefix('+') {
        return Ok(if present {
            Fields::scalar(operand(ctx, word)?)
        } else {
            Fields::default()
        });
    }
    if let Some(word) = body.strip_prefix('?') {
        if present {
            return Ok(current);
        }
        let message = operand(ctx, word)?;
        let message = if message.is_empty() {
            "parameter null or not set".to_string()
        } else {
            message
        };
        return Err(Error::Expansion(format!("{}: {}", name, message)));
    }

    if colon {
        // ${name:offset} / ${name:offset:length}
        let (offset, length) = match body.split_once(':') {
            Some((o, l)) => (o, Some(l)),
            None => (body, None),
        };
        if let Ok(offset) = offset.trim().parse::<i64>() {
            let length = match length {
                Some(l) => Some(
                    l.trim()
                        .parse::<i64>()
                        .map_err(|_| Error::Expansion(format!("${{{}}}: bad substitution", expr)))?,
                ),
                None => None,
            };
            return Ok(map_values(current, |s| substring(s, offset, length)));
        }
        return Err(Error::Expansion(format!("${{{}}}: bad substitution", expr)));
    }

    if let Some(pat) = body.strip_prefix("##") {
        let pattern = Pattern::new(&operand(ctx, pat)?);
        return Ok(map_values(current, |s| {
            pattern
                .match_prefix(s, true)
                .map(|n| s[n..].to_string())
                .unwrap_or_else(|| s.to_string())
        }));
    }
    if let Some(pat) = body.strip_prefix('#') {
        let pattern = Pattern::new(&operand(ctx, pat)?);
        return Ok(map_values(current, |s| {
            pattern
                .match_prefix(s, false)
                .map(|n| s[n..].to_string())
                .unwrap_or_else(|| s.to_string())
        }));
    }
    if let Some(pat) = body.strip_prefix("%%") {
        let pattern = Pattern::new(&operand(ctx, pat)?);
        return Ok(map_values(current, |s| {
            pattern
                .match_suffix(s, true)
                .map(|n| s[..n].to_string())
                .unwrap_or_else(|| s.to_string())
        }));
    }
    if let Some(pat) = body.strip_prefix('%') {
        let pattern = Pattern::new(&operand(ctx, pat)?);
        return Ok(map_values(current, |s| {
            pattern
                .match_suffix(s, false)
                .map(|n| s[..n].to_string())
                .unwrap_or_else(|| s.to_string())
        }));
    }
    if let Some(spec) = body.strip_prefix('/') {
        let (all, spec) = match spec.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (pat, rep) = split_unescaped_slash(spec);
        let pattern = Pattern::new(&operand(ctx, pat)?);
        let rep = operand(ctx, rep)?;
        return Ok(map_values(current, |s| {
            if all {
                pattern.replace_all(s, &rep)
            } else {
                replace_first(&pattern, s, &rep)
            }
        }));
    }

    Err(Error::Expansion(format!("${{{}}}: bad substitution", expr)))
}

fn map_values(fields: Fields, f: impl Fn(&str) -> String) -> Fields {
    Fields {
        values: fields.values.iter().map(|s| f(s)).collect(),
        separate: fields.separate,
    }
}

fn substring(s: &str, offset: i64, length: Option<i64>) -> String {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let start = if offset < 0 { (len + offset).max(0) } else { offset.min(len) };
    let end = match length {
        Some(l) if l < 0 => (len + l).max(start),
        Some(l) => start.saturating_add(l).min(len),
        None => len,
    };
    chars[start as usize..end as usize].iter().collect()
}

fn replace_first(pattern: &Pattern, s: &str, rep: &str) -> String {
    for (start, _) in s.char_indices() {
        if let Some(n) = pattern.match_prefix(&s[start..], true) {
            if n > 0 {
                return format!("{}{}{}", &s[..start], rep, &s[start + n..]);
            }
        }
    }
    s.to_string()
}

/// Split `old/new` at the first slash not preceded by a backslash.
fn split_unescaped_slash(s: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            '/' if !escaped => return (&s[..i], &s[i + 1..]),
            _ => escaped = false,
        }
    }
    (s, "")
}

/// Expand an operand word: `$name` references are substituted and quotes
/// removed.
fn operand(ctx: &mut dyn ParamContext, word: &str) -> Result<String> {
    let mut out = String::with_capacity(word.len());
    let mut chars = word.char_indices().peekable();
    let mut in_single = false;
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' => in_single = !in_single,
            _ if in_single => out.push(c),
            '"' => {}
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    out.push(next);
                }
            }
            '$' => {
                let rest = &word[i + 1..];
                match split_name(rest) {
                    Some((name, _)) => {
                        out.push_str(&plain(ctx, name)?.joined());
                        for _ in 0..name.chars().count() {
                            chars.next();
                        }
                    }
                    None => out.push('$'),
                }
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}
