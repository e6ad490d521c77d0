//! Variable manipulation builtins: set, unset, local, declare, readonly, shift

use std::collections::BTreeMap;

use async_trait::async_trait;

use super::export::quote;
use super::{Builtin, Context};
use crate::error::Result;
use crate::expand::Value;
use crate::interpreter::{ExecResult, ShellContext, ShellOptions};
use crate::parser::is_valid_name;

/// Render a value for `set`/`declare -p` output.
fn render(value: &Value) -> String {
    match value {
        Value::Scalar(s) => quote(s),
        Value::Indexed(items) => {
            let inner: Vec<String> = items.iter().map(|s| quote(s)).collect();
            format!("({})", inner.join(" "))
        }
        Value::Assoc(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("[{}]={}", k, quote(v)))
                .collect();
            format!("({})", inner.join(" "))
        }
    }
}

/// `(a b c)` written as a single argument.
fn parse_list(value: &str) -> Option<Vec<String>> {
    let inner = value.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.split_whitespace().map(str::to_string).collect())
}

/// unset builtin - remove variables (`-v`, default) or functions (`-f`)
pub struct Unset;

#[async_trait]
impl Builtin for Unset {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut functions = false;
        let mut errors = String::new();
        for arg in ctx.args {
            match arg.as_str() {
                "-f" => functions = true,
                "-v" => functions = false,
                name if functions => {
                    ctx.shell.functions.remove(name);
                }
                name => {
                    if let Err(message) = ctx.shell.unset(name) {
                        errors.push_str(&format!("jobsh: unset: {}\n", message));
                    }
                }
            }
        }
        let status = i32::from(!errors.is_empty());
        Ok(ExecResult::err(errors, status))
    }
}

/// set builtin - shell options and positional parameters
///
/// - `set` lists variables
/// - `set -e`/`+e`, `-u`, `-x`, `-f` toggle options; letters combine (`-eux`)
/// - `set -o NAME`/`+o NAME` toggle long options; `set -o` lists them
/// - `set -- ARGS` (or the first non-option argument) replaces `$@`
pub struct Set;

#[async_trait]
impl Builtin for Set {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if ctx.args.is_empty() {
            let mut output = String::new();
            for name in ctx.shell.variable_names() {
                if let Some(var) = ctx.shell.var(&name) {
                    output.push_str(&format!("{}={}\n", name, render(&var.value)));
                }
            }
            return Ok(ExecResult::ok(output));
        }

        let mut iter = ctx.args.iter().peekable();
        while let Some(arg) = iter.next() {
            if arg == "--" {
                ctx.shell.positional = iter.cloned().collect();
                break;
            }
            let on = arg.starts_with('-');
            if (!on && !arg.starts_with('+')) || arg.len() < 2 {
                ctx.shell.positional = std::iter::once(arg).chain(iter).cloned().collect();
                break;
            }
            for flag in arg[1..].chars() {
                if flag == 'o' {
                    match iter.next() {
                        Some(name) => {
                            if !ctx.shell.options.set_long(name, on) {
                                return Ok(ExecResult::err(
                                    format!("jobsh: set: {}: invalid option name\n", name),
                                    2,
                                ));
                            }
                        }
                        None => return Ok(ExecResult::ok(list_options(&ctx.shell.options, on))),
                    }
                } else if !ctx.shell.options.set_short(flag, on) {
                    return Ok(ExecResult::err(
                        format!("jobsh: set: {}{}: invalid option\n", &arg[..1], flag),
                        2,
                    ));
                }
            }
        }
        Ok(ExecResult::code(0))
    }
}

fn list_options(options: &ShellOptions, human: bool) -> String {
    let mut output = String::new();
    for name in ShellOptions::NAMES {
        let on = options.get_long(name).unwrap_or(false);
        if human {
            output.push_str(&format!("{:<15} {}\n", name, if on { "on" } else { "off" }));
        } else {
            output.push_str(&format!("set {}o {}\n", if on { '-' } else { '+' }, name));
        }
    }
    output
}

/// shift builtin - shift positional parameters
pub struct Shift;

#[async_trait]
impl Builtin for Shift {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let n = match ctx.args.first() {
            None => 1,
            Some(arg) => match arg.parse::<usize>() {
                Ok(n) => n,
                Err(_) => {
                    return Ok(ExecResult::err(
                        format!("jobsh: shift: {}: numeric argument required\n", arg),
                        1,
                    ));
                }
            },
        };
        if n > ctx.shell.positional.len() {
            return Ok(ExecResult::err("jobsh: shift: shift count out of range\n", 1));
        }
        ctx.shell.positional.drain(..n);
        Ok(ExecResult::code(0))
    }
}

/// Attributes parsed from `declare`-style flags.
#[derive(Default)]
struct Attributes {
    indexed: bool,
    assoc: bool,
    export: bool,
    readonly: bool,
    global: bool,
    print: bool,
}

impl Attributes {
    /// Split flags from names. Unknown flags produce an error message.
    fn parse<'a>(command: &str, args: &'a [String]) -> std::result::Result<(Self, Vec<&'a String>), String> {
        let mut attrs = Attributes::default();
        let mut names = Vec::new();
        for arg in args {
            match arg.strip_prefix('-') {
                Some(flags) if !flags.is_empty() && names.is_empty() => {
                    for flag in flags.chars() {
                        match flag {
                            'a' => attrs.indexed = true,
                            'A' => attrs.assoc = true,
                            'x' => attrs.export = true,
                            'r' => attrs.readonly = true,
                            'g' => attrs.global = true,
                            'p' => attrs.print = true,
                            _ => return Err(format!("jobsh: {}: -{}: invalid option\n", command, flag)),
                        }
                    }
                }
                _ => names.push(arg),
            }
        }
        Ok((attrs, names))
    }

    fn initial_value(&self, value: Option<&str>) -> Option<Value> {
        if self.assoc {
            let mut map = BTreeMap::new();
            if let Some(items) = value.and_then(parse_list) {
                for item in items {
                    if let Some((k, v)) = item.strip_prefix('[').and_then(|r| r.split_once("]=")) {
                        map.insert(k.to_string(), v.to_string());
                    }
                }
            }
            return Some(Value::Assoc(map));
        }
        match value {
            Some(v) => match parse_list(v) {
                Some(items) => Some(Value::Indexed(items)),
                None if self.indexed => Some(Value::Indexed(vec![v.to_string()])),
                None => Some(Value::Scalar(v.to_string())),
            },
            None if self.indexed => Some(Value::Indexed(Vec::new())),
            None => None,
        }
    }
}

/// Shared body of `declare`, `typeset` and `local`.
fn declare(
    command: &str,
    shell: &mut ShellContext,
    args: &[String],
    force_local: bool,
) -> ExecResult {
    let (attrs, names) = match Attributes::parse(command, args) {
        Ok(parsed) => parsed,
        Err(message) => return ExecResult::err(message, 2),
    };
    let local = force_local || (shell.in_function() && !attrs.global);

    if names.is_empty() || attrs.print {
        let listed: Vec<String> = if names.is_empty() {
            shell.variable_names()
        } else {
            names.iter().map(|n| n.to_string()).collect()
        };
        let mut output = String::new();
        let mut status = 0;
        for name in listed {
            match shell.var(&name) {
                Some(var) => {
                    let mut flags = String::new();
                    match var.value {
                        Value::Indexed(_) => flags.push('a'),
                        Value::Assoc(_) => flags.push('A'),
                        Value::Scalar(_) => {}
                    }
                    if var.readonly {
                        flags.push('r');
                    }
                    if var.exported {
                        flags.push('x');
                    }
                    if flags.is_empty() {
                        flags.push('-');
                    }
                    output.push_str(&format!("declare -{} {}={}\n", flags, name, render(&var.value)));
                }
                None => status = 1,
            }
        }
        return ExecResult {
            stdout: output,
            exit_code: status,
            ..Default::default()
        };
    }

    let mut errors = String::new();
    for arg in names {
        let (name, value) = match arg.split_once('=') {
            Some((name, value)) => (name, Some(value)),
            None => (arg.as_str(), None),
        };
        if !is_valid_name(name) {
            errors.push_str(&format!("jobsh: {}: `{}': not a valid identifier\n", command, arg));
            continue;
        }
        let value = attrs.initial_value(value);
        let outcome = if local {
            shell.declare_local(name, value)
        } else {
            match value {
                Some(value) => shell.set(name, value),
                None if shell.is_set(name) => Ok(()),
                None => shell.set(name, Value::Scalar(String::new())),
            }
        };
        if let Err(message) = outcome {
            errors.push_str(&format!("jobsh: {}\n", message));
            continue;
        }
        if attrs.export {
            shell.export(name);
        }
        if attrs.readonly {
            shell.set_readonly(name);
        }
    }
    let status = i32::from(!errors.is_empty());
    ExecResult::err(errors, status)
}

/// local builtin - declare variables in the current function's scope
pub struct Local;

#[async_trait]
impl Builtin for Local {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if !ctx.shell.in_function() {
            return Ok(ExecResult::err(
                "jobsh: local: can only be used in a function\n",
                1,
            ));
        }
        Ok(declare("local", ctx.shell, ctx.args, true))
    }
}

/// declare / typeset builtin - set attributes and values
///
/// Inside a function declarations are local unless `-g` is given.
pub struct Declare;

#[async_trait]
impl Builtin for Declare {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        Ok(declare("declare", ctx.shell, ctx.args, false))
    }
}

/// readonly builtin - mark variables read-only
pub struct Readonly;

#[async_trait]
impl Builtin for Readonly {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let names: Vec<&String> = ctx.args.iter().filter(|a| a.as_str() != "-p").collect();
        if names.is_empty() {
            let mut output = String::new();
            for name in ctx.shell.variable_names() {
                if let Some(var) = ctx.shell.var(&name).filter(|v| v.readonly) {
                    output.push_str(&format!("readonly {}={}\n", name, render(&var.value)));
                }
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
                errors.push_str(&format!("jobsh: readonly: `{}': not a valid identifier\n", arg));
                continue;
            }
            if let Some(value) = value
                && let Err(message) = ctx.shell.set(name, Value::Scalar(value.to_string()))
            {
                errors.push_str(&format!("jobsh: {}\n", message));
                continue;
            }
            ctx.shell.set_readonly(name);
        }
        let status = i32::from(!errors.is_empty());
        Ok(ExecResult::err(errors, status))
    }
}
