//! Flow control builtins (:, true, false, exit, return, break, continue)

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::{ControlFlow, ExecResult};

/// The true builtin - always returns 0.
pub struct True;

#[async_trait]
impl Builtin for True {
    async fn execute(&self, _ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::code(0))
    }
}

/// `:` - does nothing, successfully.
pub struct Colon;

#[async_trait]
impl Builtin for Colon {
    async fn execute(&self, _ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::code(0))
    }
}

/// The false builtin - always returns 1.
pub struct False;

#[async_trait]
impl Builtin for False {
    async fn execute(&self, _ctx: Context<'_>) -> Result<ExecResult> {
        Ok(ExecResult::code(1))
    }
}

/// Status argument of `exit`/`return`; defaults to `$?`.
fn status_arg(name: &str, ctx: &Context<'_>) -> std::result::Result<i32, ExecResult> {
    match ctx.args.first() {
        None => Ok(ctx.shell.last_exit_code),
        Some(arg) => arg
            .parse::<i64>()
            .map(|n| n.rem_euclid(256) as i32)
            .map_err(|_| {
                ExecResult::err(
                    format!("jobsh: {}: {}: numeric argument required\n", name, arg),
                    2,
                )
            }),
    }
}

/// The exit builtin - exit the shell with a status code.
pub struct Exit;

#[async_trait]
impl Builtin for Exit {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let code = match status_arg("exit", &ctx) {
            Ok(code) => code,
            Err(result) => result.exit_code,
        };
        Ok(ExecResult::code(code).with_control(ControlFlow::Exit))
    }
}

/// The return builtin - leave the current function or sourced file.
pub struct Return;

#[async_trait]
impl Builtin for Return {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        match status_arg("return", &ctx) {
            Ok(code) => Ok(ExecResult::code(code).with_control(ControlFlow::Return)),
            Err(result) => Ok(result),
        }
    }
}

/// Loop level argument of `break`/`continue`.
fn level_arg(name: &str, args: &[String]) -> std::result::Result<u32, ExecResult> {
    match args.first() {
        None => Ok(1),
        Some(arg) => match arg.parse::<u32>() {
            Ok(n) if n >= 1 => Ok(n),
            _ => Err(ExecResult::err(
                format!("jobsh: {}: {}: loop count out of range\n", name, arg),
                1,
            )),
        },
    }
}

/// The break builtin - leave the innermost N loops.
pub struct Break;

#[async_trait]
impl Builtin for Break {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        Ok(match level_arg("break", ctx.args) {
            Ok(n) => ExecResult::code(0).with_control(ControlFlow::Break(n)),
            Err(result) => result,
        })
    }
}

/// The continue builtin - start the next iteration of the Nth loop.
pub struct Continue;

#[async_trait]
impl Builtin for Continue {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        Ok(match level_arg("continue", ctx.args) {
            Ok(n) => ExecResult::code(0).with_control(ControlFlow::Continue(n)),
            Err(result) => result,
        })
    }
}
