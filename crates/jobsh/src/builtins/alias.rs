//! alias and unalias builtins

use async_trait::async_trait;

use super::export::quote;
use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::ExecResult;

/// alias builtin - define or print aliases
///
/// `alias` lists every alias, `alias NAME` prints one, `alias NAME=VALUE`
/// defines one. Printing an unknown alias fails with status 1.
pub struct Alias;

#[async_trait]
impl Builtin for Alias {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let args: Vec<&String> = ctx.args.iter().filter(|a| a.as_str() != "-p").collect();
        if args.is_empty() {
            let listing: String = ctx
                .shell
                .aliases
                .iter()
                .map(|(name, value)| format!("alias {}={}\n", name, quote(value)))
                .collect();
            return Ok(ExecResult::ok(listing));
        }

        let mut result = ExecResult::default();
        for arg in args {
            match arg.split_once('=') {
                Some((name, value)) => {
                    if name.is_empty() || name.contains(['/', '$', '`', '\'', '"']) {
                        result
                            .stderr
                            .push_str(&format!("jobsh: alias: `{}': invalid alias name\n", name));
                        result.exit_code = 1;
                        continue;
                    }
                    ctx.shell.aliases.insert(name.to_string(), value.to_string());
                }
                None => match ctx.shell.aliases.get(arg.as_str()) {
                    Some(value) => {
                        result
                            .stdout
                            .push_str(&format!("alias {}={}\n", arg, quote(value)));
                    }
                    None => {
                        result
                            .stderr
                            .push_str(&format!("jobsh: alias: {}: not found\n", arg));
                        result.exit_code = 1;
                    }
                },
            }
        }
        Ok(result)
    }
}

/// unalias builtin - remove aliases
///
/// `unalias -a` removes them all.
pub struct Unalias;

#[async_trait]
impl Builtin for Unalias {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if ctx.args.is_empty() {
            return Ok(ExecResult::err(
                "jobsh: unalias: usage: unalias [-a] name [name ...]\n",
                2,
            ));
        }
        if ctx.args.iter().any(|a| a == "-a") {
            ctx.shell.aliases.clear();
            return Ok(ExecResult::code(0));
        }
        let mut result = ExecResult::default();
        for name in ctx.args {
            if ctx.shell.aliases.remove(name).is_none() {
                result
                    .stderr
                    .push_str(&format!("jobsh: unalias: {}: not found\n", name));
                result.exit_code = 1;
            }
        }
        Ok(result)
    }
}
