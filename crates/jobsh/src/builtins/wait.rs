//! Wait builtin - wait for background jobs

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::error::Result;
use crate::interpreter::{ControlFlow, ExecResult};

/// The wait builtin - wait for background jobs to complete.
///
/// Usage: wait [%JOB | PID ...]
///
/// The status is that of the last job waited for; unknown jobs give 127.
/// Output captured from the jobs is passed through.
pub struct Wait;

#[async_trait]
impl Builtin for Wait {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let mut result = if ctx.args.is_empty() {
            ctx.shell.jobs.wait_all().await
        } else {
            let mut combined = ExecResult::default();
            for spec in ctx.args {
                let waited = match ctx.shell.jobs.resolve(spec) {
                    Some(id) => ctx.shell.jobs.wait_for(id).await,
                    None => None,
                };
                match waited {
                    Some(job) => combined.absorb(job),
                    None => {
                        combined
                            .stderr
                            .push_str(&format!("jobsh: wait: {}: no such job\n", spec));
                        combined.exit_code = 127;
                    }
                }
            }
            combined
        };
        // A job's `exit` ends the job, not the waiting shell
        result.control = ControlFlow::None;
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::builtins::{run_builtin, test_shell};
    use crate::interpreter::{ProcessGroup, StdinSource};

    #[tokio::test]
    async fn test_wait_all_and_specific() {
        let mut shell = test_shell();
        let mut stdin = StdinSource::Null;
        shell.jobs.spawn(
            "a",
            ProcessGroup::new(),
            tokio::spawn(async { ExecResult::ok("a\n") }),
        );
        let id = shell.jobs.spawn(
            "b",
            ProcessGroup::new(),
            tokio::spawn(async { ExecResult::code(4).with_control(ControlFlow::Exit) }),
        );

        let result = run_builtin(&Wait, &[&format!("%{}", id)], &mut shell, &mut stdin).await;
        assert_eq!(result.exit_code, 4);
        assert_eq!(result.control, ControlFlow::None);

        let result = run_builtin(&Wait, &[], &mut shell, &mut stdin).await;
        assert_eq!(result.stdout, "a\n");
        assert_eq!(result.exit_code, 0);
        assert!(!shell.jobs.has_jobs());
    }

    #[tokio::test]
    async fn test_wait_unknown_job() {
        let mut shell = test_shell();
        let result = run_builtin(&Wait, &["%3"], &mut shell, &mut StdinSource::Null).await;
        assert_eq!(result.exit_code, 127);
        assert!(result.stderr.contains("no such job"));
    }
}
