//! `ShellExecutor`: the one `StepExecutor` this crate ships (container/ssh/
//! sub-dag executors stay external). Grounded on this workspace's
//! subprocess-management style: `kill_on_drop(true)` so an aborted Node's
//! child is reaped even if the task that spawned it is itself cancelled,
//! plus explicit stdout/stderr redirection to files rather than buffering
//! in memory.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::process::Command;

use crate::contracts::{StepExecutionContext, StepExecutionOutcome, StepExecutor};
use crate::error::{AgentError, Result};

#[derive(Debug, Default)]
pub struct ShellExecutor;

#[async_trait]
impl StepExecutor for ShellExecutor {
    async fn execute(&self, ctx: StepExecutionContext<'_>) -> Result<StepExecutionOutcome> {
        let argv = ctx.step.argv();
        let Some((program, args)) = argv.split_first() else {
            return Err(AgentError::StepExecution {
                step: ctx.step.name.clone(),
                message: "empty command".to_string(),
            });
        };

        let stdout_file = File::create(ctx.stdout_path).await.map_err(|e| {
            AgentError::StepExecution {
                step: ctx.step.name.clone(),
                message: format!("opening stdout file: {e}"),
            }
        })?;
        let stderr_file = File::create(ctx.stderr_path).await.map_err(|e| {
            AgentError::StepExecution {
                step: ctx.step.name.clone(),
                message: format!("opening stderr file: {e}"),
            }
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(ctx.working_dir)
            .envs(ctx.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file.into_std().await))
            .stderr(Stdio::from(stderr_file.into_std().await))
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| AgentError::StepExecution {
            step: ctx.step.name.clone(),
            message: format!("spawn failed: {e}"),
        })?;

        if let Some(pid) = child.id() {
            ctx.pid_registry.insert(ctx.step.name.clone(), pid);
        }

        let status = child.wait().await;
        ctx.pid_registry.remove(&ctx.step.name);
        let status = status.map_err(|e| AgentError::StepExecution {
            step: ctx.step.name.clone(),
            message: format!("wait failed: {e}"),
        })?;

        let exit_code = status.code().unwrap_or(-1);
        let output_variable = if !ctx.step.output_omit && ctx.step.output.is_some() {
            let name = ctx.step.output.clone().expect("checked above");
            let value = read_captured_stdout(ctx.stdout_path).await;
            Some((name.clone(), format!("{name}={value}")))
        } else {
            None
        };

        Ok(StepExecutionOutcome {
            exit_code,
            output_variable,
            sub_runs: Vec::new(),
            error: None,
        })
    }
}

async fn read_captured_stdout(path: &std::path::Path) -> String {
    tokio::fs::read_to_string(path)
        .await
        .unwrap_or_default()
        .trim_end_matches('\n')
        .to_string()
}

/// Evaluate one shell precondition: run `condition`, compare its trimmed
/// stdout against `expected`. An empty `expected` only requires a zero
/// exit status.
pub async fn evaluate_precondition(
    precondition: &dagu_types::Precondition,
    working_dir: &std::path::Path,
) -> Result<bool> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&precondition.condition)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = cmd.output().await?;
    if precondition.expected.is_empty() {
        return Ok(output.status.success());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.trim() == precondition.expected.trim())
}
