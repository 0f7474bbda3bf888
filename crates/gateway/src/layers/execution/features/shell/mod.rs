mod output;
mod process;
mod stream;

use crate::layers::execution::command::{Command, CommandResult};
use crate::layers::execution::feature::Feature;
use anyhow::Context;
use async_trait::async_trait;
use protocol::config::ShellFeatureConfig;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use self::output::combine_output;
use self::process::{apply_process_group, terminate_group};
use self::stream::read_bounded;

pub const SHELL_TRIGGER: &str = ".s";

const SELF_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs the command text through the configured interpreter.
pub struct ShellFeature {
    config: ShellFeatureConfig,
}

#[derive(Debug)]
struct ShellOutcome {
    exit_code: Option<i32>,
    output: String,
    timed_out: bool,
}

impl ShellFeature {
    pub fn new(config: &ShellFeatureConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    async fn run(&self, script: &str, timeout: Duration) -> anyhow::Result<ShellOutcome> {
        let max_bytes = usize::try_from(self.config.max_output_bytes).unwrap_or(usize::MAX);
        let mut cmd = tokio::process::Command::new(&self.config.interpreter);
        cmd.arg("-c").arg(script);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        apply_process_group(&mut cmd);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawn {} -c", self.config.interpreter))?;

        let stdout = child.stdout.take().context("missing stdout")?;
        let stderr = child.stderr.take().context("missing stderr")?;
        let stdout_task = tokio::spawn(read_bounded(stdout, max_bytes));
        let stderr_task = tokio::spawn(read_bounded(stderr, max_bytes));

        let mut timed_out = false;
        let status = tokio::select! {
            status = child.wait() => Some(status.context("wait on child")?),
            _ = tokio::time::sleep(timeout) => {
                timed_out = true;
                terminate_group(&mut child).await
            }
        };

        let stdout = stdout_task
            .await
            .context("stdout task join")?
            .context("stdout read")?;
        let stderr = stderr_task
            .await
            .context("stderr task join")?
            .context("stderr read")?;
        Ok(ShellOutcome {
            exit_code: status.and_then(|status| status.code()),
            output: combine_output(stdout, stderr),
            timed_out,
        })
    }
}

#[async_trait]
impl Feature for ShellFeature {
    fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.interpreter.trim().is_empty()
    }

    async fn self_test(&self) -> anyhow::Result<()> {
        let outcome = self.run("echo ok", SELF_TEST_TIMEOUT).await?;
        if outcome.exit_code != Some(0) || outcome.output.trim() != "ok" {
            anyhow::bail!(
                "interpreter {} did not echo back: {:?}",
                self.config.interpreter,
                outcome
            );
        }
        Ok(())
    }

    async fn initialise(&self) -> anyhow::Result<()> {
        let interpreter = Path::new(&self.config.interpreter);
        if interpreter.is_absolute() && !interpreter.exists() {
            anyhow::bail!("interpreter {} does not exist", interpreter.display());
        }
        Ok(())
    }

    fn trigger(&self) -> &'static str {
        SHELL_TRIGGER
    }

    async fn execute(&self, command: Command) -> CommandResult {
        if command.content.is_empty() {
            return CommandResult::failed("nothing to run", "");
        }
        let timeout = Duration::from_secs(command.timeout_secs.max(1));
        match self.run(&command.content, timeout).await {
            Ok(outcome) if outcome.timed_out => CommandResult::failed(
                format!("command timed out after {}s", timeout.as_secs()),
                outcome.output,
            ),
            Ok(ShellOutcome {
                exit_code: Some(0),
                output,
                ..
            }) => CommandResult::ok(output),
            Ok(ShellOutcome {
                exit_code: Some(code),
                output,
                ..
            }) => CommandResult::failed(format!("exit status {code}"), output),
            Ok(ShellOutcome { output, .. }) => {
                CommandResult::failed("terminated by signal", output)
            }
            Err(err) => {
                tracing::warn!(event = "shell.spawn_failed", error = %err);
                CommandResult::failed(format!("{err:#}"), "")
            }
        }
    }
}
