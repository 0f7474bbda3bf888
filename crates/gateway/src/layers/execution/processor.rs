use crate::context::ServiceContext;
use crate::error::ProcessError;
use crate::layers::execution::command::{Command, CommandResult};
use crate::layers::execution::feature::{Feature, FeatureSet};
use crate::layers::execution::filters::lint::LintText;
use crate::layers::execution::filters::ResultFilter;
use crate::layers::execution::plt::{parse_plt, PltOverride};
use crate::layers::policy::rate_limit::RateLimit;
use crate::layers::policy::CommandFilter;
use futures_util::FutureExt;
use protocol::config::ProcessorConfig;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest input accepted before any filter runs, in characters.
pub const MAX_COMMAND_LENGTH: usize = 16 * 1024;

const RATE_LIMIT_KEY: &str = "instance";

/// Arguments of these triggers carry secrets and never reach a log line.
pub const REDACTED_TRIGGERS: [&str; 3] = [".a", ".2", ".nbe"];

/// Longest timeout a single command may ask for.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Extra time a feature gets past its own timeout to clean up before it is abandoned.
const EXECUTION_GRACE: Duration = Duration::from_secs(3);

/// Authenticates, dispatches and post-processes commands for one transport surface.
pub struct CommandProcessor {
    features: FeatureSet,
    command_filters: Vec<CommandFilter>,
    result_filters: Vec<ResultFilter>,
    rate_limit: RateLimit,
    context: Arc<ServiceContext>,
    default_timeout_secs: u64,
}

struct Dispatch {
    feature: Arc<dyn Feature>,
    command: Command,
    logged: Command,
    plt: Option<PltOverride>,
}

impl CommandProcessor {
    pub fn new(features: FeatureSet, context: Arc<ServiceContext>, config: &ProcessorConfig) -> Self {
        Self {
            features,
            command_filters: Vec::new(),
            result_filters: Vec::new(),
            rate_limit: RateLimit::new(config.rate_limit_unit_secs, config.max_cmds_per_sec),
            context,
            default_timeout_secs: config.default_timeout_secs.max(1),
        }
    }

    pub fn with_command_filter(mut self, filter: CommandFilter) -> Self {
        self.command_filters.push(filter);
        self
    }

    pub fn with_result_filter(mut self, filter: ResultFilter) -> Self {
        self.result_filters.push(filter);
        self
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.context
    }

    /// Runs one command to completion. Result filters are skipped when
    /// `run_result_filters` is false, e.g. for nested store-and-forward runs.
    pub async fn process(&self, command: Command, run_result_filters: bool) -> CommandResult {
        let started_at = Instant::now();
        let client_id = command.client_id.clone();
        let daemon_name = command.daemon_name.clone();
        let dispatch = match self.prepare(command) {
            Ok(dispatch) => dispatch,
            Err(err) => {
                tracing::info!(
                    event = "command.rejected",
                    client = %client_id,
                    daemon = %daemon_name,
                    error = %err
                );
                let mut result = CommandResult::from_error(err);
                result.command = Command::new(client_id, daemon_name, 0, "");
                result.reset_combined_output();
                return result;
            }
        };

        let Dispatch {
            feature,
            command,
            logged,
            plt,
        } = dispatch;
        tracing::info!(
            event = "command.accepted",
            client = %logged.client_id,
            daemon = %logged.daemon_name,
            timeout_secs = logged.timeout_secs,
            command = %logged.content
        );

        let mut result = run_feature(feature.as_ref(), command).await;
        result.command = logged;
        result.reset_combined_output();
        if run_result_filters {
            let lint_override = plt
                .as_ref()
                .and_then(|plt| self.lint_filter().map(|lint| lint.with_plt(plt)));
            for filter in &self.result_filters {
                filter.transform(&mut result, lint_override.as_ref());
            }
        }

        tracing::info!(
            event = "command.completed",
            client = %result.command.client_id,
            daemon = %result.command.daemon_name,
            command = %result.command.content,
            error = ?result.error,
            elapsed_ms = started_at.elapsed().as_millis() as u64
        );
        result
    }

    fn prepare(&self, mut command: Command) -> Result<Dispatch, ProcessError> {
        if self.context.is_locked_down() {
            return Err(ProcessError::EmergencyLockedDown);
        }
        if !self.rate_limit.add(RATE_LIMIT_KEY, true) {
            return Err(ProcessError::RateLimitExceeded);
        }
        if command.content.chars().count() > MAX_COMMAND_LENGTH {
            return Err(ProcessError::CommandTooLong {
                max: MAX_COMMAND_LENGTH,
            });
        }
        for filter in &self.command_filters {
            command = filter.transform(command)?;
        }

        command.content = command.content.trim().to_string();
        if command.content.is_empty() {
            return Err(ProcessError::EmptyCommand);
        }
        if command.timeout_secs == 0 {
            command.timeout_secs = self.default_timeout_secs;
        }
        command.timeout_secs = command.timeout_secs.min(MAX_TIMEOUT_SECS);

        let mut plt = None;
        if let Some(parsed) = parse_plt(&command.content) {
            let (overrides, rest) = parsed?;
            if self.lint_filter().is_none() {
                return Err(ProcessError::BadPltSyntax(
                    "output linting is not configured",
                ));
            }
            command.content = rest;
            command.timeout_secs = overrides.timeout_secs;
            plt = Some(overrides);
        }

        let feature = self
            .features
            .lookup(&command.content)
            .cloned()
            .ok_or(ProcessError::UnknownOrUnconfiguredTrigger)?;
        let trigger = feature.trigger();
        let args = command.content[trigger.len()..].trim().to_string();

        let mut logged = command.clone();
        logged.content = if REDACTED_TRIGGERS.contains(&trigger) {
            format!("{trigger} <redacted>")
        } else {
            command.content.clone()
        };
        command.content = args;
        Ok(Dispatch {
            feature,
            command,
            logged,
            plt,
        })
    }

    fn lint_filter(&self) -> Option<&LintText> {
        self.result_filters.iter().find_map(|filter| match filter {
            ResultFilter::Lint(lint) => Some(lint),
            _ => None,
        })
    }
}

/// Executes `command` so that neither a panic nor a hang escapes the call.
async fn run_feature(feature: &dyn Feature, command: Command) -> CommandResult {
    let timeout_secs = command.timeout_secs;
    let deadline = Duration::from_secs(timeout_secs).saturating_add(EXECUTION_GRACE);
    let execution = AssertUnwindSafe(feature.execute(command)).catch_unwind();
    match tokio::time::timeout(deadline, execution).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            tracing::error!(event = "feature.panicked", trigger = %feature.trigger());
            CommandResult::failed("feature crashed while running the command", "")
        }
        Err(_) => {
            tracing::warn!(event = "feature.timed_out", trigger = %feature.trigger(), timeout_secs);
            CommandResult::failed(format!("command timed out after {timeout_secs}s"), "")
        }
    }
}
