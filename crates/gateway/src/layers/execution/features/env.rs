use crate::context::ServiceContext;
use crate::layers::execution::command::{Command, CommandResult};
use crate::layers::execution::feature::Feature;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_CONTROL_TRIGGER: &str = ".e";

/// Inspects and controls the running gateway itself.
pub struct EnvControl {
    context: Arc<ServiceContext>,
}

impl EnvControl {
    pub fn new(context: Arc<ServiceContext>) -> Self {
        Self { context }
    }

    fn info(&self) -> String {
        let uptime = Duration::from_secs(self.context.uptime().as_secs());
        format!(
            "app-gateway {} up {} lockdown {}",
            env!("CARGO_PKG_VERSION"),
            humantime::format_duration(uptime),
            if self.context.is_locked_down() { "on" } else { "off" }
        )
    }
}

#[async_trait]
impl Feature for EnvControl {
    fn is_configured(&self) -> bool {
        true
    }

    async fn self_test(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn initialise(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn trigger(&self) -> &'static str {
        ENV_CONTROL_TRIGGER
    }

    async fn execute(&self, command: Command) -> CommandResult {
        let (action, rest) = command
            .content
            .split_once(char::is_whitespace)
            .unwrap_or((command.content.as_str(), ""));
        match action.to_ascii_lowercase().as_str() {
            "lock" => {
                self.context.engage_lockdown();
                CommandResult::ok("emergency lockdown engaged")
            }
            "info" => CommandResult::ok(self.info()),
            "log" => {
                let line = rest.trim();
                tracing::info!(event = "env.log", client = %command.client_id, line = %line);
                CommandResult::ok(line)
            }
            _ => CommandResult::failed("usage: .e lock|info|log <text>", ""),
        }
    }
}
