use crate::layers::execution::command::{Command, CommandResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A capability reachable through the command language by its trigger prefix.
#[async_trait]
pub trait Feature: Send + Sync {
    /// Whether configuration supplies everything the feature needs.
    fn is_configured(&self) -> bool;

    async fn self_test(&self) -> anyhow::Result<()>;

    async fn initialise(&self) -> anyhow::Result<()>;

    fn trigger(&self) -> &'static str;

    /// `command.content` no longer carries the trigger.
    async fn execute(&self, command: Command) -> CommandResult;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("feature trigger cannot be empty")]
    EmptyTrigger,
    #[error("feature trigger {0} is registered twice")]
    DuplicateTrigger(String),
    #[error("feature {trigger} failed to initialise: {reason}")]
    Initialise { trigger: String, reason: String },
}

/// Registered features, ordered so that longer triggers are tried first.
///
/// Built before any processor is created and never mutated afterwards.
#[derive(Clone, Default)]
pub struct FeatureSet {
    ordered: Vec<Arc<dyn Feature>>,
    by_trigger: BTreeMap<&'static str, Arc<dyn Feature>>,
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialises and adds `feature`. Unconfigured features are skipped.
    pub async fn register(&mut self, feature: Arc<dyn Feature>) -> Result<bool, RegistryError> {
        let trigger = feature.trigger();
        if trigger.trim().is_empty() || trigger.trim() != trigger {
            return Err(RegistryError::EmptyTrigger);
        }
        if self.by_trigger.contains_key(trigger) {
            return Err(RegistryError::DuplicateTrigger(trigger.to_string()));
        }
        if !feature.is_configured() {
            tracing::info!(event = "feature.skipped", trigger = %trigger, "feature is not configured");
            return Ok(false);
        }
        feature
            .initialise()
            .await
            .map_err(|err| RegistryError::Initialise {
                trigger: trigger.to_string(),
                reason: format!("{err:#}"),
            })?;
        self.by_trigger.insert(trigger, Arc::clone(&feature));
        self.ordered.push(feature);
        self.ordered.sort_by(|a, b| {
            b.trigger()
                .len()
                .cmp(&a.trigger().len())
                .then_with(|| a.trigger().cmp(b.trigger()))
        });
        tracing::info!(event = "feature.registered", trigger = %trigger);
        Ok(true)
    }

    pub fn get(&self, trigger: &str) -> Option<&Arc<dyn Feature>> {
        self.by_trigger.get(trigger)
    }

    /// Longest registered trigger that prefixes `content`.
    pub fn lookup(&self, content: &str) -> Option<&Arc<dyn Feature>> {
        self.ordered
            .iter()
            .find(|feature| content.starts_with(feature.trigger()))
    }

    pub fn triggers(&self) -> Vec<&'static str> {
        self.ordered.iter().map(|feature| feature.trigger()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Runs every self test; the map holds failures keyed by trigger.
    pub async fn self_test_all(&self) -> BTreeMap<&'static str, String> {
        let mut failures = BTreeMap::new();
        for feature in &self.ordered {
            if let Err(err) = feature.self_test().await {
                tracing::warn!(event = "feature.self_test_failed", trigger = %feature.trigger(), error = %err);
                failures.insert(feature.trigger(), format!("{err:#}"));
            }
        }
        failures
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes its content back, optionally after a delay or by panicking.
    pub(crate) struct EchoFeature {
        pub(crate) trigger: &'static str,
        pub(crate) configured: bool,
        pub(crate) delay: Duration,
        pub(crate) panic_on: Option<&'static str>,
        pub(crate) initialised: AtomicUsize,
        pub(crate) executed: AtomicUsize,
    }

    impl EchoFeature {
        pub(crate) fn new(trigger: &'static str) -> Self {
            Self {
                trigger,
                configured: true,
                delay: Duration::ZERO,
                panic_on: None,
                initialised: AtomicUsize::new(0),
                executed: AtomicUsize::new(0),
            }
        }

        pub(crate) fn executed(&self) -> usize {
            self.executed.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Feature for EchoFeature {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn self_test(&self) -> anyhow::Result<()> {
            if self.trigger == ".broken" {
                anyhow::bail!("self test failed on purpose");
            }
            Ok(())
        }

        async fn initialise(&self) -> anyhow::Result<()> {
            self.initialised.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn trigger(&self) -> &'static str {
            self.trigger
        }

        async fn execute(&self, command: Command) -> CommandResult {
            self.executed.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(needle) = self.panic_on {
                if command.content.contains(needle) {
                    panic!("echo feature asked to crash");
                }
            }
            if command.content == "fail" {
                return CommandResult::failed("echo failed", "some output");
            }
            CommandResult::ok(command.content)
        }
    }
}
