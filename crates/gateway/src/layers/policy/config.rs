use crate::layers::execution::filters::lint::{MAX_LINT_LENGTH, MIN_LINT_LENGTH};
use crate::layers::policy::rate_limit::MAX_RATE_PER_SEC;
use anyhow::Context;
use protocol::config::GatewayConfig;
use std::path::Path;

pub const MIN_PASSWORD_LEN: usize = 7;

pub fn load_config(path: &Path) -> anyhow::Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: GatewayConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &GatewayConfig) -> anyhow::Result<()> {
    let auth = &config.auth;
    if auth.passwords.is_empty() && auth.shortcuts.is_empty() {
        anyhow::bail!("auth must define at least one password or shortcut");
    }
    for (index, password) in auth.passwords.iter().enumerate() {
        if password.chars().count() < MIN_PASSWORD_LEN {
            anyhow::bail!(
                "auth.passwords[{}] must be at least {} characters",
                index,
                MIN_PASSWORD_LEN
            );
        }
        if password.trim() != password {
            anyhow::bail!("auth.passwords[{}] must not start or end with spaces", index);
        }
    }
    for (name, expansion) in &auth.shortcuts {
        if name.trim().is_empty() {
            anyhow::bail!("shortcut names cannot be empty");
        }
        if expansion.trim().is_empty() {
            anyhow::bail!("shortcut {} expands to an empty command", name);
        }
    }

    let processor = &config.processor;
    if processor.max_cmds_per_sec == 0 || processor.max_cmds_per_sec > MAX_RATE_PER_SEC {
        anyhow::bail!(
            "processor.max_cmds_per_sec must be between 1 and {}",
            MAX_RATE_PER_SEC
        );
    }
    if processor.rate_limit_unit_secs == 0 {
        anyhow::bail!("processor.rate_limit_unit_secs must be positive");
    }
    if processor.default_timeout_secs == 0 {
        anyhow::bail!("processor.default_timeout_secs must be positive");
    }
    if processor.translate.iter().any(|(from, _)| from.is_empty()) {
        anyhow::bail!("processor.translate sequences cannot start from an empty string");
    }

    if let Some(lint) = &config.lint {
        if lint.max_length < MIN_LINT_LENGTH || lint.max_length > MAX_LINT_LENGTH {
            anyhow::bail!(
                "lint.max_length must be between {} and {}",
                MIN_LINT_LENGTH,
                MAX_LINT_LENGTH
            );
        }
    }
    if let Some(notify) = &config.notify {
        if notify.recipients.iter().all(|r| r.trim().is_empty()) {
            anyhow::bail!("notify.recipients must name at least one address");
        }
    }

    let store = &config.store_and_forward;
    if store.max_reports_per_host == 0 {
        anyhow::bail!("store_and_forward.max_reports_per_host must be positive");
    }
    if store.report_expiry.is_zero() {
        anyhow::bail!("store_and_forward.report_expiry must be positive");
    }

    let shell = &config.features.shell;
    if shell.enabled && shell.interpreter.trim().is_empty() {
        anyhow::bail!("features.shell.interpreter cannot be empty");
    }

    let daemon = &config.daemon;
    if daemon.per_ip_max_per_sec == 0 || daemon.per_ip_max_per_sec > MAX_RATE_PER_SEC {
        anyhow::bail!(
            "daemon.per_ip_max_per_sec must be between 1 and {}",
            MAX_RATE_PER_SEC
        );
    }
    if daemon.listen_addr == daemon.control_addr {
        anyhow::bail!("daemon.listen_addr and daemon.control_addr must differ");
    }
    Ok(())
}
