use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub lint: Option<LintConfig>,
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
    #[serde(default)]
    pub store_and_forward: StoreAndForwardConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub passwords: Vec<String>,
    /// Exact input line mapped to the command it expands to.
    #[serde(default)]
    pub shortcuts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_max_cmds_per_sec")]
    pub max_cmds_per_sec: u32,
    #[serde(default = "default_rate_limit_unit_secs")]
    pub rate_limit_unit_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Literal `[from, to]` substitutions applied before dispatch.
    #[serde(default)]
    pub translate: Vec<(String, String)>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_cmds_per_sec: default_max_cmds_per_sec(),
            rate_limit_unit_secs: default_rate_limit_unit_secs(),
            default_timeout_secs: default_timeout_secs(),
            translate: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct LintConfig {
    #[serde(default)]
    pub trim_spaces: bool,
    #[serde(default)]
    pub compress_to_single_line: bool,
    #[serde(default)]
    pub keep_visible_7bit_only: bool,
    #[serde(default)]
    pub compress_spaces: bool,
    #[serde(default)]
    pub begin_position: usize,
    pub max_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub recipients: Vec<String>,
    #[serde(default = "default_sendmail_path")]
    pub sendmail_path: PathBuf,
    #[serde(default = "default_mail_from")]
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreAndForwardConfig {
    #[serde(default = "default_max_reports_per_host")]
    pub max_reports_per_host: usize,
    #[serde(
        default = "default_report_expiry",
        deserialize_with = "deserialize_duration"
    )]
    pub report_expiry: Duration,
    #[serde(
        default = "default_response_retention",
        deserialize_with = "deserialize_duration"
    )]
    pub response_retention: Duration,
}

impl Default for StoreAndForwardConfig {
    fn default() -> Self {
        Self {
            max_reports_per_host: default_max_reports_per_host(),
            report_expiry: default_report_expiry(),
            response_retention: default_response_retention(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub shell: ShellFeatureConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellFeatureConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: u64,
}

impl Default for ShellFeatureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interpreter: default_interpreter(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_control_addr")]
    pub control_addr: String,
    #[serde(default = "default_per_ip_max_per_sec")]
    pub per_ip_max_per_sec: u32,
    /// Close the connection instead of answering rate-limited or locked-down callers.
    #[serde(default)]
    pub silent_on_rejection: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            control_addr: default_control_addr(),
            per_ip_max_per_sec: default_per_ip_max_per_sec(),
            silent_on_rejection: false,
        }
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

fn default_max_cmds_per_sec() -> u32 {
    5
}

fn default_rate_limit_unit_secs() -> u64 {
    1
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

fn default_mail_from() -> String {
    "app-gateway@localhost".to_string()
}

fn default_max_reports_per_host() -> usize {
    200
}

fn default_report_expiry() -> Duration {
    Duration::from_secs(48 * 3600)
}

fn default_response_retention() -> Duration {
    Duration::from_secs(600)
}

fn default_interpreter() -> String {
    "/bin/sh".to_string()
}

fn default_max_output_bytes() -> u64 {
    1024 * 1024
}

fn default_listen_addr() -> String {
    "127.0.0.1:19320".to_string()
}

fn default_control_addr() -> String {
    "127.0.0.1:19321".to_string()
}

fn default_per_ip_max_per_sec() -> u32 {
    10
}
