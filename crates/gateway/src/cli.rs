use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "app-gateway",
    version,
    about = "Password and TOTP gated command gateway with store-and-forward for remote subjects"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/gateway.toml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "logs")]
    pub(crate) log_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    /// Overrides `daemon.listen_addr`.
    #[arg(long)]
    pub(crate) listen_addr: Option<String>,
    /// Overrides `daemon.control_addr`.
    #[arg(long)]
    pub(crate) control_addr: Option<String>,
    /// Run every feature's self test and exit.
    #[arg(long, default_value_t = false)]
    pub(crate) self_test: bool,
}
