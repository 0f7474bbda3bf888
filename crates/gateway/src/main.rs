mod cli;

use crate::cli::Args;
use app_gateway::layers::policy::config::load_config;
use app_gateway::layers::service::logging::init_tracing;
use app_gateway::Gateway;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _file_guard = init_tracing(&args.log_dir, args.log_to_stderr)?;

    let mut config = load_config(&args.config)?;
    if let Some(addr) = args.listen_addr {
        config.daemon.listen_addr = addr;
    }
    if let Some(addr) = args.control_addr {
        config.daemon.control_addr = addr;
    }

    let gateway = Gateway::build(&config).await?;
    if args.self_test {
        let failures = gateway.self_test().await;
        if failures.is_empty() {
            println!("all features passed their self test");
            return Ok(());
        }
        for (trigger, reason) in &failures {
            eprintln!("{trigger}: {reason}");
        }
        anyhow::bail!("{} feature(s) failed their self test", failures.len());
    }

    tracing::info!(
        event = "gateway.starting",
        listen_addr = %config.daemon.listen_addr,
        control_addr = %config.daemon.control_addr
    );
    gateway.run().await
}
