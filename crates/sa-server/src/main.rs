#![doc = include_str!("../README.md")]

mod server;

use clap::{CommandFactory, Parser};
use server::bootstrap::run;
use server::config::{CliArgs, ServerConfig};
use server::lifecycle::Lifecycle;
use server::service::health::HealthAuthority;
use server::telemetry::{init_telemetry, is_initialized};
use std::process::ExitCode;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    // Nothing is read, bound or dialed without a config file.
    if args.config.is_none() {
        eprintln!("{}", CliArgs::command().render_help());
        return ExitCode::FAILURE;
    }

    let res = start(args).await;
    if let Err(e) = &res {
        if is_initialized() {
            tracing::error!("{e:#}");
        } else {
            eprintln!("Error: {e:#}");
        }
    }
    ExitCode::from(exit_status(&res))
}

async fn start(args: CliArgs) -> anyhow::Result<()> {
    let config = ServerConfig::try_from(args)?;
    init_telemetry(&config.syslog)?;
    run::<HealthAuthority>(config, Lifecycle::new()).await
}

/// `0` after a graceful stop, `1` for anything fatal.
fn exit_status(res: &anyhow::Result<()>) -> u8 {
    match res {
        Ok(()) => 0,
        Err(_) => 1,
    }
}
