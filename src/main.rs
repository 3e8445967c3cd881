//! Gasoline - browser dev-console bridge for AI coding agents
//!
//! CLI entry point for the Gasoline daemon.

#![forbid(unsafe_code)]

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gasoline_core::format_error_for_cli;

mod cli;
mod server;

/// Lifecycle failure (bind, takeover, stop)
const EXIT_FAILURE: i32 = 1;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // Stdout carries JSON-RPC frames in stdio mode
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gasoline=info,gasoline_core=info,gasoline_tools=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // clap exits with code 2 on usage errors
    let cli = cli::Cli::parse();

    let code = match cli::run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            match e.downcast_ref::<gasoline_core::Error>() {
                Some(core) => eprintln!("Error: {}", format_error_for_cli(core)),
                None => eprintln!("Error: {:#}", e),
            }
            EXIT_FAILURE
        }
    };

    // A parked stdin read would otherwise hold runtime shutdown
    std::process::exit(code);
}
