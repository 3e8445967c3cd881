//! Command-line surface
//!
//! `gasoline` with no flags runs the daemon. `--stop` and `--force` are
//! one-shot control commands against daemons sharing the state directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use gasoline_core::{resolve_state_dir, StatePaths};

use crate::server::{self, ServeOptions};

/// Browser dev-console bridge for AI coding agents
#[derive(Parser, Debug)]
#[command(name = "gasoline")]
#[command(about = "Browser telemetry and automation bridge for AI coding agents")]
#[command(version)]
pub struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// State directory (overrides GASOLINE_STATE_DIR)
    #[arg(long, value_name = "PATH")]
    pub state_dir: Option<PathBuf>,

    /// Fail instead of taking over a running daemon
    #[arg(long)]
    pub parallel: bool,

    /// Stop the daemon on PORT and exit
    #[arg(long, value_name = "PORT", conflicts_with_all = ["force", "parallel", "stdio"])]
    pub stop: Option<u16>,

    /// Kill every gasoline daemon and wipe run-state files
    #[arg(long, conflicts_with_all = ["parallel", "stdio"])]
    pub force: bool,

    /// Let the extension fall back to OS-level file dialogs for uploads
    #[arg(long)]
    pub enable_os_upload_automation: bool,

    /// Also serve MCP JSON-RPC over stdin/stdout
    #[arg(long)]
    pub stdio: bool,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = server::load_config()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.enable_os_upload_automation {
        config.upload.os_automation = true;
    }

    let root = resolve_state_dir(cli.state_dir.as_deref())
        .context("Failed to resolve state directory")?;
    let paths = StatePaths::new(root);

    if cli.force {
        return server::run_force(&paths).await;
    }
    if let Some(port) = cli.stop {
        return server::run_stop(&paths, port).await;
    }

    info!("Starting Gasoline v{}", env!("CARGO_PKG_VERSION"));
    server::run(
        config,
        paths,
        ServeOptions {
            parallel: cli.parallel,
            stdio: cli.stdio,
        },
    )
    .await
}
