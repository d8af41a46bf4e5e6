// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use scribeot::cli::{Cli, Commands};
use scribeot::registry::{self, DocumentRegistry};
use scribeot::{logging, transport};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize(cli.log_level.as_tracing_level());

    let Commands::Serve { tcp, no_tcp, socket } = cli.command;

    let registry = DocumentRegistry::new();

    let idle_ttl = Duration::from_secs(cli.idle_ttl_secs);
    let reaper_interval = Duration::from_secs(cli.reaper_interval_secs);
    tokio::spawn(registry::run_reaper(registry.clone(), idle_ttl, reaper_interval));

    let mut listeners = Vec::new();

    if !no_tcp {
        let registry = registry.clone();
        listeners.push(tokio::spawn(async move { transport::serve_tcp(tcp, registry).await }));
    }

    #[cfg(unix)]
    if let Some(path) = socket {
        let registry = registry.clone();
        listeners.push(tokio::spawn(async move { transport::serve_unix(path, registry).await }));
    }
    #[cfg(not(unix))]
    if socket.is_some() {
        anyhow::bail!("--socket is only supported on Unix targets");
    }

    if listeners.is_empty() {
        anyhow::bail!("nothing to do: pass --tcp (default) or --socket to accept connections");
    }

    info!("scribeot server starting");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
        }
        result = futures::future::select_all(listeners) => {
            let (outcome, _index, _rest) = result;
            outcome??;
        }
    }

    Ok(())
}
