// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command-line surface (§10.1): a single `serve` subcommand that can bind a TCP listener, a
//! Unix-domain socket, or both, plus the global logging and idle-retention flags.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

pub const DEFAULT_TCP_ADDR: &str = "127.0.0.1:4000";
pub const DEFAULT_IDLE_TTL_SECS: u64 = 30 * 60;
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "scribeot", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Minimum log level to emit. Overridden by `RUST_LOG` if set.
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Seconds a document may sit with zero connections before it is evicted (§9).
    #[arg(long, global = true, default_value_t = DEFAULT_IDLE_TTL_SECS)]
    pub idle_ttl_secs: u64,

    /// How often the idle-document reaper sweeps the registry.
    #[arg(long, global = true, default_value_t = DEFAULT_REAPER_INTERVAL_SECS)]
    pub reaper_interval_secs: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the collaboration server, accepting connections over TCP and/or a Unix socket.
    Serve {
        /// Bind a TCP listener at this address.
        #[arg(long, default_value = DEFAULT_TCP_ADDR)]
        tcp: SocketAddr,

        /// Disable the TCP listener (Unix-socket-only mode).
        #[arg(long)]
        no_tcp: bool,

        /// Additionally bind a Unix-domain socket at this path (Unix targets only).
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

// Required by `default_value_t` on a `ValueEnum` field (clap's own recipe for this pairing).
impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_possible_value()
            .expect("no skipped LogLevel variants")
            .get_name()
            .fmt(f)
    }
}
