// SPDX-License-Identifier: AGPL-3.0-or-later

//! `tracing` setup (§10.3): a compact local-time prefix, level filtering from `--log-level` or
//! `RUST_LOG`, and a panic hook that logs through `tracing::error!` before the default panic
//! output — the same shape as the teacher's `logging.rs`.

use tracing_subscriber::{fmt, EnvFilter};

pub fn initialize(default_level: tracing::Level) {
    let timer_format =
        time::format_description::parse("[hour]:[minute]:[second]").expect("valid time format");
    let time_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = fmt::time::OffsetTime::new(time_offset, timer_format);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(timer)
        .with_thread_ids(true)
        .init();

    std::panic::set_hook(Box::new(|info| {
        tracing::error!("{info}");
    }));
}
