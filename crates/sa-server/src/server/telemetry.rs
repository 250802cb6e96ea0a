//! # Logging
//!
//! All output goes through `tracing`. The default verbosity comes from the
//! `syslog.stdoutLevel` config value (syslog numbering) and can be overridden
//! with `RUST_LOG`. With `syslog.json` set, events are written as JSON lines
//! for log shippers; otherwise they are pretty-printed.
//!
//! Panics are logged as `error` events before the default panic hook runs,
//! so a crashing request handler leaves a record in the same stream as
//! everything else.

use crate::server::config::SyslogConfig;
use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber and the panic hook.
pub fn init_telemetry(syslog: &SyslogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(syslog.stdout_level).into())
        .from_env_lossy();

    let registry = tracing_subscriber::registry().with(filter);

    if syslog.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_thread_ids(true)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339()),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_thread_ids(true)
                    .with_line_number(true)
                    .with_target(false)
                    .with_timer(fmt::time::ChronoLocal::rfc_3339())
                    .with_file(true)
                    .pretty(),
            )
            .try_init()?;
    }

    install_panic_hook();
    Ok(())
}

/// Maps a syslog severity to the most verbose level it admits.
pub fn level_filter(stdout_level: u8) -> LevelFilter {
    match stdout_level {
        0..=3 => LevelFilter::ERROR,
        4 => LevelFilter::WARN,
        5 | 6 => LevelFilter::INFO,
        7 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(panic = %info, "Panic caught");
        default_hook(info);
    }));
}

/// Whether [`init_telemetry`] (or any other subscriber) is active.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}
