use std::net::SocketAddr;

use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing from the `[logging]` section. `RUST_LOG`, when set,
/// takes precedence over `level`.
pub fn init_tracing_with_config(level: &str, json_format: bool) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let installed = if json_format {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(true))
            .try_init()
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.with_ansi(true))
            .try_init()
    };
    installed.wrap_err("Failed to install tracing subscriber")?;

    tracing::info!(level, json = json_format, "quay logging initialized");
    Ok(())
}

/// Span wrapping everything that happens on one accepted connection
pub fn create_connection_span(id: u64, peer: SocketAddr) -> tracing::Span {
    tracing::info_span!(
        "connection",
        conn.id = id,
        peer = %peer,
        kind = tracing::field::Empty,
    )
}
