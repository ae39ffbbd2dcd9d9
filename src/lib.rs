pub mod analysis;
pub mod config;
pub mod mcp_client;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Initialize the tracing subscriber.
///
/// Logs go to stderr; stdout carries command output only. `RUST_LOG`
/// overrides the default filter. Calling this twice is harmless.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_tool_runtime=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(
            version = env!("CARGO_PKG_VERSION"),
            pid = std::process::id(),
            "tracing initialized"
        );
    }
}
