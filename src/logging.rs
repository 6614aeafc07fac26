use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber. Filter via `RUST_LOG`
/// (default `info`); set `AUTOFUSE_LOG_JSON=1` for line-JSON output.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    let use_json = std::env::var("AUTOFUSE_LOG_JSON")
        .map(|value| value == "1")
        .unwrap_or(false);
    if use_json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.pretty().try_init();
    }
}
