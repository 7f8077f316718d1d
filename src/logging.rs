use tracing_subscriber::EnvFilter;

/// Initialise logging to stderr. The default level is `info`, or `warn`
/// while a full-screen terminal UI owns the display. With `debug` the level
/// is `debug` and `RUST_LOG` may override it.
pub fn init(debug: bool, fullscreen: bool) {
    let level = match (debug, fullscreen) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    };

    // Without `--verbose` a stray `RUST_LOG` in the environment is ignored.
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
