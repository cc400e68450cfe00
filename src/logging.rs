use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber. `RUST_LOG` selects levels (default `info`);
/// `CUSTODIA_LOG_JSON=1` switches to JSON lines. Output goes to stderr so it
/// never mixes with command output.
pub fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let use_json = std::env::var("CUSTODIA_LOG_JSON")
        .map(|value| value == "1")
        .unwrap_or(false);

    if use_json {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .compact()
            .with_writer(std::io::stderr)
            .try_init();
    }
}
