use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins; the default level is `info`.
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    // A subscriber installed by the embedding process stays in place.
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}
