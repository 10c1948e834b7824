use tracing_subscriber::EnvFilter;

/// Level used when neither `RUST_LOG` nor `--verbose` says otherwise.
pub fn default_filter(verbose: bool, level: &str) -> String {
    if verbose {
        "debug".to_string()
    } else if level.trim().is_empty() {
        "info".to_string()
    } else {
        level.trim().to_string()
    }
}

pub fn init(verbose: bool, level: &str) {
    //! Installs the global subscriber. `RUST_LOG` wins over everything.
    let fallback = default_filter(verbose, level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
