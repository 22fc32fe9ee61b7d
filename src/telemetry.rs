use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

const DEFAULT_DIRECTIVES: &str = "info,currents=info,sqlx=warn,reqwest=warn,html5ever=error";

/// Install the global tracing subscriber. `RUST_LOG` overrides the defaults.
pub fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match format {
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    // A second init (tests, embedded use) keeps the first subscriber.
    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {}", e);
    }
}
