// Logging setup: EnvFilter + pretty or JSON output

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "conveyor=info";

/// Install the global subscriber
///
/// `RUST_LOG` overrides the default filter; `CONVEYOR_LOG_FORMAT=json` switches
/// to JSON lines.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_format = std::env::var("CONVEYOR_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
}
