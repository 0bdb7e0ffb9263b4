//! Tracing/logging initialization.
//!
//! Derives the default filter from the `logging` config section so every
//! nbexec crate logs at the configured level, keeps `RUST_LOG` as the
//! override, and writes to stderr: stdout stays clean for artifact output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialise the global tracing subscriber from the logging config.
///
/// `RUST_LOG` takes precedence over `logging.level` when set. With
/// `logging.json` the subscriber emits structured JSON lines instead of the
/// human-readable format.
pub fn init_tracing(logging: &LoggingConfig) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter(&logging.level)),
    );
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    if logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt)
            .init();
    }
}

fn default_filter(level: &str) -> String {
    format!("nbexec={level},nbexec_engine={level},nbexec_core={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_all_crates() {
        let filter = default_filter("debug");
        assert!(filter.contains("nbexec=debug"));
        assert!(filter.contains("nbexec_engine=debug"));
        assert!(filter.contains("nbexec_core=debug"));
    }
}
