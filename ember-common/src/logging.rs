//! Logging utilities for Ember.
//!
//! Installs a `tracing-subscriber` registry with either structured JSON or
//! human-readable output.
//!
//! # Noise Filtering
//!
//! Noisy library modules (hyper, reqwest, h2, rustls) are pinned to `warn` so
//! that connection-pool chatter does not drown out session and round events.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Library modules that are filtered to warn level.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
];

/// Build the filter directive string for a base level.
fn build_directives(log_level: &str) -> String {
    let mut directives = String::from(log_level);
    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }
    directives
}

/// Build the EnvFilter, preferring `RUST_LOG` when it is set.
fn build_filter(log_level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(build_directives(log_level))
}

/// Initialize logging.
///
/// * `log_level` - Base log level (trace, debug, info, warn, error)
/// * `log_format` - `"json"` for structured JSON, anything else for pretty output
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_logging(log_level: &str, log_format: &str) {
    let filter = build_filter(log_level);
    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len(),
        "Logging initialized"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives_pin_noisy_modules() {
        let directives = build_directives("debug");
        assert!(directives.starts_with("debug,"));
        for module in NOISY_MODULES {
            assert!(directives.contains(&format!("{}=warn", module)));
        }
    }

    #[test]
    fn test_init_logging_twice_does_not_panic() {
        init_logging("info", "pretty");
        init_logging("debug", "json");
    }
}
