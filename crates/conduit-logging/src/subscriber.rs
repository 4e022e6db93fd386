//! Tracing subscriber initialization (SPEC_FULL.md §1 "Logging").
//!
//! Mirrors the teacher's `tron-core::logging::init_subscriber`: an `EnvFilter`
//! layered with a `fmt` layer writing to stderr. `RUST_LOG` always takes
//! precedence over the configured level, same as upstream.

use conduit_settings::LoggingSettings;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize the global tracing subscriber from [`LoggingSettings`].
///
/// Call once at daemon startup. Subsequent calls are no-ops, matching
/// `tracing_subscriber`'s `try_init` semantics.
pub fn init_subscriber(settings: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.as_filter_str()));

    if settings.json {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(true).json();
        let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
    } else {
        let fmt_layer =
            tracing_subscriber::fmt::layer().with_target(true).compact();
        let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
    }
}

/// Build the `tracing` span a session's work should run under (SPEC_FULL.md
/// §1), so every event a runner or bridge handler emits while processing a
/// session carries its `session_id` without threading it through every call.
#[must_use]
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("session", session_id = %session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_does_not_panic() {
        init_subscriber(&LoggingSettings::default());
        init_subscriber(&LoggingSettings { json: true, ..LoggingSettings::default() });
    }

    #[test]
    fn session_span_carries_id() {
        let span = session_span("abc123");
        assert_eq!(span.metadata().map(|m| m.name()), Some("session"));
    }
}
