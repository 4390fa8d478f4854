//! Observability infrastructure for tributary.
//!
//! Structured logging with consistent spans. This module provides the
//! subscriber initialization helper and span constructors shared by the
//! reconciliation engine and the plugin runtime.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

impl LogFormat {
    /// Parses a format name; anything other than `json` is pretty.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Initializes the logging subsystem.
///
/// Call once at process startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `tributary_plugins=debug`)
///
/// # Example
///
/// ```rust
/// use tributary_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // `try_init` so an embedding process that already installed a
        // subscriber keeps it.
        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "global subscriber already installed, keeping it");
        }
    });
}

/// Creates a span for one reconciliation round of an array task.
///
/// # Example
///
/// ```rust
/// use tributary_core::observability::reconcile_span;
///
/// let span = reconcile_span("exec-abc123-n0-0", 500);
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn reconcile_span(execution: &str, array_size: usize) -> Span {
    tracing::info_span!("reconcile", execution = execution, array_size = array_size)
}

/// Creates a span for a resource-plugin lifecycle call.
#[must_use]
pub fn plugin_span(operation: &str, plugin_id: &str, execution: &str) -> Span {
    tracing::info_span!(
        "plugin",
        op = operation,
        plugin = plugin_id,
        execution = execution,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json);
    }

    #[test]
    fn log_format_from_name() {
        assert_eq!(LogFormat::from_name("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::from_name("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::from_name(""), LogFormat::Pretty);
    }

    #[test]
    fn spans_can_be_entered() {
        let span = reconcile_span("exec-1", 10);
        let _guard = span.enter();
        tracing::info!("inside reconcile span");

        let span = plugin_span("create", "bigquery", "exec-1");
        let _guard = span.enter();
    }
}
