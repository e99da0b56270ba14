//! Observability infrastructure for Drift.
//!
//! Structured logging with consistent spans. This module provides
//! initialization helpers and span constructors so every component logs
//! the same fields for the same operations.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `drift_engine=debug`)
///
/// # Example
///
/// ```rust
/// use drift_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for a migration run with standard fields.
///
/// # Example
///
/// ```rust
/// use drift_core::observability::migration_span;
///
/// let span = migration_span("run", "orders-db");
/// let _guard = span.enter();
/// // ... drive the migration run
/// ```
#[must_use]
pub fn migration_span(operation: &str, database: &str) -> Span {
    tracing::info_span!(
        "migration",
        op = operation,
        database = database,
    )
}

/// Creates a span for a single change-unit invocation.
#[must_use]
pub fn unit_span(group: &str, unit_id: &str) -> Span {
    tracing::info_span!(
        "change_unit",
        group = group,
        unit_id = unit_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        // Should not panic (uses Once internally)
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty); // Second call should be no-op
    }

    #[test]
    fn test_span_helpers_create_spans() {
        let span = migration_span("run", "orders-db");
        let _guard = span.enter();
        tracing::info!("test message in span");

        let span = unit_span("v1_initial", "3");
        let _guard = span.enter();
    }
}
