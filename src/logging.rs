use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,netra_resilience=trace
///
/// Set NETRA_LOG_FORMAT=json for one JSON object per line.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("NETRA_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(false))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(true)
                        .with_line_number(true),
                )
                .init();
        }

        tracing::info!(json, "Logging initialized");
    });
}

/// Macro for logging circuit breaker transitions
#[macro_export]
macro_rules! circuit_event {
    ($name:expr, $from:expr, $to:expr) => {
        tracing::info!(
            circuit = %$name,
            from = ?$from,
            to = ?$to,
            "Circuit breaker state change"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}

/// Macro for logging session lifecycle events
#[macro_export]
macro_rules! session_event {
    ($action:expr, $session_id:expr, $user_id:expr) => {
        tracing::info!(
            action = $action,
            session_id = %$session_id,
            user_id = %$user_id,
            "Session event"
        )
    };
}
