//! Typed error kinds shared across the bus, session, cron, and agent components.

use thiserror::Error;

/// The error kinds the core distinguishes on.
///
/// Recoverable, per-turn kinds (`Provider`, `Tool`) are handled inside the
/// Agent Loop and never escape it. Transport and storage errors propagate to
/// whichever orchestrator owns the failing component.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Frame decode failure: short read, oversized length, or bad JSON.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket closed, refused, or broken mid-stream.
    #[error("transport error: {0}")]
    Transport(String),

    /// Sender not present in `allow_from`; dropped silently, never surfaced.
    #[error("sender not authorized")]
    AuthorizationRejected,

    /// The LLM call failed (network, rate-limit, non-retryable API error).
    #[error("provider error: {0}")]
    Provider(String),

    /// A tool invocation failed; reported back to the model, not the user.
    #[error("tool error: {0}")]
    Tool(String),

    /// A cron schedule expression failed to parse at the API boundary.
    #[error("schedule error: {0}")]
    Schedule(String),

    /// Session or cron-store write failed; in-memory state is preserved.
    #[error("storage error: {0}")]
    Storage(String),

    /// Missing configuration (e.g. API key) discovered at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Clean shutdown; callers should not log this as a failure.
    #[error("cancelled")]
    Cancelled,
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Protocol(e.to_string())
    }
}
