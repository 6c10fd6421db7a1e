use thiserror::Error;

use crate::message::TopicPartition;

/// The error taxonomy the core surfaces to callers and to instrumentation.
///
/// Class 3 failures (`InvalidConfigurationError`, `InvalidTimeBasedOffsetError`)
/// are synchronous and fatal to process boot. `InvalidLicenseToken` and
/// `ExpiredLicenseToken` are never raised by this crate directly -- license
/// verification is an external collaborator (spec.md section 1) -- but the variants
/// exist so the core can forward them as typed `error.occurred` events the
/// way it forwards any other external failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid license token")]
    InvalidLicenseToken,

    #[error("license token expired")]
    ExpiredLicenseToken,

    #[error("invalid configuration: {0}")]
    InvalidConfigurationError(String),

    #[error("invalid time-based offset for {0}: {1}")]
    InvalidTimeBasedOffsetError(TopicPartition, String),

    #[error("client error: {0}")]
    Client(#[from] ClientError),
}

/// Errors raised by a [`crate::client::Client`] implementation.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting on broker after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unknown topic-partition {0}")]
    UnknownPartition(TopicPartition),
}

/// The `type:` discriminator used on `error.occurred` instrumentation events,
/// mirroring spec.md section 6's enumerated event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEventKind {
    FetchLoopError,
    FetchLoopRestart,
    LicenserExpired,
    /// SPEC_FULL.md section B.3: `shutdown_timeout_ms` elapsed before the job
    /// queue drained, so `run_shutdown` stopped waiting regardless of queue
    /// state.
    ForcedShutdown,
}

impl ErrorEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorEventKind::FetchLoopError => "connection.listener.fetch_loop.error",
            ErrorEventKind::FetchLoopRestart => "connection.listener.fetch_loop.restart",
            ErrorEventKind::LicenserExpired => "licenser.expired",
            ErrorEventKind::ForcedShutdown => "connection.listener.forced_shutdown",
        }
    }
}

/// Emits a structured `error.occurred` tracing event. Logging transport
/// itself is out of scope (spec.md section 1); this only shapes the event the way
/// `spec.md` section 6 names it.
pub fn emit_error_occurred(kind: ErrorEventKind, err: &(dyn std::error::Error + 'static)) {
    tracing::error!(r#type = kind.as_str(), error = %err, "error.occurred");
}

/// Emits `connection.listener.forced_shutdown` (SPEC_FULL.md section B.3).
/// Not tied to an error value, unlike [`emit_error_occurred`] -- a forced
/// shutdown is an expected, if undesirable, outcome of a grace period
/// elapsing, not a failure.
pub fn emit_forced_shutdown(shutdown_timeout_ms: u64) {
    tracing::warn!(
        r#type = ErrorEventKind::ForcedShutdown.as_str(),
        shutdown_timeout_ms,
        "connection.listener.forced_shutdown"
    );
}
