//! Error types.
//!
//! Every error is `Clone` so the session can keep the most recent one in its
//! observable error slot.

/// Suffix attached when every IP provider failed.
pub const NETWORK_BLOCKING_HINT: &str =
    "This is often caused by ad-blockers, privacy extensions, firewalls or other network restrictions blocking geolocation services";

/// A single IP provider failed. Recovered locally by trying the next provider.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("HTTP {0}")]
    Status(u16),
    /// Provider answered but reported a logical failure (e.g. invalid address)
    #[error("{0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

/// IP resolution failed after every provider was tried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LocateError {
    #[error("Failed to fetch IP data: {}. {}", .last_reason, NETWORK_BLOCKING_HINT)]
    AllProvidersFailed { last_reason: String },
}

/// Host positioning failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("Geolocation is not supported by this device")]
    Unsupported,
    #[error("Location permission denied. Please enable location access to use GPS tracking")]
    PermissionDenied,
    #[error("Unable to retrieve location: {0}")]
    Unavailable(String),
}

/// The external insight service failed. Logged, never surfaced to the user.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InsightError {
    #[error("insight service error: {0}")]
    Service(String),
}

/// Errors surfaced by a [`TrackingSession`](crate::TrackingSession).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Locate(#[from] LocateError),
    #[error(transparent)]
    Position(#[from] PositionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("tracking session has been disposed")]
    Disposed,
    #[error("no tokio runtime available: {0}")]
    Runtime(String),
}
