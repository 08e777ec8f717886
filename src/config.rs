//! Session configuration.

use crate::gps::PositionOptions;

/// Number of GPS positions kept in the trailing history.
pub const DEFAULT_HISTORY_CAPACITY: u32 = 50;

/// Movement (km) since the last insight before a new one is requested.
pub const DEFAULT_INSIGHT_REFRESH_KM: f64 = 0.5;

/// Per-request timeout for IP geolocation providers.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_PRIMARY_BASE_URL: &str = "https://ipapi.co";
pub const DEFAULT_SECONDARY_BASE_URL: &str = "https://ipwho.is";

/// Configuration for a [`TrackingSession`](crate::TrackingSession).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct SessionConfig {
    /// Maximum number of GPS positions kept in history, oldest dropped first.
    /// Default: 50
    pub history_capacity: u32,

    /// A GPS fix further than this from the last insight location (km)
    /// triggers a new insight request. Default: 0.5
    pub insight_refresh_km: f64,

    /// Options passed to the host position source.
    pub position: PositionOptions,

    /// Timeout for each IP provider request in seconds. Default: 10
    pub http_timeout_secs: u64,

    /// Base URL of the primary IP provider (ipapi.co-compatible).
    pub primary_base_url: String,

    /// Base URL of the secondary IP provider (ipwho.is-compatible).
    pub secondary_base_url: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            insight_refresh_km: DEFAULT_INSIGHT_REFRESH_KM,
            position: PositionOptions::default(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            primary_base_url: DEFAULT_PRIMARY_BASE_URL.to_string(),
            secondary_base_url: DEFAULT_SECONDARY_BASE_URL.to_string(),
        }
    }
}
