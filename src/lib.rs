//! # Location Telemetry
//!
//! Live location telemetry: reconciles device GPS with IP-based geolocation.
//!
//! This library provides:
//! - IP geolocation through an ordered list of providers with automatic fallback
//! - A GPS watch pipeline with a capped trailing movement history
//! - Drift (GPS vs IP distance) as a derived reconciliation view
//! - Movement-gated insight requests against an external enrichment service
//!
//! ## Features
//!
//! - **`http`** (default) - reqwest-backed IP geolocation providers
//! - **`ffi`** - Enable FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use location_telemetry::{GpsPoint, geo_utils, HistoryBuffer, LocationSample};
//!
//! let gps = GpsPoint::new(10.0, 10.0);
//! let ip = GpsPoint::new(10.0, 10.01);
//! let drift = geo_utils::distance_km(&gps, &ip);
//! assert!(drift > 0.0 && drift < 2.0);
//!
//! let mut history = HistoryBuffer::new(50);
//! history.push(&LocationSample::gps(10.0, 10.0, Some(5.0), 1_000));
//! assert_eq!(history.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod error;
pub mod geo_utils;
pub mod gps;
pub mod history;
pub mod insight;
pub mod ip;
pub mod reconcile;
pub mod session;

pub use config::SessionConfig;
pub use error::{InsightError, LocateError, PositionError, ProviderError, SessionError};
pub use gps::{
    GpsTracker, PositionFailure, PositionFix, PositionObserver, PositionOptions, PositionSink,
    PositionSource, WatchId,
};
pub use history::{HistoryBuffer, HistoryPoint};
pub use insight::{InsightResult, InsightService, InsightSource, InsightState, InsightTrigger};
pub use ip::{IpLocator, IpProvider, IpRecord};
pub use reconcile::Reconciliation;
pub use session::{SessionSnapshot, TrackingSession};

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("LocationTelemetryRust")
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A coordinate with latitude and longitude in degrees (WGS84).
///
/// # Example
/// ```
/// use location_telemetry::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Where a [`LocationSample`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LocationSource {
    Gps,
    Ip,
}

/// One location estimate, immutable once created.
///
/// GPS samples are produced from device fixes, IP samples from a resolved
/// [`IpRecord`]. IP samples never carry an accuracy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in metres, `None` when unknown
    pub accuracy: Option<f64>,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub source: LocationSource,
    /// Ground speed in metres per second
    pub speed: Option<f64>,
    /// Altitude in metres
    pub altitude: Option<f64>,
}

impl LocationSample {
    /// A GPS-sourced sample without speed or altitude.
    pub fn gps(latitude: f64, longitude: f64, accuracy: Option<f64>, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            timestamp_ms,
            source: LocationSource::Gps,
            speed: None,
            altitude: None,
        }
    }

    /// An IP-sourced sample. Accuracy is always unknown for IP geolocation.
    pub fn ip(latitude: f64, longitude: f64, timestamp_ms: u64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            timestamp_ms,
            source: LocationSource::Ip,
            speed: None,
            altitude: None,
        }
    }

    /// Position-only view of this sample.
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// FFI Exports (only when feature enabled)
// ============================================================================

#[cfg(feature = "ffi")]
mod ffi {
    use super::*;
    use log::{info, warn};

    /// Great-circle distance in kilometres between two points.
    #[uniffi::export]
    pub fn ffi_distance_km(a: GpsPoint, b: GpsPoint) -> f64 {
        geo_utils::distance_km(&a, &b)
    }

    /// Initial bearing in degrees from `from` to `to`.
    #[uniffi::export]
    pub fn ffi_bearing_deg(from: GpsPoint, to: GpsPoint) -> f64 {
        geo_utils::bearing_deg(&from, &to)
    }

    /// Get default session configuration.
    #[uniffi::export]
    pub fn default_session_config() -> SessionConfig {
        init_logging();
        info!("[LocationTelemetryRust] default_session_config called");
        SessionConfig::default()
    }

    /// Resolve an IP location through the default provider chain.
    ///
    /// Blocking wrapper for mobile callers: runs the async lookup on its own
    /// tokio runtime. Returns `None` when every provider failed.
    #[uniffi::export]
    pub fn resolve_ip_location(address: Option<String>, config: SessionConfig) -> Option<IpRecord> {
        use tokio::runtime::Builder;

        init_logging();
        info!("[LocationTelemetryRust] resolve_ip_location called for {:?}", address);

        let rt = match Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(e) => {
                warn!("Failed to create tokio runtime: {}", e);
                return None;
            }
        };

        let locator = match IpLocator::from_config(&config) {
            Ok(locator) => locator,
            Err(e) => {
                warn!("Failed to create IP locator: {}", e);
                return None;
            }
        };

        match rt.block_on(locator.resolve(address.as_deref())) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("[LocationTelemetryRust] {}", e);
                None
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
