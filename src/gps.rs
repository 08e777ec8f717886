//! GPS watch pipeline.
//!
//! The host platform owns the positioning hardware and pushes fixes; this
//! module wraps that capability as a [`PositionSource`] and manages the
//! subscription lifecycle in [`GpsTracker`].
//!
//! Each subscription hands the host a [`PositionSink`] bound to one
//! subscription generation. Once the tracker stops, every sink from that
//! generation goes dead: late fixes or errors delivered through it are dropped
//! without touching session state.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::error::PositionError;
use crate::LocationSample;

/// Host identifier for an active position watch.
pub type WatchId = u64;

/// Failure code the host uses for permission denial.
pub const PERMISSION_DENIED: u16 = 1;
pub const POSITION_UNAVAILABLE: u16 = 2;
pub const TIMEOUT: u16 = 3;

/// Options passed to the host when subscribing.
///
/// Timeout and cache age are enforced by the host, not reimplemented here. A
/// timeout arrives as an ordinary [`PositionFailure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct PositionOptions {
    /// Request the most accurate fix available. Default: true
    pub enable_high_accuracy: bool,
    /// Maximum age of a cached fix the host may return. Default: 1000ms
    pub maximum_age_ms: u64,
    /// Per-update timeout. Default: 5000ms
    pub timeout_ms: u64,
}

impl Default for PositionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            maximum_age_ms: 1000,
            timeout_ms: 5000,
        }
    }
}

/// One fix reported by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in metres
    pub accuracy: f64,
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    pub timestamp_ms: u64,
}

impl PositionFix {
    /// Normalize into a GPS [`LocationSample`].
    ///
    /// Negative or non-finite accuracy, speed and altitude become `None`.
    pub fn into_sample(self) -> LocationSample {
        let accuracy = Some(self.accuracy).filter(|a| a.is_finite() && *a >= 0.0);
        LocationSample {
            speed: self.speed.filter(|s| s.is_finite() && *s >= 0.0),
            altitude: self.altitude.filter(|a| a.is_finite()),
            ..LocationSample::gps(self.latitude, self.longitude, accuracy, self.timestamp_ms)
        }
    }
}

/// An error reported by the host. Code `1` is permission denial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct PositionFailure {
    pub code: u16,
    pub message: String,
}

impl From<&PositionFailure> for PositionError {
    fn from(failure: &PositionFailure) -> Self {
        match failure.code {
            PERMISSION_DENIED => PositionError::PermissionDenied,
            _ if failure.message.is_empty() => {
                PositionError::Unavailable(format!("error code {}", failure.code))
            }
            _ => PositionError::Unavailable(failure.message.clone()),
        }
    }
}

/// Receives fixes and failures from a live subscription.
pub trait PositionObserver: Send + Sync {
    fn on_fix(&self, fix: PositionFix);
    fn on_failure(&self, failure: PositionFailure);
}

/// Host positioning capability.
pub trait PositionSource: Send + Sync {
    /// Whether the host can report positions at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Begin continuous updates, delivering each fix or failure to `sink`.
    fn watch_position(&self, options: &PositionOptions, sink: PositionSink) -> Result<WatchId, PositionError>;

    /// Cancel a watch. Unknown ids are ignored.
    fn clear_watch(&self, id: WatchId);
}

/// Handle the host uses to push updates for one subscription.
///
/// Cheap to clone. Deliveries after the subscription ended are dropped.
#[derive(Clone)]
pub struct PositionSink {
    generation: u64,
    live: Arc<AtomicU64>,
    observer: Weak<dyn PositionObserver>,
}

impl PositionSink {
    /// Whether this sink still belongs to the active subscription.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire) == self.generation
    }

    /// Deliver a fix. Returns `false` if it was dropped.
    pub fn deliver_fix(&self, fix: PositionFix) -> bool {
        match self.live_observer() {
            Some(observer) => {
                observer.on_fix(fix);
                true
            }
            None => {
                debug!("[GpsTracker] Dropping fix from ended subscription #{}", self.generation);
                false
            }
        }
    }

    /// Deliver a failure. Returns `false` if it was dropped.
    pub fn deliver_failure(&self, failure: PositionFailure) -> bool {
        match self.live_observer() {
            Some(observer) => {
                observer.on_failure(failure);
                true
            }
            None => {
                debug!("[GpsTracker] Dropping failure from ended subscription #{}", self.generation);
                false
            }
        }
    }

    fn live_observer(&self) -> Option<Arc<dyn PositionObserver>> {
        if !self.is_live() {
            return None;
        }
        self.observer.upgrade()
    }
}

/// Owns the subscription to a [`PositionSource`].
///
/// `start` while running and `stop` while stopped are both no-ops.
pub struct GpsTracker {
    source: Arc<dyn PositionSource>,
    options: PositionOptions,
    /// Generation of the active subscription, 0 when stopped
    live: Arc<AtomicU64>,
    next_generation: AtomicU64,
    watch_id: Mutex<Option<WatchId>>,
}

impl GpsTracker {
    pub fn new(source: Arc<dyn PositionSource>, options: PositionOptions) -> Self {
        Self {
            source,
            options,
            live: Arc::new(AtomicU64::new(0)),
            next_generation: AtomicU64::new(1),
            watch_id: Mutex::new(None),
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.live.load(Ordering::Acquire) != 0
    }

    pub fn options(&self) -> &PositionOptions {
        &self.options
    }

    /// Subscribe to the source, routing updates to `observer`.
    ///
    /// Returns `Ok(true)` when a new subscription was created and `Ok(false)`
    /// when one was already active.
    pub fn start(&self, observer: Weak<dyn PositionObserver>) -> Result<bool, PositionError> {
        if self.is_tracking() {
            debug!("[GpsTracker] start ignored, already tracking");
            return Ok(false);
        }
        if !self.source.is_supported() {
            warn!("[GpsTracker] Position source not supported");
            return Err(PositionError::Unsupported);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.live.store(generation, Ordering::Release);
        let sink = PositionSink {
            generation,
            live: Arc::clone(&self.live),
            observer,
        };

        // The source may deliver synchronously, so no lock is held here
        let id = match self.source.watch_position(&self.options, sink) {
            Ok(id) => id,
            Err(e) => {
                self.end_generation(generation);
                warn!("[GpsTracker] watch_position failed: {}", e);
                return Err(e);
            }
        };

        if self.live.load(Ordering::Acquire) != generation {
            // Stopped (e.g. by an immediate failure) before the watch id came back
            self.source.clear_watch(id);
            return Ok(false);
        }

        *self.watch_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
        info!(
            "[GpsTracker] Tracking started (watch {}, subscription #{}, high_accuracy={}, max_age={}ms, timeout={}ms)",
            id, generation, self.options.enable_high_accuracy, self.options.maximum_age_ms, self.options.timeout_ms
        );
        Ok(true)
    }

    /// Cancel the subscription. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        let generation = self.live.swap(0, Ordering::AcqRel);
        let id = self.watch_id.lock().unwrap_or_else(PoisonError::into_inner).take();

        if let Some(id) = id {
            self.source.clear_watch(id);
        }
        if generation == 0 {
            return false;
        }
        info!("[GpsTracker] Tracking stopped (subscription #{})", generation);
        true
    }

    fn end_generation(&self, generation: u64) {
        let _ = self.live.compare_exchange(generation, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}

impl Drop for GpsTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Position source that records subscriptions so tests can push updates.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        pub unsupported: bool,
        pub sinks: Mutex<Vec<(WatchId, PositionSink)>>,
        pub cleared: Mutex<Vec<WatchId>>,
        pub next_id: AtomicU64,
    }

    impl ScriptedSource {
        pub fn subscriptions(&self) -> usize {
            self.sinks.lock().unwrap().len()
        }

        pub fn last_sink(&self) -> PositionSink {
            self.sinks.lock().unwrap().last().unwrap().1.clone()
        }
    }

    impl PositionSource for ScriptedSource {
        fn is_supported(&self) -> bool {
            !self.unsupported
        }

        fn watch_position(&self, _options: &PositionOptions, sink: PositionSink) -> Result<WatchId, PositionError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 100;
            self.sinks.lock().unwrap().push((id, sink));
            Ok(id)
        }

        fn clear_watch(&self, id: WatchId) {
            self.cleared.lock().unwrap().push(id);
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        fixes: AtomicUsize,
        failures: AtomicUsize,
    }

    impl PositionObserver for CountingObserver {
        fn on_fix(&self, _fix: PositionFix) {
            self.fixes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_failure(&self, _failure: PositionFailure) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) fn fix_at(latitude: f64, longitude: f64, timestamp_ms: u64) -> PositionFix {
        PositionFix {
            latitude,
            longitude,
            accuracy: 5.0,
            speed: None,
            altitude: None,
            timestamp_ms,
        }
    }

    fn tracker_with(source: &Arc<ScriptedSource>) -> GpsTracker {
        let dyn_source: Arc<dyn PositionSource> = source.clone();
        GpsTracker::new(dyn_source, PositionOptions::default())
    }

    #[test]
    fn test_start_is_idempotent() {
        let source = Arc::new(ScriptedSource::default());
        let tracker = tracker_with(&source);
        let observer: Arc<dyn PositionObserver> = Arc::new(CountingObserver::default());

        assert_eq!(tracker.start(Arc::downgrade(&observer)), Ok(true));
        assert_eq!(tracker.start(Arc::downgrade(&observer)), Ok(false));
        assert_eq!(source.subscriptions(), 1);
        assert!(tracker.is_tracking());
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let source = Arc::new(ScriptedSource::default());
        let tracker = tracker_with(&source);
        assert!(!tracker.stop());
        assert!(source.cleared.lock().unwrap().is_empty());
    }

    #[test]
    fn test_stop_clears_watch_and_kills_sink() {
        let source = Arc::new(ScriptedSource::default());
        let tracker = tracker_with(&source);
        let counting = Arc::new(CountingObserver::default());
        let observer: Arc<dyn PositionObserver> = counting.clone();

        tracker.start(Arc::downgrade(&observer)).unwrap();
        let sink = source.last_sink();
        assert!(sink.deliver_fix(fix_at(1.0, 2.0, 1)));

        assert!(tracker.stop());
        assert_eq!(*source.cleared.lock().unwrap(), vec![100]);
        assert!(!sink.is_live());
        assert!(!sink.deliver_fix(fix_at(1.0, 2.0, 2)));
        assert!(!sink.deliver_failure(PositionFailure { code: 3, message: "timeout".into() }));
        assert_eq!(counting.fixes.load(Ordering::SeqCst), 1);
        assert_eq!(counting.failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_does_not_revive_old_sink() {
        let source = Arc::new(ScriptedSource::default());
        let tracker = tracker_with(&source);
        let observer: Arc<dyn PositionObserver> = Arc::new(CountingObserver::default());

        tracker.start(Arc::downgrade(&observer)).unwrap();
        let old = source.last_sink();
        tracker.stop();
        tracker.start(Arc::downgrade(&observer)).unwrap();

        assert!(!old.is_live());
        assert!(source.last_sink().is_live());
    }

    #[test]
    fn test_unsupported_source() {
        let source = Arc::new(ScriptedSource { unsupported: true, ..Default::default() });
        let tracker = tracker_with(&source);
        let observer: Arc<dyn PositionObserver> = Arc::new(CountingObserver::default());

        assert_eq!(tracker.start(Arc::downgrade(&observer)), Err(PositionError::Unsupported));
        assert!(!tracker.is_tracking());
        assert_eq!(source.subscriptions(), 0);
    }

    #[test]
    fn test_failure_mapping() {
        let denied = PositionFailure { code: PERMISSION_DENIED, message: "User denied Geolocation".into() };
        assert_eq!(PositionError::from(&denied), PositionError::PermissionDenied);

        let timeout = PositionFailure { code: TIMEOUT, message: "Timeout expired".into() };
        assert_eq!(PositionError::from(&timeout), PositionError::Unavailable("Timeout expired".into()));

        let blank = PositionFailure { code: POSITION_UNAVAILABLE, message: String::new() };
        assert_eq!(PositionError::from(&blank), PositionError::Unavailable("error code 2".into()));
    }

    #[test]
    fn test_fix_normalization() {
        let sample = PositionFix {
            latitude: 1.0,
            longitude: 2.0,
            accuracy: -1.0,
            speed: Some(f64::NAN),
            altitude: Some(120.0),
            timestamp_ms: 7,
        }
        .into_sample();

        assert_eq!(sample.source, crate::LocationSource::Gps);
        assert_eq!(sample.accuracy, None);
        assert_eq!(sample.speed, None);
        assert_eq!(sample.altitude, Some(120.0));
        assert_eq!(sample.timestamp_ms, 7);
    }
}
