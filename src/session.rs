//! Tracking session: owns the locator, tracker, history and insight trigger.
//!
//! A session has an explicit lifecycle: [`TrackingSession::create`], then any
//! number of [`start`](TrackingSession::start) / [`stop`](TrackingSession::stop)
//! cycles, then [`dispose`](TrackingSession::dispose). All observable state
//! lives in a [`SessionSnapshot`] behind a `tokio::sync::watch` channel, so
//! each update is an atomic replacement that any number of readers can follow.
//!
//! Ownership of fields:
//! - GPS fixes write `latest_gps`, `history` and clear `error`
//! - IP resolution writes `latest_ip` and `ip_record`
//! - either path may set `error` (most recent wins)

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::{PositionError, SessionError};
use crate::gps::{GpsTracker, PositionFailure, PositionFix, PositionObserver, PositionSource};
use crate::history::{HistoryBuffer, HistoryPoint};
use crate::insight::{InsightService, InsightState, InsightTrigger};
use crate::ip::{IpLocator, IpRecord};
use crate::reconcile::{self, Reconciliation};
use crate::{unix_millis, LocationSample, SessionConfig};

/// Everything a consumer can observe about a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub latest_gps: Option<LocationSample>,
    pub latest_ip: Option<LocationSample>,
    pub ip_record: Option<IpRecord>,
    pub history: HistoryBuffer,
    /// Single user-facing error slot
    pub error: Option<SessionError>,
    pub tracking: bool,
}

impl SessionSnapshot {
    fn new(history_capacity: usize) -> Self {
        Self {
            latest_gps: None,
            latest_ip: None,
            ip_record: None,
            history: HistoryBuffer::new(history_capacity),
            error: None,
            tracking: false,
        }
    }

    /// Distance between the latest GPS and IP samples, 0.0 unless both exist.
    pub fn drift_km(&self) -> f64 {
        reconcile::drift_km(self.latest_gps.as_ref(), self.latest_ip.as_ref())
    }

    pub fn reconciliation(&self) -> Reconciliation {
        Reconciliation::new(self.latest_gps.clone(), self.latest_ip.clone())
    }
}

struct SessionInner {
    locator: IpLocator,
    tracker: GpsTracker,
    insight: InsightTrigger,
    state: watch::Sender<SessionSnapshot>,
    disposed: AtomicBool,
}

impl SessionInner {
    fn set_error(&self, error: SessionError) {
        self.state.send_modify(|s| s.error = Some(error));
    }
}

impl PositionObserver for SessionInner {
    fn on_fix(&self, fix: PositionFix) {
        let sample = fix.into_sample();
        let point = sample.point();
        if !point.is_valid() {
            warn!("[Session] Ignoring fix with invalid coordinates ({}, {})", point.latitude, point.longitude);
            return;
        }

        // A fix delivered on another thread can pass the sink check just as
        // tracking stops, so liveness is checked again under the state lock
        let accepted = self.state.send_if_modified(|s| {
            if !self.tracker.is_tracking() {
                return false;
            }
            s.latest_gps = Some(sample.clone());
            s.history.push(&sample);
            s.error = None;
            true
        });
        if !accepted {
            debug!("[Session] Dropping fix delivered after tracking stopped");
            return;
        }
        debug!(
            "[Session] GPS fix ({:.5}, {:.5}) ±{:?}m",
            point.latitude, point.longitude, sample.accuracy
        );

        self.insight.request_if_moved(point);
    }

    fn on_failure(&self, failure: PositionFailure) {
        // Not retried: the user has to start tracking again
        if !self.tracker.stop() {
            debug!("[Session] Dropping position failure delivered after tracking stopped");
            return;
        }
        warn!("[Session] Position failure (code {}): {}", failure.code, failure.message);

        let error = PositionError::from(&failure);
        self.state.send_modify(|s| {
            s.tracking = false;
            s.error = Some(error.into());
        });
    }
}

/// A single live tracking session.
pub struct TrackingSession {
    inner: Arc<SessionInner>,
    config: SessionConfig,
}

impl TrackingSession {
    /// Create a session. Must be called from within a tokio runtime; insight
    /// requests are spawned on that runtime.
    pub fn create(
        config: SessionConfig,
        locator: IpLocator,
        position_source: Arc<dyn PositionSource>,
        insight_service: Arc<dyn InsightService>,
    ) -> Result<Self, SessionError> {
        let runtime = Handle::try_current().map_err(|e| SessionError::Runtime(e.to_string()))?;
        let (state, _rx) = watch::channel(SessionSnapshot::new(config.history_capacity as usize));

        let inner = SessionInner {
            locator,
            tracker: GpsTracker::new(position_source, config.position.clone()),
            insight: InsightTrigger::new(insight_service, runtime, config.insight_refresh_km),
            state,
            disposed: AtomicBool::new(false),
        };
        info!(
            "[Session] Created (history={}, insight_refresh={}km, providers={:?})",
            config.history_capacity, config.insight_refresh_km, inner.locator.provider_names()
        );

        Ok(Self {
            inner: Arc::new(inner),
            config,
        })
    }

    /// Create a session using the HTTP providers configured in `config`.
    #[cfg(feature = "http")]
    pub fn with_http_providers(
        config: SessionConfig,
        position_source: Arc<dyn PositionSource>,
        insight_service: Arc<dyn InsightService>,
    ) -> Result<Self, SessionError> {
        let locator = IpLocator::from_config(&config)?;
        Self::create(config, locator, position_source, insight_service)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Begin GPS tracking. Calling this while already tracking does nothing.
    ///
    /// If positioning is unsupported the error is surfaced and tracking never starts.
    pub fn start(&self) -> Result<(), SessionError> {
        self.ensure_live()?;

        let inner: Weak<SessionInner> = Arc::downgrade(&self.inner);
        match self.inner.tracker.start(inner) {
            Ok(true) => {
                self.inner.state.send_modify(|s| s.tracking = true);
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                self.inner.set_error(e.clone().into());
                Err(e.into())
            }
        }
    }

    /// Stop GPS tracking. No-op when not tracking.
    pub fn stop(&self) {
        self.inner.tracker.stop();
        self.inner.state.send_if_modified(|s| {
            let was_tracking = s.tracking;
            s.tracking = false;
            was_tracking
        });
    }

    /// Stop tracking and refuse further use. In-flight insight requests still
    /// complete but nothing new is started.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop();
        info!("[Session] Disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Start GPS tracking and resolve the initial IP location.
    ///
    /// A GPS start failure lands in the error slot and does not prevent IP
    /// resolution; the IP result is returned.
    pub async fn launch(&self, address: Option<&str>) -> Result<IpRecord, SessionError> {
        if let Err(e) = self.start() {
            warn!("[Session] GPS unavailable at launch: {}", e);
        }
        self.resolve_ip(address).await
    }

    /// Resolve `address` (or the caller's own address) and record it as the
    /// latest IP sample.
    ///
    /// An insight is requested for the IP location only while GPS is not
    /// tracking or has not produced a fix yet.
    pub async fn resolve_ip(&self, address: Option<&str>) -> Result<IpRecord, SessionError> {
        self.ensure_live()?;

        let result = self.inner.locator.resolve(address).await;
        self.ensure_live()?;

        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("[Session] IP resolution failed: {}", e);
                self.inner.set_error(e.clone().into());
                return Err(e.into());
            }
        };

        let sample = LocationSample::ip(record.latitude, record.longitude, unix_millis());
        let point = sample.point();
        let gps_active = self.inner.tracker.is_tracking();

        let mut has_gps_fix = false;
        self.inner.state.send_modify(|s| {
            has_gps_fix = s.latest_gps.is_some();
            s.latest_ip = Some(sample);
            s.ip_record = Some(record.clone());
        });

        if !gps_active || !has_gps_fix {
            self.inner.insight.request(point);
        } else {
            debug!("[Session] GPS is driving insights, not requesting for IP location");
        }
        Ok(record)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn reconciliation(&self) -> Reconciliation {
        self.inner.state.borrow().reconciliation()
    }

    pub fn drift_km(&self) -> f64 {
        self.inner.state.borrow().drift_km()
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<HistoryPoint> {
        self.inner.state.borrow().history.to_vec()
    }

    pub fn current_error(&self) -> Option<SessionError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.tracker.is_tracking()
    }

    pub fn insight(&self) -> InsightState {
        self.inner.insight.snapshot()
    }

    pub fn subscribe_insight(&self) -> watch::Receiver<InsightState> {
        self.inner.insight.subscribe()
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_disposed() {
            return Err(SessionError::Disposed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LocateError, ProviderError};
    use crate::gps::tests::{fix_at, ScriptedSource};
    use crate::gps::{PositionSink, PERMISSION_DENIED};
    use crate::insight::tests::EchoService;
    use crate::ip::IpProvider;
    use crate::{geo_utils, GpsPoint};
    use futures::future::BoxFuture;

    struct StaticProvider {
        outcome: Result<IpRecord, ProviderError>,
    }

    impl IpProvider for StaticProvider {
        fn name(&self) -> &str {
            "static"
        }

        fn lookup<'a>(&'a self, _address: Option<&'a str>) -> BoxFuture<'a, Result<IpRecord, ProviderError>> {
            let outcome = self.outcome.clone();
            Box::pin(async move { outcome })
        }
    }

    fn ip_record(latitude: f64, longitude: f64) -> IpRecord {
        IpRecord {
            ip: "198.51.100.4".into(),
            city: "Testville".into(),
            region: "Region".into(),
            country: "Country".into(),
            country_code: "CC".into(),
            latitude,
            longitude,
            org: "Example Net".into(),
            asn: "AS64500".into(),
            timezone: "UTC".into(),
            currency: "USD".into(),
            calling_code: "1".into(),
            languages: "en".into(),
        }
    }

    struct Harness {
        session: TrackingSession,
        source: Arc<ScriptedSource>,
        insight: Arc<EchoService>,
    }

    impl Harness {
        fn new(ip: Result<IpRecord, ProviderError>) -> Self {
            Self::with_source(ip, ScriptedSource::default())
        }

        fn with_source(ip: Result<IpRecord, ProviderError>, source: ScriptedSource) -> Self {
            let source = Arc::new(source);
            let insight = Arc::new(EchoService::default());
            let provider: Box<dyn IpProvider> = Box::new(StaticProvider { outcome: ip });
            let locator = IpLocator::new(vec![provider]);
            let session = TrackingSession::create(
                SessionConfig::default(),
                locator,
                source.clone(),
                insight.clone(),
            )
            .unwrap();
            Self { session, source, insight }
        }

        fn sink(&self) -> PositionSink {
            self.source.last_sink()
        }

        fn insight_calls(&self) -> usize {
            self.insight.calls.lock().unwrap().len()
        }

        /// Let spawned insight requests finish.
        async fn settle(&self) {
            for _ in 0..100 {
                if !self.session.insight().loading {
                    return;
                }
                tokio::task::yield_now().await;
            }
            panic!("insight requests did not settle");
        }
    }

    fn north_of(origin: GpsPoint, km: f64) -> GpsPoint {
        let d_lat = (km / geo_utils::EARTH_RADIUS_KM).to_degrees();
        GpsPoint::new(origin.latitude + d_lat, origin.longitude)
    }

    #[tokio::test]
    async fn test_fix_updates_state_and_requests_first_insight() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        assert!(h.session.snapshot().tracking);

        assert!(h.sink().deliver_fix(fix_at(10.0, 10.0, 1_000)));
        let snap = h.session.snapshot();
        assert_eq!(snap.latest_gps.as_ref().map(|s| s.point()), Some(GpsPoint::new(10.0, 10.0)));
        assert_eq!(snap.history.len(), 1);

        h.settle().await;
        assert_eq!(h.insight_calls(), 1);
        assert_eq!(h.session.insight().last_location, Some(GpsPoint::new(10.0, 10.0)));
    }

    #[tokio::test]
    async fn test_small_moves_do_not_request_insight() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        let origin = GpsPoint::new(10.0, 10.0);

        h.sink().deliver_fix(fix_at(origin.latitude, origin.longitude, 1));
        h.settle().await;

        let near = north_of(origin, 0.4);
        h.sink().deliver_fix(fix_at(near.latitude, near.longitude, 2));
        h.settle().await;
        assert_eq!(h.insight_calls(), 1);

        let far = north_of(origin, 0.6);
        h.sink().deliver_fix(fix_at(far.latitude, far.longitude, 3));
        h.settle().await;
        assert_eq!(h.insight_calls(), 2);
        assert_eq!(h.session.history().len(), 3);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        for i in 0..60u64 {
            h.sink().deliver_fix(fix_at(10.0, 10.0 + i as f64 * 0.0001, i));
        }
        let history = h.session.history();
        assert_eq!(history.len(), 50);
        assert_eq!(history.first().map(|p| p.timestamp_ms), Some(10));
        assert_eq!(history.last().map(|p| p.timestamp_ms), Some(59));
    }

    #[tokio::test]
    async fn test_ip_without_gps_requests_insight() {
        let h = Harness::new(Ok(ip_record(48.85, 2.35)));
        let record = h.session.resolve_ip(None).await.unwrap();
        assert_eq!(record.city, "Testville");

        let snap = h.session.snapshot();
        let ip = snap.latest_ip.unwrap();
        assert_eq!(ip.source, crate::LocationSource::Ip);
        assert_eq!(ip.accuracy, None);
        assert!(ip.timestamp_ms > 0);
        assert_eq!(h.session.drift_km(), 0.0);

        h.settle().await;
        assert_eq!(h.insight_calls(), 1);
    }

    #[tokio::test]
    async fn test_ip_does_not_override_live_gps_insights() {
        let h = Harness::new(Ok(ip_record(10.0, 10.01)));
        h.session.start().unwrap();
        h.sink().deliver_fix(fix_at(10.0, 10.0, 1));
        h.settle().await;
        assert_eq!(h.insight_calls(), 1);

        h.session.resolve_ip(None).await.unwrap();
        h.settle().await;
        assert_eq!(h.insight_calls(), 1);

        let expected = geo_utils::distance_km(&GpsPoint::new(10.0, 10.0), &GpsPoint::new(10.0, 10.01));
        assert_eq!(h.session.drift_km(), expected);
        assert_eq!(h.session.reconciliation().drift_km, expected);
    }

    #[tokio::test]
    async fn test_ip_after_stop_requests_insight() {
        let h = Harness::new(Ok(ip_record(10.0, 10.01)));
        h.session.start().unwrap();
        h.sink().deliver_fix(fix_at(10.0, 10.0, 1));
        h.settle().await;
        h.session.stop();

        h.session.resolve_ip(None).await.unwrap();
        h.settle().await;
        assert_eq!(h.insight_calls(), 2);
    }

    #[tokio::test]
    async fn test_ip_failure_fills_error_slot_until_next_fix() {
        let h = Harness::new(Err(ProviderError::Rejected("Invalid IP address".into())));
        let err = h.session.resolve_ip(Some("not-an-ip")).await.unwrap_err();
        assert!(matches!(err, SessionError::Locate(LocateError::AllProvidersFailed { .. })));
        assert_eq!(h.session.current_error(), Some(err));

        h.session.start().unwrap();
        h.sink().deliver_fix(fix_at(1.0, 1.0, 1));
        assert_eq!(h.session.current_error(), None);
    }

    #[tokio::test]
    async fn test_late_fix_after_stop_is_ignored() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        let sink = h.sink();
        sink.deliver_fix(fix_at(1.0, 1.0, 1));
        h.settle().await;

        h.session.stop();
        assert!(!h.session.is_tracking());
        let before = h.session.snapshot();

        assert!(!sink.deliver_fix(fix_at(5.0, 5.0, 2)));
        assert!(!sink.deliver_failure(PositionFailure { code: 2, message: "gone".into() }));
        h.settle().await;

        assert_eq!(h.session.snapshot(), before);
        assert_eq!(h.insight_calls(), 1);
    }

    #[tokio::test]
    async fn test_insight_failure_is_not_surfaced() {
        let source = Arc::new(ScriptedSource::default());
        let insight = Arc::new(EchoService { fail: true, ..Default::default() });
        let provider: Box<dyn IpProvider> = Box::new(StaticProvider { outcome: Ok(ip_record(0.0, 0.0)) });
        let session = TrackingSession::create(
            SessionConfig::default(),
            IpLocator::new(vec![provider]),
            source.clone(),
            insight.clone(),
        )
        .unwrap();
        let h = Harness { session, source, insight };

        h.session.start().unwrap();
        h.sink().deliver_fix(fix_at(10.0, 10.0, 1));
        h.settle().await;
        h.sink().deliver_fix(fix_at(11.0, 10.0, 2));
        h.settle().await;

        let state = h.session.insight();
        assert_eq!(h.session.current_error(), None);
        assert!(!state.loading);
        assert_eq!(state.last_location, None);
        assert!(state.result.is_none());
        assert_eq!(h.insight_calls(), 2);
        assert_eq!(h.session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_observer_ignores_updates_once_stopped() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        h.sink().deliver_fix(fix_at(1.0, 1.0, 1));
        h.settle().await;
        h.session.stop();
        let before = h.session.snapshot();

        // Updates that got past the sink check before stop() took effect
        h.session.inner.on_fix(fix_at(5.0, 5.0, 2));
        h.session.inner.on_failure(PositionFailure { code: PERMISSION_DENIED, message: "denied".into() });
        h.settle().await;

        assert_eq!(h.session.snapshot(), before);
        assert_eq!(h.insight_calls(), 1);
        assert_eq!(h.source.cleared.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_stops_tracking() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        let sink = h.sink();

        sink.deliver_failure(PositionFailure { code: PERMISSION_DENIED, message: "denied".into() });
        let snap = h.session.snapshot();
        assert!(!snap.tracking);
        assert!(!h.session.is_tracking());
        assert_eq!(snap.error, Some(SessionError::Position(PositionError::PermissionDenied)));
        assert_eq!(h.source.cleared.lock().unwrap().len(), 1);

        // Not auto-retried, and the old sink is dead
        assert_eq!(h.source.subscriptions(), 1);
        assert!(!sink.deliver_fix(fix_at(1.0, 1.0, 1)));
    }

    #[tokio::test]
    async fn test_generic_failure_message_differs() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        h.sink().deliver_failure(PositionFailure { code: 3, message: "Timeout expired".into() });
        assert_eq!(
            h.session.current_error(),
            Some(SessionError::Position(PositionError::Unavailable("Timeout expired".into())))
        );
    }

    #[tokio::test]
    async fn test_unsupported_positioning() {
        let h = Harness::with_source(
            Ok(ip_record(0.0, 0.0)),
            ScriptedSource { unsupported: true, ..Default::default() },
        );
        let err = h.session.start().unwrap_err();
        assert_eq!(err, SessionError::Position(PositionError::Unsupported));
        assert_eq!(h.session.current_error(), Some(err));
        assert!(!h.session.snapshot().tracking);
    }

    #[tokio::test]
    async fn test_start_twice_subscribes_once() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        h.session.start().unwrap();
        assert_eq!(h.source.subscriptions(), 1);

        h.session.stop();
        h.session.stop();
        assert_eq!(h.source.cleared.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispose() {
        let h = Harness::new(Ok(ip_record(0.0, 0.0)));
        h.session.start().unwrap();
        h.session.dispose();

        assert!(h.session.is_disposed());
        assert!(!h.session.is_tracking());
        assert_eq!(h.session.start(), Err(SessionError::Disposed));
        assert_eq!(h.session.resolve_ip(None).await.unwrap_err(), SessionError::Disposed);
    }

    #[tokio::test]
    async fn test_launch_starts_gps_and_resolves_ip() {
        let h = Harness::new(Ok(ip_record(40.0, -74.0)));
        let record = h.session.launch(None).await.unwrap();
        assert_eq!(record.latitude, 40.0);
        assert!(h.session.is_tracking());
        assert!(h.session.snapshot().latest_ip.is_some());
    }

    #[test]
    fn test_create_requires_runtime() {
        let source: Arc<dyn PositionSource> = Arc::new(ScriptedSource::default());
        let result = TrackingSession::create(
            SessionConfig::default(),
            IpLocator::new(Vec::new()),
            source,
            Arc::new(EchoService::default()),
        );
        assert!(matches!(result, Err(SessionError::Runtime(_))));
    }
}
