//! Simulated live session: a walking GPS trace reconciled against a fixed
//! IP location, with a canned insight service.
//!
//! Run with: cargo run --example live_session
//!
//! Set `RUST_LOG=debug` to see the session's internal decisions.

use futures::future::BoxFuture;
use location_telemetry::{
    geo_utils, GpsPoint, InsightError, InsightResult, InsightService, InsightSource, IpLocator,
    IpProvider, IpRecord, PositionError, PositionFix, PositionOptions, PositionSink, PositionSource,
    ProviderError, SessionConfig, TrackingSession, WatchId,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Position source driven by `main` instead of a device.
#[derive(Default)]
struct SimulatedGps {
    sink: Mutex<Option<(WatchId, PositionSink)>>,
}

impl SimulatedGps {
    fn emit(&self, point: GpsPoint, timestamp_ms: u64) -> bool {
        let sink = self.sink.lock().unwrap().as_ref().map(|(_, s)| s.clone());
        match sink {
            Some(sink) => sink.deliver_fix(PositionFix {
                latitude: point.latitude,
                longitude: point.longitude,
                accuracy: 8.0,
                speed: Some(1.4),
                altitude: None,
                timestamp_ms,
            }),
            None => false,
        }
    }
}

impl PositionSource for SimulatedGps {
    fn watch_position(&self, _options: &PositionOptions, sink: PositionSink) -> Result<WatchId, PositionError> {
        *self.sink.lock().unwrap() = Some((7, sink));
        Ok(7)
    }

    fn clear_watch(&self, id: WatchId) {
        let mut slot = self.sink.lock().unwrap();
        if slot.as_ref().map(|(w, _)| *w) == Some(id) {
            *slot = None;
        }
    }
}

/// IP provider that always places the caller in central London.
struct FixedIp;

impl IpProvider for FixedIp {
    fn name(&self) -> &str {
        "fixed"
    }

    fn lookup<'a>(&'a self, _address: Option<&'a str>) -> BoxFuture<'a, Result<IpRecord, ProviderError>> {
        Box::pin(async {
            Ok(IpRecord {
                ip: "203.0.113.9".into(),
                city: "London".into(),
                region: "England".into(),
                country: "United Kingdom".into(),
                country_code: "GB".into(),
                latitude: 51.5074,
                longitude: -0.1278,
                org: "Example Telecom".into(),
                asn: "AS64500".into(),
                timezone: "Europe/London".into(),
                currency: "GBP".into(),
                calling_code: "+44".into(),
                languages: "en-GB".into(),
            })
        })
    }
}

struct CannedInsight;

impl InsightService for CannedInsight {
    fn fetch_insight(&self, location: GpsPoint) -> BoxFuture<'_, Result<InsightResult, InsightError>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(InsightResult {
                headline: format!("Around {:.4}, {:.4}", location.latitude, location.longitude),
                description: "Riverside streets near the city centre.".into(),
                sources: vec![InsightSource {
                    title: "Local guide".into(),
                    uri: "https://example.org/guide".into(),
                }],
            })
        })
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let gps = Arc::new(SimulatedGps::default());
    let provider: Box<dyn IpProvider> = Box::new(FixedIp);
    let session = TrackingSession::create(
        SessionConfig::default(),
        IpLocator::new(vec![provider]),
        gps.clone(),
        Arc::new(CannedInsight),
    )
    .unwrap();

    let record = session.launch(None).await.unwrap();
    println!("IP location: {}, {} ({})", record.city, record.country, record.org);

    // Walk north-east from Waterloo Bridge in ~150m steps
    let start = GpsPoint::new(51.5080, -0.1170);
    for step in 0..12u64 {
        let point = GpsPoint::new(start.latitude + step as f64 * 0.001, start.longitude + step as f64 * 0.0005);
        gps.emit(point, 1_700_000_000_000 + step * 1_000);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut insight = session.subscribe_insight();
    let _ = insight.wait_for(|s| !s.loading).await;

    let snapshot = session.snapshot();
    let view = snapshot.reconciliation();
    println!("\nReconciliation");
    if let Some(g) = &view.gps {
        println!("  GPS: {:.5}, {:.5} ±{:?}m", g.latitude, g.longitude, g.accuracy);
    }
    if let Some(ip) = &view.ip {
        println!("  IP:  {:.5}, {:.5}", ip.latitude, ip.longitude);
    }
    println!("  Drift: {:.3} km", view.drift_km);

    let history = session.history();
    let track: Vec<GpsPoint> = history.iter().map(|p| p.point()).collect();
    println!("\nHistory: {} points, {:.2} km walked", history.len(), geo_utils::track_length_km(&track));

    if let Some(result) = session.insight().result {
        println!("\nInsight: {}\n  {}", result.headline, result.description);
    }

    session.stop();
    println!("\nStopped. Late fix accepted: {}", gps.emit(start, 0));
    session.dispose();
}
