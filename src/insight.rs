//! Movement-gated insight requests.
//!
//! The insight service is an external collaborator that turns coordinates
//! into a narrative with citations. [`InsightTrigger`] only decides *when* to
//! call it and keeps the observable [`InsightState`].
//!
//! Requests are fire-and-forget: each one is spawned on the session runtime,
//! a new request never waits for or cancels an in-flight one, and failures are
//! logged rather than surfaced. Every request carries a sequence number and a
//! completed result is applied only if its sequence number is at least the
//! last applied one, so a slow early request cannot overwrite a newer result.

use futures::future::BoxFuture;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::InsightError;
use crate::{geo_utils, GpsPoint};

/// A citation backing an insight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct InsightSource {
    pub title: String,
    pub uri: String,
}

/// Enrichment payload for a location. Opaque to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct InsightResult {
    pub headline: String,
    pub description: String,
    pub sources: Vec<InsightSource>,
}

/// External insight collaborator.
pub trait InsightService: Send + Sync {
    fn fetch_insight(&self, location: GpsPoint) -> BoxFuture<'_, Result<InsightResult, InsightError>>;
}

/// Observable insight state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightState {
    /// Most recent applied result; kept (stale) when later requests fail
    pub result: Option<InsightResult>,
    /// True while at least one request is in flight
    pub loading: bool,
    /// Location of the last *successful* request
    pub last_location: Option<GpsPoint>,
    pub in_flight: u32,
    /// Sequence number of the applied result, 0 if none
    pub applied_seq: u64,
}

/// Decides when to request insights and applies their results.
pub struct InsightTrigger {
    service: Arc<dyn InsightService>,
    runtime: Handle,
    refresh_km: f64,
    next_seq: AtomicU64,
    state: Arc<watch::Sender<InsightState>>,
}

impl InsightTrigger {
    /// `refresh_km` is the movement needed before another request is worth making.
    pub fn new(service: Arc<dyn InsightService>, runtime: Handle, refresh_km: f64) -> Self {
        let (tx, _rx) = watch::channel(InsightState::default());
        Self {
            service,
            runtime,
            refresh_km,
            next_seq: AtomicU64::new(1),
            state: Arc::new(tx),
        }
    }

    pub fn snapshot(&self) -> InsightState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<InsightState> {
        self.state.subscribe()
    }

    /// True when there is no previous insight location or `point` is more
    /// than `refresh_km` away from it.
    pub fn should_request(&self, point: &GpsPoint) -> bool {
        match self.state.borrow().last_location {
            None => true,
            Some(last) => geo_utils::distance_km(&last, point) > self.refresh_km,
        }
    }

    /// Request an insight only if [`should_request`](Self::should_request) allows it.
    pub fn request_if_moved(&self, point: GpsPoint) -> Option<JoinHandle<()>> {
        if self.should_request(&point) {
            Some(self.request(point))
        } else {
            debug!(
                "[InsightTrigger] Skipping ({:.4}, {:.4}), within {}km of last insight",
                point.latitude, point.longitude, self.refresh_km
            );
            None
        }
    }

    /// Issue a request for `point` unconditionally.
    ///
    /// Returns immediately. The returned handle may be ignored.
    pub fn request(&self, point: GpsPoint) -> JoinHandle<()> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.state.send_modify(|s| {
            s.in_flight += 1;
            s.loading = true;
        });
        info!(
            "[InsightTrigger] Request #{} for ({:.4}, {:.4})",
            seq, point.latitude, point.longitude
        );

        let service = Arc::clone(&self.service);
        let state = Arc::clone(&self.state);
        self.runtime.spawn(async move {
            let outcome = service.fetch_insight(point).await;
            state.send_modify(|s| {
                s.in_flight = s.in_flight.saturating_sub(1);
                s.loading = s.in_flight > 0;
                match outcome {
                    Ok(result) if seq >= s.applied_seq => {
                        debug!("[InsightTrigger] Applying result #{}: {}", seq, result.headline);
                        s.result = Some(result);
                        s.last_location = Some(point);
                        s.applied_seq = seq;
                    }
                    Ok(_) => {
                        debug!(
                            "[InsightTrigger] Discarding result #{}, #{} already applied",
                            seq, s.applied_seq
                        );
                    }
                    Err(e) => warn!("[InsightTrigger] Request #{} failed: {}", seq, e),
                }
            });
        })
    }
}
