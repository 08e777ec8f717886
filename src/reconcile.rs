//! GPS vs IP reconciliation view.

use serde::{Deserialize, Serialize};

use crate::{geo_utils, LocationSample};

/// Latest GPS and IP estimates with the drift between them.
///
/// Derived, never mutated on its own: rebuild it from the current samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Reconciliation {
    pub gps: Option<LocationSample>,
    pub ip: Option<LocationSample>,
    /// Kilometres between `gps` and `ip`; exactly 0.0 unless both exist
    pub drift_km: f64,
}

impl Reconciliation {
    pub fn new(gps: Option<LocationSample>, ip: Option<LocationSample>) -> Self {
        let drift_km = drift_km(gps.as_ref(), ip.as_ref());
        Self { gps, ip, drift_km }
    }
}

/// Great-circle distance between the two estimates, 0.0 if either is missing.
pub fn drift_km(gps: Option<&LocationSample>, ip: Option<&LocationSample>) -> f64 {
    match (gps, ip) {
        (Some(g), Some(i)) => geo_utils::distance_km(&g.point(), &i.point()),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsPoint;

    #[test]
    fn test_ip_only_has_zero_drift() {
        let view = Reconciliation::new(None, Some(LocationSample::ip(10.0, 10.01, 1)));
        assert_eq!(view.drift_km, 0.0);
    }

    #[test]
    fn test_gps_only_has_zero_drift() {
        let view = Reconciliation::new(Some(LocationSample::gps(10.0, 10.0, Some(3.0), 1)), None);
        assert_eq!(view.drift_km, 0.0);
    }

    #[test]
    fn test_drift_with_both() {
        let view = Reconciliation::new(
            Some(LocationSample::gps(10.0, 10.0, Some(3.0), 1)),
            Some(LocationSample::ip(10.0, 10.01, 2)),
        );
        let expected = geo_utils::distance_km(&GpsPoint::new(10.0, 10.0), &GpsPoint::new(10.0, 10.01));
        assert_eq!(view.drift_km, expected);
        assert!(view.drift_km > 0.0 && view.drift_km < 1.5);
    }
}
