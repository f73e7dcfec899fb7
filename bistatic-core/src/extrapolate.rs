//! Dead-reckoning of ADS-B truth onto a detection timestamp.
//!
//! The decoder reports each aircraft at its own capture time. Before matching,
//! every aircraft is projected in a straight line to the detection time using
//! its ground speed, track and vertical rate. The projection uses a local
//! flat-Earth tangent plane, which only holds because `|dt|` is capped at
//! [`MAX_EXTRAPOLATION_SECS`].

use std::collections::BTreeMap;

use crate::geometry::{Sites, KNOTS_TO_MS};
use crate::types::{AircraftState, ExtrapolatedAircraftState, Position};

/// Largest time shift, in either direction, we will dead-reckon across.
pub const MAX_EXTRAPOLATION_SECS: f64 = 5.0;

/// Metres per degree of latitude on the tangent plane.
pub const METRES_PER_DEG_LAT: f64 = 111_320.0;

/// ft/min → m/s.
pub const FPM_TO_MS: f64 = 0.00508;

/// Per-batch extrapolation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtrapolationStats {
    pub total: usize,
    pub extrapolated: usize,
    pub failed: usize,
}

impl ExtrapolationStats {
    /// Percentage of aircraft successfully extrapolated.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.extrapolated as f64 / self.total as f64 * 100.0
    }
}

/// Project `aircraft` to `target_timestamp` (Unix seconds).
///
/// Returns `None` when the shift exceeds the bound, the aircraft has no usable
/// ground speed or track, or it has no horizontal position. The altitude is
/// geometric only; a missing `alt_geom` counts as 0.
pub fn extrapolate(aircraft: &AircraftState, target_timestamp: f64) -> Option<Position> {
    let dt = target_timestamp - aircraft.timestamp;
    if dt.abs() > MAX_EXTRAPOLATION_SECS {
        return None;
    }
    let gs = aircraft.gs.filter(|&gs| gs != 0.0)?;
    let track = aircraft.track?;
    let lat = aircraft.lat?;
    let lon = aircraft.lon?;

    let speed = gs * KNOTS_TO_MS;
    let track_rad = track.to_radians();
    let dx = speed * track_rad.sin() * dt;
    let dy = speed * track_rad.cos() * dt;
    let dz = aircraft.geom_rate.unwrap_or(0.0) * FPM_TO_MS * dt;

    Some(Position {
        lat: lat + dy / METRES_PER_DEG_LAT,
        lon: lon + dx / (METRES_PER_DEG_LAT * lat.to_radians().cos()),
        alt: aircraft.alt_geom.unwrap_or(0.0) + dz,
    })
}

/// Synchronize every aircraft in `aircraft` to `target_timestamp`.
///
/// Aircraft that cannot be extrapolated are passed through unchanged. The
/// moved `alt_geom` is only written when the record had one, so an aircraft
/// with no altitude stays without one. When
/// `sites` is given, extrapolated aircraft also get their bistatic delay, and
/// with `fc_hz` their bistatic Doppler.
pub fn extrapolate_set(
    aircraft: &BTreeMap<String, AircraftState>,
    target_timestamp: f64,
    sites: Option<&Sites>,
    fc_hz: Option<f64>,
) -> (BTreeMap<String, ExtrapolatedAircraftState>, ExtrapolationStats) {
    let mut stats = ExtrapolationStats::default();
    let mut synced = BTreeMap::new();

    for (key, ac) in aircraft {
        stats.total += 1;

        let Some(pos) = extrapolate(ac, target_timestamp) else {
            stats.failed += 1;
            synced.insert(key.clone(), ExtrapolatedAircraftState::passthrough(ac.clone()));
            continue;
        };
        stats.extrapolated += 1;

        let mut moved = ac.clone();
        moved.lat = Some(pos.lat);
        moved.lon = Some(pos.lon);
        if ac.alt_geom.is_some() {
            moved.alt_geom = Some(pos.alt);
        }
        moved.timestamp = target_timestamp;

        let delay = sites.map(|s| s.delay(&pos));
        let doppler = match (sites, fc_hz) {
            (Some(s), Some(fc)) => Some(s.doppler(&pos, &ac.velocity(), fc)),
            _ => None,
        };

        synced.insert(
            key.clone(),
            ExtrapolatedAircraftState {
                aircraft: moved,
                extrapolated: true,
                delay,
                doppler,
            },
        );
    }

    (synced, stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: f64 = 1_718_747_749.0;

    fn eastbound(timestamp: f64) -> AircraftState {
        AircraftState {
            hex: "a12345".into(),
            flight: "TEST123".into(),
            timestamp,
            lat: Some(51.5),
            lon: Some(-0.1),
            alt_geom: Some(10000.0),
            alt_baro: None,
            gs: Some(300.0),
            track: Some(90.0),
            geom_rate: Some(0.0),
        }
    }

    fn sites() -> Sites {
        Sites::new(Position::new(51.0, 0.0, 100.0), Position::new(51.5, 0.5, 100.0))
    }

    #[test]
    fn test_eastbound_four_seconds() {
        let ac = eastbound(NOW - 4.0);
        let pos = extrapolate(&ac, NOW).unwrap();

        let expected_dlon =
            300.0 * KNOTS_TO_MS * 4.0 / (METRES_PER_DEG_LAT * 51.5_f64.to_radians().cos());
        let dlon = pos.lon - (-0.1);
        assert!(dlon > 0.0);
        assert!((dlon - expected_dlon).abs() < 1e-9);
        assert!((dlon - 0.0089).abs() < 1e-4);
        assert!((pos.lat - 51.5).abs() < 1e-9);
        assert_eq!(pos.alt, 10000.0);
    }

    #[test]
    fn test_backwards_shift() {
        // Truth newer than the detection: project backwards
        let ac = eastbound(NOW + 2.0);
        let pos = extrapolate(&ac, NOW).unwrap();
        assert!(pos.lon < -0.1);
    }

    #[test]
    fn test_fails_beyond_bound() {
        let ac = eastbound(NOW - 6.0);
        assert!(extrapolate(&ac, NOW).is_none());
        let ac = eastbound(NOW + 5.5);
        assert!(extrapolate(&ac, NOW).is_none());
        // Exactly at the bound still extrapolates
        let ac = eastbound(NOW - 5.0);
        assert!(extrapolate(&ac, NOW).is_some());
    }

    #[test]
    fn test_fails_without_velocity() {
        let mut ac = eastbound(NOW - 1.0);
        ac.gs = Some(0.0);
        assert!(extrapolate(&ac, NOW).is_none());
        ac.gs = None;
        assert!(extrapolate(&ac, NOW).is_none());

        let mut ac = eastbound(NOW - 1.0);
        ac.track = None;
        assert!(extrapolate(&ac, NOW).is_none());

        let mut ac = eastbound(NOW - 1.0);
        ac.lat = None;
        assert!(extrapolate(&ac, NOW).is_none());
    }

    #[test]
    fn test_vertical_rate() {
        let mut ac = eastbound(NOW - 3.0);
        ac.track = Some(0.0);
        ac.geom_rate = Some(1000.0);
        let pos = extrapolate(&ac, NOW).unwrap();
        assert!((pos.alt - (10000.0 + 1000.0 * FPM_TO_MS * 3.0)).abs() < 1e-9);
        assert!(pos.lat > 51.5);
        assert!((pos.lon - (-0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_altitude_is_geometric_only() {
        let mut ac = eastbound(NOW - 1.0);
        ac.alt_geom = None;
        ac.alt_baro = Some(8000.0);
        let pos = extrapolate(&ac, NOW).unwrap();
        assert_eq!(pos.alt, 0.0);

        ac.geom_rate = Some(600.0);
        let pos = extrapolate(&ac, NOW).unwrap();
        assert!((pos.alt - 600.0 * FPM_TO_MS).abs() < 1e-9);
    }

    #[test]
    fn test_set_keeps_missing_altitude_missing() {
        let mut baro = eastbound(NOW - 1.0);
        baro.alt_geom = None;
        baro.alt_baro = Some(8000.0);
        let mut bare = eastbound(NOW - 1.0);
        bare.hex = "b67890".into();
        bare.alt_geom = None;

        let input = BTreeMap::from([("a12345".to_string(), baro), ("b67890".to_string(), bare)]);
        let (synced, stats) = extrapolate_set(&input, NOW, Some(&sites()), Some(100e6));
        assert_eq!(stats.extrapolated, 2);

        assert_eq!(synced["a12345"].aircraft.alt_geom, None);
        assert_eq!(synced["a12345"].aircraft.alt_baro, Some(8000.0));
        assert_eq!(synced["b67890"].aircraft.alt_geom, None);
        assert_eq!(synced["b67890"].aircraft.altitude(), None);
    }

    #[test]
    fn test_set_stamps_and_annotates() {
        let mut input = BTreeMap::new();
        input.insert("a12345".to_string(), eastbound(NOW - 4.0));
        let mut slow = eastbound(NOW - 3.5);
        slow.hex = "b67890".into();
        slow.gs = None;
        input.insert("b67890".to_string(), slow.clone());

        let s = sites();
        let (synced, stats) = extrapolate_set(&input, NOW, Some(&s), Some(100e6));
        assert_eq!(
            stats,
            ExtrapolationStats {
                total: 2,
                extrapolated: 1,
                failed: 1
            }
        );
        assert_eq!(stats.success_rate(), 50.0);

        let a = &synced["a12345"];
        assert!(a.extrapolated);
        assert_eq!(a.aircraft.timestamp, NOW);
        let pos = a.aircraft.position().unwrap();
        assert!((a.delay.unwrap() - s.delay(&pos)).abs() < 1e-9);
        assert!(a.doppler.is_some());

        let b = &synced["b67890"];
        assert!(!b.extrapolated);
        assert_eq!(b.aircraft, slow);
        assert!(b.delay.is_none());
        assert!(b.doppler.is_none());
    }

    #[test]
    fn test_set_without_references() {
        let mut input = BTreeMap::new();
        input.insert("a12345".to_string(), eastbound(NOW - 1.0));

        let (synced, _) = extrapolate_set(&input, NOW, None, Some(100e6));
        assert!(synced["a12345"].extrapolated);
        assert!(synced["a12345"].delay.is_none());

        let (synced, _) = extrapolate_set(&input, NOW, Some(&sites()), None);
        assert!(synced["a12345"].delay.is_some());
        assert!(synced["a12345"].doppler.is_none());
    }

    #[test]
    fn test_set_passes_through_stale_record() {
        let mut input = BTreeMap::new();
        let stale = eastbound(NOW - 6.0);
        input.insert("a12345".to_string(), stale.clone());

        let (synced, stats) = extrapolate_set(&input, NOW, Some(&sites()), Some(100e6));
        assert_eq!(stats.failed, 1);
        assert_eq!(synced["a12345"], ExtrapolatedAircraftState::passthrough(stale));
        let json = serde_json::to_value(&synced["a12345"]).unwrap();
        assert!(json.get("extrapolated").is_none());
    }

    #[test]
    fn test_empty_set() {
        let (synced, stats) = extrapolate_set(&BTreeMap::new(), NOW, None, None);
        assert!(synced.is_empty());
        assert_eq!(stats.success_rate(), 0.0);
    }
}
