//! Nearest-match correlation of radar detections against ADS-B truth.
//!
//! Each delay/Doppler pair in a detection is compared with the expected
//! bistatic delay and Doppler of every candidate aircraft. A candidate only
//! qualifies inside both tolerance windows; among qualifiers the lowest
//! tolerance-normalized score wins.

use crate::geometry::Sites;
use crate::types::{round2, Detection, ExtrapolatedAircraftState, MatchAnnotation};

pub const DEFAULT_DELAY_TOLERANCE_KM: f64 = 2.0;
pub const DEFAULT_DOPPLER_TOLERANCE_HZ: f64 = 5.0;

/// Half-widths of the acceptance windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub delay_km: f64,
    pub doppler_hz: f64,
}

impl Default for Tolerances {
    fn default() -> Self {
        Tolerances {
            delay_km: DEFAULT_DELAY_TOLERANCE_KM,
            doppler_hz: DEFAULT_DOPPLER_TOLERANCE_HZ,
        }
    }
}

/// A candidate with its expected measurements precomputed.
struct Expected<'a> {
    aircraft: &'a ExtrapolatedAircraftState,
    lat: f64,
    lon: f64,
    alt: f64,
    delay: f64,
    doppler: f64,
}

/// Matches detections against truth for one fixed radar geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlator {
    sites: Sites,
    fc_hz: f64,
    tolerances: Tolerances,
}

impl Correlator {
    pub fn new(sites: Sites, fc_hz: f64, tolerances: Tolerances) -> Self {
        Correlator {
            sites,
            fc_hz,
            tolerances,
        }
    }

    pub fn sites(&self) -> &Sites {
        &self.sites
    }

    pub fn fc_hz(&self) -> f64 {
        self.fc_hz
    }

    /// Expected delay and Doppler, or `None` when the candidate lacks a
    /// position or altitude, or the geometry yields a non-finite value.
    fn expected<'a>(&self, candidate: &'a ExtrapolatedAircraftState) -> Option<Expected<'a>> {
        let ac = &candidate.aircraft;
        let alt = ac.altitude()?;
        let pos = ac.position()?;

        let delay = self.sites.delay(&pos);
        let doppler = self.sites.doppler(&pos, &ac.velocity(), self.fc_hz);
        if !delay.is_finite() || !doppler.is_finite() {
            return None;
        }

        Some(Expected {
            aircraft: candidate,
            lat: pos.lat,
            lon: pos.lon,
            alt,
            delay,
            doppler,
        })
    }

    /// Best candidate for a single measured pair.
    fn best_match(&self, delay: f64, doppler: f64, expected: &[Expected<'_>]) -> Option<MatchAnnotation> {
        let tol = self.tolerances;
        let mut best: Option<(&Expected<'_>, f64)> = None;

        for e in expected {
            let delay_err = (delay - e.delay).abs();
            let doppler_err = (doppler - e.doppler).abs();
            if !(delay_err < tol.delay_km && doppler_err < tol.doppler_hz) {
                continue;
            }
            let score = delay_err / tol.delay_km + doppler_err / tol.doppler_hz;
            // Strict comparison: the earliest candidate keeps a tie.
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((e, score));
            }
        }

        best.map(|(e, _)| MatchAnnotation {
            hex: e.aircraft.aircraft.hex.clone(),
            lat: e.lat,
            lon: e.lon,
            alt: e.alt,
            gs: e.aircraft.aircraft.gs,
            track: e.aircraft.aircraft.track,
            expected_delay: round2(e.delay),
            expected_doppler: round2(e.doppler),
            delay_residual: round2(delay - e.delay),
            doppler_residual: round2(doppler - e.doppler),
        })
    }

    /// Fill `detection.adsb` with one entry per delay value.
    ///
    /// Candidates are scanned in slice order and ties go to the earlier one,
    /// so callers must pass a deterministically ordered list. An index with
    /// no Doppler value gets no match. Returns the number of matched indices.
    pub fn annotate(&self, detection: &mut Detection, candidates: &[ExtrapolatedAircraftState]) -> usize {
        let expected: Vec<Expected<'_>> = candidates.iter().filter_map(|c| self.expected(c)).collect();

        let matches: Vec<Option<MatchAnnotation>> = detection
            .delay
            .iter()
            .enumerate()
            .map(|(i, &delay)| {
                let doppler = *detection.doppler.get(i)?;
                self.best_match(delay, doppler, &expected)
            })
            .collect();

        let matched = matches.iter().filter(|m| m.is_some()).count();
        detection.adsb = Some(matches);
        matched
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
