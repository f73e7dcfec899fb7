//! Side-by-side comparison of the legacy delay/Doppler service against the
//! local extrapolated truth. Diagnostic only; nothing here feeds production
//! output.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::types::{round2, ExtrapolatedAircraftState};

/// Number of discrepancies reported.
pub const MAX_DISCREPANCIES: usize = 10;

/// The fields of one truth entry the comparison reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TruthRecord {
    pub delay: Option<f64>,
    pub doppler: Option<f64>,
    pub flight: String,
}

impl TruthRecord {
    /// Read a record leniently: numbers and numeric strings are both accepted.
    pub fn from_json(value: &Value) -> Self {
        TruthRecord {
            delay: value.get("delay").and_then(lenient_number),
            doppler: value.get("doppler").and_then(lenient_number),
            flight: value
                .get("flight")
                .and_then(Value::as_str)
                .map(|f| f.trim().to_string())
                .unwrap_or_default(),
        }
    }
}

impl From<&ExtrapolatedAircraftState> for TruthRecord {
    fn from(state: &ExtrapolatedAircraftState) -> Self {
        TruthRecord {
            delay: state.delay,
            doppler: state.doppler,
            flight: state.aircraft.flight.clone(),
        }
    }
}

fn lenient_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Key → record map from a JSON object. Anything else yields an empty map.
pub fn records_from_json(doc: &Value) -> BTreeMap<String, TruthRecord> {
    doc.as_object()
        .map(|obj| {
            obj.iter()
                .map(|(k, v)| (k.clone(), TruthRecord::from_json(v)))
                .collect()
        })
        .unwrap_or_default()
}

/// Key → record map from extrapolated truth.
pub fn records_from_states(
    states: &BTreeMap<String, ExtrapolatedAircraftState>,
) -> BTreeMap<String, TruthRecord> {
    states
        .iter()
        .map(|(k, v)| (k.clone(), TruthRecord::from(v)))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SetCounts {
    pub legacy: usize,
    pub new: usize,
    pub both: usize,
    pub legacy_only: usize,
    pub new_only: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    pub hex: String,
    pub flight: String,
    pub delay_legacy: f64,
    pub delay_new: f64,
    pub delay_diff: f64,
    pub doppler_legacy: Option<f64>,
    pub doppler_new: Option<f64>,
    pub doppler_diff: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub total_aircraft: SetCounts,
    pub avg_delay_diff: Option<f64>,
    pub avg_doppler_diff: Option<f64>,
    pub largest_discrepancies: Vec<Discrepancy>,
}

/// Compare two truth maps keyed by aircraft hex.
///
/// Averages cover keys present in both maps with a numeric delay on each
/// side; the Doppler average further requires Doppler on both sides.
///
/// The legacy service reports Doppler positive when receding, the opposite of
/// [`bistatic_doppler`](crate::geometry::bistatic_doppler). The legacy value is
/// negated before differencing; `doppler_legacy` is reported as received.
pub fn compare(
    legacy: &BTreeMap<String, TruthRecord>,
    new: &BTreeMap<String, TruthRecord>,
) -> Comparison {
    let mut both = 0;
    let mut delay_sum = 0.0;
    let mut delay_count = 0usize;
    let mut doppler_sum = 0.0;
    let mut doppler_count = 0usize;
    let mut discrepancies = Vec::new();

    for (hex, old) in legacy {
        let Some(cur) = new.get(hex) else { continue };
        both += 1;

        let (Some(delay_legacy), Some(delay_new)) = (old.delay, cur.delay) else {
            continue;
        };
        let delay_diff = (delay_new - delay_legacy).abs();
        delay_sum += delay_diff;
        delay_count += 1;

        let doppler_diff = match (old.doppler, cur.doppler) {
            (Some(a), Some(b)) => {
                let d = (b + a).abs();
                doppler_sum += d;
                doppler_count += 1;
                Some(d)
            }
            _ => None,
        };

        let flight = if cur.flight.is_empty() {
            old.flight.clone()
        } else {
            cur.flight.clone()
        };

        discrepancies.push(Discrepancy {
            hex: hex.clone(),
            flight,
            delay_legacy: round2(delay_legacy),
            delay_new: round2(delay_new),
            delay_diff: round2(delay_diff),
            doppler_legacy: old.doppler.map(round2),
            doppler_new: cur.doppler.map(round2),
            doppler_diff: doppler_diff.map(round2),
        });
    }

    // Stable: equal diffs keep ascending hex order.
    discrepancies.sort_by(|a, b| b.delay_diff.total_cmp(&a.delay_diff));
    discrepancies.truncate(MAX_DISCREPANCIES);

    let mean = |sum: f64, n: usize| (n > 0).then(|| round2(sum / n as f64));

    Comparison {
        total_aircraft: SetCounts {
            legacy: legacy.len(),
            new: new.len(),
            both,
            legacy_only: legacy.len() - both,
            new_only: new.len() - both,
        },
        avg_delay_diff: mean(delay_sum, delay_count),
        avg_doppler_diff: mean(doppler_sum, doppler_count),
        largest_discrepancies: discrepancies,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
