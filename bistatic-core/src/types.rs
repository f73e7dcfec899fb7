//! Shared types, error enum, and truth/detection records for bistatic-core.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// All errors produced by bistatic-core and the hub built on it.
#[derive(Debug, Error)]
pub enum BistaticError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BistaticError>;

/// Round to two decimal places for stable output.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Stream kinds
// ---------------------------------------------------------------------------

/// The telemetry streams the hub ingests, one TCP port each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Map,
    Detection,
    Track,
    Timestamp,
    Timing,
    IqData,
}

impl StreamKind {
    pub const COUNT: usize = 6;

    pub const ALL: [StreamKind; StreamKind::COUNT] = [
        StreamKind::Map,
        StreamKind::Detection,
        StreamKind::Track,
        StreamKind::Timestamp,
        StreamKind::Timing,
        StreamKind::IqData,
    ];

    /// Slot index for per-stream storage.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Map => "map",
            StreamKind::Detection => "detection",
            StreamKind::Track => "track",
            StreamKind::Timestamp => "timestamp",
            StreamKind::Timing => "timing",
            StreamKind::IqData => "iqdata",
        }
    }

    /// Timestamp producers send one bare value per write, with no JSON braces.
    pub fn is_chunk_framed(self) -> bool {
        matches!(self, StreamKind::Timestamp)
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Geodetic value types
// ---------------------------------------------------------------------------

/// Geodetic position. Altitude in metres, zero when unknown.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Position { lat, lon, alt }
    }
}

/// Horizontal velocity: ground speed in knots, track in degrees true.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Velocity {
    pub gs: f64,
    pub track: f64,
}

// ---------------------------------------------------------------------------
// ADS-B truth
// ---------------------------------------------------------------------------

/// Last-known state of one aircraft as reported by the ADS-B decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftState {
    pub hex: String,
    #[serde(default)]
    pub flight: String,
    /// Unix seconds at which the position was valid.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_geom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_baro: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geom_rate: Option<f64>,
}

impl AircraftState {
    /// Geometric altitude, falling back to barometric.
    pub fn altitude(&self) -> Option<f64> {
        self.alt_geom.or(self.alt_baro)
    }

    /// Position if latitude and longitude are both known.
    pub fn position(&self) -> Option<Position> {
        Some(Position::new(
            self.lat?,
            self.lon?,
            self.altitude().unwrap_or(0.0),
        ))
    }

    pub fn velocity(&self) -> Velocity {
        Velocity {
            gs: self.gs.unwrap_or(0.0),
            track: self.track.unwrap_or(0.0),
        }
    }
}

/// An aircraft synchronized to a detection timestamp.
///
/// When `extrapolated` is false the inner state is the untouched decoder
/// record and no bistatic values are attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtrapolatedAircraftState {
    #[serde(flatten)]
    pub aircraft: AircraftState,
    #[serde(skip_serializing_if = "is_false")]
    pub extrapolated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doppler: Option<f64>,
}

impl ExtrapolatedAircraftState {
    pub fn passthrough(aircraft: AircraftState) -> Self {
        ExtrapolatedAircraftState {
            aircraft,
            extrapolated: false,
            delay: None,
            doppler: None,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

// ---------------------------------------------------------------------------
// Decoder document (tar1090 aircraft.json)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct DecoderDocument {
    #[serde(default)]
    aircraft: Vec<DecoderAircraft>,
}

#[derive(Deserialize)]
struct DecoderAircraft {
    hex: Option<String>,
    flight: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    alt_geom: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    alt_baro: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    gs: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    track: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    geom_rate: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    seen_pos: Option<f64>,
}

/// Accept numbers, numeric strings and `"ground"` (zero altitude).
fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s == "ground" => Some(0.0),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Parse a decoder `aircraft.json` body.
///
/// `fetched_at` is the local Unix time of the fetch; each aircraft's timestamp
/// is `fetched_at - seen_pos`. Entries without a hex identifier are dropped.
pub fn parse_aircraft_json(body: &[u8], fetched_at: f64) -> Result<Vec<AircraftState>> {
    let doc: DecoderDocument = serde_json::from_slice(body)?;
    Ok(doc
        .aircraft
        .into_iter()
        .filter_map(|ac| {
            let hex = ac.hex.filter(|h| !h.is_empty())?;
            Some(AircraftState {
                hex,
                flight: ac.flight.map(|f| f.trim().to_string()).unwrap_or_default(),
                timestamp: fetched_at - ac.seen_pos.unwrap_or(0.0),
                lat: ac.lat,
                lon: ac.lon,
                alt_geom: ac.alt_geom,
                alt_baro: ac.alt_baro,
                gs: ac.gs,
                track: ac.track,
                geom_rate: ac.geom_rate,
            })
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Detections
// ---------------------------------------------------------------------------

/// Best ADS-B match for one delay/Doppler pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchAnnotation {
    pub hex: String,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub gs: Option<f64>,
    pub track: Option<f64>,
    pub expected_delay: f64,
    pub expected_doppler: f64,
    pub delay_residual: f64,
    pub doppler_residual: f64,
}

/// One radar detection frame.
///
/// Fields this hub does not interpret are kept in `extra` and written back
/// unchanged on publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub delay: Vec<f64>,
    #[serde(default)]
    pub doppler: Vec<f64>,
    /// Unix milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adsb: Option<Vec<Option<MatchAnnotation>>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Detection {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Detection time in Unix seconds.
    pub fn timestamp_secs(&self) -> Option<f64> {
        self.timestamp.map(|ms| ms / 1000.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
