//! Bistatic radar geometry — great-circle distance, bistatic range, bearing,
//! and Doppler shift.
//!
//! Positions are geodetic (degrees, metres). Every function returns a number
//! even for degenerate geometry; callers apply their own sanity bounds.

use crate::types::{Position, Velocity};

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
pub const SPEED_OF_LIGHT_MS: f64 = 299_792_458.0;
pub const KNOTS_TO_MS: f64 = 0.514444;

/// Receiver and transmitter sites of one bistatic pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sites {
    pub rx: Position,
    pub tx: Position,
}

impl Sites {
    pub fn new(rx: Position, tx: Position) -> Self {
        Sites { rx, tx }
    }

    /// Bistatic delay of `target` in km.
    pub fn delay(&self, target: &Position) -> f64 {
        bistatic_range(target, &self.rx, &self.tx)
    }

    /// Bistatic Doppler of `target` in Hz at carrier `fc_hz`.
    pub fn doppler(&self, target: &Position, velocity: &Velocity, fc_hz: f64) -> f64 {
        bistatic_doppler(target, velocity, &self.rx, &self.tx, fc_hz)
    }
}

// ---------------------------------------------------------------------------
// Distances
// ---------------------------------------------------------------------------

/// Great-circle surface distance in metres (haversine).
pub fn distance(p1: &Position, p2: &Position) -> f64 {
    let dlat = (p2.lat - p1.lat).to_radians();
    let dlon = (p2.lon - p1.lon).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + p1.lat.to_radians().cos() * p2.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Surface distance combined with the altitude difference as a right triangle.
fn slant_distance(p1: &Position, p2: &Position) -> f64 {
    distance(p1, p2).hypot(p2.alt - p1.alt)
}

/// Bistatic range in km: `|rx→ac| + |tx→ac| − |rx→tx|`.
pub fn bistatic_range(aircraft: &Position, rx: &Position, tx: &Position) -> f64 {
    let d_rx_ac = slant_distance(rx, aircraft);
    let d_tx_ac = slant_distance(tx, aircraft);
    let d_rx_tx = slant_distance(rx, tx);
    (d_rx_ac + d_tx_ac - d_rx_tx) / 1000.0
}

// ---------------------------------------------------------------------------
// Bearing and Doppler
// ---------------------------------------------------------------------------

/// Initial great-circle bearing from `from` to `to`, radians clockwise from north.
pub fn bearing(from: &Position, to: &Position) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let dlon = (to.lon - from.lon).to_radians();

    let x = dlon.sin() * lat2.cos();
    let y = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    x.atan2(y)
}

/// Rate of change (m/s) of the distance from `pos` to `reference` for a
/// target moving with `(east, north)` velocity.
fn leg_range_rate(east: f64, north: f64, pos: &Position, reference: &Position) -> f64 {
    let b = bearing(pos, reference);
    -(east * b.sin() + north * b.cos())
}

/// Bistatic Doppler shift in Hz.
///
/// Positive when the total rx + tx path is shrinking (target closing).
pub fn bistatic_doppler(
    aircraft: &Position,
    velocity: &Velocity,
    rx: &Position,
    tx: &Position,
    fc_hz: f64,
) -> f64 {
    let speed = velocity.gs * KNOTS_TO_MS;
    let track = velocity.track.to_radians();
    let east = speed * track.sin();
    let north = speed * track.cos();

    let path_rate = leg_range_rate(east, north, aircraft, rx) + leg_range_rate(east, north, aircraft, tx);
    -path_rate * fc_hz / SPEED_OF_LIGHT_MS
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
