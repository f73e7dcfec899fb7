//! Truth query surface: the aircraft document behind `/api/adsb2dd` and the
//! `compare` command.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use bistatic_core::compare::{compare, records_from_json, records_from_states, Comparison};
use bistatic_core::config::{AdsbConfig, Config};
use bistatic_core::extrapolate::extrapolate_set;
use bistatic_core::geometry::Sites;
use bistatic_core::types::{AircraftState, Detection, ExtrapolatedAircraftState, StreamKind};

use crate::legacy::LegacyClient;
use crate::store::LatestValues;
use crate::truth::{unix_now, TruthCache};

/// Which truth document `aircraft_truth` serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruthMode {
    /// Local tar1090 truth extrapolated to the latest detection.
    Extrapolated,
    /// Pass-through of the adsb2dd service.
    Legacy,
    /// Both, plus a comparison.
    Diagnostic,
}

impl TruthMode {
    /// Diagnostic mode wins over legacy mode.
    pub fn from_config(adsb: &AdsbConfig) -> Self {
        if adsb.diagnostic_mode {
            TruthMode::Diagnostic
        } else if adsb.use_legacy_method {
            TruthMode::Legacy
        } else {
            TruthMode::Extrapolated
        }
    }
}

/// Key aircraft by hex. Iteration order is ascending hex.
pub fn index_by_hex(aircraft: &[AircraftState]) -> BTreeMap<String, AircraftState> {
    aircraft.iter().map(|a| (a.hex.clone(), a.clone())).collect()
}

/// Output of a diagnostic run.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    /// Always `"diagnostic"`.
    pub method: &'static str,
    pub legacy: Value,
    pub new: BTreeMap<String, ExtrapolatedAircraftState>,
    pub comparison: Comparison,
}

impl DiagnosticReport {
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }
}

pub struct TruthQuery {
    mode: TruthMode,
    sites: Sites,
    fc_hz: f64,
    cache: Arc<TruthCache>,
    legacy: LegacyClient,
    store: Arc<LatestValues>,
}

impl TruthQuery {
    pub fn new(
        config: &Config,
        cache: Arc<TruthCache>,
        legacy: LegacyClient,
        store: Arc<LatestValues>,
    ) -> Self {
        TruthQuery {
            mode: TruthMode::from_config(&config.truth.adsb),
            sites: config.sites(),
            fc_hz: config.capture.fc,
            cache,
            legacy,
            store,
        }
    }

    pub fn mode(&self) -> TruthMode {
        self.mode
    }

    /// Raw text of the most recent detection, empty before the first one.
    pub fn latest_detection(&self) -> String {
        self.store.get(StreamKind::Detection)
    }

    /// Unix seconds of the latest detection, or now if it is missing,
    /// unparseable, or has no timestamp.
    fn detection_timestamp(&self) -> f64 {
        Detection::from_json(&self.latest_detection())
            .ok()
            .and_then(|d| d.timestamp_secs())
            .filter(|&t| t != 0.0)
            .unwrap_or_else(unix_now)
    }

    /// Cached truth synchronized to the latest detection.
    pub async fn extrapolated(&self) -> BTreeMap<String, ExtrapolatedAircraftState> {
        let aircraft = self.cache.get().await;
        let target = self.detection_timestamp();
        let (synced, stats) = extrapolate_set(
            &index_by_hex(&aircraft),
            target,
            Some(&self.sites),
            Some(self.fc_hz),
        );
        debug!(
            total = stats.total,
            extrapolated = stats.extrapolated,
            failed = stats.failed,
            target,
            "truth query extrapolated"
        );
        synced
    }

    pub async fn legacy(&self) -> Value {
        self.legacy.fetch().await
    }

    pub async fn diagnostic(&self) -> DiagnosticReport {
        let legacy = self.legacy.fetch().await;
        let new = self.extrapolated().await;
        let comparison = compare(&records_from_json(&legacy), &records_from_states(&new));
        DiagnosticReport {
            method: "diagnostic",
            legacy,
            new,
            comparison,
        }
    }

    /// The truth document for the configured mode.
    pub async fn aircraft_truth(&self) -> Value {
        match self.mode {
            TruthMode::Diagnostic => self.diagnostic().await.to_json(),
            TruthMode::Legacy => self.legacy().await,
            TruthMode::Extrapolated => {
                serde_json::to_value(self.extrapolated().await).unwrap_or_else(|_| json!({}))
            }
        }
    }
}
