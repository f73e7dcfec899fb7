//! ADS-B truth: the tar1090 client and the single-flight TTL cache in front
//! of it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use bistatic_core::types::{parse_aircraft_json, AircraftState, BistaticError, Result};

/// Current Unix time in seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Map a reqwest failure onto the crate error, keeping timeouts distinct.
pub(crate) fn http_error(e: reqwest::Error, timeout: Duration) -> BistaticError {
    if e.is_timeout() {
        BistaticError::Timeout(timeout.as_millis() as u64)
    } else {
        BistaticError::Http(e.to_string())
    }
}

/// Anything that can produce the current ADS-B picture.
#[async_trait]
pub trait TruthSource: Send + Sync {
    async fn fetch_aircraft(&self) -> Result<Vec<AircraftState>>;
}

/// Reads `http://<host>/data/aircraft.json` from a tar1090 decoder.
pub struct Tar1090Client {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl Tar1090Client {
    pub fn new(host: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BistaticError::Http(e.to_string()))?;
        Ok(Tar1090Client {
            url: format!("http://{host}/data/aircraft.json"),
            timeout,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TruthSource for Tar1090Client {
    async fn fetch_aircraft(&self) -> Result<Vec<AircraftState>> {
        let body = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| http_error(e, self.timeout))?
            .bytes()
            .await
            .map_err(|e| http_error(e, self.timeout))?;
        parse_aircraft_json(&body, unix_now())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    fetched_at: Instant,
    aircraft: Arc<Vec<AircraftState>>,
}

/// TTL cache over a [`TruthSource`].
///
/// The lock is held across the refresh, so concurrent callers that find the
/// entry stale wait for the one in-flight fetch and then share its result.
pub struct TruthCache {
    source: Arc<dyn TruthSource>,
    interval: Duration,
    entry: Mutex<Option<CacheEntry>>,
    fetches: AtomicU64,
}

impl TruthCache {
    pub fn new(source: Arc<dyn TruthSource>, interval: Duration) -> Self {
        TruthCache {
            source,
            interval,
            entry: Mutex::new(None),
            fetches: AtomicU64::new(0),
        }
    }

    /// Cached aircraft if no older than the refresh interval, else a fresh
    /// fetch. A failed fetch yields (and caches) an empty list.
    pub async fn get(&self) -> Arc<Vec<AircraftState>> {
        let mut entry = self.entry.lock().await;
        if let Some(e) = entry.as_ref() {
            if e.fetched_at.elapsed() <= self.interval {
                return Arc::clone(&e.aircraft);
            }
        }

        let started = Instant::now();
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let aircraft = match self.source.fetch_aircraft().await {
            Ok(list) => {
                debug!(aircraft = list.len(), "truth refreshed");
                list
            }
            Err(e) => {
                warn!(error = %e, "truth fetch failed, using empty list");
                Vec::new()
            }
        };

        let aircraft = Arc::new(aircraft);
        *entry = Some(CacheEntry {
            fetched_at: started,
            aircraft: Arc::clone(&aircraft),
        });
        aircraft
    }

    /// Number of upstream fetches made so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// In-memory truth source; `None` simulates an unreachable decoder.
    pub struct StaticSource {
        pub aircraft: std::sync::Mutex<Option<Vec<AircraftState>>>,
    }

    impl StaticSource {
        pub fn new(aircraft: Vec<AircraftState>) -> Self {
            StaticSource {
                aircraft: std::sync::Mutex::new(Some(aircraft)),
            }
        }

        pub fn failing() -> Self {
            StaticSource {
                aircraft: std::sync::Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl TruthSource for StaticSource {
        async fn fetch_aircraft(&self) -> Result<Vec<AircraftState>> {
            self.aircraft
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| BistaticError::Http("connection refused".into()))
        }
    }

    pub fn aircraft(hex: &str, timestamp: f64) -> AircraftState {
        AircraftState {
            hex: hex.into(),
            flight: "TEST1".into(),
            timestamp,
            lat: Some(-34.70),
            lon: Some(138.80),
            alt_geom: Some(3000.0),
            alt_baro: None,
            gs: Some(220.0),
            track: Some(200.0),
            geom_rate: Some(0.0),
        }
    }
}
