//! Client for the legacy adsb2dd service, which computes delay/Doppler for
//! every aircraft itself from the same tar1090 feed.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::warn;

use bistatic_core::config::Config;
use bistatic_core::types::{BistaticError, Result};

use crate::truth::http_error;

pub struct LegacyClient {
    base: String,
    params: Vec<(&'static str, String)>,
    timeout: Duration,
    client: reqwest::Client,
}

impl LegacyClient {
    pub fn new(config: &Config, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BistaticError::Http(e.to_string()))?;
        Ok(LegacyClient {
            base: format!("http://{}/api/dd", config.truth.adsb.adsb2dd),
            params: query_params(config),
            timeout,
            client,
        })
    }

    /// Key → `{delay, doppler, flight, ...}` map. Any failure, including a
    /// body that is not a JSON object, yields an empty map.
    pub async fn fetch(&self) -> Value {
        match self.try_fetch().await {
            Ok(map) => Value::Object(map),
            Err(e) => {
                warn!(error = %e, url = %self.base, "legacy delay/Doppler query failed");
                Value::Object(Map::new())
            }
        }
    }

    async fn try_fetch(&self) -> Result<Map<String, Value>> {
        let body = self
            .client
            .get(&self.base)
            .query(&self.params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| http_error(e, self.timeout))?
            .bytes()
            .await
            .map_err(|e| http_error(e, self.timeout))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn site_param(lat: f64, lon: f64, alt: f64) -> String {
    format!("{lat},{lon},{alt}")
}

/// `server`, `rx`, `tx` and `fc` (MHz, rounded) query parameters.
fn query_params(config: &Config) -> Vec<(&'static str, String)> {
    let rx = &config.location.rx;
    let tx = &config.location.tx;
    vec![
        ("server", format!("http://{}", config.truth.adsb.tar1090)),
        ("rx", site_param(rx.latitude, rx.longitude, rx.altitude)),
        ("tx", site_param(tx.latitude, tx.longitude, tx.altitude)),
        ("fc", format!("{}", (config.capture.fc / 1e6).round())),
    ]
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn config() -> Config {
        let mut config = Config::default();
        config.location.rx.latitude = -34.9286;
        config.location.rx.longitude = 138.5999;
        config.location.rx.altitude = 50.0;
        config.location.tx.latitude = -34.981;
        config.location.tx.longitude = 138.7081;
        config.location.tx.altitude = 750.0;
        config.capture.fc = 204_640_000.0;
        config
    }

    #[test]
    fn test_query_params() {
        let params = query_params(&config());
        assert_eq!(params[0], ("server", "http://localhost:8078".to_string()));
        assert_eq!(params[1], ("rx", "-34.9286,138.5999,50".to_string()));
        assert_eq!(params[2], ("tx", "-34.981,138.7081,750".to_string()));
        assert_eq!(params[3], ("fc", "205".to_string()));
    }

    #[tokio::test]
    async fn test_fetch_object() {
        let mut config = config();
        config.truth.adsb.adsb2dd = serve_once(r#"{"7c6b2d":{"delay":"12.5","doppler":"-3.1","flight":"QFA1"}}"#).await;
        let client = LegacyClient::new(&config, Duration::from_secs(2)).unwrap();
        let doc = client.fetch().await;
        assert_eq!(doc["7c6b2d"]["delay"], "12.5");
    }

    #[tokio::test]
    async fn test_non_object_body_is_empty() {
        let mut config = config();
        config.truth.adsb.adsb2dd = serve_once("[1,2,3]").await;
        let client = LegacyClient::new(&config, Duration::from_secs(2)).unwrap();
        assert_eq!(client.fetch().await, Value::Object(Map::new()));
    }

    #[tokio::test]
    async fn test_unreachable_is_empty() {
        let mut config = config();
        config.truth.adsb.adsb2dd = dead_addr();
        let client = LegacyClient::new(&config, Duration::from_secs(2)).unwrap();
        assert_eq!(client.fetch().await, Value::Object(Map::new()));
    }
}
