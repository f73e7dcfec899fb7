//! Ingestion hub: one TCP listener per telemetry stream, framing, and the
//! detection pipeline that annotates detections with ADS-B truth.
//!
//! Each accepted connection gets its own task and framer. Completed messages
//! are dispatched inline, so a connection's messages are handled in arrival
//! order and nothing more is read until the current dispatch finishes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bistatic_core::correlate::Correlator;
use bistatic_core::extrapolate::extrapolate_set;
use bistatic_core::framer::{framer_for, Framed};
use bistatic_core::types::{Detection, ExtrapolatedAircraftState, Result, StreamKind};

use crate::forward::TrackerLink;
use crate::query::index_by_hex;
use crate::store::LatestValues;
use crate::truth::{unix_now, TruthCache};

const READ_BUF_BYTES: usize = 64 * 1024;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// ADS-B matching inputs; absent when truth matching is disabled.
pub struct Matching {
    pub cache: Arc<TruthCache>,
    pub correlator: Correlator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionOutcome {
    /// Not valid detection JSON; the raw text was published.
    Malformed,
    Published {
        detections: usize,
        matched: usize,
        forwarded: bool,
    },
}

pub struct DetectionPipeline {
    store: Arc<LatestValues>,
    matching: Option<Matching>,
    link: Option<TrackerLink>,
    /// Serializes parse → annotate → publish across all detection connections.
    guard: Mutex<()>,
}

impl DetectionPipeline {
    pub fn new(store: Arc<LatestValues>, matching: Option<Matching>, link: Option<TrackerLink>) -> Self {
        DetectionPipeline {
            store,
            matching,
            link,
            guard: Mutex::new(()),
        }
    }

    /// Process one complete detection message.
    pub async fn process(&self, raw: String) -> DetectionOutcome {
        let (payload, detections, matched) = {
            let _guard = self.guard.lock().await;

            let mut det = match Detection::from_json(&raw) {
                Ok(det) => det,
                Err(e) => {
                    warn!(error = %e, bytes = raw.len(), "malformed detection, publishing raw");
                    self.store.publish(StreamKind::Detection, raw);
                    return DetectionOutcome::Malformed;
                }
            };

            let matched = match &self.matching {
                Some(m) => self.annotate(m, &mut det).await,
                None => 0,
            };

            let payload = match det.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "detection re-serialization failed, publishing raw");
                    raw
                }
            };
            self.store.publish(StreamKind::Detection, payload.clone());
            (payload, det.delay.len(), matched)
        };

        let forwarded = self.link.as_ref().is_some_and(|link| link.forward(&payload));

        DetectionOutcome::Published {
            detections,
            matched,
            forwarded,
        }
    }

    async fn annotate(&self, m: &Matching, det: &mut Detection) -> usize {
        let aircraft = m.cache.get().await;
        let target = det
            .timestamp_secs()
            .filter(|&t| t != 0.0)
            .unwrap_or_else(unix_now);

        let (synced, stats) = extrapolate_set(
            &index_by_hex(&aircraft),
            target,
            Some(m.correlator.sites()),
            Some(m.correlator.fc_hz()),
        );
        let candidates: Vec<ExtrapolatedAircraftState> = synced.into_values().collect();
        let matched = m.correlator.annotate(det, &candidates);

        info!(
            detections = det.delay.len(),
            matched,
            aircraft = stats.total,
            extrapolated = stats.extrapolated,
            failed = stats.failed,
            success_rate = format_args!("{:.1}%", stats.success_rate()),
            "detection batch"
        );
        matched
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Hub {
    store: Arc<LatestValues>,
    pipeline: Arc<DetectionPipeline>,
    max_frame_bytes: Option<usize>,
}

impl Hub {
    pub fn new(
        store: Arc<LatestValues>,
        pipeline: Arc<DetectionPipeline>,
        max_frame_bytes: Option<usize>,
    ) -> Self {
        Hub {
            store,
            pipeline,
            max_frame_bytes,
        }
    }

    pub async fn bind(kind: StreamKind, host: &str, port: u16) -> Result<TcpListener> {
        let listener = TcpListener::bind((host, port)).await?;
        info!(stream = %kind, addr = %listener.local_addr()?, "listening");
        Ok(listener)
    }

    /// Accept connections for `kind` until the task is aborted.
    pub fn spawn_listener(&self, kind: StreamKind, listener: TcpListener) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(stream = %kind, %peer, "connection accepted");
                        let hub = hub.clone();
                        tokio::spawn(async move { hub.handle_connection(kind, stream, peer).await });
                    }
                    Err(e) => {
                        // e.g. out of file descriptors; don't spin
                        warn!(stream = %kind, error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        })
    }

    async fn handle_connection(&self, kind: StreamKind, mut stream: TcpStream, peer: SocketAddr) {
        let mut framer = framer_for(kind, self.max_frame_bytes);
        let mut buf = vec![0u8; READ_BUF_BYTES];

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(stream = %kind, %peer, error = %e, "read failed");
                    break;
                }
            };
            match framer.push(&buf[..n]) {
                Framed::Pending => {}
                Framed::Complete(message) => self.dispatch(kind, message).await,
                Framed::Discarded(bytes) => {
                    warn!(stream = %kind, %peer, bytes, "oversized partial message discarded")
                }
            }
        }

        debug!(stream = %kind, %peer, pending = framer.pending(), "connection closed");
    }

    async fn dispatch(&self, kind: StreamKind, message: String) {
        match kind {
            StreamKind::Detection => {
                self.pipeline.process(message).await;
            }
            _ => self.store.publish(kind, message),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::io::AsyncWriteExt;
    use tokio::time::{sleep, Instant};

    use crate::truth::TruthSource;

    use bistatic_core::correlate::Tolerances;
    use bistatic_core::geometry::Sites;
    use bistatic_core::types::Position;

    use crate::truth::testing::{aircraft, StaticSource};

    const FC: f64 = 204.64e6;

    fn sites() -> Sites {
        Sites::new(
            Position::new(-34.9286, 138.5999, 0.0),
            Position::new(-34.9810, 138.7081, 0.0),
        )
    }

    fn matching(truth: Vec<bistatic_core::types::AircraftState>) -> Matching {
        Matching {
            cache: Arc::new(TruthCache::new(
                Arc::new(StaticSource::new(truth)),
                Duration::from_millis(1000),
            )),
            correlator: Correlator::new(sites(), FC, Tolerances::default()),
        }
    }

    #[tokio::test]
    async fn test_malformed_detection_published_raw() {
        let store = Arc::new(LatestValues::new());
        let pipeline = DetectionPipeline::new(store.clone(), None, None);
        let outcome = pipeline.process("{not json}".into()).await;
        assert_eq!(outcome, DetectionOutcome::Malformed);
        assert_eq!(store.get(StreamKind::Detection), "{not json}");
    }

    #[tokio::test]
    async fn test_matching_disabled_passes_through() {
        let store = Arc::new(LatestValues::new());
        let pipeline = DetectionPipeline::new(store.clone(), None, None);
        let outcome = pipeline
            .process(r#"{"delay":[1.0,2.0],"doppler":[3.0,4.0],"snr":[9.0,8.0]}"#.into())
            .await;
        assert_eq!(
            outcome,
            DetectionOutcome::Published {
                detections: 2,
                matched: 0,
                forwarded: false
            }
        );
        let v: Value = serde_json::from_str(&store.get(StreamKind::Detection)).unwrap();
        assert!(v.get("adsb").is_none());
        assert_eq!(v["snr"][1], 8.0);
    }

    #[tokio::test]
    async fn test_detection_annotated_with_truth() {
        let now = unix_now();
        let truth = aircraft("7c6b2d", now - 1.0);

        // Expected values at the detection time, computed the same way
        let mut input = std::collections::BTreeMap::new();
        input.insert(truth.hex.clone(), truth.clone());
        let (synced, _) = extrapolate_set(&input, now, Some(&sites()), Some(FC));
        let expected = &synced["7c6b2d"];
        let delay = expected.delay.unwrap();
        let doppler = expected.doppler.unwrap();

        let store = Arc::new(LatestValues::new());
        let pipeline = DetectionPipeline::new(store.clone(), Some(matching(vec![truth])), None);
        let raw = format!(
            r#"{{"timestamp":{},"delay":[{},{}],"doppler":[{},{}]}}"#,
            now * 1000.0,
            delay + 0.5,
            delay + 40.0,
            doppler,
            doppler
        );
        let outcome = pipeline.process(raw).await;
        assert_eq!(
            outcome,
            DetectionOutcome::Published {
                detections: 2,
                matched: 1,
                forwarded: false
            }
        );

        let v: Value = serde_json::from_str(&store.get(StreamKind::Detection)).unwrap();
        let adsb = v["adsb"].as_array().unwrap();
        assert_eq!(adsb.len(), 2);
        assert_eq!(adsb[0]["hex"], "7c6b2d");
        assert!((adsb[0]["delay_residual"].as_f64().unwrap() - 0.5).abs() < 0.011);
        assert!(adsb[1].is_null());
    }

    /// Truth source that takes `delay` per fetch and records overlapping fetches.
    struct SlowSource {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    #[async_trait]
    impl TruthSource for SlowSource {
        async fn fetch_aircraft(&self) -> Result<Vec<bistatic_core::types::AircraftState>> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_detections_are_serialized() {
        let source = Arc::new(SlowSource {
            delay: Duration::from_millis(200),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        });
        // Zero interval: every pass refetches
        let cache = Arc::new(TruthCache::new(source.clone(), Duration::ZERO));
        let store = Arc::new(LatestValues::new());
        let pipeline = DetectionPipeline::new(
            store.clone(),
            Some(Matching {
                cache: Arc::clone(&cache),
                correlator: Correlator::new(sites(), FC, Tolerances::default()),
            }),
            None,
        );

        let start = Instant::now();
        let (first, second) = tokio::join!(
            pipeline.process(r#"{"delay":[1.0],"doppler":[1.0]}"#.into()),
            pipeline.process(r#"{"delay":[2.0],"doppler":[2.0]}"#.into()),
        );
        assert!(matches!(first, DetectionOutcome::Published { .. }));
        assert!(matches!(second, DetectionOutcome::Published { .. }));

        assert_eq!(cache.fetch_count(), 2);
        assert_eq!(source.max_active.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() >= Duration::from_millis(400));

        let v: Value = serde_json::from_str(&store.get(StreamKind::Detection)).unwrap();
        assert_eq!(v["delay"][0], 2.0);
        assert_eq!(v["adsb"], serde_json::json!([null]));
    }

    async fn wait_for_value(store: &LatestValues, kind: StreamKind) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let v = store.get(kind);
            if !v.is_empty() {
                return v;
            }
            assert!(Instant::now() < deadline, "nothing published on {kind}");
            sleep(Duration::from_millis(10)).await;
        }
    }

    fn hub(store: Arc<LatestValues>) -> Hub {
        let pipeline = Arc::new(DetectionPipeline::new(store.clone(), None, None));
        Hub::new(store, pipeline, None)
    }

    #[tokio::test]
    async fn test_two_chunk_detection_over_tcp() {
        let store = Arc::new(LatestValues::new());
        let hub = hub(store.clone());
        let listener = Hub::bind(StreamKind::Detection, "127.0.0.1", 0).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = hub.spawn_listener(StreamKind::Detection, listener);

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(br#"{"delay":[1"#).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get(StreamKind::Detection), "");
        client.write_all(br#"],"doppler":[2]}"#).await.unwrap();

        let published = wait_for_value(&store, StreamKind::Detection).await;
        let v: Value = serde_json::from_str(&published).unwrap();
        assert_eq!(v["delay"][0], 1.0);
        assert_eq!(v["doppler"][0], 2.0);
        task.abort();
    }

    #[tokio::test]
    async fn test_streams_publish_to_their_slot() {
        let store = Arc::new(LatestValues::new());
        let hub = hub(store.clone());

        let map = Hub::bind(StreamKind::Map, "127.0.0.1", 0).await.unwrap();
        let ts = Hub::bind(StreamKind::Timestamp, "127.0.0.1", 0).await.unwrap();
        let map_addr = map.local_addr().unwrap();
        let ts_addr = ts.local_addr().unwrap();
        let tasks = [
            hub.spawn_listener(StreamKind::Map, map),
            hub.spawn_listener(StreamKind::Timestamp, ts),
        ];

        let mut c = TcpStream::connect(map_addr).await.unwrap();
        c.write_all(b"{\"data\":[[1,2],[3,4]]}").await.unwrap();
        let mut t = TcpStream::connect(ts_addr).await.unwrap();
        t.write_all(b"1718747749000").await.unwrap();

        assert_eq!(wait_for_value(&store, StreamKind::Map).await, "{\"data\":[[1,2],[3,4]]}");
        assert_eq!(wait_for_value(&store, StreamKind::Timestamp).await, "1718747749000");
        assert_eq!(store.get(StreamKind::Detection), "");
        for t in tasks {
            t.abort();
        }
    }

    #[tokio::test]
    async fn test_forwarded_to_tracker() {
        let tracker = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (link, link_task) = TrackerLink::spawn(
            tracker.local_addr().unwrap().to_string(),
            Duration::from_millis(100),
        );
        let (mut sock, _) = tracker.accept().await.unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !link.is_connected() {
            assert!(Instant::now() < deadline);
            sleep(Duration::from_millis(10)).await;
        }

        let store = Arc::new(LatestValues::new());
        let pipeline = DetectionPipeline::new(store.clone(), None, Some(link));
        let outcome = pipeline.process(r#"{"delay":[],"doppler":[]}"#.into()).await;
        assert!(matches!(outcome, DetectionOutcome::Published { forwarded: true, .. }));

        let published = store.get(StreamKind::Detection);
        let mut buf = vec![0u8; published.len()];
        tokio::time::timeout(Duration::from_secs(5), sock.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), published);
        link_task.abort();
    }
}
