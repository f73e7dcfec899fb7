//! Configuration file management for the bistatic hub.
//!
//! Reads a YAML subset: nested block mappings by indentation, inline
//! `{key: value, ...}` mappings, scalars, `null`/`~`, and `#` comments.
//! Sequences are skipped since no setting takes a list. Files are applied in
//! order onto the defaults, so a deployment can layer
//! `default → user → forced`.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::correlate::{Tolerances, DEFAULT_DELAY_TOLERANCE_KM, DEFAULT_DOPPLER_TOLERANCE_HZ};
use crate::geometry::Sites;
use crate::types::{BistaticError, Position, Result, StreamKind};

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Config {
    pub location: LocationConfig,
    pub capture: CaptureConfig,
    pub network: NetworkConfig,
    pub truth: TruthConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LocationConfig {
    pub rx: SiteConfig,
    pub tx: SiteConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SiteConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres.
    pub altitude: f64,
}

impl SiteConfig {
    pub fn position(&self) -> Position {
        Position::new(self.latitude, self.longitude, self.altitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureConfig {
    /// Carrier frequency in Hz.
    pub fc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkConfig {
    /// Bind address for the ingestion listeners.
    pub ip: String,
    /// Bind address for the HTTP API.
    pub api_host: String,
    /// Cap on a partially framed message; `None` is unbounded.
    pub max_frame_bytes: Option<usize>,
    pub ports: PortsConfig,
    pub tracker_forward: TrackerForwardConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortsConfig {
    pub api: u16,
    pub map: u16,
    pub detection: u16,
    pub track: u16,
    pub timestamp: u16,
    pub timing: u16,
    pub iqdata: u16,
}

impl PortsConfig {
    /// Ingestion port for a stream.
    pub fn port(&self, kind: StreamKind) -> u16 {
        match kind {
            StreamKind::Map => self.map,
            StreamKind::Detection => self.detection,
            StreamKind::Track => self.track,
            StreamKind::Timestamp => self.timestamp,
            StreamKind::Timing => self.timing,
            StreamKind::IqData => self.iqdata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerForwardConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TruthConfig {
    pub adsb: AdsbConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdsbConfig {
    pub enabled: bool,
    /// `host:port` of the tar1090 decoder.
    pub tar1090: String,
    /// `host:port` of the legacy delay/Doppler service.
    pub adsb2dd: String,
    pub delay_tolerance: f64,
    pub doppler_tolerance: f64,
    pub use_legacy_method: bool,
    pub diagnostic_mode: bool,
    pub cache_interval_ms: u64,
    pub http_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig { fc: 204_640_000.0 }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".into(),
            api_host: "0.0.0.0".into(),
            max_frame_bytes: None,
            ports: PortsConfig::default(),
            tracker_forward: TrackerForwardConfig::default(),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        PortsConfig {
            api: 3000,
            map: 3001,
            detection: 3002,
            track: 3003,
            timestamp: 4000,
            timing: 4001,
            iqdata: 4002,
        }
    }
}

impl Default for TrackerForwardConfig {
    fn default() -> Self {
        TrackerForwardConfig {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 5000,
            reconnect_delay_ms: 5000,
        }
    }
}

impl Default for AdsbConfig {
    fn default() -> Self {
        AdsbConfig {
            enabled: false,
            tar1090: "localhost:8078".into(),
            adsb2dd: "localhost:49155".into(),
            delay_tolerance: DEFAULT_DELAY_TOLERANCE_KM,
            doppler_tolerance: DEFAULT_DOPPLER_TOLERANCE_HZ,
            use_legacy_method: false,
            diagnostic_mode: false,
            cache_interval_ms: 1000,
            http_timeout_ms: 5000,
        }
    }
}

impl Config {
    pub fn sites(&self) -> Sites {
        Sites::new(self.location.rx.position(), self.location.tx.position())
    }

    pub fn tolerances(&self) -> Tolerances {
        Tolerances {
            delay_km: self.truth.adsb.delay_tolerance,
            doppler_hz: self.truth.adsb.doppler_tolerance,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load the defaults overlaid with each file in `paths`, in order.
pub fn load_config(paths: &[PathBuf]) -> Result<Config> {
    let mut config = Config::default();
    for path in paths {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BistaticError::Config(format!("{}: {e}", path.display())))?;
        apply_text(&mut config, &text)
            .map_err(|e| BistaticError::Config(format!("{}: {e}", path.display())))?;
    }
    Ok(config)
}

/// Parse a single document onto the defaults.
pub fn parse_config(text: &str) -> Result<Config> {
    let mut config = Config::default();
    apply_text(&mut config, text).map_err(BistaticError::Config)?;
    Ok(config)
}

/// Write the config to `path`, creating parent directories.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| BistaticError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config)).map_err(|e| BistaticError::Config(e.to_string()))
}

fn apply_text(config: &mut Config, text: &str) -> std::result::Result<(), String> {
    for (key, val) in flatten(text)? {
        apply(config, &key, &val)?;
    }
    Ok(())
}

/// Flatten nested mappings into `(dotted.key, raw value)` pairs.
fn flatten(text: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let mut entries = Vec::new();
    // (indent, key) of each open section
    let mut sections: Vec<(usize, String)> = Vec::new();

    for (n, line) in text.lines().enumerate() {
        let content = strip_comment(line);
        let stripped = content.trim();
        if stripped.is_empty() || stripped == "---" || stripped.starts_with("- ") || stripped == "-" {
            continue;
        }
        let indent = content.len() - content.trim_start().len();

        let Some((key, val)) = stripped.split_once(':') else {
            return Err(format!("line {}: expected `key: value`", n + 1));
        };
        let key = key.trim();
        let val = val.trim();

        while sections.last().is_some_and(|(i, _)| *i >= indent) {
            sections.pop();
        }
        let path = sections
            .iter()
            .map(|(_, k)| k.as_str())
            .chain(std::iter::once(key))
            .collect::<Vec<_>>()
            .join(".");

        if val.is_empty() {
            sections.push((indent, key.to_string()));
        } else if let Some(inner) = val.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
            for item in inner.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let Some((k, v)) = item.split_once(':') else {
                    return Err(format!("line {}: bad inline mapping entry `{item}`", n + 1));
                };
                entries.push((format!("{path}.{}", k.trim()), v.trim().to_string()));
            }
        } else {
            entries.push((path, val.to_string()));
        }
    }

    Ok(entries)
}

/// Drop a trailing `# comment` that is outside quotes.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev_space = true;
    for (i, c) in line.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '#' && prev_space => return &line[..i],
            None => {}
        }
        prev_space = c.is_whitespace();
    }
    line
}

fn apply(config: &mut Config, key: &str, val: &str) -> std::result::Result<(), String> {
    let net = &mut config.network;
    let adsb = &mut config.truth.adsb;
    match key {
        "location.rx.latitude" => config.location.rx.latitude = parse_float(key, val)?,
        "location.rx.longitude" => config.location.rx.longitude = parse_float(key, val)?,
        "location.rx.altitude" => config.location.rx.altitude = parse_float(key, val)?,
        "location.tx.latitude" => config.location.tx.latitude = parse_float(key, val)?,
        "location.tx.longitude" => config.location.tx.longitude = parse_float(key, val)?,
        "location.tx.altitude" => config.location.tx.altitude = parse_float(key, val)?,
        "capture.fc" => config.capture.fc = parse_float(key, val)?,

        "network.ip" => net.ip = parse_string(key, val)?,
        "network.api_host" => net.api_host = parse_string(key, val)?,
        "network.max_frame_bytes" => {
            net.max_frame_bytes = match parse_string_value(val) {
                None => None,
                Some(_) => Some(parse_int(key, val)?),
            }
        }
        "network.ports.api" => net.ports.api = parse_int(key, val)?,
        "network.ports.map" => net.ports.map = parse_int(key, val)?,
        "network.ports.detection" => net.ports.detection = parse_int(key, val)?,
        "network.ports.track" => net.ports.track = parse_int(key, val)?,
        "network.ports.timestamp" => net.ports.timestamp = parse_int(key, val)?,
        "network.ports.timing" => net.ports.timing = parse_int(key, val)?,
        "network.ports.iqdata" => net.ports.iqdata = parse_int(key, val)?,
        "network.tracker_forward.enabled" => net.tracker_forward.enabled = parse_bool(key, val)?,
        "network.tracker_forward.host" => net.tracker_forward.host = parse_string(key, val)?,
        "network.tracker_forward.port" => net.tracker_forward.port = parse_int(key, val)?,
        "network.tracker_forward.reconnect_delay_ms" => {
            net.tracker_forward.reconnect_delay_ms = parse_int(key, val)?
        }

        "truth.adsb.enabled" => adsb.enabled = parse_bool(key, val)?,
        "truth.adsb.tar1090" => adsb.tar1090 = parse_string(key, val)?,
        "truth.adsb.adsb2dd" => adsb.adsb2dd = parse_string(key, val)?,
        "truth.adsb.delay_tolerance" => adsb.delay_tolerance = parse_tolerance(key, val)?,
        "truth.adsb.doppler_tolerance" => adsb.doppler_tolerance = parse_tolerance(key, val)?,
        "truth.adsb.use_legacy_method" => adsb.use_legacy_method = parse_bool(key, val)?,
        "truth.adsb.diagnostic_mode" => adsb.diagnostic_mode = parse_bool(key, val)?,
        "truth.adsb.cache_interval_ms" => adsb.cache_interval_ms = parse_int(key, val)?,
        "truth.adsb.http_timeout_ms" => adsb.http_timeout_ms = parse_int(key, val)?,
        _ => {}
    }
    Ok(())
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_string(key: &str, val: &str) -> std::result::Result<String, String> {
    parse_string_value(val).ok_or_else(|| format!("{key}: expected a value"))
}

fn parse_float(key: &str, val: &str) -> std::result::Result<f64, String> {
    parse_string_value(val)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("{key}: expected a number, got `{val}`"))
}

fn parse_tolerance(key: &str, val: &str) -> std::result::Result<f64, String> {
    let v = parse_float(key, val)?;
    if v <= 0.0 {
        return Err(format!("{key}: must be positive, got {v}"));
    }
    Ok(v)
}

fn parse_int<T: std::str::FromStr>(key: &str, val: &str) -> std::result::Result<T, String> {
    parse_string_value(val)
        .and_then(|v| v.parse::<T>().ok())
        .ok_or_else(|| format!("{key}: expected an integer, got `{val}`"))
}

fn parse_bool(key: &str, val: &str) -> std::result::Result<bool, String> {
    match parse_string_value(val).as_deref() {
        Some("true" | "yes" | "on") => Ok(true),
        Some("false" | "no" | "off") => Ok(false),
        _ => Err(format!("{key}: expected true or false, got `{val}`")),
    }
}

// ---------------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------------

/// Serialize config to YAML-like text that [`parse_config`] reads back.
pub fn serialize_config(config: &Config) -> String {
    let mut lines = vec!["# bistatic-hub configuration".to_string(), String::new()];

    lines.push("location:".into());
    for (name, site) in [("rx", &config.location.rx), ("tx", &config.location.tx)] {
        lines.push(format!("  {name}:"));
        lines.push(format!("    latitude: {}", site.latitude));
        lines.push(format!("    longitude: {}", site.longitude));
        lines.push(format!("    altitude: {}", site.altitude));
    }
    lines.push(String::new());

    lines.push("capture:".into());
    lines.push(format!("  fc: {}", config.capture.fc));
    lines.push(String::new());

    let net = &config.network;
    lines.push("network:".into());
    lines.push(format!("  ip: \"{}\"", net.ip));
    lines.push(format!("  api_host: \"{}\"", net.api_host));
    match net.max_frame_bytes {
        Some(v) => lines.push(format!("  max_frame_bytes: {v}")),
        None => lines.push("  max_frame_bytes: null".into()),
    }
    lines.push("  ports:".into());
    lines.push(format!("    api: {}", net.ports.api));
    for kind in StreamKind::ALL {
        lines.push(format!("    {}: {}", kind.name(), net.ports.port(kind)));
    }
    let fwd = &net.tracker_forward;
    lines.push("  tracker_forward:".into());
    lines.push(format!("    enabled: {}", fwd.enabled));
    lines.push(format!("    host: \"{}\"", fwd.host));
    lines.push(format!("    port: {}", fwd.port));
    lines.push(format!("    reconnect_delay_ms: {}", fwd.reconnect_delay_ms));
    lines.push(String::new());

    let adsb = &config.truth.adsb;
    lines.push("truth:".into());
    lines.push("  adsb:".into());
    lines.push(format!("    enabled: {}", adsb.enabled));
    lines.push(format!("    tar1090: \"{}\"", adsb.tar1090));
    lines.push(format!("    adsb2dd: \"{}\"", adsb.adsb2dd));
    lines.push(format!("    delay_tolerance: {}", adsb.delay_tolerance));
    lines.push(format!("    doppler_tolerance: {}", adsb.doppler_tolerance));
    lines.push(format!("    use_legacy_method: {}", adsb.use_legacy_method));
    lines.push(format!("    diagnostic_mode: {}", adsb.diagnostic_mode));
    lines.push(format!("    cache_interval_ms: {}", adsb.cache_interval_ms));
    lines.push(format!("    http_timeout_ms: {}", adsb.http_timeout_ms));

    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
