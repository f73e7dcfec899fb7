//! bistatic-hub: telemetry fusion hub + CLI for a passive bistatic radar.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use bistatic_core::config::{load_config, save_config, serialize_config, Config};
use bistatic_core::correlate::Correlator;
use bistatic_core::types::{Result, StreamKind};

mod forward;
mod hub;
mod legacy;
mod query;
mod store;
mod truth;
mod web;

use forward::TrackerLink;
use hub::{DetectionPipeline, Hub, Matching};
use legacy::LegacyClient;
use query::TruthQuery;
use store::LatestValues;
use truth::{Tar1090Client, TruthCache};

#[derive(Parser)]
#[command(name = "bistatic-hub", version, about = "Passive radar telemetry hub with ADS-B truth matching")]
struct Cli {
    /// Config file; repeat to layer files in order (default, user, forced)
    #[arg(
        long = "config",
        short = 'c',
        global = true,
        env = "BISTATIC_HUB_CONFIG",
        value_delimiter = ','
    )]
    config: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion listeners, tracker link and HTTP API
    Serve,

    /// Compare legacy adsb2dd output against local extrapolated truth once
    Compare,

    /// Print the merged configuration
    #[command(name = "config")]
    ShowConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging() {
    // Defaults to INFO if RUST_LOG is not set
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    let config = load_config(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    let result = match cli.command {
        Commands::Serve => cmd_serve(config).await,
        Commands::Compare => cmd_compare(config).await,
        Commands::ShowConfig { output } => cmd_config(&config, output.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn truth_cache(config: &Config) -> Result<Arc<TruthCache>> {
    let adsb = &config.truth.adsb;
    let source = Tar1090Client::new(&adsb.tar1090, Duration::from_millis(adsb.http_timeout_ms))?;
    debug!(url = source.url(), "truth source");
    Ok(Arc::new(TruthCache::new(
        Arc::new(source),
        Duration::from_millis(adsb.cache_interval_ms),
    )))
}

async fn cmd_serve(config: Config) -> Result<()> {
    let config = Arc::new(config);
    let adsb = &config.truth.adsb;
    let net = &config.network;
    let store = Arc::new(LatestValues::new());
    let cache = truth_cache(&config)?;

    let (query, matching) = if adsb.enabled {
        let legacy = LegacyClient::new(&config, Duration::from_millis(adsb.http_timeout_ms))?;
        let query = TruthQuery::new(&config, Arc::clone(&cache), legacy, Arc::clone(&store));
        info!(tar1090 = %adsb.tar1090, mode = ?query.mode(), "ADS-B truth enabled");
        let matching = Matching {
            cache: Arc::clone(&cache),
            correlator: Correlator::new(config.sites(), config.capture.fc, config.tolerances()),
        };
        (Some(Arc::new(query)), Some(matching))
    } else {
        (None, None)
    };

    let fwd = &net.tracker_forward;
    let (link, link_task) = if fwd.enabled {
        let (link, task) = TrackerLink::spawn(
            format!("{}:{}", fwd.host, fwd.port),
            Duration::from_millis(fwd.reconnect_delay_ms),
        );
        (Some(link), Some(task))
    } else {
        (None, None)
    };

    let pipeline = Arc::new(DetectionPipeline::new(Arc::clone(&store), matching, link));
    let hub = Hub::new(Arc::clone(&store), pipeline, net.max_frame_bytes);

    let mut listeners = Vec::with_capacity(StreamKind::COUNT);
    for kind in StreamKind::ALL {
        let listener = Hub::bind(kind, &net.ip, net.ports.port(kind)).await?;
        listeners.push(hub.spawn_listener(kind, listener));
    }

    let state = Arc::new(web::AppState {
        store,
        query,
        config: Arc::clone(&config),
        capture: AtomicBool::new(false),
    });
    web::serve(state, &net.api_host, net.ports.api, shutdown_signal()).await?;

    for task in listeners.into_iter().chain(link_task) {
        task.abort();
    }
    info!(truth_fetches = cache.fetch_count(), "shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}

async fn cmd_compare(config: Config) -> Result<()> {
    let adsb = &config.truth.adsb;
    let legacy = LegacyClient::new(&config, Duration::from_millis(adsb.http_timeout_ms))?;
    let query = TruthQuery::new(&config, truth_cache(&config)?, legacy, Arc::new(LatestValues::new()));
    let report = query.diagnostic().await;
    let cmp = &report.comparison;
    let counts = &cmp.total_aircraft;

    println!();
    println!("Legacy: {}  ({})", counts.legacy, adsb.adsb2dd);
    println!("New:    {}  ({})", counts.new, adsb.tar1090);
    println!(
        "Both:   {}  (legacy only {}, new only {})",
        counts.both, counts.legacy_only, counts.new_only
    );
    println!(
        "Mean |Δdelay|: {} km   Mean |Δdoppler|: {} Hz",
        fmt_opt(cmp.avg_delay_diff),
        fmt_opt(cmp.avg_doppler_diff)
    );

    if !cmp.largest_discrepancies.is_empty() {
        println!();
        let mut table = Table::new();
        table.set_header(vec![
            "Hex", "Flight", "Delay (legacy)", "Delay (new)", "Δ Delay", "Doppler (legacy)",
            "Doppler (new)", "Δ Doppler",
        ]);

        for d in &cmp.largest_discrepancies {
            table.add_row(vec![
                Cell::new(&d.hex),
                Cell::new(if d.flight.is_empty() { "-" } else { d.flight.as_str() }),
                Cell::new(d.delay_legacy),
                Cell::new(d.delay_new),
                Cell::new(d.delay_diff),
                Cell::new(fmt_opt(d.doppler_legacy)),
                Cell::new(fmt_opt(d.doppler_new)),
                Cell::new(fmt_opt(d.doppler_diff)),
            ]);
        }

        println!("{table}");
    }
    Ok(())
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or("-".into())
}

fn cmd_config(config: &Config, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            save_config(config, path)?;
            println!("Wrote {}", path.display());
        }
        None => print!("{}", serialize_config(config)),
    }
    Ok(())
}
