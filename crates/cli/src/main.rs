use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mapvis_api::{build_definition, layers_from_vizjson, AnalysisFactory, MapInfo, ReloadOptions, VisEvent, VisModel};
use mapvis_client::{EchoBackend, MapDefinition};
use mapvis_core::vizjson::VizJson;
use mapvis_core::{LifecycleState, VisConfig};
use mapvis_store::{AnalysesCollection, DataviewsCollection, LayersCollection};
use metrics::histogram;
use serde_json::json;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mapvisctl", version, about = "mapvis CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show endpoint, layers and analyses of a viz.json (JSON or YAML)
    Inspect {
        file: PathBuf,
    },
    /// Print the map definition an instantiation would send
    Definition {
        file: PathBuf,
    },
    /// Run the orchestrator against a local echo backend and print its events
    Run {
        file: PathBuf,
        /// Simulated instantiation latency
        #[arg(long = "latency-ms", default_value_t = 50)]
        latency_ms: u64,
        /// Status checks before an analysis reports done
        #[arg(long = "checks-until-done", default_value_t = 2)]
        checks_until_done: u32,
        /// Give up waiting for the vis to settle after this long
        #[arg(long = "wait-secs", default_value_t = 30)]
        wait_secs: u64,
    },
}

fn init_tracing() {
    let env = std::env::var("MAPVIS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("MAPVIS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid MAPVIS_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_vizjson(path: &Path) -> Result<VizJson> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let is_yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml"));
    let vizjson = if is_yaml {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing {} as YAML", path.display()))?
    } else {
        VizJson::from_json_str(&raw).with_context(|| format!("parsing {} as JSON", path.display()))?
    };
    Ok(vizjson)
}

/// Definition built from fresh collections, exactly as a vis loaded from
/// `vizjson` would send it on its first instantiation.
fn definition_for(vizjson: &VizJson, config: &VisConfig) -> Result<MapDefinition> {
    let layers = LayersCollection::new("layers");
    let dataviews = DataviewsCollection::new("dataviews");
    let analyses = Arc::new(AnalysesCollection::new("analyses"));
    layers.reset(layers_from_vizjson(vizjson)?);
    let factory = AnalysisFactory::new(Arc::clone(&analyses));
    for def in &vizjson.analyses {
        factory.analyse(def);
    }
    Ok(build_definition(&MapInfo::from_vizjson(vizjson), config, &layers, &dataviews, &analyses))
}

fn timestamp() -> String { chrono::Local::now().format("%H:%M:%S%.3f").to_string() }

fn print_event(output: Output, event: &VisEvent) -> Result<()> {
    match output {
        Output::Human => {
            let line = match event {
                VisEvent::Load => "load".to_string(),
                VisEvent::Reload { seq, source_id: Some(id) } => format!("reload #{seq} (layer {id})"),
                VisEvent::Reload { seq, source_id: None } => format!("reload #{seq}"),
                VisEvent::InvalidateSize => "invalidate size".to_string(),
                VisEvent::Recenter => "recenter".to_string(),
                VisEvent::StateChanged(state) => format!("state → {state}"),
                VisEvent::LoadingChanged(loading) => format!("loading → {loading}"),
            };
            println!("{} {}", timestamp(), line);
        }
        Output::Json => println!("{}", serde_json::to_string(&json!({ "ts": timestamp(), "event": event }))?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let config = VisConfig::from_env();

    match cli.command {
        Commands::Inspect { file } => {
            info!(file = %file.display(), "inspect invoked");
            let vizjson = read_vizjson(&file)?;
            let layers = layers_from_vizjson(&vizjson)?;
            let analyses: Vec<_> = vizjson.analyses.iter().flat_map(|a| a.flatten()).collect();
            match cli.output {
                Output::Human => {
                    println!("title:    {}", vizjson.title.as_deref().unwrap_or("-"));
                    println!("endpoint: {}", vizjson.endpoint().path());
                    println!("LAYER                KIND        SOURCE");
                    for l in layers.iter() {
                        let source = l.source().map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
                        println!("{:<20} {:<11} {}", l.id(), l.kind(), source);
                    }
                    println!("ANALYSIS             KIND");
                    for a in &analyses {
                        println!("{:<20} {}", a.id, a.kind);
                    }
                }
                Output::Json => {
                    let layers: Vec<_> = layers
                        .iter()
                        .map(|l| json!({ "id": l.id(), "kind": l.kind(), "source": l.source(), "visible": l.is_visible() }))
                        .collect();
                    let analyses: Vec<_> = analyses.iter().map(|a| json!({ "id": a.id, "kind": a.kind })).collect();
                    let out = json!({
                        "title": vizjson.title,
                        "endpoint": vizjson.endpoint().path(),
                        "named_map": vizjson.is_named_map(),
                        "layers": layers,
                        "analyses": analyses,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Commands::Definition { file } => {
            info!(file = %file.display(), "definition invoked");
            let vizjson = read_vizjson(&file)?;
            let definition = definition_for(&vizjson, &config)?;
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&definition)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&definition)?),
            }
        }
        Commands::Run { file, latency_ms, checks_until_done, wait_secs } => {
            info!(file = %file.display(), latency_ms, checks_until_done, "run invoked");
            let vizjson = read_vizjson(&file)?;
            let backend = Arc::new(
                EchoBackend::new("echo://maps")
                    .with_latency(Duration::from_millis(latency_ms))
                    .with_checks_until_done(checks_until_done),
            );
            let vis = VisModel::builder().config(config).client(backend.clone()).status_source(backend).build()?;
            vis.load(&vizjson)?;
            let mut events = vis.subscribe();
            let started = Instant::now();
            vis.instantiate_map(ReloadOptions::new())?;

            let deadline = tokio::time::sleep(Duration::from_secs(wait_secs));
            tokio::pin!(deadline);
            let mut ticker = tokio::time::interval(Duration::from_millis(100));
            loop {
                tokio::select! {
                    ev = events.recv() => match ev {
                        Ok(event) => print_event(cli.output, &event)?,
                        Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                        Err(RecvError::Closed) => {
                            warn!("event stream closed");
                            break;
                        }
                    },
                    _ = ticker.tick() => {}
                    _ = &mut deadline => {
                        warn!(wait_secs, state = %vis.state(), loading = vis.is_loading(), "gave up waiting for the vis to settle");
                        break;
                    }
                    _ = signal::ctrl_c() => {
                        info!("Ctrl-C received; shutting down");
                        break;
                    }
                }
                vis.flush().await?;
                if vis.state() == LifecycleState::Consistent && !vis.is_loading() && !vis.is_reloading() {
                    histogram!("mapvis_run_settle_ms", started.elapsed().as_secs_f64() * 1000.0);
                    info!(took_ms = %started.elapsed().as_millis(), "vis settled");
                    break;
                }
            }

            if cli.output == Output::Human {
                for layer in vis.layers().iter() {
                    let meta = layer.meta();
                    println!("{:<20} {}", layer.id(), meta.tile_url.as_deref().unwrap_or("-"));
                }
            }
            vis.shutdown()?;
        }
    }

    Ok(())
}
