//! NotPortable Agent CLI
//!
//! Sensor-backed anomaly detection and score log ingestion.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use notportable_agent::{
    config::Config,
    dispatch::{BlockingCollectorClient, CollectorConfig},
    parser::{self, Game},
    sensor::{self, status, RangeSampler},
    session::{Agent, SessionEvent},
    stats::DispatchStats,
    VERSION,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "notportable")]
#[command(author = "NotPortable")]
#[command(version = VERSION)]
#[command(about = "Sensor-backed anomaly detection and score ingestion for game sessions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest score logs and monitor sessions until Ctrl+C
    Run {
        /// Collector base URL (overrides config)
        #[arg(long)]
        collector: Option<String>,

        /// Log poll interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,

        /// Open one session for this game for the whole run
        #[arg(long)]
        session: Option<Game>,

        /// Read `launched <game> [player]` / `exited` events from stdin
        #[arg(long)]
        events_stdin: bool,
    },

    /// Monitor a single session with the sensor only
    Monitor {
        /// Game being played
        #[arg(long)]
        game: Game,

        /// Player name (defaults to the configured player)
        #[arg(long)]
        player: Option<String>,
    },

    /// Take a few test measurements from the sensor
    SensorStatus,

    /// Parse a score log and print its records as JSON
    Parse {
        #[arg(long)]
        game: Game,

        /// Log file (defaults to the configured path for the game)
        #[arg(long, short)]
        file: Option<PathBuf>,
    },

    /// Show cumulative dispatch statistics
    Status,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            collector,
            interval,
            session,
            events_stdin,
        } => cmd_run(collector, interval, session, events_stdin),
        Commands::Monitor { game, player } => cmd_monitor(game, player),
        Commands::SensorStatus => cmd_sensor_status(),
        Commands::Parse { game, file } => cmd_parse(game, file),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => config,
        Err(e) => {
            warn!("{e}; using default configuration");
            Config::default()
        }
    }
}

fn cmd_run(
    collector: Option<String>,
    interval: Option<u64>,
    session: Option<Game>,
    events_stdin: bool,
) -> Result<()> {
    let mut config = load_config();
    if let Some(url) = collector {
        config.collector_url = url;
    }
    if let Some(secs) = interval {
        config.poll_interval = Duration::from_secs(secs.max(1));
    }
    if let Err(e) = config.ensure_directories() {
        warn!("could not create directories: {e}");
    }

    println!("NotPortable Agent v{VERSION}");
    println!();
    println!("  Collector: {}", config.collector_url);
    println!("  Poll interval: {}s", config.poll_interval.as_secs());
    for (game, path) in config.logs.iter() {
        println!("  {} log: {}", game.display_name(), path.display());
    }

    let client = BlockingCollectorClient::new(CollectorConfig::new(config.collector_url.clone()))
        .context("failed to create collector client")?;
    println!("  Device ID: {}", client.device_id());

    let mut agent = Agent::from_config(&config);
    println!(
        "  Anomaly detection: {}",
        if agent.has_sensor() {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    agent
        .start_ingest(client, &config)
        .context("failed to start log ingestion")?;

    let (tx, rx) = crossbeam_channel::unbounded();
    if events_stdin {
        let tx = tx.clone();
        thread::Builder::new()
            .name("session-events".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match line.parse::<SessionEvent>() {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("ignoring session event: {e}"),
                    }
                }
            })
            .context("failed to start session event reader")?;
    }
    if let Some(game) = session {
        agent.begin_session(game, None);
    }

    // Without a stdin reader the loop runs until Ctrl+C.
    let _keepalive = (!events_stdin).then_some(tx);
    agent.run_until(&rx, &running);

    println!();
    println!("Stopping...");
    if let Some(report) = agent.shutdown() {
        println!("Session {} ({}): {}", report.id, report.game, report.verdict());
    }

    println!();
    println!("{}", agent.stats().summary());
    Ok(())
}

fn cmd_monitor(game: Game, player: Option<String>) -> Result<()> {
    let config = load_config();
    if let Err(e) = config.ensure_directories() {
        warn!("could not create directories: {e}");
    }

    let mut agent = Agent::from_config(&config);
    if !agent.has_sensor() {
        bail!("no sensor available (kind: {})", config.sensor.kind);
    }

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    agent.begin_session(game, player);
    println!("Monitoring {} session. Press Ctrl+C to end it.", game.display_name());

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    if let Some(report) = agent.shutdown() {
        println!();
        println!("Player: {}", report.player);
        if let Some(baseline) = report.baseline {
            println!("Baseline: {:.2}", baseline.value());
        }
        println!("Samples: {}", report.samples);
        println!("Verdict: {}", report.verdict());
    }
    Ok(())
}

fn cmd_sensor_status() -> Result<()> {
    let config = load_config();

    println!("Sensor: {}", config.sensor.kind);
    let mut sampler = sensor::open_sampler(&config.sensor).context("sensor check failed")?;

    println!(
        "Taking {} measurements {}s apart...",
        status::STATUS_SAMPLES,
        status::STATUS_SPACING.as_secs()
    );
    let report = status::probe(&mut sampler, status::STATUS_SAMPLES, status::STATUS_SPACING);
    sampler.release();

    println!("{report}");
    if report.successful() == 0 {
        bail!("sensor returned no valid readings");
    }
    Ok(())
}

fn cmd_parse(game: Game, file: Option<PathBuf>) -> Result<()> {
    let config = load_config();
    let path = file.unwrap_or_else(|| config.logs.get(game).to_path_buf());

    let bytes =
        std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
    let report = parser::parse_bytes(game, &bytes, &config.player);

    for record in &report.records {
        println!("{}", serde_json::to_string(record)?);
    }
    for skip in &report.skipped {
        eprintln!("skipped {skip}");
    }
    eprintln!(
        "{} record(s), {} skipped",
        report.records.len(),
        report.skipped.len()
    );
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = load_config();

    println!("NotPortable Agent Status");
    println!("========================");
    println!();
    println!("Collector: {}", config.collector_url);
    println!("Sensor: {}", config.sensor.kind);
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        println!("{}", DispatchStats::with_persistence(stats_path).summary());
    } else {
        println!("No previous dispatch data found.");
    }

    let journal = config.journal_path();
    if let Ok(content) = std::fs::read_to_string(&journal) {
        let lines: Vec<&str> = content.lines().collect();
        if !lines.is_empty() {
            println!();
            println!("Recent sessions:");
            for line in lines.iter().rev().take(5).rev() {
                println!("  {line}");
            }
        }
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
