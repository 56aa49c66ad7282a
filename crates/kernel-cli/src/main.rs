use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use contracts::{
    Category, CyberKind, EconomyKind, EnvironmentKind, FactionKind, InfrastructureKind,
    InstabilityConfig, PopulationKind, SecurityKind, SignalPayload, ZoneRegistration,
};
use kernel_api::{serve_with_shutdown, spawn_scheduler, EngineApi, SchedulerIntervals};
use kernel_core::{CancelFlag, ManualClock};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ZONE_TYPES: [&str; 4] = ["district", "industrial", "harbor", "market"];

#[derive(Parser)]
#[command(name = "kernel-cli")]
#[command(about = "Zone instability engine: serve, simulate and inspect")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging when RUST_LOG is unset
    #[arg(long, short)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP surface and the tick/maintenance scheduler.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// JSON configuration file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// SQLite database to restore from and flush into
        #[arg(long)]
        sqlite: Option<PathBuf>,
    },

    /// Drive a deterministic synthetic run on a manual clock.
    Simulate {
        #[arg(long, default_value = "4")]
        zones: usize,
        #[arg(long, default_value = "48")]
        ticks: u64,
        #[arg(long, default_value = "42")]
        seed: u64,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        sqlite: Option<PathBuf>,
    },

    /// Parse and validate a configuration file.
    ValidateConfig { path: PathBuf },

    /// Summarise the zones stored in a SQLite database.
    Status {
        #[arg(long)]
        sqlite: Option<PathBuf>,
    },
}

fn default_sqlite_path() -> PathBuf {
    std::env::var("INSTABILITY_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("instability.sqlite"))
}

fn load_config(path: Option<&Path>) -> Result<InstabilityConfig, String> {
    let Some(path) = path else {
        return Ok(InstabilityConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {err}", path.display()))?;
    let config: InstabilityConfig = serde_json::from_str(&raw)
        .map_err(|err| format!("failed to parse config {}: {err}", path.display()))?;
    config
        .validate()
        .map_err(|err| format!("invalid config {}: {err}", path.display()))?;
    Ok(config)
}

/// SplitMix-style hash of (seed, tick, key, salt). Same inputs, same roll.
fn roll(seed: u64, tick: u64, key: &str, salt: u64) -> u64 {
    let mut h: u64 = seed ^ salt.wrapping_mul(0xd6e8feb86659fd93);
    h = h.wrapping_add(tick.wrapping_mul(0x9e3779b97f4a7c15));
    for b in key.bytes() {
        h = h.wrapping_add(b as u64);
        h = h.wrapping_mul(0xbf58476d1ce4e5b9);
    }
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d049bb133111eb);
    h ^ (h >> 31)
}

fn pick<T: Copy>(options: &[T], value: u64) -> T {
    options[(value % options.len() as u64) as usize]
}

fn synthetic_payload(category: Category, value: u64) -> SignalPayload {
    match category {
        Category::Security => SignalPayload::Security {
            kind: pick(SecurityKind::ALL, value),
            actors: 1 + (value % 6) as u32,
        },
        Category::Infrastructure => SignalPayload::Infrastructure {
            kind: pick(InfrastructureKind::ALL, value),
            rooms_affected: (value % 4) as u32,
        },
        Category::Faction => SignalPayload::Faction {
            kind: pick(FactionKind::ALL, value),
            factions: vec![format!("faction_{}", value % 5)],
        },
        Category::Environment => SignalPayload::Environment {
            kind: pick(EnvironmentKind::ALL, value),
            intensity: (value % 101) as f64 / 100.0,
        },
        Category::Economy => SignalPayload::Economy {
            kind: pick(EconomyKind::ALL, value),
            amount: (value % 10_000) as i64,
        },
        Category::Population => SignalPayload::Population {
            kind: pick(PopulationKind::ALL, value),
            headcount: 1 + (value % 50) as u32,
        },
        Category::Cyber => SignalPayload::Cyber {
            kind: pick(CyberKind::ALL, value),
            node: Some(format!("node_{}", value % 16)),
        },
    }
}

/// Signals for one zone in one tick: a low steady background with an
/// occasional surge.
fn synthetic_signals(seed: u64, tick: u64, zone_id: &str) -> Vec<(Category, f64, SignalPayload)> {
    let background = roll(seed, tick, zone_id, 1) % 4;
    let surge = if roll(seed, tick, zone_id, 2) % 17 == 0 { 8 } else { 0 };
    (0..background + surge)
        .map(|n| {
            let value = roll(seed, tick, zone_id, 100 + n);
            let category = pick(&Category::ALL, value >> 8);
            let severity = (value % 1_001) as f64 / 1_000.0;
            (category, severity, synthetic_payload(category, value >> 16))
        })
        .collect()
}

async fn run_serve(
    addr: SocketAddr,
    config: Option<PathBuf>,
    sqlite: Option<PathBuf>,
) -> Result<(), String> {
    let config = load_config(config.as_deref())?;
    let intervals = SchedulerIntervals::from_config(&config);
    let api = Arc::new(
        EngineApi::with_system_clock(config).map_err(|err| format!("invalid config: {err}"))?,
    );

    if let Some(path) = sqlite {
        api.attach_sqlite_store(&path)
            .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
        let zones = api
            .restore_from_store()
            .map_err(|err| format!("failed to restore from sqlite: {err}"))?;
        info!(zones, sqlite = %path.display(), "persistence attached");
    }

    let scheduler = spawn_scheduler(api.clone(), intervals);
    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("shutdown requested");
    };

    println!("serving api on http://{addr}");
    let served = serve_with_shutdown(addr, api, shutdown).await;
    scheduler.shutdown().await;
    served.map_err(|err| format!("server error: {err}"))
}

fn run_simulation(
    zones: usize,
    ticks: u64,
    seed: u64,
    config: Option<PathBuf>,
    sqlite: Option<PathBuf>,
) -> Result<(), String> {
    let config = load_config(config.as_deref())?;
    let step = config.tick_interval_secs;
    let clock = Arc::new(ManualClock::new(0));
    let api = EngineApi::from_config(config, clock.clone())
        .map_err(|err| format!("invalid config: {err}"))?;
    if let Some(path) = sqlite.as_ref() {
        api.attach_sqlite_store(path)
            .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
    }

    let mut zone_ids = Vec::with_capacity(zones);
    for index in 0..zones {
        let zone_id = format!("zone_{index:02}");
        let rooms = 1 + (roll(seed, 0, &zone_id, 0) % 8) as u32;
        api.register_zone(ZoneRegistration::new(
            zone_id.clone(),
            format!("Zone {index}"),
            ZONE_TYPES[index % ZONE_TYPES.len()],
            rooms,
        ))
        .map_err(|err| format!("failed to register {zone_id}: {err}"))?;
        zone_ids.push(zone_id);
    }

    let cancel = CancelFlag::new();
    let mut rejected = 0usize;
    for tick in 1..=ticks {
        clock.advance(step);
        for zone_id in &zone_ids {
            for (category, severity, payload) in synthetic_signals(seed, tick, zone_id) {
                if api.emit(category, zone_id, severity, payload).is_err() {
                    rejected += 1;
                }
            }
        }
        let report = api.run_tick(&cancel);
        if !report.failures.is_empty() {
            warn!(%report, "tick completed with failures");
        }
    }

    if let Some(error) = api.last_persistence_error() {
        return Err(format!("persistence error after simulation: {error}"));
    }

    for view in api.list_zone_states() {
        let findings = api.get_active_findings(Some(&view.zone_id)).len();
        println!(
            "{} rooms={} composite={:.1} tier={:?} trend={:?} convergence={} findings={}",
            view.zone_id,
            view.room_count,
            view.composite_score,
            view.tier,
            view.trend,
            view.convergence_level,
            findings
        );
    }
    println!(
        "simulated seed={} zones={} ticks={} rejected={} sqlite={}",
        seed,
        zone_ids.len(),
        api.context().current_tick(),
        rejected,
        sqlite
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "none".to_string())
    );
    Ok(())
}

fn run_status(sqlite: Option<PathBuf>) -> Result<(), String> {
    let path = sqlite.unwrap_or_else(default_sqlite_path);
    let api = EngineApi::with_system_clock(InstabilityConfig::default())
        .map_err(|err| format!("invalid config: {err}"))?;
    api.attach_sqlite_store(&path)
        .map_err(|err| format!("failed to open {}: {err}", path.display()))?;
    let zones = api
        .stored_zones()
        .map_err(|err| format!("failed to read zones: {err}"))?;

    if zones.is_empty() {
        println!("no persisted zones in {}", path.display());
        return Ok(());
    }
    for zone in zones {
        let computed = zone
            .last_computed_tick
            .map(|tick| tick.to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{} ({}, {} rooms) composite={:.1} tier={} computed_at={} baselines={} findings={}",
            zone.zone_id,
            zone.zone_type,
            zone.room_count,
            zone.composite_score,
            zone.tier,
            computed,
            zone.baseline_count,
            zone.active_findings
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match cli.command {
        Commands::Serve {
            addr,
            config,
            sqlite,
        } => run_serve(addr, config, sqlite).await,
        Commands::Simulate {
            zones,
            ticks,
            seed,
            config,
            sqlite,
        } => run_simulation(zones, ticks, seed, config, sqlite),
        Commands::ValidateConfig { path } => load_config(Some(&path)).map(|config| {
            println!(
                "config ok: {} routes, tick={}s maintenance={}s horizon={}s",
                config.routing.len(),
                config.tick_interval_secs,
                config.baseline_interval_secs,
                config.horizon_secs
            );
        }),
        Commands::Status { sqlite } => run_status(sqlite),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
