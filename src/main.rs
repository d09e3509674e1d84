use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use std::path::PathBuf;
use tokio::time::{interval, Duration, MissedTickBehavior};

use fleet_tracker::{
    Coordinate, FleetView, TrackedEntity, TrackerConfig, TrackerServices, TripPhase, WindowEnd,
};

#[derive(Parser, Debug)]
#[command(name = "fleet_tracker")]
#[command(about = "Live vehicle location fusion with route history", long_about = None)]
struct Args {
    /// Entity to track, as `ID` or `ID@LAT,LON` to give a base coordinate (repeatable)
    #[arg(long = "entity", value_name = "ENTITY", required = true)]
    entities: Vec<String>,

    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// History window length in minutes, ending now
    #[arg(long, default_value = "60")]
    window_minutes: i64,

    /// Re-fetch history this often, in seconds (0 = only at startup)
    #[arg(long, default_value = "60")]
    history_refresh_secs: u64,

    /// Trip phase used for status labels (upcoming, active, completed, cancelled)
    #[arg(long, default_value = "active")]
    trip_phase: TripPhase,

    /// Output directory for status snapshots
    #[arg(long, default_value = "fleet_tracker_sessions")]
    output_dir: PathBuf,

    #[arg(long)]
    stream_url: Option<String>,

    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token for stream and API
    #[arg(long, env = "FLEET_TRACKER_TOKEN")]
    auth_token: Option<String>,

    /// Minimum interval between live updates per entity
    #[arg(long)]
    throttle_ms: Option<u64>,
}

fn parse_entity(raw: &str) -> Result<TrackedEntity> {
    match raw.split_once('@') {
        None => Ok(TrackedEntity::new(raw.trim(), None)),
        Some((id, coords)) => {
            let (lat, lon) = coords
                .split_once(',')
                .ok_or_else(|| anyhow!("expected ID@LAT,LON, got '{}'", raw))?;
            let base = Coordinate::new(lat.trim().parse()?, lon.trim().parse()?)?;
            Ok(TrackedEntity::new(id.trim(), Some(base)))
        }
    }
}

fn load_config(args: &Args) -> Result<TrackerConfig> {
    let mut config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => TrackerConfig::default(),
    };

    if let Some(url) = &args.stream_url {
        config.stream_url = url.clone();
    }
    if let Some(url) = &args.api_url {
        config.api_base_url = url.clone();
    }
    if args.auth_token.is_some() {
        config.auth_token = args.auth_token.clone();
    }
    if let Some(ms) = args.throttle_ms {
        config.throttle_interval_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = load_config(&args)?;
    let entities = args
        .entities
        .iter()
        .map(|raw| parse_entity(raw))
        .collect::<Result<Vec<_>>>()?;

    println!("[{}] Fleet Tracker Starting", ts_now());
    println!("  Entities: {}", args.entities.join(", "));
    println!("  Stream: {}", config.stream_url);
    println!("  API: {}", config.api_base_url);
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  History window: {} minutes", args.window_minutes);
    println!("  Trip phase: {:?}", args.trip_phase);
    println!("  Output Dir: {}", args.output_dir.display());

    std::fs::create_dir_all(&args.output_dir)?;

    let services = TrackerServices::from_config(&config);
    let mut fleet = FleetView::new(services, config);
    for entity in entities {
        fleet.add(entity).await?;
    }
    fleet.set_trip_phase(args.trip_phase);

    refresh_history(&fleet, args.window_minutes).await;

    let start = Utc::now();
    let status_path = args.output_dir.join("live_status.json");

    let mut status_tick = interval(Duration::from_secs(2));
    status_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut history_tick = interval(Duration::from_secs(args.history_refresh_secs.max(1)));
    history_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; the startup fetch already covered it
    history_tick.tick().await;

    let deadline = tokio::time::sleep(if args.duration > 0 {
        Duration::from_secs(args.duration)
    } else {
        // Effectively forever
        Duration::from_secs(100 * 365 * 24 * 3600)
    });
    tokio::pin!(deadline);

    println!("[{}] Tracking...", ts_now());

    loop {
        tokio::select! {
            _ = &mut deadline => {
                println!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = status_tick.tick() => {
                let uptime = Utc::now().signed_duration_since(start).num_seconds().max(0) as u64;
                let snapshot = fleet.snapshot(uptime);
                if let Err(e) = snapshot.save(&status_path) {
                    log::warn!("failed to write {}: {}", status_path.display(), e);
                }
            }
            _ = history_tick.tick(), if args.history_refresh_secs > 0 => {
                refresh_history(&fleet, args.window_minutes).await;
            }
        }
    }

    // Final status
    let uptime = Utc::now().signed_duration_since(start).num_seconds().max(0) as u64;
    let final_snapshot = fleet.snapshot(uptime);
    let final_path = args.output_dir.join("live_status_final.json");
    final_snapshot.save(&final_path)?;

    fleet.close_all().await;

    println!("\n=== Final Status ===");
    for entity in &final_snapshot.entities {
        let position = entity
            .coordinate
            .map(|c| format!("({:.6}, {:.6})", c.latitude, c.longitude))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:<20} {:<11} {} route: {} samples, {:.0} m",
            entity.entity_id.as_str(),
            entity.status,
            entity.provenance.as_str(),
            position,
            entity.trajectory_samples,
            entity.trajectory_distance_m
        );
    }
    println!("Live: {}/{}", final_snapshot.live_count(), final_snapshot.entities.len());
    println!("Snapshot: {}", final_path.display());

    Ok(())
}

async fn refresh_history(fleet: &FleetView, window_minutes: i64) {
    let start = Utc::now() - ChronoDuration::minutes(window_minutes.max(0));
    for (entity_id, result) in fleet.fetch_all(start, WindowEnd::Now).await {
        match result {
            Ok(outcome) => log::debug!("[{}] history: {:?}", entity_id, outcome),
            Err(e) => println!("[{}] History fetch for {} failed: {}", ts_now(), entity_id, e),
        }
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
