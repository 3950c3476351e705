//! RoadTrace CLI
//!
//! Convert a recorded multi-channel vehicle log into a time-aligned
//! behavior trace, with optional CSV export for spreadsheet analysis.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roadtrace_core::channels::{decode_record, ChannelKind, ChannelRecord};
use roadtrace_core::{
    ChannelSet, DeriveConfig, MapIndex, ResultAssembler, SignalEngine, StreamAligner, Trace,
};

#[derive(Parser, Debug)]
#[command(name = "roadtrace")]
#[command(about = "Convert a recorded vehicle log into a behavior trace", long_about = None)]
struct Args {
    /// Channel dump: JSON object mapping channel name to {timestamp: message}
    log: PathBuf,

    /// Road-network description JSON
    #[arg(short, long)]
    map: PathBuf,

    /// Output trace path
    #[arg(short, long, default_value = "trace.json")]
    output: PathBuf,

    /// Derivation thresholds (JSON); defaults apply to any omitted field
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for ego.csv and obstacles.csv export
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Cap on exported CSV rows
    #[arg(long)]
    max_rows: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let map = MapIndex::load(&args.map)
        .with_context(|| format!("loading map {}", args.map.display()))?;
    let config = load_config(args.config.as_deref())?;

    let dump: Value = serde_json::from_reader(BufReader::new(
        File::open(&args.log).with_context(|| format!("opening log {}", args.log.display()))?,
    ))
    .context("parsing channel dump")?;
    let channels = decode_channels(&dump);

    let aligned = StreamAligner::new(&map).align(channels);
    let frames = SignalEngine::new(&map, &config).run(aligned);
    let trace = ResultAssembler::new(&config).assemble(map.map_name().to_string(), frames);

    let out = File::create(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    serde_json::to_writer(BufWriter::new(out), &trace).context("writing trace")?;
    info!(output = %args.output.display(), "trace written");

    if let Some(dir) = &args.csv {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
        export_ego_csv(&dir.join("ego.csv"), &trace, args.max_rows)?;
        export_obstacles_csv(&dir.join("obstacles.csv"), &trace, args.max_rows)?;
        info!(dir = %dir.display(), "csv export written");
    }

    info!(
        frames = trace.frames.len(),
        agents = trace.agent_names.len(),
        min_separation = trace.min_separation,
        failures = ?trace.test_failures,
        "run complete"
    );
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<DeriveConfig> {
    match path {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("opening config {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parsing config {}", path.display()))
        }
        None => Ok(DeriveConfig::default()),
    }
}

/// Decode the five channels in parallel. A message that fails to decode is
/// skipped; its channel keeps going.
fn decode_channels(dump: &Value) -> ChannelSet {
    let decoded: Vec<Vec<(f64, ChannelRecord)>> = ChannelKind::ALL
        .par_iter()
        .map(|&kind| {
            let Some(messages) = dump.get(kind.name()).and_then(Value::as_object) else {
                warn!(channel = kind.name(), "channel missing from dump");
                return Vec::new();
            };
            let mut records = Vec::with_capacity(messages.len());
            let mut skipped = 0usize;
            for (raw_ts, message) in messages {
                let Ok(timestamp) = raw_ts.parse::<f64>() else {
                    skipped += 1;
                    continue;
                };
                match decode_record(kind, message) {
                    Ok(record) => records.push((timestamp, record)),
                    Err(error) => {
                        skipped += 1;
                        warn!(channel = kind.name(), timestamp, %error, "skipping message");
                    }
                }
            }
            if skipped > 0 {
                warn!(channel = kind.name(), skipped, "messages skipped");
            }
            records
        })
        .collect();

    let mut channels = ChannelSet::default();
    for channel in decoded {
        for (timestamp, record) in channel {
            channels.insert(timestamp, record);
        }
    }
    channels
}

fn export_ego_csv(path: &Path, trace: &Trace, max_rows: Option<usize>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "timestamp",
        "x",
        "y",
        "heading",
        "v_ego",
        "a_ego",
        "gear",
        "brake_percentage",
        "turn_signal",
        "lane_id",
        "lane_turn_code",
        "front_dist",
        "d_safe",
        "thw_front",
        "ttc_front",
        "lat_offset",
        "in_lane",
        "gap_safe",
        "hard_brake",
        "lane_changing",
        "turning_around",
        "priority_npc_ahead",
        "priority_peds_ahead",
        "red_light_ahead",
        "stop_sign_ahead",
        "ped_in_crosswalk",
        "stopped_duration",
        "unjustified_stop",
    ])?;

    let rows = max_rows.unwrap_or(trace.frames.len());
    for frame in trace.frames.iter().take(rows) {
        let b = &frame.behavior;
        writer.write_record([
            frame.timestamp.to_string(),
            frame.ego.pose.position.x.to_string(),
            frame.ego.pose.position.y.to_string(),
            frame.ego.pose.heading.to_string(),
            b.v_ego.to_string(),
            b.a_ego.to_string(),
            frame.ego.chassis.gear.to_string(),
            frame.ego.chassis.brake_percentage.to_string(),
            frame.ego.planned_turn.code().to_string(),
            frame.scene.current_lane.id.clone().unwrap_or_default(),
            frame.scene.current_lane.turn_code.to_string(),
            b.front_dist.to_string(),
            b.d_safe.to_string(),
            b.thw_front.to_string(),
            b.ttc_front.to_string(),
            b.lat_offset.to_string(),
            b.in_lane.to_string(),
            b.gap_safe.to_string(),
            b.hard_brake.to_string(),
            b.lane_changing.to_string(),
            b.turning_around.to_string(),
            b.priority_npc_ahead.to_string(),
            b.priority_peds_ahead.to_string(),
            b.red_light_ahead.to_string(),
            b.stop_sign_ahead.to_string(),
            b.ped_in_crosswalk.to_string(),
            b.stopped_duration.to_string(),
            b.unjustified_stop.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn export_obstacles_csv(path: &Path, trace: &Trace, max_rows: Option<usize>) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "timestamp",
        "id",
        "kind",
        "x",
        "y",
        "theta",
        "speed",
        "dist_to_ego",
        "lane_id",
    ])?;

    let mut written = 0usize;
    let cap = max_rows.unwrap_or(usize::MAX);
    'frames: for frame in &trace.frames {
        for obstacle in &frame.truth.obstacles {
            if written >= cap {
                break 'frames;
            }
            writer.write_record([
                frame.timestamp.to_string(),
                obstacle.id.clone(),
                format!("{:?}", obstacle.kind),
                obstacle.position.x.to_string(),
                obstacle.position.y.to_string(),
                obstacle.theta.to_string(),
                obstacle.speed.to_string(),
                obstacle.dist_to_ego.to_string(),
                obstacle.current_lane.id.clone().unwrap_or_default(),
            ])?;
            written += 1;
        }
    }
    writer.flush()?;
    Ok(())
}
