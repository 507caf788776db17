use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::{info, warn};

use speedtrack::config::{CameraConfig, MonitorConfig};
use speedtrack::sink::{ChannelSink, JsonLinesWriter};
use speedtrack::{Frame, SpeedMonitor, Tracking};

/// Replays recorded detections through the speed monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Monitor config (JSON). Cameras not listed run uncalibrated defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detections file, one `{camera_id, timestamp, detections}` object per line
    #[arg(short, long)]
    detections: PathBuf,

    /// Output file for incidents (and frames), stdout when omitted
    #[arg(short, long)]
    incidents: Option<PathBuf>,

    /// Also write every processed frame (tracks and annotations) to the output
    #[arg(long)]
    frames: bool,

    /// Print confirmed tracks of every processed frame to stderr
    #[arg(long)]
    print_tracks: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => MonitorConfig::default(),
    };

    let out: Box<dyn Write + Send> = match &args.incidents {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };

    let sink = ChannelSink::spawn(
        &config.sink,
        JsonLinesWriter::new(out).with_frames(args.frames),
    )?;
    let mut monitor = SpeedMonitor::from_config(&config, sink)?;

    let file = File::open(&args.detections)
        .with_context(|| format!("opening {}", args.detections.display()))?;

    let mut frames = 0usize;
    let mut incidents = 0usize;

    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let frame: Frame = match serde_json::from_str(&line) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("line {}: wrong frame format: {}", lineno + 1, err);
                continue;
            }
        };

        if monitor.pipeline(frame.camera_id).is_none() {
            monitor.add_camera(&CameraConfig::new(frame.camera_id))?;
        }

        if let Some(report) = monitor.update(&frame)? {
            frames += 1;
            incidents += report.incidents.len();

            if args.print_tracks {
                for track in report.tracks.iter() {
                    eprintln!(
                        "{} {:.3} {}",
                        frame.camera_id,
                        frame.timestamp,
                        serde_json::to_string(track)?
                    );
                }
            }
        }
    }

    let sink = monitor.into_sink();
    let dropped = sink.dropped();
    sink.shutdown()?;

    info!(
        "{} frame(s) processed, {} incident(s), {} dropped",
        frames, incidents, dropped
    );

    Ok(())
}
