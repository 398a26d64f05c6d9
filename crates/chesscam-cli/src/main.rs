//! chesscam CLI: replay detector recordings, synthesize test sessions and
//! print per-square pixel centers for a calibration.

use std::path::{Path, PathBuf};

use chesscam_core::{Calibration, CalibrationError, CornerSet};
use chesscam_tracker::io::{self, IoError, Recording, SessionConfig, SynthesisError, SynthesisPlan};
use chesscam_tracker::{square_at, TrackerError, TrackerParams};
use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use nalgebra::Point2;
use serde::Serialize;

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Io(#[from] IoError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("could not write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "chesscam")]
#[command(about = "Infer chess moves from per-frame piece detections")]
#[command(version)]
struct Cli {
    /// Log level when CHESSCAM_LOG is unset (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "warn", value_parser = parse_level)]
    log_level: LevelFilter,

    /// Emit tracing spans as JSON lines (requires the `tracing` feature).
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a recording through the tracker and report the reconstructed game.
    Replay(ReplayArgs),

    /// Render a move list as the recording a perfect detector would produce.
    Synth(SynthArgs),

    /// Print the pixel center of every square for a corner set.
    Squares(CornerArgs),
}

#[derive(Debug, Clone, Args)]
struct ReplayArgs {
    /// Recording JSON (corners, optional starting FEN, frames).
    recording: PathBuf,

    /// Session config JSON whose `params` override the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the full session report as JSON.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Write the game as PGN.
    #[arg(long)]
    pgn: Option<PathBuf>,

    /// Accept moves before every square settles.
    #[arg(long)]
    greedy: bool,

    /// Try move + reply pairs when no single move fits.
    #[arg(long)]
    two_ply: bool,

    /// Consecutive agreeing frames before a square is trusted.
    #[arg(long)]
    stable_frames: Option<u32>,
}

#[derive(Debug, Clone, Args)]
struct SynthArgs {
    /// Moves in SAN, separated by spaces.
    #[arg(long)]
    moves: String,

    /// Output recording path.
    #[arg(long)]
    out: PathBuf,

    /// Starting position; the standard start when omitted.
    #[arg(long)]
    fen: Option<String>,

    #[arg(long, default_value_t = 3)]
    frames_per_position: u32,

    #[arg(long, default_value_t = 100)]
    frame_interval_ms: u64,

    #[command(flatten)]
    corners: CornerArgs,
}

#[derive(Debug, Clone, Args)]
struct CornerArgs {
    /// Session config JSON to take corners from.
    #[arg(long, conflicts_with = "corners")]
    config: Option<PathBuf>,

    /// Corners as `x,y` pairs in the order a1 h1 h8 a8, separated by `;`.
    #[arg(long, value_parser = parse_corners)]
    corners: Option<CornerSet>,
}

impl CornerArgs {
    fn resolve(&self) -> CliResult<CornerSet> {
        if let Some(corners) = self.corners {
            return Ok(corners);
        }
        if let Some(path) = &self.config {
            return Ok(SessionConfig::load_json(path)?.corners);
        }
        Ok(default_corners())
    }
}

/// A frontal board filling the middle of a 1280x720 frame.
fn default_corners() -> CornerSet {
    CornerSet::new(
        Point2::new(340.0, 680.0),
        Point2::new(940.0, 680.0),
        Point2::new(940.0, 80.0),
        Point2::new(340.0, 80.0),
    )
}

fn parse_level(raw: &str) -> Result<LevelFilter, String> {
    raw.parse()
        .map_err(|_| format!("unknown log level {raw:?}"))
}

fn parse_corners(raw: &str) -> Result<CornerSet, String> {
    let points = raw
        .split(';')
        .map(|pair| {
            let (x, y) = pair
                .trim()
                .split_once(',')
                .ok_or_else(|| format!("expected `x,y`, got {pair:?}"))?;
            let x: f64 = x.trim().parse().map_err(|e| format!("bad x in {pair:?}: {e}"))?;
            let y: f64 = y.trim().parse().map_err(|e| format!("bad y in {pair:?}: {e}"))?;
            Ok(Point2::new(x, y))
        })
        .collect::<Result<Vec<_>, String>>()?;
    match points.as_slice() {
        [a1, h1, h8, a8] => Ok(CornerSet::new(*a1, *h1, *h8, *a8)),
        _ => Err(format!("expected 4 corners, got {}", points.len())),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Replay(args) => run_replay(args),
        Commands::Synth(args) => run_synth(args),
        Commands::Squares(args) => run_squares(args),
    };
    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) {
    if !chesscam_core::init_tracing(cli.log_json) {
        let _ = chesscam_core::init_from_env(cli.log_level);
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) {
    let _ = chesscam_core::init_from_env(cli.log_level);
}

fn run_replay(args: &ReplayArgs) -> CliResult<()> {
    let recording = Recording::load_json(&args.recording)?;
    let mut params = match &args.config {
        Some(path) => SessionConfig::load_json(path)?.params,
        None => TrackerParams::default(),
    };
    params.resolver.greedy |= args.greedy;
    params.resolver.two_ply |= args.two_ply;
    if let Some(k) = args.stable_frames {
        params.occupancy.stable_frames = k;
    }

    info!(
        "replaying {} frames from {}",
        recording.frames.len(),
        args.recording.display()
    );
    let report = io::replay(&recording, params)?;

    if let Some(path) = &args.out {
        report.write_json(path)?;
    }
    if let Some(path) = &args.pgn {
        write_text(path, &report.pgn)?;
    }

    println!("moves: {}", report.moves.join(" "));
    println!("move text: {}", report.move_text);
    println!("fen: {}", report.final_fen);
    println!(
        "frames: {} admitted, {} dropped, {} skipped, {} ambiguous, {} rejected",
        report.stats.admitted,
        report.stats.dropped,
        report.stats.skipped,
        report.stats.ambiguous,
        report.stats.rejected
    );
    Ok(())
}

fn run_synth(args: &SynthArgs) -> CliResult<()> {
    let corners = args.corners.resolve()?;
    let moves: Vec<String> = args.moves.split_whitespace().map(str::to_string).collect();
    let plan = SynthesisPlan {
        frames_per_position: args.frames_per_position,
        frame_interval_ms: args.frame_interval_ms,
        ..SynthesisPlan::default()
    };
    let recording = io::synthesize(corners, args.fen.as_deref(), &moves, &plan)?;
    recording.write_json(&args.out)?;
    println!(
        "wrote {} frames for {} moves to {}",
        recording.frames.len(),
        moves.len(),
        args.out.display()
    );
    Ok(())
}

#[derive(Serialize)]
struct SquareCenter {
    square: String,
    x: f64,
    y: f64,
}

fn run_squares(args: &CornerArgs) -> CliResult<()> {
    let calibration = Calibration::build(args.resolve()?)?;
    let mut centers = Vec::with_capacity(64);
    for rank in 0..8u8 {
        for file in 0..8u8 {
            let px = calibration.square_center_px(file, rank);
            centers.push(SquareCenter {
                square: square_at(file, rank).to_string(),
                x: px.x,
                y: px.y,
            });
        }
    }
    println!("{}", serde_json::to_string_pretty(&centers)?);
    Ok(())
}

fn write_text(path: &Path, text: &str) -> CliResult<()> {
    std::fs::write(path, text).map_err(|source| CliError::Write {
        path: path.to_path_buf(),
        source,
    })
}
