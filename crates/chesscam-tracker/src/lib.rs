//! Turns a stream of camera frames into a legal chess game.
//!
//! The per-frame pipeline is:
//!
//! 1. [`DetectionAdapter`] asks a [`PieceDetector`] for boxes and keeps the
//!    confident ones standing on the calibrated board;
//! 2. [`OccupancyMapper`] assigns each box to a square;
//! 3. [`Stabilizer`] holds back squares that have not settled for a few frames;
//! 4. [`MoveResolver`] finds the legal move explaining the settled board;
//! 5. [`GameState`] records it.
//!
//! [`Tracker`] drives the loop, drops frames while busy, and publishes
//! [`TrackerEvent`]s.
//!
//! ```no_run
//! use chesscam_core::CornerSet;
//! use chesscam_tracker::{
//!     DetectionAdapter, DetectionParams, Frame, OracleError, RawDetection, Tracker, TrackerParams,
//! };
//! use nalgebra::Point2;
//!
//! let adapter = DetectionAdapter::new(
//!     |_: &Frame| -> Result<Vec<RawDetection>, OracleError> { Ok(Vec::new()) },
//!     DetectionParams::default(),
//! );
//! let tracker = Tracker::new(adapter, TrackerParams::default());
//! tracker
//!     .set_corners(CornerSet::new(
//!         Point2::new(100.0, 500.0),
//!         Point2::new(500.0, 500.0),
//!         Point2::new(500.0, 100.0),
//!         Point2::new(100.0, 100.0),
//!     ))
//!     .unwrap();
//! let outcome = tracker.submit_frame(&Frame::blank(0, 0, 640, 480)).unwrap();
//! println!("{outcome:?} {}", tracker.view().move_text);
//! ```

mod detection;
mod error;
mod events;
mod game;
mod occupancy;
mod params;
mod piece;
mod resolver;
mod rules;
mod tracker;

pub mod io;
pub mod synthetic;

pub use detection::{
    CornerDetector, CornerHint, DetectError, DetectionAdapter, DetectionCandidate,
    DetectionParams, Frame, OracleError, PieceDetector, RawDetection,
};
pub use error::TrackerError;
pub use events::{EventLog, EventSink, NullSink, TrackerEvent};
pub use game::{GameError, GameRecord, GameState, GameView, MoveRecord};
pub use occupancy::{
    square_at, OccupancyMapper, OccupancyParams, OccupancySnapshot, SquareObservation,
    StableSnapshot, Stabilizer,
};
pub use params::TrackerParams;
pub use piece::PieceClass;
pub use resolver::{
    CandidateMove, MoveResolver, Resolution, ResolveError, ResolverParams, ResolverState,
    ScoredLine,
};
pub use rules::{
    coordinate_notation, parse_fen, parse_san, placement, RulesError, RulesOracle,
    StandardRules, START_FEN,
};
pub use tracker::{DropReason, FrameOutcome, FrameStats, SkipReason, Tracker};

pub use shakmaty;
