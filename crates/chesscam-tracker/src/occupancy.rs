//! Square occupancy from detections, and its temporal smoothing.

use chesscam_core::Calibration;
use serde::{Deserialize, Serialize};
use shakmaty::{Chess, File, Rank, Square};

use crate::detection::DetectionCandidate;
use crate::piece::PieceClass;
use crate::rules::placement;

/// What one square looks like in one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SquareObservation {
    pub class: Option<PieceClass>,
    pub confidence: f32,
}

impl SquareObservation {
    /// A square nothing was mapped onto.
    pub const EMPTY: Self = Self {
        class: None,
        confidence: 1.0,
    };

    pub fn occupied(class: PieceClass, confidence: f32) -> Self {
        Self {
            class: Some(class),
            confidence,
        }
    }

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.class.is_some()
    }
}

/// Per-frame view of all 64 squares, indexed a1 = 0 .. h8 = 63.
#[derive(Clone, Debug, PartialEq)]
pub struct OccupancySnapshot {
    squares: [SquareObservation; 64],
}

impl Default for OccupancySnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl OccupancySnapshot {
    pub fn empty() -> Self {
        Self {
            squares: [SquareObservation::EMPTY; 64],
        }
    }

    /// The snapshot a perfect detector would produce for `position`.
    pub fn from_position(position: &Chess) -> Self {
        let mut out = Self::empty();
        for (idx, piece) in placement(position).into_iter().enumerate() {
            if let Some(class) = piece {
                out.squares[idx] = SquareObservation::occupied(class, 1.0);
            }
        }
        out
    }

    #[inline]
    pub fn get(&self, sq: Square) -> &SquareObservation {
        &self.squares[sq as usize]
    }

    pub fn set(&mut self, sq: Square, obs: SquareObservation) {
        self.squares[sq as usize] = obs;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Square, &SquareObservation)> {
        Square::ALL.into_iter().zip(self.squares.iter())
    }

    pub fn occupied_count(&self) -> usize {
        self.squares.iter().filter(|s| s.is_occupied()).count()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OccupancyParams {
    /// Consecutive agreeing frames before a square counts as stable.
    #[serde(default = "default_stable_frames")]
    pub stable_frames: u32,
}

fn default_stable_frames() -> u32 {
    2
}

impl Default for OccupancyParams {
    fn default() -> Self {
        Self {
            stable_frames: default_stable_frames(),
        }
    }
}

/// Projects candidate anchors onto squares.
#[derive(Clone, Copy, Debug)]
pub struct OccupancyMapper {
    board_margin: f64,
}

impl OccupancyMapper {
    pub fn new(board_margin: f64) -> Self {
        Self { board_margin }
    }

    /// Build a snapshot; on collisions the most confident candidate wins and
    /// the first one seen wins ties.
    pub fn map(
        &self,
        candidates: &[DetectionCandidate],
        calibration: &Calibration,
    ) -> OccupancySnapshot {
        let mut snapshot = OccupancySnapshot::empty();
        for cand in candidates {
            let Some((file, rank)) = calibration.to_board(cand.anchor).cell(self.board_margin)
            else {
                continue;
            };
            let sq = square_at(file, rank);
            let current = snapshot.get(sq);
            if current.is_occupied() && current.confidence >= cand.confidence {
                continue;
            }
            snapshot.set(sq, SquareObservation::occupied(cand.class, cand.confidence));
        }
        snapshot
    }
}

/// Zero-based `(file, rank)` to square; both must be below 8.
pub fn square_at(file: u8, rank: u8) -> Square {
    Square::from_coords(File::new(u32::from(file)), Rank::new(u32::from(rank)))
}

/// Smoothed snapshot: `None` marks a square that has not settled yet.
#[derive(Clone, Debug, PartialEq)]
pub struct StableSnapshot {
    squares: [Option<SquareObservation>; 64],
}

impl StableSnapshot {
    /// Treat every square of `snapshot` as settled.
    pub fn all_stable(snapshot: &OccupancySnapshot) -> Self {
        let mut squares = [None; 64];
        for (sq, obs) in snapshot.iter() {
            squares[sq as usize] = Some(*obs);
        }
        Self { squares }
    }

    #[inline]
    pub fn get(&self, sq: Square) -> Option<&SquareObservation> {
        self.squares[sq as usize].as_ref()
    }

    /// Forget whatever was seen on `sq`.
    pub fn mark_unstable(&mut self, sq: Square) {
        self.squares[sq as usize] = None;
    }

    pub fn is_stable(&self, sq: Square) -> bool {
        self.squares[sq as usize].is_some()
    }

    pub fn is_fully_stable(&self) -> bool {
        self.squares.iter().all(Option::is_some)
    }

    pub fn unstable_count(&self) -> usize {
        self.squares.iter().filter(|s| s.is_none()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Square, Option<&SquareObservation>)> {
        Square::ALL
            .into_iter()
            .zip(self.squares.iter().map(Option::as_ref))
    }
}

/// Requires a square to keep the same class for `required` consecutive
/// frames before it is reported.
#[derive(Clone, Debug)]
pub struct Stabilizer {
    required: u32,
    last: [Option<PieceClass>; 64],
    streaks: [u32; 64],
}

impl Stabilizer {
    pub fn new(params: &OccupancyParams) -> Self {
        Self {
            required: params.stable_frames.max(1),
            last: [None; 64],
            streaks: [0; 64],
        }
    }

    /// Drop all accumulated history.
    pub fn reset(&mut self) {
        self.last = [None; 64];
        self.streaks = [0; 64];
    }

    pub fn update(&mut self, snapshot: &OccupancySnapshot) -> StableSnapshot {
        let mut squares = [None; 64];
        for (sq, obs) in snapshot.iter() {
            let idx = sq as usize;
            if self.streaks[idx] > 0 && self.last[idx] == obs.class {
                self.streaks[idx] = self.streaks[idx].saturating_add(1);
            } else {
                self.last[idx] = obs.class;
                self.streaks[idx] = 1;
            }
            if self.streaks[idx] >= self.required {
                squares[idx] = Some(*obs);
            }
        }
        StableSnapshot { squares }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chesscam_core::{CornerSet, PixelRect};
    use nalgebra::Point2;

    fn calibration() -> Calibration {
        Calibration::build(CornerSet::new(
            Point2::new(100.0, 500.0),
            Point2::new(500.0, 500.0),
            Point2::new(500.0, 100.0),
            Point2::new(100.0, 100.0),
        ))
        .unwrap()
    }

    fn candidate(x: f64, y: f64, class: PieceClass, confidence: f32) -> DetectionCandidate {
        DetectionCandidate {
            rect: PixelRect::standing_on(Point2::new(x, y), 30.0, 60.0),
            anchor: Point2::new(x, y),
            class,
            confidence,
        }
    }

    #[test]
    fn collisions_keep_the_most_confident_class() {
        let mapper = OccupancyMapper::new(0.25);
        let snapshot = mapper.map(
            &[
                candidate(320.0, 330.0, PieceClass::WhitePawn, 0.6),
                candidate(330.0, 320.0, PieceClass::BlackPawn, 0.8),
                candidate(330.0, 320.0, PieceClass::WhiteQueen, 0.8),
            ],
            &calibration(),
        );
        assert_eq!(
            *snapshot.get(Square::E4),
            SquareObservation::occupied(PieceClass::BlackPawn, 0.8)
        );
        assert_eq!(snapshot.occupied_count(), 1);
        assert_eq!(*snapshot.get(Square::E5), SquareObservation::EMPTY);
    }

    #[test]
    fn anchors_just_outside_snap_to_edge_squares() {
        let mapper = OccupancyMapper::new(0.25);
        // 0.2 squares left of the a-file, 0.6 squares left is dropped.
        let snapshot = mapper.map(
            &[
                candidate(90.0, 475.0, PieceClass::WhiteRook, 0.9),
                candidate(70.0, 425.0, PieceClass::WhiteKnight, 0.9),
            ],
            &calibration(),
        );
        assert!(snapshot.get(Square::A1).is_occupied());
        assert!(!snapshot.get(Square::A2).is_occupied());
    }

    #[test]
    fn stabilizer_waits_for_agreement() {
        let mut stab = Stabilizer::new(&OccupancyParams { stable_frames: 2 });
        let start = OccupancySnapshot::from_position(&Chess::default());

        let first = stab.update(&start);
        assert_eq!(first.unstable_count(), 64);

        let second = stab.update(&start);
        assert!(second.is_fully_stable());

        let mut moved = start.clone();
        moved.set(Square::E2, SquareObservation::EMPTY);
        let third = stab.update(&moved);
        assert!(!third.is_stable(Square::E2));
        assert_eq!(third.unstable_count(), 1);

        stab.reset();
        assert_eq!(stab.update(&moved).unstable_count(), 64);
    }

    #[test]
    fn single_frame_stabilizer_passes_through() {
        let mut stab = Stabilizer::new(&OccupancyParams { stable_frames: 1 });
        let start = OccupancySnapshot::from_position(&Chess::default());
        assert_eq!(stab.update(&start), StableSnapshot::all_stable(&start));
    }
}
