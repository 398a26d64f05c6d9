//! Corner-marker calibration: pixel space <-> normalized 8x8 board space.
//!
//! Board space has the outer corner of a1 at `(0, 0)`, h1 at `(8, 0)`, h8 at
//! `(8, 8)` and a8 at `(0, 8)`. The square with zero-based file `f` and rank
//! `r` covers `[f, f + 1) x [r, r + 1)`.

use std::fmt;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::homography::{homography_from_4pt, Homography};

/// Number of squares along one board edge.
pub const BOARD_SIZE: f64 = 8.0;

/// Sine of the smallest accepted turn angle at a corner.
const MIN_TURN_SIN: f64 = 1e-3;
const MIN_CORNER_DISTANCE_PX: f64 = 1e-6;

/// One of the four user-placed board corner markers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CornerId {
    A1,
    H1,
    H8,
    A8,
}

impl CornerId {
    /// Polygon order used for all geometric checks.
    pub const ALL: [CornerId; 4] = [CornerId::A1, CornerId::H1, CornerId::H8, CornerId::A8];

    /// Board-space location of this outer corner.
    pub fn board_point(self) -> Point2<f64> {
        match self {
            CornerId::A1 => Point2::new(0.0, 0.0),
            CornerId::H1 => Point2::new(BOARD_SIZE, 0.0),
            CornerId::H8 => Point2::new(BOARD_SIZE, BOARD_SIZE),
            CornerId::A8 => Point2::new(0.0, BOARD_SIZE),
        }
    }
}

impl fmt::Display for CornerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CornerId::A1 => "a1",
            CornerId::H1 => "h1",
            CornerId::H8 => "h8",
            CornerId::A8 => "a8",
        };
        f.write_str(name)
    }
}

/// Pixel positions of the four corner markers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerSet {
    pub a1: Point2<f64>,
    pub h1: Point2<f64>,
    pub h8: Point2<f64>,
    pub a8: Point2<f64>,
}

impl CornerSet {
    pub fn new(a1: Point2<f64>, h1: Point2<f64>, h8: Point2<f64>, a8: Point2<f64>) -> Self {
        Self { a1, h1, h8, a8 }
    }

    #[inline]
    pub fn get(&self, id: CornerId) -> Point2<f64> {
        match id {
            CornerId::A1 => self.a1,
            CornerId::H1 => self.h1,
            CornerId::H8 => self.h8,
            CornerId::A8 => self.a8,
        }
    }

    pub fn set(&mut self, id: CornerId, p: Point2<f64>) {
        match id {
            CornerId::A1 => self.a1 = p,
            CornerId::H1 => self.h1 = p,
            CornerId::H8 => self.h8 = p,
            CornerId::A8 => self.a8 = p,
        }
    }

    /// Points in polygon order a1, h1, h8, a8.
    pub fn to_array(&self) -> [Point2<f64>; 4] {
        CornerId::ALL.map(|id| self.get(id))
    }

    /// Shoelace area of the polygon a1 -> h1 -> h8 -> a8 (sign depends on winding).
    pub fn signed_area(&self) -> f64 {
        let pts = self.to_array();
        let mut acc = 0.0;
        for i in 0..4 {
            let p = pts[i];
            let q = pts[(i + 1) % 4];
            acc += p.x * q.y - q.x * p.y;
        }
        0.5 * acc
    }
}

/// Why a corner set was rejected.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum DegeneracyReason {
    #[error("corner {0} has non-finite coordinates")]
    NonFinite(CornerId),
    #[error("corners {0} and {1} coincide")]
    Coincident(CornerId, CornerId),
    #[error("quadrilateral is collinear, concave or self-intersecting at corner {0}")]
    NotConvex(CornerId),
    #[error("area {area:.1} px^2 is below the minimum {min:.1} px^2")]
    TooSmall { area: f64, min: f64 },
    #[error("projective solve is singular")]
    Singular,
}

/// Errors returned while building a [`Calibration`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum CalibrationError {
    #[error("degenerate corners: {0}")]
    DegenerateCorners(DegeneracyReason),
}

fn default_min_area_px2() -> f64 {
    100.0
}

/// Calibration acceptance thresholds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationParams {
    /// Minimum absolute quadrilateral area in square pixels.
    #[serde(default = "default_min_area_px2")]
    pub min_area_px2: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            min_area_px2: default_min_area_px2(),
        }
    }
}

/// Continuous board coordinate; `file` and `rank` are in `[0, 8]` on the board.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardPoint {
    pub file: f64,
    pub rank: f64,
}

impl BoardPoint {
    pub fn new(file: f64, rank: f64) -> Self {
        Self { file, rank }
    }

    /// Center of the zero-based cell `(file, rank)`.
    pub fn cell_center(file: u8, rank: u8) -> Self {
        Self::new(f64::from(file) + 0.5, f64::from(rank) + 0.5)
    }

    /// Zero-based cell containing this point.
    ///
    /// Points up to `margin` squares outside the board snap to the nearest
    /// edge cell; anything further out yields `None`.
    pub fn cell(&self, margin: f64) -> Option<(u8, u8)> {
        if !self.file.is_finite() || !self.rank.is_finite() {
            return None;
        }
        let lo = -margin;
        let hi = BOARD_SIZE + margin;
        if self.file < lo || self.file > hi || self.rank < lo || self.rank > hi {
            return None;
        }
        let f = self.file.floor().clamp(0.0, BOARD_SIZE - 1.0) as u8;
        let r = self.rank.floor().clamp(0.0, BOARD_SIZE - 1.0) as u8;
        Some((f, r))
    }
}

/// Projective mapping between image pixels and board space.
///
/// Immutable once built; rebuild it whenever the corner set changes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    corners: CornerSet,
    pixel_from_board: Homography,
    board_from_pixel: Homography,
}

impl Calibration {
    /// Build with default thresholds.
    pub fn build(corners: CornerSet) -> Result<Self, CalibrationError> {
        Self::build_with(corners, &CalibrationParams::default())
    }

    /// Validate the corner geometry and solve the board <-> pixel homography.
    pub fn build_with(
        corners: CornerSet,
        params: &CalibrationParams,
    ) -> Result<Self, CalibrationError> {
        validate_corners(&corners, params).map_err(CalibrationError::DegenerateCorners)?;

        let board = CornerId::ALL.map(CornerId::board_point);
        let pixels = corners.to_array();
        let pixel_from_board = homography_from_4pt(&board, &pixels)
            .ok_or(CalibrationError::DegenerateCorners(DegeneracyReason::Singular))?;
        let board_from_pixel = pixel_from_board
            .inverse()
            .ok_or(CalibrationError::DegenerateCorners(DegeneracyReason::Singular))?;

        Ok(Self {
            corners,
            pixel_from_board,
            board_from_pixel,
        })
    }

    #[inline]
    pub fn corners(&self) -> &CornerSet {
        &self.corners
    }

    #[inline]
    pub fn pixel_from_board(&self) -> &Homography {
        &self.pixel_from_board
    }

    #[inline]
    pub fn board_from_pixel(&self) -> &Homography {
        &self.board_from_pixel
    }

    /// Map an image pixel into board space.
    #[inline]
    pub fn to_board(&self, pixel: Point2<f64>) -> BoardPoint {
        let p = self.board_from_pixel.apply(pixel);
        BoardPoint::new(p.x, p.y)
    }

    /// Map a board-space point into image pixels.
    #[inline]
    pub fn to_pixel(&self, board: BoardPoint) -> Point2<f64> {
        self.pixel_from_board
            .apply(Point2::new(board.file, board.rank))
    }

    /// Pixel position of the center of the zero-based cell `(file, rank)`.
    pub fn square_center_px(&self, file: u8, rank: u8) -> Point2<f64> {
        self.to_pixel(BoardPoint::cell_center(file, rank))
    }

    /// Whether `pixel` lands on the board, allowing `margin` squares of slack.
    pub fn contains(&self, pixel: Point2<f64>, margin: f64) -> bool {
        self.to_board(pixel).cell(margin).is_some()
    }
}

fn validate_corners(corners: &CornerSet, params: &CalibrationParams) -> Result<(), DegeneracyReason> {
    for id in CornerId::ALL {
        let p = corners.get(id);
        if !p.x.is_finite() || !p.y.is_finite() {
            return Err(DegeneracyReason::NonFinite(id));
        }
    }

    for (i, &a) in CornerId::ALL.iter().enumerate() {
        for &b in &CornerId::ALL[i + 1..] {
            if (corners.get(a) - corners.get(b)).norm() <= MIN_CORNER_DISTANCE_PX {
                return Err(DegeneracyReason::Coincident(a, b));
            }
        }
    }

    // Every turn must bend the same way and be clearly non-zero; this rejects
    // collinear triples as well as bow-tie and concave quadrilaterals.
    let pts = corners.to_array();
    let mut orientation = 0.0_f64;
    for i in 0..4 {
        let prev = pts[(i + 3) % 4];
        let cur = pts[i];
        let next = pts[(i + 1) % 4];
        let e1 = cur - prev;
        let e2 = next - cur;
        let cross = e1.x * e2.y - e1.y * e2.x;
        let sin = cross / (e1.norm() * e2.norm());
        if sin.abs() < MIN_TURN_SIN || (orientation != 0.0 && sin.signum() != orientation) {
            return Err(DegeneracyReason::NotConvex(CornerId::ALL[i]));
        }
        orientation = sin.signum();
    }

    let area = corners.signed_area().abs();
    if area < params.min_area_px2 {
        return Err(DegeneracyReason::TooSmall {
            area,
            min: params.min_area_px2,
        });
    }
    Ok(())
}
