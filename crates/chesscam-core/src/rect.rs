use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Which point of a detection box stands for the piece's position on the board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    /// Middle of the bottom edge: the piece's contact point with the board
    /// plane, which keeps tall pieces from leaking into the square behind.
    #[default]
    BottomCenter,
    /// Box centroid.
    Center,
}

/// Axis-aligned box in image pixels, `y` growing downwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PixelRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Box of the given size whose bottom-center sits on `anchor`.
    pub fn standing_on(anchor: Point2<f64>, width: f64, height: f64) -> Self {
        Self::new(anchor.x - 0.5 * width, anchor.y - height, width, height)
    }

    /// Finite coordinates and non-negative extent.
    pub fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width >= 0.0
            && self.height >= 0.0
    }

    #[inline]
    pub fn anchor(&self, mode: AnchorMode) -> Point2<f64> {
        match mode {
            AnchorMode::BottomCenter => Point2::new(self.x + 0.5 * self.width, self.y + self.height),
            AnchorMode::Center => {
                Point2::new(self.x + 0.5 * self.width, self.y + 0.5 * self.height)
            }
        }
    }
}
