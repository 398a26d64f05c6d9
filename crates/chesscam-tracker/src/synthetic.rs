//! Detections a perfect model would report, for tests and demo recordings.

use chesscam_core::{AnchorMode, BoardPoint, Calibration, PixelRect};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use shakmaty::Chess;

use crate::detection::RawDetection;
use crate::rules::placement;

fn default_score() -> f32 {
    0.9
}

fn default_width_rel() -> f64 {
    0.7
}

fn default_aspect() -> f64 {
    1.6
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyntheticParams {
    #[serde(default = "default_score")]
    pub score: f32,
    /// Box width relative to the local square width.
    #[serde(default = "default_width_rel")]
    pub width_rel: f64,
    /// Box height over box width.
    #[serde(default = "default_aspect")]
    pub aspect: f64,
    /// Anchor mode the boxes are laid out for.
    #[serde(default)]
    pub anchor: AnchorMode,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            score: default_score(),
            width_rel: default_width_rel(),
            aspect: default_aspect(),
            anchor: AnchorMode::default(),
        }
    }
}

/// One box per occupied square, anchored on the square center in pixels.
pub fn detections_for_position(
    position: &Chess,
    calibration: &Calibration,
    params: &SyntheticParams,
) -> Vec<RawDetection> {
    let mut out = Vec::new();
    for (idx, piece) in placement(position).into_iter().enumerate() {
        let Some(class) = piece else {
            continue;
        };
        let file = (idx % 8) as u8;
        let rank = (idx / 8) as u8;
        let center = calibration.square_center_px(file, rank);
        let width = params.width_rel * square_width_px(calibration, file, rank);
        let height = params.aspect * width;
        let rect = match params.anchor {
            AnchorMode::BottomCenter => PixelRect::standing_on(center, width, height),
            AnchorMode::Center => PixelRect::new(
                center.x - 0.5 * width,
                center.y - 0.5 * height,
                width,
                height,
            ),
        };
        out.push(RawDetection {
            rect,
            class: Some(class),
            score: params.score,
        });
    }
    out
}

fn square_width_px(calibration: &Calibration, file: u8, rank: u8) -> f64 {
    let c = BoardPoint::cell_center(file, rank);
    let left: Point2<f64> = calibration.to_pixel(BoardPoint::new(c.file - 0.5, c.rank));
    let right = calibration.to_pixel(BoardPoint::new(c.file + 0.5, c.rank));
    (right - left).norm()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{DetectionAdapter, DetectionParams, Frame, OracleError};
    use crate::occupancy::{OccupancyMapper, OccupancySnapshot};
    use approx::assert_relative_eq;
    use chesscam_core::CornerSet;

    #[test]
    fn boxes_scale_with_the_square_and_stand_on_its_center() {
        let calibration = Calibration::build(CornerSet::new(
            Point2::new(100.0, 500.0),
            Point2::new(500.0, 500.0),
            Point2::new(500.0, 100.0),
            Point2::new(100.0, 100.0),
        ))
        .unwrap();
        let dets = detections_for_position(
            &Chess::default(),
            &calibration,
            &SyntheticParams::default(),
        );
        // a1 rook: square is 50 px wide, centered at (125, 475).
        let rook = &dets[0];
        assert_relative_eq!(rook.rect.width, 35.0, epsilon = 1e-6);
        assert_relative_eq!(rook.rect.height, 56.0, epsilon = 1e-6);
        let foot = rook.rect.anchor(AnchorMode::BottomCenter);
        assert_relative_eq!(foot.x, 125.0, epsilon = 1e-6);
        assert_relative_eq!(foot.y, 475.0, epsilon = 1e-6);
    }

    #[test]
    fn perfect_detections_map_back_to_the_position() {
        let calibration = Calibration::build(CornerSet::new(
            Point2::new(80.0, 620.0),
            Point2::new(720.0, 610.0),
            Point2::new(590.0, 140.0),
            Point2::new(200.0, 150.0),
        ))
        .unwrap();
        let position = Chess::default();
        for anchor in [AnchorMode::BottomCenter, AnchorMode::Center] {
            let params = SyntheticParams {
                anchor,
                ..SyntheticParams::default()
            };
            let dets = detections_for_position(&position, &calibration, &params);
            assert_eq!(dets.len(), 32);

            let adapter = DetectionAdapter::new(
                move |_: &Frame| -> Result<Vec<RawDetection>, OracleError> { Ok(dets.clone()) },
                DetectionParams {
                    anchor,
                    ..DetectionParams::default()
                },
            );
            let candidates = adapter.detect(&Frame::default(), &calibration).unwrap();
            let snapshot = OccupancyMapper::new(0.25).map(&candidates, &calibration);
            let expected = OccupancySnapshot::from_position(&position);
            for (sq, obs) in snapshot.iter() {
                assert_eq!(obs.class, expected.get(sq).class, "square {sq}");
            }
        }
    }
}
