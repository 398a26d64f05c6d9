//! Detection adapter: turns raw model output into board-anchored candidates.

use chesscam_core::{AnchorMode, Calibration, CornerId, CornerSet, PixelRect};
use log::debug;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::piece::PieceClass;

/// One camera frame. The pixel buffer is opaque to the tracker and only
/// forwarded to the detection oracles.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    pub index: u64,
    pub timestamp_ms: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Frame {
    /// A frame without pixel data, for oracles that do not look at pixels.
    pub fn blank(index: u64, timestamp_ms: u64, width: u32, height: u32) -> Self {
        Self {
            index,
            timestamp_ms,
            width,
            height,
            pixels: Vec::new(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("detector is not ready")]
    NotReady,
    #[error("inference failed: {0}")]
    Inference(String),
}

/// A box reported by the piece detector. `class == None` is the model's
/// explicit "no piece" label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub rect: PixelRect,
    pub class: Option<PieceClass>,
    pub score: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerHint {
    pub corner: CornerId,
    pub point: Point2<f64>,
    pub score: f32,
}

pub trait PieceDetector: Send + Sync {
    fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, OracleError>;
}

pub trait CornerDetector: Send + Sync {
    fn infer(&self, frame: &Frame) -> Result<Vec<CornerHint>, OracleError>;
}

impl<F> PieceDetector for F
where
    F: Fn(&Frame) -> Result<Vec<RawDetection>, OracleError> + Send + Sync,
{
    fn infer(&self, frame: &Frame) -> Result<Vec<RawDetection>, OracleError> {
        self(frame)
    }
}

/// Errors that make a frame unusable. Either way the frame is skipped.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DetectError {
    #[error("detection unavailable: {0}")]
    Unavailable(#[from] OracleError),
    #[error("malformed detection #{index}: {reason}")]
    Malformed { index: usize, reason: &'static str },
}

fn default_min_confidence() -> f32 {
    0.5
}

fn default_board_margin() -> f64 {
    0.25
}

fn default_min_corner_score() -> f32 {
    0.5
}

fn default_min_corner_shift_px() -> f64 {
    1.5
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Candidates scoring below this are discarded.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default)]
    pub anchor: AnchorMode,
    /// How far outside the board (in squares) an anchor may land and still
    /// be snapped onto the edge square.
    #[serde(default = "default_board_margin")]
    pub board_margin: f64,
    #[serde(default = "default_min_corner_score")]
    pub min_corner_score: f32,
    /// Refined corners are ignored unless at least one of them moved by
    /// more than this many pixels.
    #[serde(default = "default_min_corner_shift_px")]
    pub min_corner_shift_px: f64,
    /// Run the corner detector on every admitted frame.
    #[serde(default)]
    pub refine_corners: bool,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            anchor: AnchorMode::default(),
            board_margin: default_board_margin(),
            min_corner_score: default_min_corner_score(),
            min_corner_shift_px: default_min_corner_shift_px(),
            refine_corners: false,
        }
    }
}

/// A filtered detection with its board contact point.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionCandidate {
    pub rect: PixelRect,
    pub anchor: Point2<f64>,
    pub class: PieceClass,
    pub confidence: f32,
}

pub struct DetectionAdapter {
    pieces: Box<dyn PieceDetector>,
    corners: Option<Box<dyn CornerDetector>>,
    params: DetectionParams,
}

impl DetectionAdapter {
    pub fn new(pieces: impl PieceDetector + 'static, params: DetectionParams) -> Self {
        Self {
            pieces: Box::new(pieces),
            corners: None,
            params,
        }
    }

    pub fn with_corner_detector(mut self, corners: impl CornerDetector + 'static) -> Self {
        self.corners = Some(Box::new(corners));
        self
    }

    #[inline]
    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    pub fn has_corner_detector(&self) -> bool {
        self.corners.is_some()
    }

    /// Run the piece detector on `frame` and keep the confident, on-board
    /// candidates.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame, calibration), fields(frame = frame.index))
    )]
    pub fn detect(
        &self,
        frame: &Frame,
        calibration: &Calibration,
    ) -> Result<Vec<DetectionCandidate>, DetectError> {
        let raw = self.pieces.infer(frame)?;
        validate(&raw)?;

        let total = raw.len();
        let mut out = Vec::with_capacity(total);
        for det in raw {
            let Some(class) = det.class else {
                continue;
            };
            if det.score < self.params.min_confidence {
                continue;
            }
            let anchor = det.rect.anchor(self.params.anchor);
            if !calibration.contains(anchor, self.params.board_margin) {
                continue;
            }
            out.push(DetectionCandidate {
                rect: det.rect,
                anchor,
                class,
                confidence: det.score,
            });
        }

        debug!(
            "frame {}: kept {} of {} detections",
            frame.index,
            out.len(),
            total
        );
        Ok(out)
    }

    /// Propose corner positions from the corner detector.
    ///
    /// The best hint per corner id wins; ids without a qualifying hint keep
    /// their `current` point. Returns `None` when nothing qualified, when no
    /// corner moved by more than `min_corner_shift_px`, or when no corner
    /// detector is configured. The caller still has to validate the result
    /// through [`Calibration::build`].
    pub fn refine_corners(
        &self,
        frame: &Frame,
        current: &CornerSet,
    ) -> Result<Option<CornerSet>, DetectError> {
        let Some(detector) = &self.corners else {
            return Ok(None);
        };
        let hints = detector.infer(frame)?;

        let mut best: [Option<CornerHint>; 4] = [None; 4];
        for (index, hint) in hints.into_iter().enumerate() {
            if !hint.point.x.is_finite() || !hint.point.y.is_finite() || !hint.score.is_finite() {
                return Err(DetectError::Malformed {
                    index,
                    reason: "non-finite corner hint",
                });
            }
            if hint.score < self.params.min_corner_score {
                continue;
            }
            let slot = &mut best[corner_slot(hint.corner)];
            if slot.is_none_or(|prev| hint.score > prev.score) {
                *slot = Some(hint);
            }
        }

        if best.iter().all(Option::is_none) {
            return Ok(None);
        }
        let mut refined = *current;
        for hint in best.into_iter().flatten() {
            refined.set(hint.corner, hint.point);
        }

        let shift = refined
            .to_array()
            .iter()
            .zip(current.to_array().iter())
            .map(|(a, b)| (a - b).norm())
            .fold(0.0, f64::max);
        if shift <= self.params.min_corner_shift_px {
            return Ok(None);
        }
        Ok(Some(refined))
    }
}

fn corner_slot(id: CornerId) -> usize {
    match id {
        CornerId::A1 => 0,
        CornerId::H1 => 1,
        CornerId::H8 => 2,
        CornerId::A8 => 3,
    }
}

fn validate(raw: &[RawDetection]) -> Result<(), DetectError> {
    for (index, det) in raw.iter().enumerate() {
        if !det.rect.is_valid() {
            return Err(DetectError::Malformed {
                index,
                reason: "box is not finite or has negative size",
            });
        }
        if !det.score.is_finite() || !(0.0..=1.0).contains(&det.score) {
            return Err(DetectError::Malformed {
                index,
                reason: "score outside [0, 1]",
            });
        }
    }
    Ok(())
}
