//! Board calibration geometry for camera-based chess tracking.
//!
//! This crate is purely geometric: it turns four corner markers into a
//! projective mapping between image pixels and an 8x8 board, and knows how to
//! pick the board contact point of a detection box. It does not depend on any
//! detector, image type or chess rules.

mod calibration;
mod homography;
mod logger;
mod rect;

pub use calibration::{
    BoardPoint, Calibration, CalibrationError, CalibrationParams, CornerId, CornerSet,
    DegeneracyReason, BOARD_SIZE,
};
pub use homography::{homography_from_4pt, Homography};
pub use rect::{AnchorMode, PixelRect};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_from_env, init_with_level, LOG_ENV_VAR};
