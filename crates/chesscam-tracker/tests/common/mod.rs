#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chesscam_core::{Calibration, CornerSet};
use chesscam_tracker::shakmaty::Chess;
use chesscam_tracker::synthetic::{detections_for_position, SyntheticParams};
use chesscam_tracker::{
    parse_san, Frame, OracleError, PieceDetector, RawDetection, RulesOracle, StandardRules,
};
use nalgebra::Point2;

pub fn corners() -> CornerSet {
    CornerSet::new(
        Point2::new(100.0, 500.0),
        Point2::new(500.0, 500.0),
        Point2::new(500.0, 100.0),
        Point2::new(100.0, 100.0),
    )
}

pub fn calibration() -> Calibration {
    Calibration::build(corners()).expect("test corners are valid")
}

pub fn position_after(sans: &[&str]) -> Chess {
    let mut pos = Chess::default();
    for san in sans {
        let mv = parse_san(&pos, san).expect("legal test move");
        pos = StandardRules.apply(&pos, &mv).expect("legal test move");
    }
    pos
}

pub fn detections_for(position: &Chess) -> Vec<RawDetection> {
    detections_for_position(position, &calibration(), &SyntheticParams::default())
}

/// Detector showing whatever the test last put on the board.
#[derive(Clone, Default)]
pub struct Scene {
    detections: Arc<Mutex<Vec<RawDetection>>>,
}

impl Scene {
    pub fn showing(position: &Chess) -> Self {
        let scene = Self::default();
        scene.show(position);
        scene
    }

    pub fn show(&self, position: &Chess) {
        self.show_raw(detections_for(position));
    }

    pub fn show_raw(&self, detections: Vec<RawDetection>) {
        *self.detections.lock().unwrap() = detections;
    }
}

impl PieceDetector for Scene {
    fn infer(&self, _frame: &Frame) -> Result<Vec<RawDetection>, OracleError> {
        Ok(self.detections.lock().unwrap().clone())
    }
}

pub fn frame(index: u64) -> Frame {
    Frame::blank(index, index * 100, 640, 480)
}
