use chesscam_core::CalibrationParams;
use serde::{Deserialize, Serialize};

use crate::detection::DetectionParams;
use crate::occupancy::OccupancyParams;
use crate::resolver::ResolverParams;

fn default_lost_sync_after() -> u32 {
    10
}

/// Every knob of the frame loop. All fields have defaults, so a partial
/// JSON object is a valid configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerParams {
    #[serde(default)]
    pub calibration: CalibrationParams,
    #[serde(default)]
    pub detection: DetectionParams,
    #[serde(default)]
    pub occupancy: OccupancyParams,
    #[serde(default)]
    pub resolver: ResolverParams,
    /// Frames closer than this to the last admitted one are dropped.
    #[serde(default)]
    pub min_frame_interval_ms: u64,
    /// Consecutive rejected frames before `LostSync` is raised.
    #[serde(default = "default_lost_sync_after")]
    pub lost_sync_after: u32,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            calibration: CalibrationParams::default(),
            detection: DetectionParams::default(),
            occupancy: OccupancyParams::default(),
            resolver: ResolverParams::default(),
            min_frame_interval_ms: 0,
            lost_sync_after: default_lost_sync_after(),
        }
    }
}
