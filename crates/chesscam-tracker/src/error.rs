use chesscam_core::CalibrationError;

use crate::game::GameError;
use crate::resolver::ResolveError;
use crate::rules::RulesError;

/// Errors surfaced by [`crate::Tracker`].
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Game(#[from] GameError),
    #[error("rules oracle fault: {0}")]
    RulesFault(RulesError),
    #[error("tracker is faulted; reset the game to continue")]
    Faulted,
}

impl From<ResolveError> for TrackerError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Rules(rules) => TrackerError::RulesFault(rules),
        }
    }
}
