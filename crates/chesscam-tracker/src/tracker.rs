//! Frame loop controller.
//!
//! A [`Tracker`] owns one calibration and one game. Each admitted frame runs
//! detection, mapping, smoothing and resolution once; a resolved move is
//! applied to the game unless the game or calibration changed while the
//! frame was being processed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chesscam_core::{Calibration, CornerSet};
use log::{debug, error, info, warn};
use serde::Serialize;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::detection::{DetectError, DetectionAdapter, Frame};
use crate::error::TrackerError;
use crate::events::{EventSink, NullSink, TrackerEvent};
use crate::game::{GameError, GameRecord, GameState, GameView, MoveRecord};
use crate::occupancy::{OccupancyMapper, Stabilizer};
use crate::params::TrackerParams;
use crate::resolver::{CandidateMove, MoveResolver, ResolveError, Resolution, ResolverState};
use crate::rules::{RulesError, RulesOracle, StandardRules};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Another frame is still being processed.
    Busy,
    /// Arrived sooner than `min_frame_interval_ms` after the last admitted frame.
    Throttled,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    NotCalibrated,
    Detection(DetectError),
}

/// What happened to a submitted frame.
#[derive(Clone, Debug)]
pub enum FrameOutcome {
    Dropped(DropReason),
    Skipped(SkipReason),
    /// The frame was processed; the game did not change.
    Observed(ResolverState),
    Applied(Vec<MoveRecord>),
    /// A move was resolved but the game or calibration changed meanwhile.
    Stale,
}

/// Counter snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub submitted: u64,
    pub admitted: u64,
    pub dropped: u64,
    pub skipped: u64,
    pub resolved: u64,
    pub ambiguous: u64,
    pub rejected: u64,
    pub stale: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    admitted: AtomicU64,
    dropped: AtomicU64,
    skipped: AtomicU64,
    resolved: AtomicU64,
    ambiguous: AtomicU64,
    rejected: AtomicU64,
    stale: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> FrameStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FrameStats {
            submitted: load(&self.submitted),
            admitted: load(&self.admitted),
            dropped: load(&self.dropped),
            skipped: load(&self.skipped),
            resolved: load(&self.resolved),
            ambiguous: load(&self.ambiguous),
            rejected: load(&self.rejected),
            stale: load(&self.stale),
        }
    }
}

/// Holds the in-flight slot; releasing happens on drop, including unwinds.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct LoopState {
    stabilizer: Stabilizer,
    resolver: MoveResolver,
    epoch: u64,
    frame_size: Option<(u32, u32)>,
    last_admitted_ms: Option<u64>,
    /// Candidate labels of the last ambiguity announced to the sink.
    announced_ambiguity: Option<Vec<String>>,
}

pub struct Tracker {
    params: TrackerParams,
    adapter: DetectionAdapter,
    mapper: OccupancyMapper,
    rules: Arc<dyn RulesOracle>,
    sink: Arc<dyn EventSink>,
    calibration: RwLock<Option<Arc<Calibration>>>,
    game: RwLock<GameState>,
    loop_state: Mutex<LoopState>,
    in_flight: AtomicBool,
    epoch: AtomicU64,
    faulted: AtomicBool,
    counters: Counters,
}

impl Tracker {
    /// A tracker for the standard starting position with orthodox rules and
    /// no event listener. Frames are skipped until corners are set.
    ///
    /// Detection parameters are taken from `adapter`; `params.detection` is
    /// overwritten with them.
    pub fn new(adapter: DetectionAdapter, mut params: TrackerParams) -> Self {
        params.detection = adapter.params().clone();
        let rules: Arc<dyn RulesOracle> = Arc::new(StandardRules);
        let mapper = OccupancyMapper::new(params.detection.board_margin);
        let loop_state = LoopState {
            stabilizer: Stabilizer::new(&params.occupancy),
            resolver: MoveResolver::new(),
            epoch: 0,
            frame_size: None,
            last_admitted_ms: None,
            announced_ambiguity: None,
        };
        Self {
            game: RwLock::new(GameState::new(rules.clone())),
            rules,
            sink: Arc::new(NullSink),
            calibration: RwLock::new(None),
            loop_state: Mutex::new(loop_state),
            in_flight: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            faulted: AtomicBool::new(false),
            counters: Counters::default(),
            mapper,
            adapter,
            params,
        }
    }

    /// Swap the rules oracle. Starts a fresh game.
    pub fn with_rules(mut self, rules: Arc<dyn RulesOracle>) -> Self {
        self.game = RwLock::new(GameState::new(rules.clone()));
        self.rules = rules;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    #[inline]
    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn calibration(&self) -> Option<Arc<Calibration>> {
        read(&self.calibration).clone()
    }

    /// Validate and install a new corner set. On error the previous
    /// calibration stays in place.
    pub fn set_corners(&self, corners: CornerSet) -> Result<(), TrackerError> {
        let calibration = Calibration::build_with(corners, &self.params.calibration)?;
        self.install_calibration(calibration);
        Ok(())
    }

    fn install_calibration(&self, calibration: Calibration) {
        *write(&self.calibration) = Some(Arc::new(calibration.clone()));
        self.invalidate();
        info!("calibration updated: {:?}", calibration.corners());
        self.sink.emit(TrackerEvent::CalibrationChanged(calibration));
    }

    /// Forget smoothed evidence, e.g. after the camera view changed.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Start a new game and clear a rules fault.
    pub fn reset(&self, fen: Option<&str>) -> Result<(), TrackerError> {
        write(&self.game).reset(fen)?;
        self.invalidate();
        self.faulted.store(false, Ordering::Release);
        info!("game reset to {}", fen.unwrap_or("the standard start"));
        Ok(())
    }

    /// Replace the game with a stored record.
    pub fn load_record(&self, record: &GameRecord) -> Result<(), TrackerError> {
        write(&self.game).load_record(record)?;
        self.invalidate();
        self.faulted.store(false, Ordering::Release);
        Ok(())
    }

    pub fn undo_last(&self) -> Result<MoveRecord, TrackerError> {
        let record = write(&self.game).undo_last()?;
        info!("undid {}", record.san);
        Ok(record)
    }

    /// Apply a move by SAN, bypassing the camera.
    pub fn apply_san(&self, san: &str) -> Result<MoveRecord, TrackerError> {
        let record = write(&self.game).apply_san(san)?;
        self.sink.emit(TrackerEvent::MoveApplied(record.clone()));
        Ok(record)
    }

    pub fn view(&self) -> GameView {
        read(&self.game).view()
    }

    pub fn game_record(&self) -> GameRecord {
        read(&self.game).to_record()
    }

    pub fn pgn(&self, headers: &[(&str, &str)]) -> String {
        read(&self.game).to_pgn(headers)
    }

    pub fn stats(&self) -> FrameStats {
        self.counters.snapshot()
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn resolver_state(&self) -> ResolverState {
        lock(&self.loop_state).resolver.state()
    }

    /// Offer a frame to the pipeline.
    ///
    /// Never queues: a frame arriving while another is processed, or too soon
    /// after the last admitted one, is dropped.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame), fields(frame = frame.index))
    )]
    pub fn submit_frame(&self, frame: &Frame) -> Result<FrameOutcome, TrackerError> {
        Counters::bump(&self.counters.submitted);
        if self.is_faulted() {
            return Err(TrackerError::Faulted);
        }

        let Some(_slot) = InFlight::acquire(&self.in_flight) else {
            Counters::bump(&self.counters.dropped);
            debug!("frame {} dropped: pipeline busy", frame.index);
            return Ok(FrameOutcome::Dropped(DropReason::Busy));
        };

        if self.throttled(frame) {
            Counters::bump(&self.counters.dropped);
            debug!("frame {} dropped: throttled", frame.index);
            return Ok(FrameOutcome::Dropped(DropReason::Throttled));
        }
        Counters::bump(&self.counters.admitted);

        self.process(frame)
    }

    fn throttled(&self, frame: &Frame) -> bool {
        let mut state = lock(&self.loop_state);
        if let Some(last) = state.last_admitted_ms {
            let elapsed = frame.timestamp_ms.saturating_sub(last);
            if frame.timestamp_ms >= last && elapsed < self.params.min_frame_interval_ms {
                return true;
            }
        }
        state.last_admitted_ms = Some(frame.timestamp_ms);
        false
    }

    fn process(&self, frame: &Frame) -> Result<FrameOutcome, TrackerError> {
        if self.params.detection.refine_corners {
            self.refine_corners(frame);
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        let Some(calibration) = self.calibration() else {
            Counters::bump(&self.counters.skipped);
            debug!("frame {} skipped: no calibration", frame.index);
            return Ok(FrameOutcome::Skipped(SkipReason::NotCalibrated));
        };

        let candidates = match self.adapter.detect(frame, &calibration) {
            Ok(candidates) => candidates,
            Err(err) => {
                Counters::bump(&self.counters.skipped);
                warn!("frame {} skipped: {err}", frame.index);
                return Ok(FrameOutcome::Skipped(SkipReason::Detection(err)));
            }
        };
        let snapshot = self.mapper.map(&candidates, &calibration);

        let (position, version) = {
            let game = read(&self.game);
            (game.position().clone(), game.version())
        };

        let (resolution, fresh_ambiguity) = {
            let mut state = lock(&self.loop_state);
            let size = (frame.width, frame.height);
            if state.epoch != epoch || state.frame_size != Some(size) {
                if state.frame_size.is_some() {
                    debug!("stabilizer restarted at frame {}", frame.index);
                }
                state.stabilizer.reset();
                state.resolver.reset();
                state.announced_ambiguity = None;
                state.epoch = epoch;
                state.frame_size = Some(size);
            }
            let stable = state.stabilizer.update(&snapshot);
            let resolved =
                state
                    .resolver
                    .resolve(&stable, &position, self.rules.as_ref(), &self.params.resolver);
            let resolution = match resolved {
                Ok(resolution) => resolution,
                Err(ResolveError::Rules(err)) => return Err(self.fault(err)),
            };
            let fresh = match &resolution {
                Resolution::Ambiguous(lines) => {
                    let labels: Vec<String> = lines.iter().map(|l| l.label()).collect();
                    if state.announced_ambiguity.as_ref() == Some(&labels) {
                        None
                    } else {
                        state.announced_ambiguity = Some(labels.clone());
                        Some(labels)
                    }
                }
                _ => {
                    state.announced_ambiguity = None;
                    None
                }
            };
            (resolution, fresh)
        };

        match resolution {
            Resolution::Resolved(line) => self.apply_line(line.plies, version, epoch),
            Resolution::Ambiguous(lines) => {
                Counters::bump(&self.counters.ambiguous);
                debug!("frame {} ambiguous between {} lines", frame.index, lines.len());
                if let Some(sans) = fresh_ambiguity {
                    self.sink.emit(TrackerEvent::Ambiguous(sans));
                }
                Ok(FrameOutcome::Observed(ResolverState::Ambiguous))
            }
            Resolution::Rejected { streak, .. } => {
                Counters::bump(&self.counters.rejected);
                if streak == self.params.lost_sync_after.max(1) {
                    warn!("lost sync after {streak} rejected frames");
                    self.sink.emit(TrackerEvent::LostSync { streak });
                }
                Ok(FrameOutcome::Observed(ResolverState::Rejected))
            }
            other => Ok(FrameOutcome::Observed(other.state())),
        }
    }

    fn apply_line(
        &self,
        plies: Vec<CandidateMove>,
        version: u64,
        epoch: u64,
    ) -> Result<FrameOutcome, TrackerError> {
        let mut game = write(&self.game);
        if game.version() != version || self.epoch.load(Ordering::Acquire) != epoch {
            Counters::bump(&self.counters.stale);
            warn!("discarding stale resolution; game or calibration changed");
            return Ok(FrameOutcome::Stale);
        }

        let mut applied = Vec::with_capacity(plies.len());
        for ply in &plies {
            match game.apply_move(&ply.mv) {
                Ok(record) => applied.push(record),
                Err(GameError::Rules(err)) => {
                    drop(game);
                    return Err(self.fault(err));
                }
                Err(other) => return Err(other.into()),
            }
        }
        drop(game);

        Counters::bump(&self.counters.resolved);
        for record in &applied {
            info!("move {}: {}", record.ply, record.san);
            self.sink.emit(TrackerEvent::MoveApplied(record.clone()));
        }
        Ok(FrameOutcome::Applied(applied))
    }

    fn fault(&self, err: RulesError) -> TrackerError {
        error!("rules oracle failed, tracker halted until reset: {err}");
        self.faulted.store(true, Ordering::Release);
        TrackerError::RulesFault(err)
    }

    fn refine_corners(&self, frame: &Frame) {
        let Some(current) = self.calibration() else {
            return;
        };
        match self.adapter.refine_corners(frame, current.corners()) {
            Ok(Some(corners)) if corners != *current.corners() => {
                match Calibration::build_with(corners, &self.params.calibration) {
                    Ok(calibration) => self.install_calibration(calibration),
                    Err(err) => debug!("ignoring refined corners: {err}"),
                }
            }
            Ok(_) => {}
            Err(err) => debug!("corner refinement unavailable: {err}"),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
