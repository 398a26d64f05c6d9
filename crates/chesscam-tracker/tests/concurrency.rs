mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chesscam_tracker::shakmaty::Chess;
use chesscam_tracker::{
    DetectionAdapter, DetectionParams, DropReason, Frame, FrameOutcome, OccupancyParams,
    OracleError, PieceDetector, RawDetection, Tracker, TrackerParams,
};
use common::{corners, detections_for, frame, position_after};

/// Detector that parks every call until the test releases it.
struct Gate {
    detections: Vec<RawDetection>,
    started: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[derive(Clone)]
struct GatedDetector(Arc<Gate>);

impl PieceDetector for GatedDetector {
    fn infer(&self, _frame: &Frame) -> Result<Vec<RawDetection>, OracleError> {
        let gate = &self.0;
        gate.calls.fetch_add(1, Ordering::SeqCst);
        let now = gate.active.fetch_add(1, Ordering::SeqCst) + 1;
        gate.max_active.fetch_max(now, Ordering::SeqCst);
        let _ = gate.started.lock().unwrap().send(());
        let released = gate
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(10));
        gate.active.fetch_sub(1, Ordering::SeqCst);
        released.map_err(|_| OracleError::Inference("gate timed out".into()))?;
        Ok(gate.detections.clone())
    }
}

struct Harness {
    tracker: Arc<Tracker>,
    gate: Arc<Gate>,
    started: Receiver<()>,
    release: Sender<()>,
}

fn harness(showing: &Chess) -> Harness {
    let (started_tx, started) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        detections: detections_for(showing),
        started: Mutex::new(started_tx),
        release: Mutex::new(release_rx),
        calls: AtomicUsize::new(0),
        active: AtomicUsize::new(0),
        max_active: AtomicUsize::new(0),
    });
    let params = TrackerParams {
        occupancy: OccupancyParams { stable_frames: 1 },
        ..TrackerParams::default()
    };
    let adapter = DetectionAdapter::new(GatedDetector(gate.clone()), DetectionParams::default());
    let tracker = Arc::new(Tracker::new(adapter, params));
    tracker.set_corners(corners()).unwrap();
    Harness {
        tracker,
        gate,
        started,
        release,
    }
}

#[test]
fn frame_submitted_during_a_run_is_dropped() {
    let h = harness(&Chess::default());

    let worker = {
        let tracker = h.tracker.clone();
        thread::spawn(move || tracker.submit_frame(&frame(0)))
    };
    h.started.recv_timeout(Duration::from_secs(10)).unwrap();

    match h.tracker.submit_frame(&frame(1)).unwrap() {
        FrameOutcome::Dropped(DropReason::Busy) => {}
        other => panic!("expected busy drop, got {other:?}"),
    }

    h.release.send(()).unwrap();
    assert!(matches!(worker.join().unwrap().unwrap(), FrameOutcome::Observed(_)));

    // The slot is free again once the run finished.
    h.release.send(()).unwrap();
    assert!(matches!(h.tracker.submit_frame(&frame(2)).unwrap(), FrameOutcome::Observed(_)));

    assert_eq!(h.gate.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.gate.max_active.load(Ordering::SeqCst), 1);
    let stats = h.tracker.stats();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.admitted, 2);
    assert_eq!(stats.dropped, 1);
}

#[test]
fn many_threads_never_overlap_runs() {
    let h = harness(&Chess::default());
    for _ in 0..64 {
        h.release.send(()).unwrap();
    }

    let workers: Vec<_> = (0..8)
        .map(|t| {
            let tracker = h.tracker.clone();
            thread::spawn(move || {
                for i in 0..8 {
                    let _ = tracker.submit_frame(&frame(t * 8 + i));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(h.gate.max_active.load(Ordering::SeqCst), 1);
    let stats = h.tracker.stats();
    assert_eq!(stats.admitted + stats.dropped, 64);
    assert_eq!(stats.admitted as usize, h.gate.calls.load(Ordering::SeqCst));
}

#[test]
fn calibration_change_mid_run_discards_the_result() {
    let h = harness(&position_after(&["e4"]));

    let worker = {
        let tracker = h.tracker.clone();
        thread::spawn(move || tracker.submit_frame(&frame(0)))
    };
    h.started.recv_timeout(Duration::from_secs(10)).unwrap();
    h.tracker.set_corners(corners()).unwrap();
    h.release.send(()).unwrap();

    assert!(matches!(worker.join().unwrap().unwrap(), FrameOutcome::Stale));
    assert_eq!(h.tracker.view().plies, 0);

    h.release.send(()).unwrap();
    match h.tracker.submit_frame(&frame(1)).unwrap() {
        FrameOutcome::Applied(records) => assert_eq!(records[0].san, "e4"),
        other => panic!("expected e4 after the stale run, got {other:?}"),
    }
    assert_eq!(h.tracker.stats().stale, 1);
}

#[test]
fn readers_see_whole_moves_while_frames_run() {
    let h = harness(&position_after(&["e4"]));
    h.release.send(()).unwrap();

    let reader = {
        let tracker = h.tracker.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                let view = tracker.view();
                assert!(view.plies <= 1);
                if view.plies == 1 {
                    assert_eq!(view.move_text, "1. e4");
                }
            }
        })
    };
    assert!(matches!(h.tracker.submit_frame(&frame(0)).unwrap(), FrameOutcome::Applied(_)));
    reader.join().unwrap();
}
