use std::sync::mpsc::Sender;
use std::sync::Mutex;

use chesscam_core::Calibration;

use crate::game::MoveRecord;

/// Notifications pushed by the tracker.
#[derive(Clone, Debug)]
pub enum TrackerEvent {
    MoveApplied(MoveRecord),
    /// SANs of the equally plausible lines, best first.
    Ambiguous(Vec<String>),
    LostSync { streak: u32 },
    CalibrationChanged(Calibration),
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: TrackerEvent);
}

/// Discards every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TrackerEvent) {}
}

impl EventSink for Sender<TrackerEvent> {
    fn emit(&self, event: TrackerEvent) {
        // A dropped receiver only means nobody listens any more.
        let _ = self.send(event);
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<TrackerEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<TrackerEvent> {
        let mut guard = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *guard)
    }

    pub fn len(&self) -> usize {
        match self.events.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventLog {
    fn emit(&self, event: TrackerEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn log_collects_and_drains() {
        let log = EventLog::new();
        log.emit(TrackerEvent::LostSync { streak: 3 });
        log.emit(TrackerEvent::Ambiguous(vec!["Nf3".into(), "Nh3".into()]));
        assert_eq!(log.len(), 2);
        let events = log.drain();
        assert!(matches!(events[0], TrackerEvent::LostSync { streak: 3 }));
        assert!(log.is_empty());
    }

    #[test]
    fn channel_sink_survives_closed_receiver() {
        let (tx, rx) = mpsc::channel();
        tx.emit(TrackerEvent::LostSync { streak: 1 });
        assert!(matches!(rx.recv().unwrap(), TrackerEvent::LostSync { streak: 1 }));
        drop(rx);
        tx.emit(TrackerEvent::LostSync { streak: 2 });
    }
}
