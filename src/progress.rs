// THEORY:
// Progress and cancellation are two narrow, one-way notifications between a run
// and whoever started it. They are never used to order work.
//
// - `ProgressSink` accepts `(percent, message)` events. It is called from the
//   run's own thread and must not block it; the watch-channel sink overwrites the
//   last value instead of queueing.
// - `CancelQuery` is a boolean poll. The run consults it once per frame boundary,
//   before decoding the next frame, and never mid-frame.
//
// `ProgressThrottle` decides which frames are worth an event so a long video does
// not emit one per frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// One progress notification. `percent` is `None` when the total frame count is
/// unknown and only a frame counter can be shown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressEvent {
    pub percent: Option<u8>,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(percent: Option<u8>, message: impl Into<String>) -> Self {
        Self {
            percent,
            message: message.into(),
        }
    }
}

pub trait ProgressSink: Send {
    fn report(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent) + Send,
{
    fn report(&mut self, event: ProgressEvent) {
        self(event)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _event: ProgressEvent) {}
}

/// Publishes the latest event on a watch channel. Receivers see the most recent
/// state; a slow receiver never holds up the run.
#[derive(Debug)]
pub struct WatchProgress(pub watch::Sender<ProgressEvent>);

impl WatchProgress {
    pub fn channel() -> (Self, watch::Receiver<ProgressEvent>) {
        let (tx, rx) = watch::channel(ProgressEvent::default());
        (Self(tx), rx)
    }
}

impl ProgressSink for WatchProgress {
    fn report(&mut self, event: ProgressEvent) {
        // No receivers left is fine; progress is advisory.
        self.0.send_replace(event);
    }
}

pub trait CancelQuery: Send {
    fn is_cancelled(&self) -> bool;
}

impl<F> CancelQuery for F
where
    F: Fn() -> bool + Send,
{
    fn is_cancelled(&self) -> bool {
        self()
    }
}

/// Never requests cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl CancelQuery for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A shareable cancel switch. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancelQuery for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancellation driven by a watch channel carrying `true` once cancelled.
#[derive(Debug, Clone)]
pub struct CancelWatch(pub watch::Receiver<bool>);

impl CancelQuery for CancelWatch {
    fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Frames between events when the total is unknown.
pub const UNKNOWN_TOTAL_INTERVAL: u64 = 30;

/// Rate limiter for per-frame progress.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    total: Option<u64>,
    last_percent: Option<u8>,
}

impl ProgressThrottle {
    /// `total` of `None` or `Some(0)` means the length is unknown.
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|&t| t > 0),
            last_percent: None,
        }
    }

    /// The event to emit after `done` frames, if any.
    pub fn frame_done(&mut self, done: u64) -> Option<ProgressEvent> {
        match self.total {
            Some(total) => {
                let percent = ((done.saturating_mul(100)) / total).min(100) as u8;
                if self.last_percent == Some(percent) {
                    return None;
                }
                self.last_percent = Some(percent);
                Some(ProgressEvent::new(Some(percent), format!("Frame {done}/{total}")))
            }
            None => (done % UNKNOWN_TOTAL_INTERVAL == 0)
                .then(|| ProgressEvent::new(None, format!("Frame {done}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_total_emits_once_per_percent() {
        let mut throttle = ProgressThrottle::new(Some(1000));
        let events: Vec<_> = (1..=1000).filter_map(|i| throttle.frame_done(i)).collect();
        assert_eq!(events.len(), 101);
        assert_eq!(events[0].percent, Some(0));
        assert_eq!(events.last().map(|e| e.percent), Some(Some(100)));
        assert_eq!(events.last().map(|e| e.message.as_str()), Some("Frame 1000/1000"));
    }

    #[test]
    fn unknown_total_reports_a_counter() {
        let mut throttle = ProgressThrottle::new(Some(0));
        let events: Vec<_> = (1..=95).filter_map(|i| throttle.frame_done(i)).collect();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.percent.is_none()));
        assert_eq!(events[0].message, "Frame 30");
    }

    #[test]
    fn percent_never_exceeds_100() {
        let mut throttle = ProgressThrottle::new(Some(10));
        let event = throttle.frame_done(25).unwrap();
        assert_eq!(event.percent, Some(100));
    }

    #[test]
    fn closures_are_sinks_and_queries() {
        let mut seen = Vec::new();
        {
            let mut sink = |e: ProgressEvent| seen.push(e);
            sink.report(ProgressEvent::new(Some(3), "x"));
        }
        assert_eq!(seen.len(), 1);

        let query = || true;
        assert!(query.is_cancelled());
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_cancelled());
        flag.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn watch_sink_keeps_the_latest_event() {
        let (mut sink, rx) = WatchProgress::channel();
        sink.report(ProgressEvent::new(Some(10), "a"));
        sink.report(ProgressEvent::new(Some(20), "b"));
        assert_eq!(rx.borrow().percent, Some(20));

        let (tx, cancel_rx) = watch::channel(false);
        let cancel = CancelWatch(cancel_rx);
        assert!(!cancel.is_cancelled());
        tx.send_replace(true);
        assert!(cancel.is_cancelled());
    }
}
