//! Progress emission

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::types::ProgressEvent;
use crate::traits::ProgressSink;

/// Logs every event at info level.
#[derive(Debug, Clone, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: &ProgressEvent) {
        match event.eta {
            Some(eta) => info!(
                discovered = event.discovered,
                iteration = event.iteration,
                "Discovery progress: {} items after {:?} (eta {:?})",
                event.discovered,
                event.elapsed,
                eta
            ),
            None => info!(
                discovered = event.discovered,
                iteration = event.iteration,
                "Discovery progress: {} items after {:?}",
                event.discovered,
                event.elapsed
            ),
        }
    }
}

/// Forwards events to a channel; a full or closed channel drops the event.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: &ProgressEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            debug!("Progress event dropped: {}", e);
        }
    }
}

/// Decides when the loop emits and estimates time to completion.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    every_items: usize,
    every_iterations: u32,
    next_item_mark: usize,
}

impl ProgressTracker {
    pub(crate) fn new(every_items: usize, every_iterations: u32) -> Self {
        Self {
            every_items,
            every_iterations,
            next_item_mark: every_items,
        }
    }

    /// Returns an event when an item or iteration mark was crossed.
    pub(crate) fn observe(
        &mut self,
        discovered: usize,
        iteration: u32,
        elapsed: Duration,
        total: Option<usize>,
    ) -> Option<ProgressEvent> {
        let mut due = false;

        if self.every_items > 0 && discovered >= self.next_item_mark {
            due = true;
            while self.next_item_mark <= discovered {
                self.next_item_mark += self.every_items;
            }
        }
        if self.every_iterations > 0 && iteration > 0 && iteration % self.every_iterations == 0 {
            due = true;
        }

        due.then(|| ProgressEvent {
            discovered,
            iteration,
            elapsed,
            eta: estimate_remaining(discovered, elapsed, total),
        })
    }
}

fn estimate_remaining(discovered: usize, elapsed: Duration, total: Option<usize>) -> Option<Duration> {
    let total = total?;
    if discovered == 0 {
        return None;
    }
    let remaining = total.saturating_sub(discovered);
    let per_item = elapsed.as_secs_f64() / discovered as f64;
    Some(Duration::from_secs_f64(per_item * remaining as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_marks_fire_once_per_crossing() {
        let mut tracker = ProgressTracker::new(1000, 0);
        let t = Duration::from_secs(1);

        assert!(tracker.observe(999, 1, t, None).is_none());
        assert!(tracker.observe(1000, 2, t, None).is_some());
        assert!(tracker.observe(1500, 3, t, None).is_none());
        // one jump across two marks emits once
        assert!(tracker.observe(3100, 4, t, None).is_some());
        assert!(tracker.observe(3900, 5, t, None).is_none());
        assert!(tracker.observe(4000, 6, t, None).is_some());
    }

    #[test]
    fn test_iteration_marks() {
        let mut tracker = ProgressTracker::new(0, 100);
        let t = Duration::ZERO;
        assert!(tracker.observe(5, 99, t, None).is_none());
        assert_eq!(tracker.observe(5, 100, t, None).unwrap().iteration, 100);
        assert!(tracker.observe(5, 101, t, None).is_none());
        assert!(tracker.observe(5, 200, t, None).is_some());
    }

    #[test]
    fn test_eta_from_rate() {
        let eta = estimate_remaining(250, Duration::from_secs(10), Some(1000)).unwrap();
        assert_eq!(eta, Duration::from_secs(30));
        assert!(estimate_remaining(0, Duration::from_secs(10), Some(1000)).is_none());
        assert!(estimate_remaining(10, Duration::from_secs(10), None).is_none());
        assert_eq!(
            estimate_remaining(1200, Duration::from_secs(10), Some(1000)).unwrap(),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_channel_progress_forwards() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelProgress::new(tx);
        let event = ProgressEvent {
            discovered: 10,
            iteration: 3,
            elapsed: Duration::from_millis(5),
            eta: None,
        };
        sink.emit(&event);
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
