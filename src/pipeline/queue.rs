//! Bounded hand-off of frames from engine threads to the event loop

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use flume::{Receiver, Sender, TryRecvError, TrySendError};

use crate::capture::source::Delivery;

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub written: usize,
    pub read: usize,
    pub dropped: usize,
}

/// Producer side, cloned into every source's frame callback
#[derive(Clone)]
pub struct FrameQueue {
    tx: Sender<Delivery>,
    stats: Arc<CachePadded<Stats>>,
}

/// Consumer side, owned by the orchestrator
pub struct FrameQueueReceiver {
    rx: Receiver<Delivery>,
    stats: Arc<CachePadded<Stats>>,
}

pub fn frame_queue(capacity: usize) -> (FrameQueue, FrameQueueReceiver) {
    let (tx, rx) = flume::bounded(capacity);
    let stats = Arc::new(CachePadded::new(Stats::default()));
    (
        FrameQueue {
            tx,
            stats: Arc::clone(&stats),
        },
        FrameQueueReceiver { rx, stats },
    )
}

impl FrameQueue {
    /// Never blocks: when the loop falls behind the newest frame is dropped
    pub fn push(&self, delivery: Delivery) -> bool {
        match self.tx.try_send(delivery) {
            Ok(()) => {
                self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped", "reason" => "queue_full").increment(1);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    pub fn stats(&self) -> QueueStats {
        snapshot(&self.stats)
    }
}

impl FrameQueueReceiver {
    pub async fn recv(&self) -> Option<Delivery> {
        let delivery = self.rx.recv_async().await.ok()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        Some(delivery)
    }

    pub fn try_recv(&self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(delivery) => {
                self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
                Some(delivery)
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        snapshot(&self.stats)
    }
}

fn snapshot(stats: &Stats) -> QueueStats {
    QueueStats {
        written: stats.frames_written.load(Ordering::Relaxed),
        read: stats.frames_read.load(Ordering::Relaxed),
        dropped: stats.frames_dropped.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::test_sample;
    use crate::SlotId;

    fn delivery(pts: u64) -> Delivery {
        Delivery {
            slot: SlotId(0),
            generation: 0,
            sample: test_sample(pts),
        }
    }

    #[test]
    fn drops_newest_when_full() {
        let (tx, rx) = frame_queue(2);
        assert!(tx.push(delivery(1)));
        assert!(tx.push(delivery(2)));
        assert!(!tx.push(delivery(3)));

        assert_eq!(rx.try_recv().map(|d| d.sample.pts().as_millis()), Some(1));
        assert_eq!(rx.try_recv().map(|d| d.sample.pts().as_millis()), Some(2));
        assert!(rx.try_recv().is_none());

        assert_eq!(
            tx.stats(),
            QueueStats {
                written: 2,
                read: 2,
                dropped: 1
            }
        );
    }

    #[tokio::test]
    async fn recv_waits_for_producers_on_other_threads() {
        let (tx, rx) = frame_queue(4);
        std::thread::spawn(move || {
            tx.push(delivery(7));
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.sample.pts().as_millis(), 7);
    }
}
