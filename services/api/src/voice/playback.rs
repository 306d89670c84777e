//! Playback scheduling for synthesized audio.
//!
//! Downlink buffers arrive faster than they play, so each one is assigned a
//! start instant on a monotonic cursor: the later of "now" and the end of
//! the previously scheduled buffer. A barge-in drops everything scheduled
//! and resets the cursor so the next response starts immediately.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};

#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<Mutex<Inner>>,
    speaking: watch::Receiver<bool>,
}

struct Inner {
    /// End of the last scheduled buffer; never moves backwards except on
    /// interruption.
    cursor: Instant,
    next_id: u64,
    in_flight: HashMap<u64, JoinHandle<()>>,
    speaking_tx: watch::Sender<bool>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        let (speaking_tx, speaking) = watch::channel(false);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                cursor: Instant::now(),
                next_id: 0,
                in_flight: HashMap::new(),
                speaking_tx,
            })),
            speaking,
        }
    }

    /// Reserves the next playback slot for a buffer of the given duration
    /// and returns its start instant. Consecutive buffers never overlap.
    pub async fn schedule(&self, duration: Duration) -> Instant {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let start = if inner.cursor > now { inner.cursor } else { now };
        inner.cursor = start + duration;
        let _ = inner.speaking_tx.send(true);

        let id = inner.next_id;
        inner.next_id += 1;

        // The completion task contends on the same lock we hold, so it
        // cannot observe the map before this insert lands.
        let shared = Arc::clone(&self.inner);
        let end = inner.cursor;
        let handle = tokio::spawn(async move {
            sleep_until(end).await;
            let mut inner = shared.lock().await;
            inner.in_flight.remove(&id);
            if inner.in_flight.is_empty() {
                let _ = inner.speaking_tx.send(false);
            }
        });
        inner.in_flight.insert(id, handle);

        start
    }

    /// Drops every scheduled buffer, resets the cursor to now, and clears
    /// the speaking flag. Returns how many buffers were cut off. Start
    /// instants handed out afterwards are never earlier than the reset
    /// point.
    pub async fn interrupt(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let stopped = inner.in_flight.len();
        for (_, handle) in inner.in_flight.drain() {
            handle.abort();
        }
        inner.cursor = Instant::now();
        let _ = inner.speaking_tx.send(false);
        stopped
    }

    /// A watch on the speaking flag: true from the first scheduled buffer
    /// until the last one finishes or playback is interrupted.
    pub fn speaking_watch(&self) -> watch::Receiver<bool> {
        self.speaking.clone()
    }

    pub fn is_speaking(&self) -> bool {
        *self.speaking.borrow()
    }

    #[cfg(test)]
    async fn in_flight_len(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }
}

impl Default for PlaybackScheduler {
    fn default() -> Self {
        Self::new()
    }
}
