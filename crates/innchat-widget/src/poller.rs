//! Fixed-interval poll scheduling.

use std::future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Schedules poll ticks and tracks the fetch started by the last one.
///
/// Every start/stop bumps a generation counter. Results are tagged with the
/// generation that requested them, so a fetch that outlives a restart (new
/// session or conversation identity) is discarded instead of merged.
pub struct Poller {
    period: Duration,
    interval: Option<Interval>,
    generation: u64,
    in_flight: Option<JoinHandle<()>>,
}

impl Poller {
    /// Create a stopped poller.
    pub fn new(period: Duration) -> Self {
        Self {
            // tokio intervals panic on a zero period
            period: period.max(Duration::from_millis(1)),
            interval: None,
            generation: 0,
            in_flight: None,
        }
    }

    /// Returns true while ticks are scheduled.
    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Generation new fetches should be tagged with.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true while a fetch has not been merged yet.
    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Start ticking. The first tick fires immediately.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.generation += 1;
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        info!(
            generation = self.generation,
            period_ms = self.period.as_millis() as u64,
            "Poller started"
        );
    }

    /// Stop ticking and abandon any fetch in flight.
    pub fn stop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
        if self.interval.take().is_some() {
            info!(generation = self.generation, "Poller stopped");
        }
        self.generation += 1;
    }

    /// Stop, then start with a fresh schedule.
    pub fn restart(&mut self) {
        self.stop();
        self.start();
    }

    /// Wait for the next tick. Never completes while stopped.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending::<()>().await,
        }
    }

    /// Remember the fetch started for the current tick.
    pub fn begin_fetch(&mut self, handle: JoinHandle<()>) {
        self.in_flight = Some(handle);
    }

    /// Accept a finished fetch. Returns false if it belongs to an older generation.
    pub fn finish(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(
                stale = generation,
                current = self.generation,
                "Discarding stale poll result"
            );
            return false;
        }
        self.in_flight = None;
        true
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let mut poller = Poller::new(Duration::from_secs(3));
        poller.start();
        let start = time::Instant::now();
        poller.tick().await;
        assert_eq!(time::Instant::now(), start);
        poller.tick().await;
        assert_eq!(time::Instant::now() - start, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_poller_never_ticks() {
        let mut poller = Poller::new(Duration::from_secs(1));
        poller.start();
        poller.stop();
        assert!(!poller.is_running());
        let ticked = time::timeout(Duration::from_secs(10), poller.tick()).await;
        assert!(ticked.is_err());
    }

    #[tokio::test]
    async fn test_restart_invalidates_old_results() {
        let mut poller = Poller::new(Duration::from_secs(1));
        poller.start();
        let old = poller.generation();
        poller.begin_fetch(tokio::spawn(async {}));
        assert!(poller.is_fetching());

        poller.restart();
        assert!(!poller.is_fetching());
        assert!(!poller.finish(old));
        assert!(poller.finish(poller.generation()));
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut poller = Poller::new(Duration::from_secs(1));
        poller.start();
        let generation = poller.generation();
        poller.start();
        assert_eq!(poller.generation(), generation);
    }
}
