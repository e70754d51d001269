//! Sliding request window for a single resource key

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::clock::instant_after;

/// Floor applied to a computed wait so a saturated window never spins
const MIN_WAIT: Duration = Duration::from_secs(1);

/// Timestamps of admitted requests within the trailing window
#[derive(Debug)]
pub struct RateWindow {
    stamps: VecDeque<Instant>,
    ceiling: usize,
    window: Duration,
}

impl RateWindow {
    /// Create an empty window admitting `ceiling` requests per `window`
    #[must_use]
    pub fn new(ceiling: usize, window: Duration) -> Self {
        Self {
            stamps: VecDeque::with_capacity(ceiling),
            ceiling: ceiling.max(1),
            window,
        }
    }

    /// Drop timestamps that fell out of the trailing window
    pub fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.stamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Admit a request at `now`, or report how long until the oldest entry expires.
    ///
    /// # Errors
    ///
    /// Returns the wait (at least one second) when the window is full. Nothing
    /// is recorded in that case.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);

        if self.stamps.len() >= self.ceiling {
            let wait = self
                .stamps
                .front()
                .map_or(MIN_WAIT, |&oldest| {
                    instant_after(oldest, self.window).saturating_duration_since(now)
                });
            return Err(wait.max(MIN_WAIT));
        }

        self.stamps.push_back(now);
        Ok(())
    }

    /// Requests currently counted against the window (call `prune` first for an exact figure)
    #[must_use]
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    /// Whether no request is being counted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}
