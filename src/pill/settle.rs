//! Bounded visibility poll run right after activation
//!
//! The window manager may show the pill before the event channel is ready,
//! so for a short window after activation the coordinator re-reads window
//! visibility on a fixed interval. Once the deadline passes the poll is
//! finished for good.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Poll cadence and lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleTiming {
    pub interval: Duration,
    pub window: Duration,
}

impl Default for SettleTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(150),
            window: Duration::from_millis(2000),
        }
    }
}

/// Deadline-bounded poll timer
#[derive(Debug)]
pub struct SettlingPoll {
    ticker: Option<Interval>,
    deadline: Instant,
}

impl SettlingPoll {
    /// Start the poll; the first tick is one interval from now
    pub fn start(timing: SettleTiming) -> Self {
        let now = Instant::now();
        let mut ticker = time::interval_at(now + timing.interval, timing.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker: Some(ticker),
            deadline: now + timing.window,
        }
    }

    /// True while ticks may still be issued
    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// True once the deadline has passed or the poll was cancelled.
    /// Readings from a settled poll must be discarded.
    pub fn is_settled(&self) -> bool {
        self.ticker.is_none() || Instant::now() >= self.deadline
    }

    /// Wait for the next tick that falls before the deadline
    ///
    /// Returns `false` once the poll has finished. After that it never
    /// ticks again.
    pub async fn tick(&mut self) -> bool {
        let Some(ticker) = self.ticker.as_mut() else {
            return false;
        };
        let at = ticker.tick().await;
        if at >= self.deadline {
            self.ticker = None;
            return false;
        }
        true
    }

    pub fn cancel(&mut self) {
        self.ticker = None;
    }
}
