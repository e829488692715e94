//! Change watcher timing
//!
//! Decides when page activity turns into a sweep. Everything in here is a
//! plain state machine fed with instants; the service loop sleeps until
//! [`ChangeWatcher::next_deadline`] and calls [`ChangeWatcher::poll`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::infrastructure::config::WatcherConfig;

/// Leading + trailing throttle. The first trigger in a window runs at once;
/// any further triggers in that window coalesce into one run at window end.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    window_end: Option<Instant>,
    trailing: bool,
}

impl Throttle {
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            window_end: None,
            trailing: false,
        }
    }

    /// Register a trigger. Returns `true` when the caller should run now.
    pub fn trigger(&mut self, now: Instant) -> bool {
        match self.window_end {
            Some(end) if now < end => {
                self.trailing = true;
                false
            }
            _ => {
                self.window_end = Some(now + self.window);
                self.trailing = false;
                true
            }
        }
    }

    /// When the pending trailing run is due
    pub fn deadline(&self) -> Option<Instant> {
        if self.trailing { self.window_end } else { None }
    }

    /// Take the trailing run if it is due. A trailing run opens a new window.
    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.deadline() {
            Some(end) if now >= end => {
                self.trailing = false;
                self.window_end = Some(now + self.window);
                true
            }
            _ => false,
        }
    }
}

/// Runs once, `delay` after the last trigger.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    due: Option<Instant>,
}

impl Debounce {
    pub const fn new(delay: Duration) -> Self {
        Self { delay, due: None }
    }

    pub fn trigger(&mut self, now: Instant) {
        self.due = Some(now + self.delay);
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.due
    }

    pub fn fire_due(&mut self, now: Instant) -> bool {
        match self.due {
            Some(due) if now >= due => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}

/// Fast ticks while the page settles, slow ticks forever after.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    fast: Duration,
    fast_ticks: u32,
    slow: Duration,
    ticks: u32,
    next: Instant,
}

impl Heartbeat {
    pub fn new(config: &WatcherConfig, start: Instant) -> Self {
        let fast = Duration::from_millis(config.heartbeat_fast_ms);
        Self {
            fast,
            fast_ticks: config.heartbeat_fast_ticks,
            slow: Duration::from_millis(config.heartbeat_slow_ms),
            ticks: 0,
            next: start + fast,
        }
    }

    pub const fn deadline(&self) -> Instant {
        self.next
    }

    pub const fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn fire_due(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.ticks += 1;
        let period = if self.ticks < self.fast_ticks { self.fast } else { self.slow };
        self.next = now + period;
        true
    }
}

/// Why a sweep was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepCause {
    Activity,
    Navigation,
    Heartbeat,
}

/// The three sweep schedules of a running service.
#[derive(Debug, Clone)]
pub struct ChangeWatcher {
    throttle: Throttle,
    navigation: Debounce,
    heartbeat: Heartbeat,
}

impl ChangeWatcher {
    pub fn new(config: &WatcherConfig, start: Instant) -> Self {
        Self {
            throttle: Throttle::new(config.throttle_window()),
            navigation: Debounce::new(config.navigation_debounce()),
            heartbeat: Heartbeat::new(config, start),
        }
    }

    /// DOM mutation or scroll. Returns `true` when a sweep should run now.
    pub fn on_activity(&mut self, now: Instant) -> bool {
        let run = self.throttle.trigger(now);
        trace!("Page activity, sweep now: {}", run);
        run
    }

    pub fn on_navigation(&mut self, now: Instant) {
        self.navigation.trigger(now);
    }

    pub fn next_deadline(&self) -> Instant {
        [self.throttle.deadline(), self.navigation.deadline()]
            .into_iter()
            .flatten()
            .fold(self.heartbeat.deadline(), Instant::min)
    }

    /// Fire everything that is due. At most one sweep results, however many
    /// schedules came due together.
    pub fn poll(&mut self, now: Instant) -> Option<SweepCause> {
        let activity = self.throttle.fire_due(now);
        let navigation = self.navigation.fire_due(now);
        let heartbeat = self.heartbeat.fire_due(now);
        if navigation {
            Some(SweepCause::Navigation)
        } else if activity {
            Some(SweepCause::Activity)
        } else if heartbeat {
            Some(SweepCause::Heartbeat)
        } else {
            None
        }
    }

    pub const fn heartbeat_ticks(&self) -> u32 {
        self.heartbeat.ticks()
    }
}
