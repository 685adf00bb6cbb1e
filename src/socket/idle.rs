//! Idle tracking and eviction for destinations.
//!
//! A destination with no active connections keeps exactly one pending idle
//! timer. Activity cancels it; the last connection going away arms a fresh
//! one. When it fires, the destination's [`IdleEviction`] handler decides
//! what to do with it.

use crate::base::timer::{Timer, TimerId, TimerQueue};
use crate::socket::destination::DestinationManager;
use crate::socket::group::ConnectionGroup;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Called from the timer thread when a destination has been idle for its
/// configured max idle time. No destination lock is held.
pub trait IdleEviction: Send + Sync {
    fn on_idle(&self, manager: &Arc<DestinationManager>, groups: Vec<Arc<dyn ConnectionGroup>>);
}

pub(crate) type FireCallback = Arc<dyn Fn(TimerId) + Send + Sync>;

pub(crate) struct IdleTracker {
    active: usize,
    timer: Option<Timer>,
    idle_since: Instant,
    queue: TimerQueue,
    on_fire: FireCallback,
}

impl IdleTracker {
    /// Start idle, with the timer already armed.
    pub(crate) fn new(queue: TimerQueue, on_fire: FireCallback) -> Self {
        let mut tracker = Self {
            active: 0,
            timer: None,
            idle_since: Instant::now(),
            queue,
            on_fire,
        };
        tracker.arm(tracker.queue.duration());
        tracker
    }

    fn arm(&mut self, duration: Duration) {
        let on_fire = Arc::clone(&self.on_fire);
        let timer = self.queue.create_timer_for(duration, move |id| on_fire(id));
        tracing::debug!(timer = timer.id(), ?duration, "idle timer armed");
        if let Some(old) = self.timer.replace(timer) {
            old.cancel();
        }
    }

    pub(crate) fn active(&self) -> usize {
        self.active
    }

    pub(crate) fn max_idle(&self) -> Duration {
        self.queue.duration()
    }

    /// When the destination last became idle. `None` while active.
    pub(crate) fn idle_since(&self) -> Option<Instant> {
        (self.active == 0).then_some(self.idle_since)
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.timer.as_ref().is_some_and(Timer::is_pending)
    }

    /// Returns the new active count.
    pub(crate) fn activate(&mut self) -> usize {
        self.active += 1;
        if self.active == 1 {
            match self.timer.take() {
                Some(timer) => {
                    timer.cancel();
                }
                None => tracing::error!("destination became active without an idle timer"),
            }
        }
        self.active
    }

    /// Returns the new active count. A deactivate with nothing active is
    /// ignored.
    pub(crate) fn deactivate(&mut self) -> usize {
        if self.active == 0 {
            tracing::error!("deactivate with no active connections");
            return 0;
        }
        self.active -= 1;
        if self.active == 0 {
            self.idle_since = Instant::now();
            self.arm(self.queue.duration());
        }
        self.active
    }

    /// Switch to a new max idle time. A pending timer is re-armed for what is
    /// left of the new duration, measured from when the idle period began.
    /// A timer that already fired stays fired.
    pub(crate) fn set_max_idle(&mut self, duration: Duration) {
        self.queue = self.queue.with_duration(duration);
        if self.active > 0 || !self.is_armed() {
            return;
        }
        let remaining = if duration == Duration::MAX {
            Duration::MAX
        } else {
            duration.saturating_sub(self.idle_since.elapsed())
        };
        self.arm(remaining);
    }

    /// Whether a firing timer is still the one this tracker armed and the
    /// destination is still idle.
    pub(crate) fn fire_matches(&self, id: TimerId) -> bool {
        self.active == 0 && self.timer.as_ref().map(Timer::id) == Some(id)
    }
}
