//! Cooperative scheduler polled by the server event loop.
//!
//! Nothing here sleeps or spawns. The owner asks for [`Timer::next_deadline`],
//! waits until then by whatever means it likes, and calls [`Timer::update`]
//! with the context the callbacks operate on.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

pub type TimerId = u32;

pub type TimerCallback<C> = Box<dyn FnMut(&mut C) + Send>;

struct ScheduledTask<C> {
    next_trigger: Instant,
    interval: Duration,
    repeating: bool,
    callback: TimerCallback<C>,
}

pub struct Timer<C> {
    tasks: BTreeMap<TimerId, ScheduledTask<C>>,
    next_id: TimerId,
    paused_at: Option<Instant>,
    last_update: Instant,
    elapsed: Duration,
}

impl<C> fmt::Debug for Timer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("tasks", &self.tasks.len())
            .field("paused", &self.is_paused())
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

impl<C> Default for Timer<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Timer<C> {
    pub fn new() -> Self {
        Self::new_at(Instant::now())
    }

    pub fn new_at(now: Instant) -> Self {
        Self {
            tasks: BTreeMap::new(),
            next_id: 1,
            paused_at: None,
            last_update: now,
            elapsed: Duration::ZERO,
        }
    }

    /// Runs `callback` once, `delay` from now.
    pub fn set_timeout<F>(&mut self, delay: Duration, callback: F) -> TimerId
    where
        F: FnMut(&mut C) + Send + 'static,
    {
        self.set_timeout_at(Instant::now(), delay, callback)
    }

    pub fn set_timeout_at<F>(&mut self, now: Instant, delay: Duration, callback: F) -> TimerId
    where
        F: FnMut(&mut C) + Send + 'static,
    {
        self.schedule(now, delay, false, Box::new(callback))
    }

    /// Runs `callback` every `interval`, first after one interval.
    pub fn set_interval<F>(&mut self, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut(&mut C) + Send + 'static,
    {
        self.set_interval_at(Instant::now(), interval, callback)
    }

    pub fn set_interval_at<F>(&mut self, now: Instant, interval: Duration, callback: F) -> TimerId
    where
        F: FnMut(&mut C) + Send + 'static,
    {
        self.schedule(now, interval, true, Box::new(callback))
    }

    fn schedule(
        &mut self,
        now: Instant,
        interval: Duration,
        repeating: bool,
        callback: TimerCallback<C>,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        // While paused the clock is frozen at the pause point; resume shifts it.
        let base = self.paused_at.unwrap_or(now);
        self.tasks.insert(
            id,
            ScheduledTask {
                next_trigger: base + interval,
                interval,
                repeating,
                callback,
            },
        );
        id
    }

    /// Returns false if no such task exists.
    pub fn clear_timer(&mut self, id: TimerId) -> bool {
        self.tasks.remove(&id).is_some()
    }

    pub fn update(&mut self, ctx: &mut C) -> usize {
        self.update_at(Instant::now(), ctx)
    }

    /// Fires every task due at `now`, each at most once, and returns how many
    /// fired. Repeating tasks advance from their previous trigger, not from
    /// `now`.
    pub fn update_at(&mut self, now: Instant, ctx: &mut C) -> usize {
        if self.is_paused() {
            return 0;
        }

        self.elapsed += now.saturating_duration_since(self.last_update);
        self.last_update = now;

        let mut due: Vec<(Instant, TimerId)> = self
            .tasks
            .iter()
            .filter(|(_, task)| task.next_trigger <= now)
            .map(|(id, task)| (task.next_trigger, *id))
            .collect();
        due.sort();

        let mut fired = 0;
        for (_, id) in due {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            (task.callback)(ctx);
            fired += 1;

            if task.repeating {
                task.next_trigger += task.interval;
            } else {
                self.tasks.remove(&id);
            }
        }
        fired
    }

    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    pub fn pause_at(&mut self, now: Instant) {
        if self.paused_at.is_none() {
            self.elapsed += now.saturating_duration_since(self.last_update);
            self.last_update = now;
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    /// Shifts every pending trigger by the time spent paused.
    pub fn resume_at(&mut self, now: Instant) {
        let Some(paused_at) = self.paused_at.take() else {
            return;
        };
        let paused_for = now.saturating_duration_since(paused_at);
        for task in self.tasks.values_mut() {
            task.next_trigger += paused_for;
        }
        self.last_update = now;
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Unpaused time accumulated up to the last update or pause.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Earliest pending trigger. `None` while paused or when nothing is
    /// scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.is_paused() {
            return None;
        }
        self.tasks.values().map(|task| task.next_trigger).min()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
