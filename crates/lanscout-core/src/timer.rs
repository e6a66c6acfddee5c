//! Named, cancelable timers tied to a component's lifecycle.
//!
//! Every delayed or periodic action a component runs (debounce, stability
//! windows, reconnect backoff, heartbeats, queue drains) is registered under a
//! name in the component's [`TimerSet`]. Scheduling a name again replaces the
//! previous timer, and teardown is a single [`TimerSet::cancel_all`] call.
//!
//! A timer body may re-schedule or cancel its own name; the running body is
//! never aborted from inside itself.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

tokio::task_local! {
    static CURRENT_TIMER: u64;
}

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

impl TimerEntry {
    fn abort_unless_current(self) {
        let current = CURRENT_TIMER.try_with(|g| *g).ok();
        if current != Some(self.generation) {
            self.handle.abort();
        }
    }
}

/// A set of named timers owned by one component.
pub struct TimerSet {
    owner: &'static str,
    timers: Arc<DashMap<String, TimerEntry>>,
    next_generation: AtomicU64,
}

impl TimerSet {
    /// Creates an empty timer set. `owner` only labels log lines.
    pub fn new(owner: &'static str) -> Self {
        Self {
            owner,
            timers: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Runs `task` once after `delay`, replacing any timer with the same name.
    pub fn schedule<F>(&self, name: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let key = name.to_string();

        let handle = tokio::spawn(CURRENT_TIMER.scope(generation, async move {
            tokio::time::sleep(delay).await;
            task.await;
            timers.remove_if(&key, |_, entry| entry.generation == generation);
        }));

        trace!(owner = self.owner, timer = name, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        self.install(name, generation, handle);
    }

    /// Runs `tick` every `period` (first run after one period) until it
    /// returns `false` or the timer is cancelled.
    pub fn schedule_interval<F, Fut>(&self, name: &str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let timers = Arc::clone(&self.timers);
        let key = name.to_string();

        let handle = tokio::spawn(CURRENT_TIMER.scope(generation, async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !tick().await {
                    break;
                }
            }
            timers.remove_if(&key, |_, entry| entry.generation == generation);
        }));

        trace!(owner = self.owner, timer = name, period_ms = period.as_millis() as u64, "Interval scheduled");
        self.install(name, generation, handle);
    }

    fn install(&self, name: &str, generation: u64, handle: JoinHandle<()>) {
        let entry = TimerEntry { generation, handle };
        if let Some(previous) = self.timers.insert(name.to_string(), entry) {
            previous.abort_unless_current();
        }
    }

    /// Cancels one timer. Returns true if it was pending.
    pub fn cancel(&self, name: &str) -> bool {
        match self.timers.remove(name) {
            Some((_, entry)) => {
                let pending = !entry.handle.is_finished();
                entry.abort_unless_current();
                if pending {
                    debug!(owner = self.owner, timer = name, "Timer cancelled");
                }
                pending
            }
            None => false,
        }
    }

    /// Cancels every timer in the set.
    pub fn cancel_all(&self) {
        let names: Vec<String> = self.timers.iter().map(|entry| entry.key().clone()).collect();
        for name in names {
            if let Some((_, entry)) = self.timers.remove(&name) {
                entry.abort_unless_current();
            }
        }
        debug!(owner = self.owner, "All timers cancelled");
    }

    /// Returns true if a timer with this name is pending or running.
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.timers
            .get(name)
            .map(|entry| !entry.handle.is_finished())
            .unwrap_or(false)
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.timers.iter().filter(|entry| !entry.handle.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_once() {
        let timers = TimerSet::new("test");
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        timers.schedule("once", Duration::from_secs(2), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.is_scheduled("once"));

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_scheduled("once"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_replaces_previous() {
        let timers = TimerSet::new("test");
        let fired = Arc::new(AtomicUsize::new(0));

        for value in [1, 10] {
            let counter = Arc::clone(&fired);
            timers.schedule("debounce", Duration::from_secs(1), async move {
                counter.fetch_add(value, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_cancel_all() {
        let timers = TimerSet::new("test");
        let fired = Arc::new(AtomicUsize::new(0));

        for name in ["a", "b", "c"] {
            let counter = Arc::clone(&fired);
            timers.schedule(name, Duration::from_secs(1), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(timers.len(), 3);

        assert!(timers.cancel("a"));
        assert!(!timers.cancel("missing"));
        timers.cancel_all();
        assert!(timers.is_empty());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_until_false() {
        let timers = TimerSet::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        timers.schedule_interval("heartbeat", Duration::from_secs(30), move || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) + 1 < 3 }
        });

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!timers.is_scheduled("heartbeat"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_body_can_reschedule_itself() {
        let timers = Arc::new(TimerSet::new("test"));
        let fired = Arc::new(AtomicUsize::new(0));

        fn arm(timers: Arc<TimerSet>, fired: Arc<AtomicUsize>) {
            let inner = Arc::clone(&timers);
            timers.schedule("retry", Duration::from_secs(1), async move {
                let n = fired.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    arm(inner, fired);
                }
            });
        }

        arm(Arc::clone(&timers), Arc::clone(&fired));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }
}
