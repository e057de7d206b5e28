//! Per-key debouncing on top of a [`Scheduler`]
//!
//! Each key has at most one pending job. Triggering a key that already has one
//! cancels it and starts the quiet period again, so a burst of triggers
//! collapses into a single run after the burst ends.
//!
//! The pending map lives in this process only. Jobs that have not fired when
//! the process stops are lost, and separate processes do not see each other's
//! timers. Swap the scheduler for a durable queue if either matters.
use super::scheduler::{Job, Scheduler};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

struct Pending<H> {
    generation: u64,
    handle: H,
}

struct Slots<K, H> {
    next_generation: u64,
    pending: HashMap<K, Pending<H>>,
}

pub struct Debouncer<K, S: Scheduler> {
    scheduler: Arc<S>,
    window: Duration,
    slots: Arc<Mutex<Slots<K, S::Handle>>>,
}

fn lock<K, H>(slots: &Mutex<Slots<K, H>>) -> MutexGuard<'_, Slots<K, H>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<K, S> Debouncer<K, S>
where
    K: Eq + Hash + Clone + Send + 'static,
    S: Scheduler,
{
    pub fn new(scheduler: Arc<S>, window: Duration) -> Self {
        Self {
            scheduler,
            window,
            slots: Arc::new(Mutex::new(Slots {
                next_generation: 0,
                pending: HashMap::new(),
            })),
        }
    }

    /// Schedule `job` for `key`, replacing whatever was pending for it
    pub fn trigger<F>(&self, key: K, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slots = lock(&self.slots);
        let generation = slots.next_generation;
        slots.next_generation += 1;

        if let Some(previous) = slots.pending.remove(&key) {
            self.scheduler.cancel(&previous.handle);
        }

        let registry = Arc::clone(&self.slots);
        let fired_key = key.clone();
        let wrapped: Job = Box::new(move || {
            {
                let mut slots = lock(&registry);
                // a newer trigger may have replaced us between firing and locking
                match slots.pending.get(&fired_key) {
                    Some(current) if current.generation == generation => {
                        slots.pending.remove(&fired_key);
                    }
                    _ => return,
                }
            }
            job();
        });

        let handle = self.scheduler.schedule(self.window, wrapped);
        slots.pending.insert(key, Pending { generation, handle });
    }

    /// Drop the pending job for `key`, if any. Returns whether one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match lock(&self.slots).pending.remove(key) {
            Some(previous) => {
                self.scheduler.cancel(&previous.handle);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.slots).pending.contains_key(key)
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.slots).pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let handle = runs.clone();
        let make = move || -> Box<dyn FnOnce() + Send> {
            let runs = handle.clone();
            Box::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        (runs, make)
    }

    #[test]
    fn burst_collapses_into_one_run() {
        let scheduler = Arc::new(ManualScheduler::new());
        let debouncer = Debouncer::new(scheduler.clone(), Duration::from_millis(2_000));
        let (runs, job) = counter();

        for _ in 0..5 {
            debouncer.trigger("vendor-a", job());
            scheduler.advance(Duration::from_millis(500));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending(&"vendor-a"));

        scheduler.advance(Duration::from_millis(1_500));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending(&"vendor-a"));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn keys_are_independent() {
        let scheduler = Arc::new(ManualScheduler::new());
        let debouncer = Debouncer::new(scheduler.clone(), Duration::from_millis(2_000));
        let (runs, job) = counter();

        debouncer.trigger("vendor-a", job());
        scheduler.advance(Duration::from_millis(1_000));
        debouncer.trigger("vendor-b", job());
        assert_eq!(debouncer.pending_len(), 2);

        scheduler.advance(Duration::from_millis(1_000));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(debouncer.is_pending(&"vendor-b"));

        scheduler.advance(Duration::from_millis(1_000));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancel_drops_pending_job() {
        let scheduler = Arc::new(ManualScheduler::new());
        let debouncer = Debouncer::new(scheduler.clone(), Duration::from_millis(10));
        let (runs, job) = counter();

        debouncer.trigger(1u32, job());
        assert!(debouncer.cancel(&1));
        assert!(!debouncer.cancel(&1));

        scheduler.advance(Duration::from_secs(1));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn job_may_retrigger_its_own_key() {
        let scheduler = Arc::new(ManualScheduler::new());
        let debouncer = Arc::new(Debouncer::new(scheduler.clone(), Duration::from_millis(100)));
        let (runs, job) = counter();

        let again = debouncer.clone();
        let second = job();
        debouncer.trigger("k", move || again.trigger("k", second));

        scheduler.advance(Duration::from_millis(100));
        assert!(debouncer.is_pending(&"k"));
        scheduler.advance(Duration::from_millis(100));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_backed_debounce() {
        let scheduler = Arc::new(crate::scheduler::TokioScheduler::current());
        let debouncer = Debouncer::new(scheduler, Duration::from_millis(2_000));
        let (runs, job) = counter();

        for _ in 0..3 {
            debouncer.trigger("vendor-a", job());
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_len(), 0);
    }
}
