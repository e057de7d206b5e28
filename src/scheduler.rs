//! Delayed job execution behind a small trait
//!
//! [`TokioScheduler`] is what a running service uses. [`ManualScheduler`]
//! keeps its own virtual time and only runs jobs when [`ManualScheduler::advance`]
//! is called, which makes debounce behaviour testable without sleeping.
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync + 'static {
    type Handle: Send + 'static;

    /// Run `job` once after `delay`
    fn schedule(&self, delay: Duration, job: Job) -> Self::Handle;
    /// Drop a job that has not run yet. Cancelling a finished job is a no-op.
    fn cancel(&self, handle: &Self::Handle);
}

/// Spawns one sleeping task per job on a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(runtime: tokio::runtime::Handle) -> Self {
        Self { runtime }
    }
    /// Use the runtime of the calling context; panics outside of one
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    type Handle = tokio::task::AbortHandle;

    fn schedule(&self, delay: Duration, job: Job) -> Self::Handle {
        self.runtime
            .spawn(async move {
                tokio::time::sleep(delay).await;
                job();
            })
            .abort_handle()
    }

    fn cancel(&self, handle: &Self::Handle) {
        handle.abort();
    }
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    // (deadline, id) keeps same-deadline jobs in scheduling order
    queue: BTreeMap<(Duration, u64), Job>,
}

#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Jobs scheduled and not yet run or cancelled
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().now
    }

    /// Move virtual time forward, running every job that falls due, in
    /// deadline order. Jobs scheduled by a running job are picked up too if
    /// they fall inside the window. Returns how many jobs ran.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.lock().now + by;
        let mut ran = 0;

        loop {
            // the lock is released before running so jobs can schedule more work
            let next = {
                let mut state = self.lock();
                let due = state
                    .queue
                    .first_key_value()
                    .map(|(&(deadline, _), _)| deadline)
                    .filter(|deadline| *deadline <= target);
                match due {
                    Some(deadline) => {
                        state.now = deadline;
                        state.queue.pop_first()
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };

            match next {
                Some((_, job)) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    type Handle = (Duration, u64);

    fn schedule(&self, delay: Duration, job: Job) -> Self::Handle {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        let key = (state.now + delay, id);
        state.queue.insert(key, job);
        key
    }

    fn cancel(&self, handle: &Self::Handle) {
        self.lock().queue.remove(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn manual_runs_due_jobs_in_order() {
        let scheduler = ManualScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (label, ms) in [("late", 300), ("early", 100), ("middle", 200)] {
            let log = log.clone();
            scheduler.schedule(
                Duration::from_millis(ms),
                Box::new(move || log.lock().unwrap().push(label)),
            );
        }

        assert_eq!(scheduler.advance(Duration::from_millis(250)), 2);
        assert_eq!(*log.lock().unwrap(), vec!["early", "middle"]);
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.elapsed(), Duration::from_millis(250));

        assert_eq!(scheduler.advance(Duration::from_millis(50)), 1);
        assert_eq!(*log.lock().unwrap(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn cancelled_jobs_never_run() {
        let scheduler = ManualScheduler::new();
        let handle = scheduler.schedule(Duration::from_millis(10), Box::new(|| panic!("ran")));

        scheduler.cancel(&handle);

        assert_eq!(scheduler.advance(Duration::from_secs(1)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_fires_after_delay() {
        let scheduler = TokioScheduler::current();
        let (tx, rx) = tokio::sync::oneshot::channel();

        scheduler.schedule(
            Duration::from_millis(500),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        let started = tokio::time::Instant::now();
        rx.await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
