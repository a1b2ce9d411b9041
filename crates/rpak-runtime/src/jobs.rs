//! Asset job dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::error;
use parking_lot::Mutex;
use rpak_common::PakGuid;

use crate::error::LoaderError;

/// A unit of work handed to a [`JobDispatcher`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs asset load callbacks.
pub trait JobDispatcher: Send + Sync {
    fn submit(&self, job: Job);
}

/// Runs each job immediately on the submitting thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl JobDispatcher for InlineDispatcher {
    fn submit(&self, job: Job) {
        job();
    }
}

/// Runs jobs on a dedicated rayon pool.
pub struct RayonDispatcher {
    pool: rayon::ThreadPool,
}

impl RayonDispatcher {
    pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("rpak-job-{index}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl JobDispatcher for RayonDispatcher {
    fn submit(&self, job: Job) {
        self.pool.spawn(job);
    }
}

/// Global cap on outstanding asset jobs, shared by all containers.
#[derive(Debug)]
pub struct JobLimiter {
    outstanding: AtomicUsize,
    max: usize,
}

impl JobLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            max,
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max).then_some(current + 1)
            })
            .is_ok()
    }

    pub fn release(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

/// Jobs in flight for one container and the failures they reported.
#[derive(Debug, Default)]
pub struct JobTracker {
    outstanding: AtomicUsize,
    completed: AtomicUsize,
    failures: Mutex<Vec<LoaderError>>,
}

impl JobTracker {
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn first_failure(&self) -> Option<LoaderError> {
        self.failures.lock().first().cloned()
    }

    /// The load job for `guid` returned an error.
    pub fn failed(&self, guid: PakGuid) -> bool {
        self.failures.lock().iter().any(|failure| failure.guid == guid)
    }
}

/// Releases a job's counters when it ends, including by unwinding.
struct JobGuard {
    tracker: Arc<JobTracker>,
    limiter: Arc<JobLimiter>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.limiter.release();
        self.tracker.completed.fetch_add(1, Ordering::AcqRel);
        self.tracker.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Submit `work` under a slot already taken from `limiter`.
pub(crate) fn submit_tracked<F>(
    dispatcher: &dyn JobDispatcher,
    tracker: &Arc<JobTracker>,
    limiter: &Arc<JobLimiter>,
    work: F,
) where
    F: FnOnce() -> Result<(), LoaderError> + Send + 'static,
{
    tracker.outstanding.fetch_add(1, Ordering::AcqRel);
    let guard = JobGuard {
        tracker: Arc::clone(tracker),
        limiter: Arc::clone(limiter),
    };
    dispatcher.submit(Box::new(move || {
        if let Err(err) = work() {
            error!("{err}");
            guard.tracker.failures.lock().push(err);
        }
        drop(guard);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpak_common::FourCc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_limiter_caps_outstanding() {
        let limiter = JobLimiter::new(2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        limiter.release();
        assert!(limiter.try_acquire());
        assert_eq!(limiter.outstanding(), 2);
    }

    #[test]
    fn test_tracked_jobs_report_failures() {
        let tracker = Arc::new(JobTracker::default());
        let limiter = Arc::new(JobLimiter::new(4));

        assert!(limiter.try_acquire());
        submit_tracked(&InlineDispatcher, &tracker, &limiter, || Ok(()));
        assert!(limiter.try_acquire());
        submit_tracked(&InlineDispatcher, &tracker, &limiter, || {
            Err(LoaderError::new(PakGuid(7), FourCc::from_bytes(*b"txtr"), "bad mip count"))
        });

        assert_eq!(tracker.outstanding(), 0);
        assert_eq!(tracker.completed(), 2);
        assert_eq!(limiter.outstanding(), 0);
        assert_eq!(tracker.first_failure().unwrap().guid, PakGuid(7));
        assert!(tracker.failed(PakGuid(7)));
        assert!(!tracker.failed(PakGuid(8)));
    }

    #[test]
    fn test_rayon_dispatcher_runs_jobs() {
        let dispatcher = RayonDispatcher::new(2).unwrap();
        let tracker = Arc::new(JobTracker::default());
        let limiter = Arc::new(JobLimiter::new(64));

        for _ in 0..32 {
            assert!(limiter.try_acquire());
            submit_tracked(&dispatcher, &tracker, &limiter, || {
                std::thread::sleep(Duration::from_millis(1));
                Ok(())
            });
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while tracker.outstanding() > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(tracker.completed(), 32);
        assert_eq!(limiter.outstanding(), 0);
    }
}
