//! Promise job queue for the execution lane
//!
//! Boa hands promise reactions (`then`/`catch` callbacks, `await`
//! continuations) to a [`JobExecutor`]. The lane owns its context on a plain
//! OS thread, so instead of polling an async runtime this executor is drained
//! synchronously after every lane job until no microtasks remain.
//!
//! # Job Types
//!
//! - **PromiseJob**: microtasks for promise resolution
//! - **GenericJob**: general-purpose jobs, one per drain round
//!
//! Native async jobs are never created by the lane's bindings; timers are
//! implemented as lane jobs instead, so anything else is logged and dropped.

use boa_engine::{
    context::Context,
    job::{GenericJob, Job, JobExecutor, PromiseJob},
    JsResult,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Upper bound on jobs run by one [`LaneJobExecutor::drain`] call.
///
/// A promise chain that re-schedules itself forever would otherwise pin the
/// lane; what is left over runs after the next lane job.
pub const MAX_JOBS_PER_DRAIN: usize = 1_000_000;

/// Single-threaded job queue drained synchronously by the lane.
pub struct LaneJobExecutor {
    promise_jobs: RefCell<VecDeque<PromiseJob>>,
    generic_jobs: RefCell<VecDeque<GenericJob>>,
}

impl LaneJobExecutor {
    pub fn new() -> Self {
        Self {
            promise_jobs: RefCell::default(),
            generic_jobs: RefCell::default(),
        }
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.promise_jobs.borrow().is_empty() || !self.generic_jobs.borrow().is_empty()
    }

    /// Runs queued jobs until the queues are empty or the budget is spent.
    ///
    /// Each round runs at most one generic job and then every promise job
    /// queued so far. Errors thrown by a job are logged and do not stop the
    /// drain. Returns the number of jobs run.
    pub fn drain(&self, context: &mut Context) -> usize {
        let mut ran = 0;

        while self.has_pending_jobs() && ran < MAX_JOBS_PER_DRAIN {
            let generic = self.generic_jobs.borrow_mut().pop_front();
            if let Some(generic) = generic {
                ran += 1;
                if let Err(err) = generic.call(context) {
                    tracing::warn!("Uncaught error in generic job: {err}");
                }
            }

            let jobs = std::mem::take(&mut *self.promise_jobs.borrow_mut());
            for job in jobs {
                ran += 1;
                if let Err(err) = job.call(context) {
                    tracing::warn!("Uncaught error in promise job: {err}");
                }
            }
        }

        if self.has_pending_jobs() {
            tracing::warn!(ran, "Promise job budget exhausted, deferring remaining jobs");
        }

        context.clear_kept_objects();
        ran
    }
}

impl Default for LaneJobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobExecutor for LaneJobExecutor {
    fn enqueue_job(self: Rc<Self>, job: Job, _context: &mut Context) {
        match job {
            Job::PromiseJob(job) => self.promise_jobs.borrow_mut().push_back(job),
            Job::GenericJob(job) => self.generic_jobs.borrow_mut().push_back(job),
            _ => tracing::warn!("Unsupported job type enqueued, ignoring"),
        }
    }

    fn run_jobs(self: Rc<Self>, context: &mut Context) -> JsResult<()> {
        self.drain(context);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{js_string, JsValue, Source};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn context_with(executor: &Rc<LaneJobExecutor>) -> Context {
        Context::builder()
            .job_executor(executor.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_executor_is_idle() {
        assert!(!LaneJobExecutor::default().has_pending_jobs());
    }

    #[test]
    fn test_drain_empty_queue() {
        let executor = Rc::new(LaneJobExecutor::new());
        let mut context = context_with(&executor);
        assert_eq!(executor.drain(&mut context), 0);
    }

    #[test]
    fn test_generic_jobs_run() {
        let executor = Rc::new(LaneJobExecutor::new());
        let mut context = context_with(&executor);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            let realm = context.realm().clone();
            let job = Job::GenericJob(GenericJob::new(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(JsValue::undefined())
                },
                realm,
            ));
            executor.clone().enqueue_job(job, &mut context);
        }

        assert!(executor.has_pending_jobs());
        assert_eq!(executor.drain(&mut context), 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(!executor.has_pending_jobs());
    }

    #[test]
    fn test_promise_reactions_run_on_drain() {
        let executor = Rc::new(LaneJobExecutor::new());
        let mut context = context_with(&executor);

        context
            .eval(Source::from_bytes(
                "var seen = 0; Promise.resolve(41).then(v => { seen = v + 1; });",
            ))
            .unwrap();
        assert!(executor.has_pending_jobs());

        executor.drain(&mut context);
        let seen = context
            .global_object()
            .get(js_string!("seen"), &mut context)
            .unwrap();
        assert_eq!(seen.as_number(), Some(42.0));
    }

    #[test]
    fn test_async_function_completes_within_one_drain() {
        let executor = Rc::new(LaneJobExecutor::new());
        let mut context = context_with(&executor);

        context
            .eval(Source::from_bytes(
                "var done = false; (async () => { await null; await null; done = true; })();",
            ))
            .unwrap();
        executor.drain(&mut context);

        let done = context
            .global_object()
            .get(js_string!("done"), &mut context)
            .unwrap();
        assert_eq!(done.as_boolean(), Some(true));
    }
}
