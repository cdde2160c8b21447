//! Dispatcher: the async face of the execution lane
//!
//! HTTP tasks never touch the interpreter. They build a job, hand it to the
//! lane over a bounded channel and wait on a oneshot for the answer. Both the
//! wait for queue capacity and the wait for the answer share a single
//! deadline, so a caller is never blocked longer than the execution timeout.
//!
//! A caller that times out simply drops its receiver: the lane notices, skips
//! the job if it has not started, and otherwise discards the late result.
//!
//! The interpreter cannot be interrupted from outside, and the runtime limits
//! do not catch every runaway script. A watchdog therefore replaces a lane
//! whose current job has run for [`WEDGE_FACTOR`] times the execution
//! timeout: the stuck thread is abandoned and a fresh lane re-runs the
//! bootstrap script. Routes registered after bootstrap do not survive a
//! replacement.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

use scriptgate_common::protocol::{Result, ScriptgateError, TraceId};

use crate::bridge::{ScriptRequest, ScriptResponse};
use crate::registry::{HandlerDescriptor, HandlerId, HandlerRegistry};
use crate::resource_limits::ResourceLimits;
use crate::runtime::lane::{self, Job, LaneSetup};
use crate::runtime::local::LaneProgress;
use crate::state::GlobalState;

/// Outcome of one unit of script work.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Returned (or settled) value; `None` for `null`, `undefined` and pending promises
    pub value: Option<Value>,
    /// Console lines in the order they were written
    pub logs: Vec<String>,
    /// Message of the exception or runtime-limit error, if any
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The error as a [`ScriptgateError::ScriptError`].
    pub fn script_error(&self) -> Option<ScriptgateError> {
        self.error.clone().map(ScriptgateError::ScriptError)
    }
}

/// A completed handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeOutcome {
    pub response: ScriptResponse,
    pub result: ExecutionResult,
}

/// A lane whose current job has run this many execution timeouts is replaced.
pub const WEDGE_FACTOR: u32 = 2;

/// One running lane: its queue, heartbeat and thread.
struct LaneHandle {
    jobs: mpsc::Sender<Job>,
    progress: Arc<LaneProgress>,
    thread: Option<JoinHandle<()>>,
}

/// What it takes to start a lane, kept for replacements.
#[derive(Clone)]
struct LaneFactory {
    limits: ResourceLimits,
    registry: Arc<HandlerRegistry>,
    state: Arc<GlobalState>,
    bootstrap: Option<String>,
    runtime: Handle,
}

impl LaneFactory {
    fn wedge_after(&self) -> Duration {
        self.limits.execution_timeout * WEDGE_FACTOR
    }

    /// Spawns a lane and waits for its bootstrap outcome.
    async fn start(&self, bootstrap: Option<String>) -> Result<(LaneHandle, Option<ExecutionResult>)> {
        let (jobs, receiver) = mpsc::channel(self.limits.queue_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();
        let progress = Arc::new(LaneProgress::new());

        let setup = LaneSetup {
            limits: self.limits.clone(),
            registry: self.registry.clone(),
            state: self.state.clone(),
            bootstrap,
            runtime: self.runtime.clone(),
            jobs: jobs.downgrade(),
            progress: progress.clone(),
        };
        let thread = lane::spawn(setup, receiver, ready_tx)?;

        let bootstrap = match tokio::time::timeout(self.wedge_after(), ready_rx).await {
            Ok(Ok(ready)) => ready?,
            Ok(Err(_)) => {
                return Err(ScriptgateError::ScriptError(
                    "execution lane exited during startup".into(),
                ))
            }
            Err(_) => {
                progress.retire();
                return Err(ScriptgateError::ScriptError(format!(
                    "bootstrap script did not finish within {}ms",
                    self.wedge_after().as_millis()
                )));
            }
        };

        let lane = LaneHandle {
            jobs,
            progress,
            thread: Some(thread),
        };
        Ok((lane, bootstrap))
    }

    /// Starts a lane with the bootstrap script, failing if the script throws.
    async fn start_bootstrapped(&self) -> Result<LaneHandle> {
        let (lane, bootstrap) = self.start(self.bootstrap.clone()).await?;
        if let Some(result) = bootstrap {
            for line in &result.logs {
                tracing::info!(target: "scriptgate::console", "{}", line);
            }
            if let Some(error) = result.error {
                return Err(ScriptgateError::ScriptError(format!(
                    "bootstrap script failed: {}",
                    error
                )));
            }
            tracing::info!(elapsed_ms = result.elapsed.as_millis() as u64, "Bootstrap script evaluated");
        }
        Ok(lane)
    }
}

struct Shared {
    factory: LaneFactory,
    lane: RwLock<LaneHandle>,
    restarts: AtomicU64,
    stopped: AtomicBool,
}

impl Shared {
    fn lane(&self) -> RwLockReadGuard<'_, LaneHandle> {
        self.lane.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lane_mut(&self) -> RwLockWriteGuard<'_, LaneHandle> {
        self.lane.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn jobs(&self) -> mpsc::Sender<Job> {
        self.lane().jobs.clone()
    }

    /// Abandons the current lane and swaps in a fresh one.
    ///
    /// Registrations pointing into the abandoned context are dropped and the
    /// bootstrap script runs again. If it fails this time the new lane starts
    /// empty.
    async fn replace_lane(&self, busy: Duration) {
        tracing::error!(
            busy_ms = busy.as_millis() as u64,
            "Execution lane is wedged, replacing it"
        );
        self.lane().progress.retire();
        let dropped = self.factory.registry.clear();

        let lane = match self.factory.start_bootstrapped().await {
            Ok(lane) => lane,
            Err(e) => {
                tracing::warn!("Replacement lane bootstrap failed, starting empty: {}", e);
                self.factory.registry.clear();
                match self.factory.start(None).await {
                    Ok((lane, _)) => lane,
                    Err(e) => {
                        tracing::error!("Failed to start a replacement lane: {}", e);
                        return;
                    }
                }
            }
        };

        // Dropping the old sender and join handle detaches the stuck thread
        let abandoned = std::mem::replace(&mut *self.lane_mut(), lane);
        drop(abandoned);

        let restarts = self.restarts.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(
            restarts,
            dropped_routes = dropped,
            routes = self.factory.registry.len(),
            "Execution lane replaced"
        );
    }
}

/// Checks the lane heartbeat every half timeout until the dispatcher goes away.
fn spawn_watchdog(shared: &Arc<Shared>) -> AbortHandle {
    let weak: Weak<Shared> = Arc::downgrade(shared);
    let period = (shared.factory.limits.execution_timeout / 2).max(Duration::from_millis(10));

    shared
        .factory
        .runtime
        .spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                if shared.stopped.load(Ordering::Acquire) {
                    break;
                }
                let busy = shared.lane().progress.busy_for();
                if let Some(busy) = busy.filter(|busy| *busy >= shared.factory.wedge_after()) {
                    shared.replace_lane(busy).await;
                }
            }
        })
        .abort_handle()
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    timeout: Duration,
    watchdog: AbortHandle,
}

impl Dispatcher {
    /// Starts the lane and runs the optional bootstrap script on it.
    ///
    /// Must be called from within a tokio runtime; timers and the watchdog
    /// are scheduled on it. Fails when the bootstrap script throws or runs
    /// past [`WEDGE_FACTOR`] execution timeouts.
    pub async fn start(
        limits: &ResourceLimits,
        registry: Arc<HandlerRegistry>,
        state: Arc<GlobalState>,
        bootstrap: Option<String>,
    ) -> Result<Self> {
        limits.validate().map_err(ScriptgateError::InvalidRequest)?;

        let runtime = Handle::try_current()
            .map_err(|e| ScriptgateError::Io(std::io::Error::other(e)))?;
        let factory = LaneFactory {
            limits: limits.clone(),
            registry,
            state,
            bootstrap,
            runtime,
        };
        let lane = factory.start_bootstrapped().await?;

        let shared = Arc::new(Shared {
            factory,
            lane: RwLock::new(lane),
            restarts: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        });
        let watchdog = spawn_watchdog(&shared);

        Ok(Self {
            shared,
            timeout: limits.execution_timeout,
            watchdog,
        })
    }

    /// Runs a registered handler against `request`.
    ///
    /// A handler replaced while the request was queued is resolved again by
    /// route; one removed meanwhile yields [`ScriptgateError::NotFound`].
    pub async fn invoke(
        &self,
        descriptor: &HandlerDescriptor,
        request: ScriptRequest,
    ) -> Result<InvokeOutcome> {
        let deadline = Instant::now() + self.timeout;
        let trace_id = request.id;
        let (reply, receiver) = oneshot::channel();

        let job = Job::Invoke {
            handler: descriptor.handler,
            content_type: descriptor.content_type.clone(),
            request,
            reply,
            trace_id,
            submitted_at: std::time::Instant::now(),
        };
        self.submit(job, deadline).await?;
        self.wait(receiver, deadline, trace_id).await?
    }

    /// Evaluates raw code on the lane.
    pub async fn execute(
        &self,
        code: impl Into<String>,
        label: impl Into<String>,
        trace_id: TraceId,
    ) -> Result<ExecutionResult> {
        let deadline = Instant::now() + self.timeout;
        let (reply, receiver) = oneshot::channel();

        let job = Job::Execute {
            code: code.into(),
            label: label.into(),
            reply,
            trace_id,
            submitted_at: std::time::Instant::now(),
        };
        self.submit(job, deadline).await?;
        self.wait(receiver, deadline, trace_id).await
    }

    /// Asks the lane to drop the callable behind `handler`.
    pub fn release(&self, handler: HandlerId) {
        let jobs = self.shared.jobs();
        match jobs.try_send(Job::Release { handler }) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(job)) => {
                self.shared.factory.runtime.spawn(async move {
                    let _ = jobs.send(job).await;
                });
            }
        }
    }

    /// Jobs waiting in front of the lane.
    pub fn queue_depth(&self) -> usize {
        let lane = self.shared.lane();
        lane.jobs.max_capacity() - lane.jobs.capacity()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How many times a wedged lane has been replaced.
    pub fn restarts(&self) -> u64 {
        self.shared.restarts.load(Ordering::Acquire)
    }

    /// Stops the lane after the jobs already queued and waits for its thread.
    ///
    /// A lane that does not stop within [`WEDGE_FACTOR`] execution timeouts
    /// is left behind.
    pub async fn shutdown(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.watchdog.abort();

        let grace = self.shared.factory.wedge_after();
        let jobs = self.shared.jobs();
        if tokio::time::timeout(grace, jobs.send(Job::Shutdown)).await.is_err() {
            tracing::warn!("Execution lane queue stayed full during shutdown");
        }
        drop(jobs);

        let thread = self.shared.lane_mut().thread.take();
        if let Some(thread) = thread {
            let joined = tokio::time::timeout(grace, tokio::task::spawn_blocking(move || thread.join())).await;
            match joined {
                Ok(Ok(Ok(()))) => {}
                Ok(_) => tracing::error!("Execution lane panicked"),
                Err(_) => tracing::warn!("Execution lane did not stop in time, leaving it behind"),
            }
        }
    }

    async fn submit(&self, job: Job, deadline: Instant) -> Result<()> {
        let jobs = self.shared.jobs();
        match tokio::time::timeout_at(deadline, jobs.send(job)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ScriptgateError::QueueFull(
                "execution lane is not running".into(),
            )),
            Err(_) => Err(ScriptgateError::QueueFull(format!(
                "queue stayed full for {}ms",
                self.timeout.as_millis()
            ))),
        }
    }

    async fn wait<T>(
        &self,
        receiver: oneshot::Receiver<T>,
        deadline: Instant,
        trace_id: TraceId,
    ) -> Result<T> {
        match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(ScriptgateError::QueueFull(
                "execution lane stopped before completing the job".into(),
            )),
            Err(_) => {
                tracing::warn!(trace_id, "Job timed out after {}ms", self.timeout.as_millis());
                Err(ScriptgateError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Params;
    use hyper::Request;
    use serde_json::json;

    async fn dispatcher_with(limits: ResourceLimits) -> (Dispatcher, Arc<HandlerRegistry>, Arc<GlobalState>) {
        let registry = Arc::new(HandlerRegistry::new());
        let state = Arc::new(GlobalState::new());
        let dispatcher = Dispatcher::start(&limits, registry.clone(), state.clone(), None)
            .await
            .unwrap();
        (dispatcher, registry, state)
    }

    async fn dispatcher() -> (Dispatcher, Arc<HandlerRegistry>, Arc<GlobalState>) {
        dispatcher_with(ResourceLimits::default()).await
    }

    fn request(method: &str, path: &str, params: Params) -> ScriptRequest {
        let parts = Request::builder()
            .method(method)
            .uri(path)
            .body(())
            .unwrap()
            .into_parts()
            .0;
        ScriptRequest::from_parts(&parts, b"", params, None, 7)
    }

    async fn call(dispatcher: &Dispatcher, registry: &HandlerRegistry, method: &str, path: &str) -> Result<InvokeOutcome> {
        let route = registry.lookup(method, path).expect("route registered");
        dispatcher
            .invoke(&route.descriptor, request(method, path, route.params))
            .await
    }

    #[tokio::test]
    async fn test_execute_returns_value_and_logs() {
        let (dispatcher, _, _) = dispatcher().await;
        let result = dispatcher
            .execute("console.log('hi', 2); ({a: [1, 2]})", "test", 1)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.value, Some(json!({"a": [1, 2]})));
        assert_eq!(result.logs, vec!["hi 2"]);
    }

    #[tokio::test]
    async fn test_execute_reports_exceptions() {
        let (dispatcher, _, _) = dispatcher().await;
        let result = dispatcher
            .execute("console.log('before'); throw new Error('boom')", "test", 1)
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("Error: boom"));
        assert_eq!(result.logs, vec!["before"]);
        assert_eq!(result.value, None);
    }

    #[tokio::test]
    async fn test_execute_unwraps_settled_promises() {
        let (dispatcher, _, _) = dispatcher().await;
        let result = dispatcher.execute("Promise.resolve(5)", "p", 1).await.unwrap();
        assert_eq!(result.value, Some(json!(5)));

        let result = dispatcher
            .execute("(async () => { throw new TypeError('nope'); })()", "p", 2)
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("TypeError: nope"));
    }

    #[tokio::test]
    async fn test_runaway_loop_is_a_script_error() {
        let limits = ResourceLimits::default().with_loop_iteration_limit(10_000);
        let (dispatcher, _, _) = dispatcher_with(limits).await;
        let result = dispatcher.execute("while (true) {}", "spin", 1).await.unwrap();
        assert!(result.error.is_some());

        let result = dispatcher.execute("1 + 1", "after", 2).await.unwrap();
        assert_eq!(result.value, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_handler_return_value_is_inferred() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute(
                "registerHandler('GET', '/echo/:name', (req) => ({greeting: 'hello ' + req.params.name}))",
                "setup",
                1,
            )
            .await
            .unwrap();

        let outcome = call(&dispatcher, &registry, "GET", "/echo/Ada").await.unwrap();
        assert_eq!(outcome.response.status, 200);
        assert_eq!(outcome.response.body, br#"{"greeting":"hello Ada"}"#);
        assert_eq!(outcome.result.value, Some(json!({"greeting": "hello Ada"})));
    }

    #[tokio::test]
    async fn test_handler_exception_is_captured() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute(
                "registerHandler('GET', '/boom', () => { console.log('x'); throw new Error('kaput'); })",
                "setup",
                1,
            )
            .await
            .unwrap();

        let outcome = call(&dispatcher, &registry, "GET", "/boom").await.unwrap();
        assert_eq!(outcome.result.error.as_deref(), Some("Error: kaput"));
        assert_eq!(outcome.result.logs, vec!["x"]);
    }

    #[tokio::test]
    async fn test_async_handler_with_timer() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute(
                r#"registerHandler('GET', '/later', async (req, res) => {
                    await new Promise(resolve => setTimeout(resolve, 20));
                    res.status(202);
                    return 'done';
                })"#,
                "setup",
                1,
            )
            .await
            .unwrap();

        let outcome = call(&dispatcher, &registry, "GET", "/later").await.unwrap();
        assert_eq!(outcome.response.status, 202);
        assert_eq!(outcome.response.body, b"done");
    }

    #[tokio::test]
    async fn test_timer_callback_writes_body() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute(
                "registerHandler('GET', '/t', (req, res) => { setTimeout((word) => res.text(word), 5, 'tick'); })",
                "setup",
                1,
            )
            .await
            .unwrap();

        let outcome = call(&dispatcher, &registry, "GET", "/t").await.unwrap();
        assert_eq!(outcome.response.body, b"tick");
    }

    #[tokio::test]
    async fn test_cleared_timer_completes_empty() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute(
                "registerHandler('GET', '/c', (req, res) => { clearTimeout(setTimeout(() => res.text('no'), 50)); })",
                "setup",
                1,
            )
            .await
            .unwrap();

        let outcome = call(&dispatcher, &registry, "GET", "/c").await.unwrap();
        assert_eq!(outcome.response.status, 200);
        assert!(outcome.response.body.is_empty());
    }

    #[tokio::test]
    async fn test_logs_written_while_reading_settled_value_are_kept() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute(
                r#"registerHandler('GET', '/lazy', async () => {
                    await null;
                    return { get v() { console.log('reading'); return 1; } };
                })"#,
                "setup",
                1,
            )
            .await
            .unwrap();

        let outcome = call(&dispatcher, &registry, "GET", "/lazy").await.unwrap();
        assert_eq!(outcome.response.body, br#"{"v":1}"#);
        assert_eq!(outcome.result.logs, vec!["reading"]);
    }

    #[tokio::test]
    async fn test_response_methods_stay_bound_to_their_request() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute(
                r#"registerHandler('GET', '/own', (req, res) => {
                    console.log('__sink' in res);
                    res.text.call({ __sink: 1 }, 'mine');
                })"#,
                "setup",
                1,
            )
            .await
            .unwrap();

        let outcome = call(&dispatcher, &registry, "GET", "/own").await.unwrap();
        assert!(outcome.result.is_success());
        assert_eq!(outcome.response.body, b"mine");
        assert_eq!(outcome.result.logs, vec!["false"]);
    }

    #[tokio::test]
    async fn test_never_completing_handler_times_out() {
        let limits = ResourceLimits::default().with_execution_timeout(Duration::from_millis(100));
        let (dispatcher, registry, _) = dispatcher_with(limits).await;
        dispatcher
            .execute(
                "registerHandler('GET', '/hang', () => new Promise(() => {})); registerHandler('GET', '/ok', () => 'ok')",
                "setup",
                1,
            )
            .await
            .unwrap();

        let err = call(&dispatcher, &registry, "GET", "/hang").await.unwrap_err();
        assert_eq!(err.status_code(), 408);

        let outcome = call(&dispatcher, &registry, "GET", "/ok").await.unwrap();
        assert_eq!(outcome.response.body, b"ok");
    }

    #[tokio::test]
    async fn test_state_binding_reaches_global_state() {
        let (dispatcher, _, state) = dispatcher().await;
        let result = dispatcher
            .execute(
                "state.set('n', {v: 1}); state.set('m', 2); state.delete('m'); [state.get('n').v, state.keys()]",
                "state",
                1,
            )
            .await
            .unwrap();
        assert_eq!(result.value, Some(json!([1, ["n"]])));
        assert_eq!(state.get("n"), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_registration_errors_surface_in_script() {
        let (dispatcher, registry, _) = dispatcher().await;
        let result = dispatcher
            .execute(
                r#"
                var errors = [];
                try { registerHandler('GET', '/a/:x/:x', () => 1); } catch (e) { errors.push(e.message); }
                try { registerHandler('GET', '/a', 'nope'); } catch (e) { errors.push(e.name); }
                errors
                "#,
                "bad",
                1,
            )
            .await
            .unwrap();
        let errors = result.value.unwrap();
        assert!(errors[0].as_str().unwrap().contains("Invalid path pattern"));
        assert_eq!(errors[1], "TypeError");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_handler() {
        let (dispatcher, registry, _) = dispatcher().await;
        let result = dispatcher
            .execute(
                "registerHandler('get', '/x/', () => 1); [unregisterHandler('GET', '/x'), unregisterHandler('GET', '/x')]",
                "unregister",
                1,
            )
            .await
            .unwrap();
        assert_eq!(result.value, Some(json!([true, false])));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stale_descriptor_reaches_replacement_handler() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute("registerHandler('GET', '/v/:n', (req) => 'one ' + req.params.n)", "setup", 1)
            .await
            .unwrap();
        let stale = registry.lookup("GET", "/v/7").unwrap();

        dispatcher
            .execute("registerHandler('GET', '/v/:n', (req) => 'two ' + req.params.n, 'text/csv')", "swap", 2)
            .await
            .unwrap();

        let outcome = dispatcher
            .invoke(&stale.descriptor, request("GET", "/v/7", stale.params))
            .await
            .unwrap();
        assert!(outcome.result.is_success());
        assert_eq!(outcome.response.body, b"two 7");
        assert_eq!(outcome.response.content_type.as_deref(), Some("text/csv"));
    }

    #[tokio::test]
    async fn test_stale_descriptor_of_removed_handler_is_not_found() {
        let (dispatcher, registry, _) = dispatcher().await;
        dispatcher
            .execute("registerHandler('GET', '/gone', () => 1)", "setup", 1)
            .await
            .unwrap();
        let stale = registry.lookup("GET", "/gone").unwrap();
        dispatcher
            .execute("unregisterHandler('GET', '/gone')", "remove", 2)
            .await
            .unwrap();

        let err = dispatcher
            .invoke(&stale.descriptor, request("GET", "/gone", Params::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_wedged_lane_is_replaced() {
        let limits = ResourceLimits::default().with_execution_timeout(Duration::from_millis(200));
        let registry = Arc::new(HandlerRegistry::new());
        let state = Arc::new(GlobalState::new());
        let bootstrap = r#"
            registerHandler('GET', '/spin', () => { while (true) { for (let i = 0; i < 1; i++) {} } });
            registerHandler('GET', '/ok', () => 'ok');
        "#;
        let dispatcher = Dispatcher::start(&limits, registry.clone(), state, Some(bootstrap.into()))
            .await
            .unwrap();

        dispatcher
            .execute("registerHandler('GET', '/later', () => 'later')", "runtime", 1)
            .await
            .unwrap();

        let err = call(&dispatcher, &registry, "GET", "/spin").await.unwrap_err();
        assert_eq!(err.status_code(), 408);

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while dispatcher.restarts() == 0 {
            assert!(std::time::Instant::now() < deadline, "lane was never replaced");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let outcome = call(&dispatcher, &registry, "GET", "/ok").await.unwrap();
        assert_eq!(outcome.response.body, b"ok");
        assert_eq!(dispatcher.restarts(), 1);
        assert!(registry.lookup("GET", "/later").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_wedged_bootstrap_fails_start() {
        let limits = ResourceLimits::default().with_execution_timeout(Duration::from_millis(100));
        let result = Dispatcher::start(
            &limits,
            Arc::new(HandlerRegistry::new()),
            Arc::new(GlobalState::new()),
            Some("while (true) { for (let i = 0; i < 1; i++) {} }".into()),
        )
        .await;
        let err = result.err().unwrap();
        assert!(err.to_string().contains("did not finish"));
    }

    #[tokio::test]
    async fn test_bootstrap_failure_fails_start() {
        let registry = Arc::new(HandlerRegistry::new());
        let state = Arc::new(GlobalState::new());
        let result = Dispatcher::start(
            &ResourceLimits::default(),
            registry,
            state,
            Some("throw new Error('bad bootstrap')".into()),
        )
        .await;
        let err = result.err().unwrap();
        assert!(err.to_string().contains("bad bootstrap"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_lane() {
        let (dispatcher, _, _) = dispatcher().await;
        dispatcher.shutdown().await;
        let err = dispatcher.execute("1", "late", 1).await.unwrap_err();
        assert_eq!(err.kind(), "queue_full");
    }
}
