//! Lane-local bookkeeping
//!
//! Everything the native bindings need that is not reachable through the
//! Boa [`Context`](boa_engine::Context) lives here, in a thread-local owned by
//! the execution lane: the callable table behind [`HandlerId`]s, the open
//! response sinks, pending timers and the shared registry/state handles.
//!
//! The cell is only ever borrowed for plain Rust bookkeeping. Bindings do
//! their value conversions first and never call back into the interpreter
//! while it is borrowed.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use boa_engine::object::builtins::JsPromise;
use boa_engine::{JsObject, JsValue};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

use scriptgate_common::protocol::{Result, TraceId};

use crate::bridge::ResponseState;
use crate::dispatcher::{ExecutionResult, InvokeOutcome};
use crate::registry::{HandlerId, HandlerRegistry};
use crate::runtime::lane::Job;
use crate::state::GlobalState;

pub(crate) type SinkId = u64;
pub(crate) type TimerId = u64;

/// Completion state of a handler invocation that has not answered yet.
pub(crate) struct OpenHandler {
    pub reply: oneshot::Sender<Result<InvokeOutcome>>,
    pub content_type: Option<String>,
    /// Promise returned by the handler, checked on every sweep
    pub pending: Option<JsPromise>,
    /// Timers scheduled while this handler was active and not yet fired
    pub timers: usize,
    pub failure: Option<String>,
    pub value: Option<Value>,
    pub trace_id: TraceId,
    pub started: Instant,
}

/// Where console output and `response` calls of the running code land.
pub(crate) struct Sink {
    pub logs: Vec<String>,
    pub response: ResponseState,
    /// `None` for raw executions, which complete synchronously
    pub handler: Option<OpenHandler>,
}

impl Sink {
    fn new(handler: Option<OpenHandler>) -> Self {
        Self {
            logs: Vec::new(),
            response: ResponseState::new(),
            handler,
        }
    }

    /// Freezes a handler sink and answers its submitter.
    pub fn complete(self, error: Option<String>) {
        let Some(handler) = self.handler else {
            return;
        };

        let elapsed = handler.started.elapsed();
        let outcome = InvokeOutcome {
            response: self.response.finish(),
            result: ExecutionResult {
                value: handler.value,
                logs: self.logs,
                error: error.or(handler.failure),
                elapsed,
            },
        };

        if handler.reply.send(Ok(outcome)).is_err() {
            tracing::debug!(
                trace_id = handler.trace_id,
                "Submitter stopped waiting, discarding late result"
            );
        }
    }
}

/// Heartbeat shared between a lane thread and the dispatcher watching it.
#[derive(Debug)]
pub(crate) struct LaneProgress {
    origin: Instant,
    /// Milliseconds after `origin` the current job started, plus one; 0 when idle
    busy_since: AtomicU64,
    retired: AtomicBool,
}

impl LaneProgress {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            busy_since: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    pub fn begin(&self) {
        let now = self.origin.elapsed().as_millis() as u64 + 1;
        self.busy_since.store(now, Ordering::Release);
    }

    pub fn end(&self) {
        self.busy_since.store(0, Ordering::Release);
    }

    /// How long the current job has been running, `None` when idle.
    pub fn busy_for(&self) -> Option<Duration> {
        let since = self.busy_since.load(Ordering::Acquire);
        if since == 0 {
            return None;
        }
        let now = self.origin.elapsed().as_millis() as u64 + 1;
        Some(Duration::from_millis(now.saturating_sub(since)))
    }

    /// Detaches the lane: its bindings stop touching shared state and it
    /// exits before the next job, if it ever gets there.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

pub(crate) struct Timer {
    pub callback: JsObject,
    pub args: Vec<JsValue>,
    pub owner: Option<SinkId>,
    pub abort: AbortHandle,
}

pub(crate) struct LaneLocal {
    pub registry: Arc<HandlerRegistry>,
    pub state: Arc<GlobalState>,
    pub runtime: Handle,
    /// Weak so pending timers never keep the queue open on their own
    pub jobs: mpsc::WeakSender<Job>,
    pub progress: Arc<LaneProgress>,
    pub handlers: HashMap<HandlerId, JsObject>,
    pub sinks: HashMap<SinkId, Sink>,
    pub timers: HashMap<TimerId, Timer>,
    pub active: Option<SinkId>,
    next_sink: SinkId,
    next_timer: TimerId,
}

impl LaneLocal {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        state: Arc<GlobalState>,
        runtime: Handle,
        jobs: mpsc::WeakSender<Job>,
        progress: Arc<LaneProgress>,
    ) -> Self {
        Self {
            registry,
            state,
            runtime,
            jobs,
            progress,
            handlers: HashMap::new(),
            sinks: HashMap::new(),
            timers: HashMap::new(),
            active: None,
            next_sink: 1,
            next_timer: 1,
        }
    }

    pub fn open_sink(&mut self, handler: Option<OpenHandler>) -> SinkId {
        let id = self.next_sink;
        self.next_sink += 1;
        self.sinks.insert(id, Sink::new(handler));
        id
    }

    pub fn next_timer_id(&mut self) -> TimerId {
        let id = self.next_timer;
        self.next_timer += 1;
        id
    }

    /// Appends a console line to the active sink, if any.
    pub fn log(&mut self, line: String) {
        if let Some(sink) = self.active.and_then(|id| self.sinks.get_mut(&id)) {
            sink.logs.push(line);
        }
    }

    /// Adjusts the outstanding timer count of a handler sink.
    pub fn timer_settled(&mut self, owner: Option<SinkId>) {
        if let Some(handler) = owner
            .and_then(|id| self.sinks.get_mut(&id))
            .and_then(|sink| sink.handler.as_mut())
        {
            handler.timers = handler.timers.saturating_sub(1);
        }
    }

    /// Handler sinks still waiting for completion.
    pub fn open_handlers(&self) -> Vec<SinkId> {
        let mut ids: Vec<SinkId> = self
            .sinks
            .iter()
            .filter(|(_, sink)| sink.handler.is_some())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

thread_local! {
    static LANE: RefCell<Option<LaneLocal>> = const { RefCell::new(None) };
}

pub(crate) fn install(local: LaneLocal) {
    LANE.with(|cell| *cell.borrow_mut() = Some(local));
}

/// Takes the lane state out of the thread so it can be dropped before the context.
pub(crate) fn uninstall() -> Option<LaneLocal> {
    LANE.with(|cell| cell.borrow_mut().take())
}

/// Runs `f` against the lane state. `None` off the lane thread or once the
/// lane has been retired.
pub(crate) fn with_lane<R>(f: impl FnOnce(&mut LaneLocal) -> R) -> Option<R> {
    LANE.with(|cell| {
        cell.borrow_mut()
            .as_mut()
            .filter(|lane| !lane.progress.is_retired())
            .map(f)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracks_current_job() {
        let progress = LaneProgress::new();
        assert_eq!(progress.busy_for(), None);

        progress.begin();
        std::thread::sleep(Duration::from_millis(5));
        assert!(progress.busy_for().unwrap() >= Duration::from_millis(5));

        progress.end();
        assert_eq!(progress.busy_for(), None);
    }

    #[test]
    fn test_retired_lane_is_unreachable() {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (jobs, _receiver) = mpsc::channel::<Job>(1);
        let progress = Arc::new(LaneProgress::new());
        install(LaneLocal::new(
            Arc::new(HandlerRegistry::new()),
            Arc::new(GlobalState::new()),
            runtime.handle().clone(),
            jobs.downgrade(),
            progress.clone(),
        ));

        assert_eq!(with_lane(|lane| lane.open_sink(None)), Some(1));
        progress.retire();
        assert!(with_lane(|lane| lane.open_sink(None)).is_none());
        assert!(uninstall().is_some());
    }
}
