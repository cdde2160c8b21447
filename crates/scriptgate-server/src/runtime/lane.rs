//! The execution lane
//!
//! One OS thread owns the Boa [`Context`] for the life of the process and
//! pulls [`Job`]s from a bounded channel in FIFO order, so at most one job is
//! ever executing inside the interpreter.
//!
//! After every job the lane drains promise jobs and then sweeps the open
//! handler responses:
//!
//! - submitter gone: the response is dropped
//! - body written or the handler failed: complete
//! - pending promise settled: complete with the inferred value or the rejection
//! - no promise and no outstanding timers: complete as is (an empty 200 if
//!   nothing was written)
//!
//! The lane publishes when its current job started through [`LaneProgress`]
//! so the dispatcher can replace a lane that never comes back.

use std::rc::Rc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use boa_engine::builtins::promise::PromiseState;
use boa_engine::object::builtins::JsPromise;
use boa_engine::{Context, JsError, JsObject, JsValue, Source};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use scriptgate_common::protocol::{Result, ScriptgateError, TraceId};

use crate::bridge::ScriptRequest;
use crate::dispatcher::{ExecutionResult, InvokeOutcome};
use crate::registry::{HandlerId, HandlerRegistry, RouteMatch};
use crate::resource_limits::ResourceLimits;
use crate::runtime::conversions::js_value_to_json;
use crate::runtime::job_executor::LaneJobExecutor;
use crate::runtime::local::{self, with_lane, LaneLocal, LaneProgress, OpenHandler, SinkId};
use crate::runtime::{bindings, describe_error, plain_message, script_error};
use crate::state::GlobalState;

/// Work submitted to the lane.
pub(crate) enum Job {
    Invoke {
        handler: HandlerId,
        content_type: Option<String>,
        request: ScriptRequest,
        reply: oneshot::Sender<Result<InvokeOutcome>>,
        trace_id: TraceId,
        submitted_at: Instant,
    },
    Execute {
        code: String,
        label: String,
        reply: oneshot::Sender<ExecutionResult>,
        trace_id: TraceId,
        submitted_at: Instant,
    },
    /// A `setTimeout` delay elapsed
    Timer { id: u64 },
    /// Drop the callable behind a deleted or replaced handler
    Release { handler: HandlerId },
    Shutdown,
}

/// Everything the lane thread needs to start.
pub(crate) struct LaneSetup {
    pub limits: ResourceLimits,
    pub registry: Arc<HandlerRegistry>,
    pub state: Arc<GlobalState>,
    pub bootstrap: Option<String>,
    pub runtime: Handle,
    pub jobs: mpsc::WeakSender<Job>,
    pub progress: Arc<LaneProgress>,
}

/// Starts the lane thread.
///
/// `ready` receives the bootstrap outcome (or a context setup failure)
/// before the lane accepts its first job.
pub(crate) fn spawn(
    setup: LaneSetup,
    receiver: mpsc::Receiver<Job>,
    ready: oneshot::Sender<Result<Option<ExecutionResult>>>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("scriptgate-lane".to_string())
        .spawn(move || run_lane(setup, receiver, ready))
}

fn run_lane(
    setup: LaneSetup,
    receiver: mpsc::Receiver<Job>,
    ready: oneshot::Sender<Result<Option<ExecutionResult>>>,
) {
    let executor = Rc::new(LaneJobExecutor::new());
    let ctx = match build_context(&executor, &setup.limits) {
        Ok(ctx) => ctx,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    local::install(LaneLocal::new(
        setup.registry,
        setup.state,
        setup.runtime,
        setup.jobs,
        setup.progress.clone(),
    ));

    let mut lane = Lane {
        ctx,
        executor,
        progress: setup.progress,
    };
    let bootstrap = setup
        .bootstrap
        .map(|code| lane.evaluate(&code, "bootstrap", 0));
    let failed = bootstrap.as_ref().is_some_and(|result| result.error.is_some());

    if ready.send(Ok(bootstrap)).is_ok() && !failed {
        tracing::info!("Execution lane started");
        lane.run(receiver);
    }

    // Script objects held by the tables must go before the context
    if let Some(local) = local::uninstall() {
        for timer in local.timers.values() {
            timer.abort.abort();
        }
        drop(local);
    }
    drop(lane);
    tracing::info!("Execution lane stopped");
}

fn build_context(executor: &Rc<LaneJobExecutor>, limits: &ResourceLimits) -> Result<Context> {
    let mut ctx = Context::builder()
        .job_executor(executor.clone())
        .build()
        .map_err(|e| script_error(format!("failed to create script context: {}", e)))?;

    let runtime_limits = ctx.runtime_limits_mut();
    runtime_limits.set_loop_iteration_limit(limits.loop_iteration_limit);
    runtime_limits.set_recursion_limit(limits.recursion_limit);

    bindings::install(&mut ctx)?;
    Ok(ctx)
}

fn as_promise(value: &JsValue) -> Option<JsPromise> {
    value
        .as_object()
        .and_then(|object| JsPromise::from_object(object.clone()).ok())
}

enum SweepStep {
    Keep,
    Abandon,
    Complete,
    Settle(JsPromise),
}

struct Lane {
    ctx: Context,
    executor: Rc<LaneJobExecutor>,
    progress: Arc<LaneProgress>,
}

impl Lane {
    fn run(&mut self, mut receiver: mpsc::Receiver<Job>) {
        while let Some(job) = receiver.blocking_recv() {
            if self.progress.is_retired() {
                tracing::warn!("Retired execution lane came back, exiting");
                break;
            }

            self.progress.begin();
            let running = self.handle(job);
            if running {
                self.executor.drain(&mut self.ctx);
                self.sweep();
            }
            self.progress.end();

            if !running {
                break;
            }
        }
    }

    /// Runs one job. `false` once the lane should stop.
    fn handle(&mut self, job: Job) -> bool {
        match job {
            Job::Invoke {
                handler,
                content_type,
                request,
                reply,
                trace_id,
                submitted_at,
            } => {
                tracing::debug!(
                    trace_id,
                    %handler,
                    queued_us = submitted_at.elapsed().as_micros() as u64,
                    "Invoking handler"
                );
                self.invoke(handler, content_type, request, reply, trace_id);
            }
            Job::Execute {
                code,
                label,
                reply,
                trace_id,
                submitted_at,
            } => {
                if reply.is_closed() {
                    tracing::debug!(trace_id, "Submitter gone before execution, skipping");
                    return true;
                }
                tracing::debug!(
                    trace_id,
                    %label,
                    queued_us = submitted_at.elapsed().as_micros() as u64,
                    "Executing script"
                );
                let result = self.evaluate(&code, &label, trace_id);
                if reply.send(result).is_err() {
                    tracing::debug!(trace_id, "Submitter stopped waiting, discarding late result");
                }
            }
            Job::Timer { id } => self.fire_timer(id),
            Job::Release { handler } => {
                let released = with_lane(|lane| lane.handlers.remove(&handler)).flatten();
                if released.is_some() {
                    tracing::debug!(%handler, "Released handler callable");
                }
            }
            Job::Shutdown => return false,
        }
        true
    }

    /// Evaluates raw code under a scratch sink; used for bootstrap and admin execution.
    fn evaluate(&mut self, code: &str, label: &str, trace_id: TraceId) -> ExecutionResult {
        let started = Instant::now();
        let sink = with_lane(|lane| {
            let id = lane.open_sink(None);
            lane.active = Some(id);
            id
        });

        let outcome = match self.ctx.eval(Source::from_bytes(code.as_bytes())) {
            Ok(value) => {
                self.executor.drain(&mut self.ctx);
                self.settle_raw(value)
            }
            Err(err) => Err(describe_error(&err, &mut self.ctx)),
        };

        let logs = with_lane(|lane| {
            lane.active = None;
            sink.and_then(|id| lane.sinks.remove(&id))
                .map(|sink| sink.logs)
                .unwrap_or_default()
        })
        .unwrap_or_default();

        if let Err(message) = &outcome {
            tracing::warn!(trace_id, %label, "Script failed: {}", message);
        }

        let (value, error) = match outcome {
            Ok(value) => (value, None),
            Err(message) => (None, Some(message)),
        };
        ExecutionResult {
            value,
            logs,
            error,
            elapsed: started.elapsed(),
        }
    }

    /// A raw result promise is unwrapped when already settled; a pending one yields nothing.
    fn settle_raw(&mut self, value: JsValue) -> std::result::Result<Option<Value>, String> {
        let value = match as_promise(&value) {
            Some(promise) => match promise.state() {
                PromiseState::Pending => return Ok(None),
                PromiseState::Fulfilled(value) => value,
                PromiseState::Rejected(reason) => {
                    return Err(describe_error(&JsError::from_opaque(reason), &mut self.ctx));
                }
            },
            None => value,
        };

        let json = js_value_to_json(value, &mut self.ctx).map_err(plain_message)?;
        Ok((!json.is_null()).then_some(json))
    }

    fn invoke(
        &mut self,
        handler: HandlerId,
        content_type: Option<String>,
        mut request: ScriptRequest,
        reply: oneshot::Sender<Result<InvokeOutcome>>,
        trace_id: TraceId,
    ) {
        if reply.is_closed() {
            tracing::debug!(trace_id, "Submitter gone before handler ran, skipping");
            return;
        }

        let Some(resolved) = with_lane(|lane| resolve(lane, handler, &request)) else {
            return;
        };
        let (callable, content_type) = match resolved {
            Resolved::Current(callable) => (callable, content_type),
            Resolved::Rerouted(callable, route) => {
                tracing::debug!(
                    trace_id,
                    %handler,
                    now = %route.descriptor.handler,
                    "Handler was replaced while queued, using its successor"
                );
                request.params = route.params;
                (callable, route.descriptor.content_type)
            }
            Resolved::Gone => {
                tracing::debug!(trace_id, %handler, "Handler was removed while queued");
                let _ = reply.send(Err(ScriptgateError::NotFound {
                    method: request.method.to_ascii_uppercase(),
                    path: request.path,
                }));
                return;
            }
        };

        let opened = with_lane(|lane| {
            let sink = lane.open_sink(Some(OpenHandler {
                reply,
                content_type,
                pending: None,
                timers: 0,
                failure: None,
                value: None,
                trace_id,
                started: Instant::now(),
            }));
            lane.active = Some(sink);
            sink
        });
        let Some(sink) = opened else {
            return;
        };

        if let Err(message) = self.call_handler(&callable, &request, sink) {
            tracing::debug!(trace_id, "Handler threw: {}", message);
            self.fail(sink, message);
        }

        self.executor.drain(&mut self.ctx);
        with_lane(|lane| lane.active = None);
    }

    fn call_handler(
        &mut self,
        callable: &JsObject,
        request: &ScriptRequest,
        sink: SinkId,
    ) -> std::result::Result<(), String> {
        let request = request
            .to_script_value(&mut self.ctx)
            .map_err(plain_message)?;
        let response = bindings::response_object(sink, &mut self.ctx);

        let returned = callable
            .call(&JsValue::undefined(), &[request, response.into()], &mut self.ctx)
            .map_err(|err| describe_error(&err, &mut self.ctx))?;

        if let Some(promise) = as_promise(&returned) {
            with_lane(|lane| {
                if let Some(handler) = lane.sinks.get_mut(&sink).and_then(|s| s.handler.as_mut()) {
                    handler.pending = Some(promise);
                }
            });
            return Ok(());
        }

        let value = js_value_to_json(returned, &mut self.ctx).map_err(plain_message)?;
        record_value(sink, value);
        Ok(())
    }

    fn fire_timer(&mut self, id: u64) {
        let fired = with_lane(|lane| {
            let timer = lane.timers.remove(&id)?;
            lane.timer_settled(timer.owner);
            let owner = timer.owner.filter(|sink| lane.sinks.contains_key(sink));
            lane.active = owner;
            Some((timer, owner))
        })
        .flatten();
        let Some((timer, owner)) = fired else {
            return;
        };

        if let Err(err) = timer
            .callback
            .call(&JsValue::undefined(), &timer.args, &mut self.ctx)
        {
            let message = describe_error(&err, &mut self.ctx);
            tracing::warn!(timer = id, "Timer callback threw: {}", message);
            if let Some(owner) = owner {
                self.fail(owner, message);
            }
        }

        self.executor.drain(&mut self.ctx);
        with_lane(|lane| lane.active = None);
    }

    /// Marks a handler as failed; the first failure is kept.
    fn fail(&self, sink: SinkId, message: String) {
        with_lane(|lane| {
            if let Some(handler) = lane.sinks.get_mut(&sink).and_then(|s| s.handler.as_mut()) {
                handler.failure.get_or_insert(message);
            }
        });
    }

    fn sweep(&mut self) {
        let open = with_lane(|lane| lane.open_handlers()).unwrap_or_default();

        for sink in open {
            let step = with_lane(|lane| inspect(lane, sink)).unwrap_or(SweepStep::Keep);
            match step {
                SweepStep::Keep => {}
                SweepStep::Abandon => {
                    let dropped = with_lane(|lane| lane.sinks.remove(&sink)).flatten();
                    if dropped.is_some() {
                        tracing::debug!(sink, "Dropping response abandoned by its submitter");
                    }
                }
                SweepStep::Complete => complete(sink),
                SweepStep::Settle(promise) => {
                    let state = promise.state();
                    if matches!(state, PromiseState::Pending) {
                        continue;
                    }

                    // Getters and toString run script code while the value is read
                    with_lane(|lane| lane.active = Some(sink));
                    match state {
                        PromiseState::Pending => {}
                        PromiseState::Fulfilled(value) => match js_value_to_json(value, &mut self.ctx) {
                            Ok(json) => record_value(sink, json),
                            Err(e) => self.fail(sink, plain_message(e)),
                        },
                        PromiseState::Rejected(reason) => {
                            let message = describe_error(&JsError::from_opaque(reason), &mut self.ctx);
                            self.fail(sink, message);
                        }
                    }
                    with_lane(|lane| lane.active = None);
                    complete(sink);
                }
            }
        }
    }
}

enum Resolved {
    Current(JsObject),
    /// The queued handler was replaced; the route now resolves to this one
    Rerouted(JsObject, RouteMatch),
    Gone,
}

/// Finds the callable for a queued invocation.
///
/// A handler released between lookup and execution is resolved again
/// through the registry so requests that raced a re-registration reach the
/// new handler.
fn resolve(lane: &LaneLocal, handler: HandlerId, request: &ScriptRequest) -> Resolved {
    if let Some(callable) = lane.handlers.get(&handler) {
        return Resolved::Current(callable.clone());
    }
    lane.registry
        .lookup(&request.method, &request.path)
        .and_then(|route| {
            let callable = lane.handlers.get(&route.descriptor.handler)?.clone();
            Some(Resolved::Rerouted(callable, route))
        })
        .unwrap_or(Resolved::Gone)
}

fn inspect(lane: &LaneLocal, id: SinkId) -> SweepStep {
    let Some(sink) = lane.sinks.get(&id) else {
        return SweepStep::Keep;
    };
    let Some(handler) = &sink.handler else {
        return SweepStep::Keep;
    };

    if handler.reply.is_closed() {
        SweepStep::Abandon
    } else if handler.failure.is_some() || sink.response.has_body() {
        SweepStep::Complete
    } else if let Some(promise) = &handler.pending {
        SweepStep::Settle(promise.clone())
    } else if handler.timers == 0 {
        SweepStep::Complete
    } else {
        SweepStep::Keep
    }
}

/// Writes a handler's usable return value as its inferred body.
fn record_value(sink: SinkId, value: Value) {
    if value.is_null() {
        return;
    }
    with_lane(|lane| {
        if let Some(sink) = lane.sinks.get_mut(&sink) {
            if let Some(handler) = sink.handler.as_mut() {
                sink.response
                    .write_inferred(value.clone(), handler.content_type.as_deref());
                handler.value = Some(value);
            }
        }
    });
}

fn complete(sink: SinkId) {
    if let Some(sink) = with_lane(|lane| lane.sinks.remove(&sink)).flatten() {
        sink.complete(None);
    }
}
