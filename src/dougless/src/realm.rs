//! The QuickJS realm owned by the event-loop thread.
//!
//! `JsRealm` is the loop-owned state object: the engine, the context, and
//! the loop-thread-only registries that map timer and operation ids to
//! persistent JavaScript callback references. Cross-thread task closures
//! carry plain ids and data; the callback itself is resolved here, at
//! dispatch time, which is what makes a cancellation racing an in-flight
//! completion a clean no-op.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context as _;
use dougless_core::{Handle, TaskErrorSink, TaskFailure, TimerFire, TimerId, TimerRegistry};
use dougless_permissions::PermissionManager;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Exception, Function, Persistent, Value};

use crate::bridge::{OpCompletion, OpId, OpTable};
use crate::error::HostError;
use crate::globals;

/// The pieces of the realm that JS bindings capture: the scheduling handle,
/// the timer registry, the callback registries, and the permission gate.
///
/// Cloning is shallow; every clone addresses the same realm.
#[derive(Clone)]
pub(crate) struct RealmCore {
    pub(crate) handle: Handle<JsRealm>,
    pub(crate) timers: TimerRegistry<JsRealm>,
    pub(crate) timer_slots: Rc<RefCell<HashMap<TimerId, Persistent<Function<'static>>>>>,
    pub(crate) ops: Rc<RefCell<OpTable>>,
    pub(crate) permissions: Arc<PermissionManager>,
    pub(crate) script_failed: Arc<AtomicBool>,
    pub(crate) sink: Arc<dyn TaskErrorSink>,
}

/// The JavaScript realm: engine, context, and callback registries.
///
/// Created on the loop thread by the loop's init closure and never moved off
/// it.
pub struct JsRealm {
    rt: rquickjs::Runtime,
    context: Context,
    core: RealmCore,
}

impl JsRealm {
    pub(crate) fn new(
        handle: Handle<JsRealm>,
        permissions: Arc<PermissionManager>,
        sink: Arc<dyn TaskErrorSink>,
        script_failed: Arc<AtomicBool>,
    ) -> anyhow::Result<JsRealm> {
        let rt = rquickjs::Runtime::new().context("unable to initialize the QuickJS runtime")?;
        let context = Context::full(&rt).context("unable to create the JS context")?;

        let timers = TimerRegistry::new(handle.clone(), |realm: &mut JsRealm, id, fire| {
            realm.fire_timer(id, fire);
        });
        let core = RealmCore {
            handle,
            timers,
            timer_slots: Rc::new(RefCell::new(HashMap::new())),
            ops: Rc::new(RefCell::new(OpTable::default())),
            permissions,
            script_failed,
            sink,
        };

        context
            .with(|ctx| globals::setup(&ctx, &core))
            .context("installing runtime globals")?;

        Ok(JsRealm { rt, context, core })
    }

    /// Evaluate the main script. A top-level throw is fatal: it is reported,
    /// the failure flag is set, and the loop is asked to stop (draining per
    /// its stop policy). Errors inside callbacks scheduled by the script are
    /// not fatal and go through [`fire_timer`](Self::fire_timer) /
    /// [`complete_op`](Self::complete_op) instead.
    pub(crate) fn eval_main(&mut self, name: &str, source: &str) {
        let result = self.context.with(|ctx| {
            ctx.eval::<(), _>(source)
                .catch(&ctx)
                .map_err(|err| describe_caught(&err))
        });
        if let Err(message) = result {
            self.core.script_failed.store(true, Ordering::SeqCst);
            self.core.sink.report(&TaskFailure::Callback {
                context: "script",
                message: format!("{name}: {message}"),
            });
            self.core.handle.stop();
        }
        self.drain_microtasks();
    }

    /// Evaluate one REPL line and render the result.
    pub(crate) fn eval_expression(&mut self, source: &str) -> Result<String, String> {
        let result = self.context.with(|ctx| {
            match ctx.eval::<Value, _>(source).catch(&ctx) {
                Ok(value) => {
                    if value.is_undefined() {
                        return Ok("undefined".to_string());
                    }
                    match ctx.json_stringify(value.clone()) {
                        Ok(Some(text)) => Ok(text.to_string().unwrap_or_default()),
                        // Values JSON cannot express (functions, symbols).
                        _ => Ok(format!("{value:?}")),
                    }
                }
                Err(err) => Err(describe_caught(&err)),
            }
        });
        self.drain_microtasks();
        result
    }

    /// Run a timer callback. The callback reference is looked up now, so a
    /// timer cleared after its firing became due finds no slot and does
    /// nothing. An uncaught exception is reported and the loop continues;
    /// repeating timers keep firing.
    pub(crate) fn fire_timer(&mut self, id: TimerId, fire: TimerFire) {
        let callback = self.core.timer_slots.borrow().get(&id).cloned();
        let Some(callback) = callback else {
            return;
        };
        if fire == TimerFire::Final {
            self.core.timer_slots.borrow_mut().remove(&id);
        }
        let result = self.context.with(|ctx| -> Result<(), String> {
            let function = callback.restore(&ctx).map_err(|err| err.to_string())?;
            function
                .call::<_, ()>(())
                .catch(&ctx)
                .map_err(|err| describe_caught(&err))
        });
        if let Err(message) = result {
            self.core.sink.report(&TaskFailure::Callback {
                context: "timer callback",
                message,
            });
        }
        self.drain_microtasks();
    }

    /// Deliver a host-operation outcome: error-first callback invocation, or
    /// promise resolution/rejection, exactly once, on this thread.
    pub(crate) fn complete_op(&mut self, op: OpId, outcome: Result<serde_json::Value, HostError>) {
        let Some(completion) = self.core.ops.borrow_mut().take(op) else {
            return;
        };
        let result = self.context.with(|ctx| -> Result<(), String> {
            match completion {
                OpCompletion::Callback(callback) => {
                    let function = callback.restore(&ctx).map_err(|err| err.to_string())?;
                    let (error, payload) = match &outcome {
                        Ok(payload) => (
                            Value::new_null(ctx.clone()),
                            json_to_js(&ctx, payload).map_err(|err| err.to_string())?,
                        ),
                        Err(err) => (
                            host_error_value(&ctx, err).map_err(|err| err.to_string())?,
                            Value::new_undefined(ctx.clone()),
                        ),
                    };
                    function
                        .call::<_, ()>((error, payload))
                        .catch(&ctx)
                        .map_err(|err| describe_caught(&err))
                }
                OpCompletion::Promise { resolve, reject } => match &outcome {
                    Ok(payload) => {
                        let resolve = resolve.restore(&ctx).map_err(|err| err.to_string())?;
                        let value = json_to_js(&ctx, payload).map_err(|err| err.to_string())?;
                        resolve
                            .call::<_, ()>((value,))
                            .catch(&ctx)
                            .map_err(|err| describe_caught(&err))
                    }
                    Err(err) => {
                        let reject = reject.restore(&ctx).map_err(|err| err.to_string())?;
                        let value = host_error_value(&ctx, err).map_err(|err| err.to_string())?;
                        reject
                            .call::<_, ()>((value,))
                            .catch(&ctx)
                            .map_err(|err| describe_caught(&err))
                    }
                },
            }
        });
        if let Err(message) = result {
            self.core.sink.report(&TaskFailure::Callback {
                context: "host operation completion",
                message,
            });
        }
        self.drain_microtasks();
    }

    /// Run the engine's queued promise jobs to exhaustion. Resolutions are
    /// pushed through the VM's own job queue so handler ordering follows ES
    /// semantics; this is called after every entry into JavaScript.
    fn drain_microtasks(&mut self) {
        loop {
            match self.rt.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(_) => {
                    // The job's exception is consumed with it; report and
                    // keep draining.
                    self.core.sink.report(&TaskFailure::Callback {
                        context: "promise job",
                        message: "a queued promise job raised an uncaught error".to_string(),
                    });
                }
            }
        }
    }
}

impl Drop for JsRealm {
    fn drop(&mut self) {
        // Persistent references must be released before the context, or the
        // engine aborts on leaked GC objects at teardown.
        self.core.timer_slots.borrow_mut().clear();
        self.core.ops.borrow_mut().clear();
    }
}

/// Render a caught JavaScript error with its stack when one is available.
pub(crate) fn describe_caught(err: &CaughtError<'_>) -> String {
    match err {
        CaughtError::Exception(exception) => {
            let message = exception
                .message()
                .unwrap_or_else(|| "unknown error".to_string());
            match exception.stack() {
                Some(stack) if !stack.is_empty() => format!("{message}\n{stack}"),
                _ => message,
            }
        }
        CaughtError::Value(value) => format!("{value:?}"),
        CaughtError::Error(error) => error.to_string(),
    }
}

/// Parse a JSON payload into a JS value through the engine's JSON parser.
fn json_to_js<'js>(ctx: &Ctx<'js>, payload: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    let text = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    ctx.json_parse(text)
}

/// Build the error-shaped value handed to callbacks and rejections: an
/// `Error` with the taxonomy code on a `code` property.
fn host_error_value<'js>(ctx: &Ctx<'js>, err: &HostError) -> rquickjs::Result<Value<'js>> {
    let exception = Exception::from_message(ctx.clone(), &err.to_string())?;
    exception.set("code", err.code())?;
    Ok(exception.as_value().clone())
}
