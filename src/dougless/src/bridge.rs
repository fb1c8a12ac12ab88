//! The host bridge: the one pattern every privileged JS-visible API uses.
//!
//! On the loop thread the binding resolves its arguments, registers a
//! completion (the caller's callback, or a fresh promise pair) in the op
//! table, and takes a keep-alive tick. A worker then runs the permission
//! checks — which may prompt — and the blocking work, enqueues exactly one
//! resumption task carrying the outcome, and releases the keep-alive tick
//! the moment the resumption is enqueued. Denials travel the same road as
//! results: a host call never re-enters JavaScript synchronously.

use std::collections::HashMap;
use std::fmt;

use dougless_permissions::PermissionKind;
use rquickjs::{Ctx, Function, Persistent, Promise, Value};

use crate::error::HostError;
use crate::metrics::{METRIC_HOST_OP_API_LABEL, METRIC_HOST_OPS};
use crate::realm::{JsRealm, RealmCore};
use crate::workers;

/// Identifies a pending host operation in the realm's op table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OpId(u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// How a host operation reports back into JavaScript.
pub(crate) enum OpCompletion {
    /// Error-first callback supplied by the caller.
    Callback(Persistent<Function<'static>>),
    /// Resolving functions of the promise returned to the caller.
    Promise {
        resolve: Persistent<Function<'static>>,
        reject: Persistent<Function<'static>>,
    },
}

/// Pending completions, keyed by op id. Loop-thread only.
#[derive(Default)]
pub(crate) struct OpTable {
    next: u64,
    pending: HashMap<u64, OpCompletion>,
}

impl OpTable {
    pub(crate) fn register(&mut self, completion: OpCompletion) -> OpId {
        self.next += 1;
        let id = self.next;
        self.pending.insert(id, completion);
        OpId(id)
    }

    /// Removes the completion; the second take for an id finds nothing,
    /// which is what makes resolve/reject exactly-once.
    pub(crate) fn take(&mut self, id: OpId) -> Option<OpCompletion> {
        self.pending.remove(&id.0)
    }

    pub(crate) fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Register the completion channel for a host call: the caller's callback
/// when one was passed, otherwise a fresh promise whose value is returned to
/// JavaScript.
fn register_completion<'js>(
    ctx: &Ctx<'js>,
    core: &RealmCore,
    callback: Option<Function<'js>>,
) -> rquickjs::Result<(OpId, Value<'js>)> {
    let (completion, result) = match callback {
        Some(function) => (
            OpCompletion::Callback(Persistent::save(ctx, function)),
            Value::new_undefined(ctx.clone()),
        ),
        None => {
            let (promise, resolve, reject) = Promise::new(ctx)?;
            (
                OpCompletion::Promise {
                    resolve: Persistent::save(ctx, resolve),
                    reject: Persistent::save(ctx, reject),
                },
                promise.as_value().clone(),
            )
        }
    };
    let op = core.ops.borrow_mut().register(completion);
    Ok((op, result))
}

/// Submit a host operation: permission checks and `work` run on a worker,
/// the outcome is enqueued as one resumption task.
pub(crate) fn queue_op<'js, W>(
    ctx: &Ctx<'js>,
    core: &RealmCore,
    api: &'static str,
    callback: Option<Function<'js>>,
    checks: Vec<(PermissionKind, String)>,
    work: W,
) -> rquickjs::Result<Value<'js>>
where
    W: FnOnce() -> Result<serde_json::Value, HostError> + Send + 'static,
{
    metrics::counter!(METRIC_HOST_OPS, METRIC_HOST_OP_API_LABEL => api).increment(1);
    let (op, result) = register_completion(ctx, core, callback)?;

    let handle = core.handle.clone();
    let permissions = core.permissions.clone();
    let guard = handle.work_guard();
    workers::spawn(move || {
        let outcome = (move || {
            for (kind, resource) in &checks {
                if !permissions.check_with_prompt(*kind, resource, None) {
                    return Err(HostError::PermissionDenied {
                        kind: *kind,
                        resource: resource.clone(),
                    });
                }
            }
            work()
        })();
        if handle
            .schedule_now(move |realm: &mut JsRealm| realm.complete_op(op, outcome))
            .is_err()
        {
            tracing::debug!(api, %op, "event loop closed before a host operation completed");
        }
        // Release the keep-alive tick now that the resumption is enqueued
        // (not when it is consumed).
        drop(guard);
    });

    Ok(result)
}

/// Deliver an error detected before any work was submitted. Still routed
/// through the loop so the caller never observes a synchronous re-entry.
pub(crate) fn fail_op<'js>(
    ctx: &Ctx<'js>,
    core: &RealmCore,
    api: &'static str,
    callback: Option<Function<'js>>,
    error: HostError,
) -> rquickjs::Result<Value<'js>> {
    metrics::counter!(METRIC_HOST_OPS, METRIC_HOST_OP_API_LABEL => api).increment(1);
    let (op, result) = register_completion(ctx, core, callback)?;
    if core
        .handle
        .schedule_now(move |realm: &mut JsRealm| realm.complete_op(op, Err(error)))
        .is_err()
    {
        tracing::debug!(api, %op, "event loop closed before a host error could be delivered");
    }
    Ok(result)
}
