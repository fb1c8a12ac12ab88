//! The runtime: event loop + realm wiring.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dougless_core::{
    Clock, EventLoop, Handle, LoopError, MonotonicClock, StderrSink, TaskErrorSink, WorkGuard,
};
use dougless_permissions::PermissionManager;

use crate::realm::JsRealm;
use crate::script::Script;

/// Everything a [`Runtime`] needs besides its scripts.
pub struct RuntimeOptions {
    /// The permission gate consulted by every privileged host operation.
    pub permissions: Arc<PermissionManager>,
    /// The time source the loop and the timers schedule against.
    pub clock: Arc<dyn Clock>,
    /// Where callback panics and uncaught exceptions are reported.
    pub error_sink: Arc<dyn TaskErrorSink>,
}

impl RuntimeOptions {
    /// Options with the default clock and the stderr error sink.
    pub fn new(permissions: Arc<PermissionManager>) -> Self {
        Self {
            permissions,
            clock: Arc::new(MonotonicClock),
            error_sink: Arc::new(StderrSink),
        }
    }

    /// Substitute the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Substitute the error sink.
    pub fn with_error_sink(mut self, sink: Arc<dyn TaskErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }
}

/// How a finished runtime came to rest.
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    script_failed: bool,
}

impl ExitStatus {
    /// Whether the run finished without an uncaught top-level script error.
    pub fn success(&self) -> bool {
        !self.script_failed
    }

    /// The process exit code this status maps to.
    pub fn code(&self) -> i32 {
        if self.script_failed { 1 } else { 0 }
    }
}

/// A running dougless instance: one event loop owning one QuickJS realm.
///
/// The runtime holds a keep-alive tick from construction until
/// [`run_to_completion`](Runtime::run_to_completion), so the loop cannot
/// drain to termination between creation and the first scheduled script.
pub struct Runtime {
    event_loop: EventLoop<JsRealm>,
    handle: Handle<JsRealm>,
    script_failed: Arc<AtomicBool>,
    startup_guard: Option<WorkGuard<JsRealm>>,
}

impl Runtime {
    /// Build the realm on a fresh loop thread and return once the loop is
    /// accepting work.
    pub fn new(options: RuntimeOptions) -> Result<Self, LoopError> {
        let mut event_loop = EventLoop::with_parts(options.clock, options.error_sink.clone());
        let handle = event_loop.handle();
        let script_failed = Arc::new(AtomicBool::new(false));

        let permissions = options.permissions;
        let sink = options.error_sink;
        let failed = script_failed.clone();
        event_loop.start(move |loop_handle| {
            JsRealm::new(loop_handle.clone(), permissions, sink, failed)
        })?;

        let startup_guard = Some(handle.work_guard());
        Ok(Self {
            event_loop,
            handle,
            script_failed,
            startup_guard,
        })
    }

    /// The loop's scheduling handle.
    pub fn handle(&self) -> Handle<JsRealm> {
        self.handle.clone()
    }

    /// Schedule a script for evaluation on the loop thread.
    pub fn execute(&self, script: Script) -> Result<(), LoopError> {
        self.handle.schedule_now(move |realm| {
            realm.eval_main(script.name(), script.content());
        })?;
        Ok(())
    }

    /// Evaluate one expression on the loop thread and wait for its rendered
    /// result (the REPL's round trip). The outer error means the loop is
    /// gone; the inner one is the script's.
    pub fn eval_blocking(&self, source: String) -> Result<Result<String, String>, LoopError> {
        let (tx, rx) = crossbeam::channel::bounded(1);
        self.handle.schedule_now(move |realm| {
            let _ = tx.send(realm.eval_expression(&source));
        })?;
        rx.recv().map_err(|_| LoopError::Terminated)
    }

    /// Request loop termination (current task finishes, ready queue drains,
    /// delayed tasks drop).
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Release the startup keep-alive and wait for the loop to run out of
    /// work (or finish stopping).
    pub fn run_to_completion(self) -> ExitStatus {
        let Runtime {
            event_loop,
            script_failed,
            startup_guard,
            ..
        } = self;
        drop(startup_guard);
        event_loop.join();
        ExitStatus {
            script_failed: script_failed.load(Ordering::SeqCst),
        }
    }
}
