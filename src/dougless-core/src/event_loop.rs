//! The single-threaded cooperative event loop.
//!
//! The loop owns a state object `S` (the JavaScript realm in the full
//! runtime) that is built on the loop thread and never leaves it. All other
//! threads interact with the loop through a [`Handle`], which enqueues
//! `FnOnce(&mut S)` task closures onto a ready queue, registers delayed
//! tasks on a deadline heap, or ticks the outstanding-work counter that
//! keeps the loop alive while background work is in flight.
//!
//! Ordering: the ready queue is a single linearizable channel, so tasks
//! submitted in order from one thread run in that order, and an enqueue from
//! worker A that happens-before worker B's enqueue dispatches strictly
//! before it. Delayed tasks run in deadline order, submission order breaking
//! ties.
//!
//! Stop policy: `stop` finishes the current task, drains every task already
//! in the ready queue, and drops all delayed tasks uniformly — including
//! those whose deadline has already passed.

use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};
use parking_lot::Mutex;

use crate::clock::{Clock, MonotonicClock};
use crate::error::{LoopError, StderrSink, TaskErrorSink, TaskFailure};
use crate::metrics::{METRIC_TASK_PANICS, METRIC_TASKS_DISPATCHED};

/// Identifies a task within one event loop instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The lifecycle state of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopState {
    /// Created but not yet started.
    Idle = 0,
    /// The loop thread is dispatching tasks.
    Running = 1,
    /// A stop was requested; the loop is draining the ready queue.
    Stopping = 2,
    /// The loop thread has exited. Scheduling fails from here on.
    Terminated = 3,
}

impl LoopState {
    fn from_u8(raw: u8) -> LoopState {
        match raw {
            0 => LoopState::Idle,
            1 => LoopState::Running,
            2 => LoopState::Stopping,
            _ => LoopState::Terminated,
        }
    }
}

struct Task<S> {
    id: TaskId,
    run: Box<dyn FnOnce(&mut S) + Send + 'static>,
}

enum Message<S> {
    Run(Task<S>),
    /// Re-evaluate timers and the exit condition; carries no work.
    Wake,
    Stop,
}

struct DelayedEntry<S> {
    deadline: Instant,
    seq: u64,
    /// Claim flag shared with the [`DelayedTask`] handle. Whoever swaps it
    /// to `true` first owns the entry: the loop runs it, or `cancel`
    /// suppresses it.
    claimed: Arc<AtomicBool>,
    task: Task<S>,
}

impl<S> PartialEq for DelayedEntry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<S> Eq for DelayedEntry<S> {}

impl<S> PartialOrd for DelayedEntry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<S> Ord for DelayedEntry<S> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap is a max-heap; invert so the earliest deadline (then the
        // earliest submission) surfaces first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Shared<S> {
    tx: Sender<Message<S>>,
    state: AtomicU8,
    /// Serializes the loop's exit decision against in-flight schedule calls,
    /// so a task accepted by `schedule_now` is never silently dropped by a
    /// racing shutdown.
    gate: Mutex<()>,
    keep_alive: AtomicUsize,
    delayed: Mutex<BinaryHeap<DelayedEntry<S>>>,
    /// Number of heap entries that have not been claimed (run or cancelled).
    delayed_live: AtomicUsize,
    next_task: AtomicU64,
    next_seq: AtomicU64,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn TaskErrorSink>,
}

impl<S: 'static> Shared<S> {
    fn load_state(&self) -> LoopState {
        LoopState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn check_open(&self) -> Result<(), LoopError> {
        match self.load_state() {
            LoopState::Idle | LoopState::Running => Ok(()),
            LoopState::Stopping => Err(LoopError::Stopping),
            LoopState::Terminated => Err(LoopError::Terminated),
        }
    }

    fn new_task(&self, f: impl FnOnce(&mut S) + Send + 'static) -> Task<S> {
        Task {
            id: TaskId(self.next_task.fetch_add(1, Ordering::SeqCst)),
            run: Box::new(f),
        }
    }

    /// Send a user-visible message, refusing once the loop winds down.
    fn send_user(&self, msg: Message<S>) -> Result<(), LoopError> {
        let _gate = self.gate.lock();
        self.check_open()?;
        self.tx.send(msg).map_err(|_| LoopError::Terminated)
    }

    /// Send a control message; losing it after termination is harmless.
    fn send_control(&self, msg: Message<S>) {
        let _ = self.tx.send(msg);
    }

    fn run_task(&self, state: &mut S, task: Task<S>) {
        metrics::counter!(METRIC_TASKS_DISPATCHED).increment(1);
        let id = task.id;
        let run = task.run;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| run(state))) {
            metrics::counter!(METRIC_TASK_PANICS).increment(1);
            self.sink.report(&TaskFailure::Panic {
                task: id,
                message: panic_message(payload),
            });
        }
    }

    /// Pop the next delayed task whose deadline has passed, skipping
    /// cancelled entries.
    fn pop_due(&self) -> Option<Task<S>> {
        let now = self.clock.now();
        let mut heap = self.delayed.lock();
        while heap.peek().is_some_and(|e| e.deadline <= now) {
            let entry = heap.pop()?;
            if !entry.claimed.swap(true, Ordering::SeqCst) {
                self.delayed_live.fetch_sub(1, Ordering::SeqCst);
                return Some(entry.task);
            }
        }
        None
    }

    /// Deadline of the nearest live delayed task, purging cancelled entries
    /// from the top of the heap on the way.
    fn next_deadline(&self) -> Option<Instant> {
        let mut heap = self.delayed.lock();
        while heap
            .peek()
            .is_some_and(|e| e.claimed.load(Ordering::SeqCst))
        {
            heap.pop();
        }
        heap.peek().map(|e| e.deadline)
    }

    fn terminate(&self) {
        let _gate = self.gate.lock();
        self.state.store(LoopState::Terminated as u8, Ordering::SeqCst);
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The cross-thread scheduling surface of an [`EventLoop`].
///
/// Handles are cheap to clone and safe to use from any thread, including
/// from inside tasks running on the loop itself.
pub struct Handle<S: 'static> {
    shared: Arc<Shared<S>>,
}

impl<S: 'static> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<S: 'static> Handle<S> {
    /// Enqueue a task for immediate dispatch, behind everything already in
    /// the ready queue.
    pub fn schedule_now(
        &self,
        f: impl FnOnce(&mut S) + Send + 'static,
    ) -> Result<TaskId, LoopError> {
        let task = self.shared.new_task(f);
        let id = task.id;
        self.shared.send_user(Message::Run(task))?;
        Ok(id)
    }

    /// Enqueue a task that becomes ready at `deadline`.
    pub fn schedule_at(
        &self,
        deadline: Instant,
        f: impl FnOnce(&mut S) + Send + 'static,
    ) -> Result<DelayedTask<S>, LoopError> {
        let task = self.shared.new_task(f);
        let claimed = Arc::new(AtomicBool::new(false));
        let entry = DelayedEntry {
            deadline,
            seq: self.shared.next_seq.fetch_add(1, Ordering::SeqCst),
            claimed: claimed.clone(),
            task,
        };
        {
            let _gate = self.shared.gate.lock();
            self.shared.check_open()?;
            self.shared.delayed.lock().push(entry);
            self.shared.delayed_live.fetch_add(1, Ordering::SeqCst);
        }
        // The loop may be parked with an unrelated (or no) timeout.
        self.shared.send_control(Message::Wake);
        Ok(DelayedTask {
            claimed,
            shared: self.shared.clone(),
        })
    }

    /// Enqueue a task that becomes ready after `delay`.
    pub fn schedule_after(
        &self,
        delay: Duration,
        f: impl FnOnce(&mut S) + Send + 'static,
    ) -> Result<DelayedTask<S>, LoopError> {
        self.schedule_at(self.shared.clock.now() + delay, f)
    }

    /// Increment the outstanding-work counter. The loop will not exit while
    /// the counter is positive, even with an empty ready queue.
    pub fn keep_alive(&self) {
        self.shared.keep_alive.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the outstanding-work counter.
    pub fn done(&self) {
        let previous = self.shared.keep_alive.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "done() without a matching keep_alive()");
        if previous == 1 {
            self.shared.send_control(Message::Wake);
        }
    }

    /// An RAII keep-alive tick: the counter is incremented now and
    /// decremented when the guard drops.
    pub fn work_guard(&self) -> WorkGuard<S> {
        self.keep_alive();
        WorkGuard {
            handle: self.clone(),
        }
    }

    /// Request loop termination. The current task finishes, the ready queue
    /// drains, delayed tasks are dropped. Idempotent.
    pub fn stop(&self) {
        // A never-started loop has no thread to drain; close it outright.
        if self
            .shared
            .state
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Terminated as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            return;
        }
        if self
            .shared
            .state
            .compare_exchange(
                LoopState::Running as u8,
                LoopState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
        {
            self.shared.send_control(Message::Stop);
        }
    }

    /// The loop's current lifecycle state.
    pub fn state(&self) -> LoopState {
        self.shared.load_state()
    }

    /// The clock the loop schedules against.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.shared.clock
    }
}

/// RAII form of [`Handle::keep_alive`]/[`Handle::done`].
pub struct WorkGuard<S: 'static> {
    handle: Handle<S>,
}

impl<S: 'static> Drop for WorkGuard<S> {
    fn drop(&mut self) {
        self.handle.done();
    }
}

impl<S: 'static> fmt::Debug for WorkGuard<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkGuard").finish()
    }
}

/// A cancellation handle for a task scheduled with [`Handle::schedule_at`]
/// or [`Handle::schedule_after`].
pub struct DelayedTask<S: 'static> {
    claimed: Arc<AtomicBool>,
    shared: Arc<Shared<S>>,
}

impl<S: 'static> DelayedTask<S> {
    /// Prevent the task from running. A no-op if it already ran or was
    /// already cancelled.
    pub fn cancel(&self) {
        if !self.claimed.swap(true, Ordering::SeqCst) {
            self.shared.delayed_live.fetch_sub(1, Ordering::SeqCst);
            // Wake the loop so an otherwise-idle loop can re-check its exit
            // condition instead of sleeping until the dead entry's deadline.
            self.shared.send_control(Message::Wake);
        }
    }
}

impl<S: 'static> fmt::Debug for DelayedTask<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedTask")
            .field("claimed", &self.claimed.load(Ordering::SeqCst))
            .finish()
    }
}

/// A single-threaded cooperative event loop owning a state object `S`.
///
/// `S` is built on the loop thread by the closure passed to [`start`]
/// (`EventLoop::start`) and is only ever touched by tasks dispatched there.
/// `S` does not need to be `Send`.
pub struct EventLoop<S: 'static> {
    shared: Arc<Shared<S>>,
    rx: Option<Receiver<Message<S>>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<S: 'static> EventLoop<S> {
    /// Create an idle loop with the default monotonic clock and stderr sink.
    pub fn new() -> Self {
        Self::with_parts(Arc::new(MonotonicClock), Arc::new(StderrSink))
    }

    /// Create an idle loop with an explicit clock and task-failure sink.
    pub fn with_parts(clock: Arc<dyn Clock>, sink: Arc<dyn TaskErrorSink>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                tx,
                state: AtomicU8::new(LoopState::Idle as u8),
                gate: Mutex::new(()),
                keep_alive: AtomicUsize::new(0),
                delayed: Mutex::new(BinaryHeap::new()),
                delayed_live: AtomicUsize::new(0),
                next_task: AtomicU64::new(1),
                next_seq: AtomicU64::new(1),
                clock,
                sink,
            }),
            rx: Some(rx),
            thread: None,
        }
    }

    /// A scheduling handle for this loop.
    pub fn handle(&self) -> Handle<S> {
        Handle {
            shared: self.shared.clone(),
        }
    }

    /// Launch the loop thread and return immediately.
    ///
    /// `init` runs first on the loop thread to build the loop-owned state;
    /// if it fails, the failure is routed to the sink and the loop
    /// terminates without dispatching anything.
    pub fn start<F>(&mut self, init: F) -> Result<(), LoopError>
    where
        F: FnOnce(&Handle<S>) -> anyhow::Result<S> + Send + 'static,
    {
        let rx = self.rx.take().ok_or(LoopError::AlreadyStarted)?;
        self.shared
            .state
            .compare_exchange(
                LoopState::Idle as u8,
                LoopState::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| LoopError::AlreadyStarted)?;

        let shared = self.shared.clone();
        let thread = thread::Builder::new()
            .name("dougless-loop".to_string())
            .spawn(move || run_loop(shared, rx, init))
            .map_err(LoopError::Spawn)?;
        self.thread = Some(thread);
        Ok(())
    }

    /// Request termination (see [`Handle::stop`]).
    pub fn stop(&self) {
        self.handle().stop();
    }

    /// Block until the loop thread exits. Does not itself request a stop:
    /// the loop exits when it runs out of work or after [`stop`]
    /// (`EventLoop::stop`).
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl<S: 'static> Default for EventLoop<S> {
    fn default() -> Self {
        Self::new()
    }
}

enum Flow {
    Continue,
    Shutdown,
}

fn run_loop<S: 'static, F>(shared: Arc<Shared<S>>, rx: Receiver<Message<S>>, init: F)
where
    F: FnOnce(&Handle<S>) -> anyhow::Result<S> + Send + 'static,
{
    let handle = Handle {
        shared: shared.clone(),
    };
    let mut state = match catch_unwind(AssertUnwindSafe(|| init(&handle))) {
        Ok(Ok(state)) => state,
        Ok(Err(err)) => {
            shared.sink.report(&TaskFailure::Init {
                message: format!("{err:#}"),
            });
            shared.terminate();
            return;
        }
        Err(payload) => {
            shared.sink.report(&TaskFailure::Init {
                message: panic_message(payload),
            });
            shared.terminate();
            return;
        }
    };
    tracing::debug!("event loop started");

    loop {
        // Delayed tasks whose deadline passed run first, in deadline order.
        while let Some(task) = shared.pop_due() {
            shared.run_task(&mut state, task);
        }

        match rx.try_recv() {
            Ok(msg) => match dispatch(&shared, &mut state, msg) {
                Flow::Continue => continue,
                Flow::Shutdown => break drain_and_terminate(&shared, &rx, &mut state),
            },
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                shared.terminate();
                break;
            }
        }

        // Idle: park until the nearest deadline, or indefinitely while
        // keep-alive holders remain, or exit when nothing is left.
        let received = match shared.next_deadline() {
            Some(deadline) => {
                let now = shared.clock.now();
                if deadline <= now {
                    continue;
                }
                match rx.recv_timeout(deadline - now) {
                    Ok(msg) => Some(msg),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
            None => {
                if shared.keep_alive.load(Ordering::SeqCst) == 0 {
                    // Exit candidate. Decide under the gate so a schedule
                    // call can never slip a task past the emptiness check.
                    let gate = shared.gate.lock();
                    if rx.is_empty()
                        && shared.delayed_live.load(Ordering::SeqCst) == 0
                        && shared.keep_alive.load(Ordering::SeqCst) == 0
                    {
                        shared.state.store(LoopState::Terminated as u8, Ordering::SeqCst);
                        drop(gate);
                        break;
                    }
                    drop(gate);
                    continue;
                }
                match rx.recv() {
                    Ok(msg) => Some(msg),
                    Err(_) => None,
                }
            }
        };
        match received {
            Some(msg) => match dispatch(&shared, &mut state, msg) {
                Flow::Continue => {}
                Flow::Shutdown => break drain_and_terminate(&shared, &rx, &mut state),
            },
            None => {
                shared.terminate();
                break;
            }
        }
    }
    tracing::debug!("event loop terminated");
}

fn dispatch<S: 'static>(shared: &Arc<Shared<S>>, state: &mut S, msg: Message<S>) -> Flow {
    match msg {
        Message::Run(task) => {
            shared.run_task(state, task);
            Flow::Continue
        }
        Message::Wake => Flow::Continue,
        Message::Stop => Flow::Shutdown,
    }
}

/// Stop-time drain: run what is already in the ready queue, drop every
/// delayed task, then close the loop.
fn drain_and_terminate<S: 'static>(
    shared: &Arc<Shared<S>>,
    rx: &Receiver<Message<S>>,
    state: &mut S,
) {
    while let Ok(msg) = rx.try_recv() {
        if let Message::Run(task) = msg {
            shared.run_task(state, task);
        }
    }
    let mut dropped = 0usize;
    {
        let mut heap = shared.delayed.lock();
        // Claim each entry so a cancel handle arriving later sees it as
        // already settled.
        for entry in heap.drain() {
            if !entry.claimed.swap(true, Ordering::SeqCst) {
                shared.delayed_live.fetch_sub(1, Ordering::SeqCst);
                dropped += 1;
            }
        }
    }
    if dropped > 0 {
        tracing::debug!(dropped, "dropped delayed tasks at stop");
    }
    shared.terminate();
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Log, event: &'static str) -> impl FnOnce(&mut ()) + Send + 'static {
        let log = log.clone();
        move |_| log.lock().push(event)
    }

    fn started_loop() -> (EventLoop<()>, Handle<()>) {
        let mut ev = EventLoop::new();
        let handle = ev.handle();
        ev.start(|_| Ok(())).unwrap();
        (ev, handle)
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<String>>);

    impl TaskErrorSink for CollectingSink {
        fn report(&self, failure: &TaskFailure) {
            self.0.lock().push(failure.to_string());
        }
    }

    #[test]
    fn ready_tasks_run_in_submission_order() {
        let log = new_log();
        let (ev, handle) = started_loop();

        let guard = handle.work_guard();
        handle.schedule_now(record(&log, "a")).unwrap();
        handle.schedule_now(record(&log, "b")).unwrap();
        handle.schedule_now(record(&log, "c")).unwrap();
        drop(guard);
        ev.join();

        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn delayed_tasks_run_in_deadline_order() {
        let log = new_log();
        let (ev, handle) = started_loop();

        // Submit out of order; deadlines decide.
        handle
            .schedule_after(Duration::from_millis(60), record(&log, "late"))
            .unwrap();
        handle
            .schedule_after(Duration::from_millis(20), record(&log, "early"))
            .unwrap();
        ev.join();

        assert_eq!(*log.lock(), vec!["early", "late"]);
    }

    #[test]
    fn equal_deadlines_fall_back_to_submission_order() {
        let log = new_log();
        let (ev, handle) = started_loop();

        let deadline = handle.clock().now() + Duration::from_millis(30);
        handle.schedule_at(deadline, record(&log, "first")).unwrap();
        handle.schedule_at(deadline, record(&log, "second")).unwrap();
        ev.join();

        assert_eq!(*log.lock(), vec!["first", "second"]);
    }

    #[test]
    fn stop_drains_ready_queue_and_drops_delayed_tasks() {
        let log = new_log();
        let (ev, handle) = started_loop();

        let guard = handle.work_guard();
        handle
            .schedule_after(Duration::from_secs(30), record(&log, "delayed"))
            .unwrap();
        handle.schedule_now(record(&log, "ready")).unwrap();
        handle.stop();
        drop(guard);

        let begin = Instant::now();
        ev.join();
        assert!(begin.elapsed() < Duration::from_secs(5));
        assert_eq!(*log.lock(), vec!["ready"]);
    }

    #[test]
    fn scheduling_fails_after_stop() {
        let (ev, handle) = started_loop();
        handle.stop();

        let err = loop {
            match handle.schedule_now(|_| {}) {
                Err(err) => break err,
                // The stop request may not have been picked up yet.
                Ok(_) => std::thread::yield_now(),
            }
        };
        assert!(matches!(err, LoopError::Stopping | LoopError::Terminated));
        ev.join();
        assert!(matches!(
            handle.schedule_now(|_| {}),
            Err(LoopError::Terminated)
        ));
    }

    #[test]
    fn loop_exits_once_work_runs_out() {
        let (ev, handle) = started_loop();
        ev.join();
        assert_eq!(handle.state(), LoopState::Terminated);
        assert!(matches!(
            handle.schedule_now(|_| {}),
            Err(LoopError::Terminated)
        ));
    }

    #[test]
    fn keep_alive_holds_the_loop_open() {
        let log = new_log();
        let (ev, handle) = started_loop();

        let guard = handle.work_guard();
        let worker_handle = handle.clone();
        let worker_log = log.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(80));
            worker_handle
                .schedule_now(record(&worker_log, "from-worker"))
                .unwrap();
            drop(guard);
        });

        let begin = Instant::now();
        ev.join();
        worker.join().unwrap();

        assert!(begin.elapsed() >= Duration::from_millis(80));
        assert_eq!(*log.lock(), vec!["from-worker"]);
    }

    #[test]
    fn a_panicking_task_does_not_take_down_the_loop() {
        let log = new_log();
        let sink = Arc::new(CollectingSink::default());
        let mut ev: EventLoop<()> =
            EventLoop::with_parts(Arc::new(MonotonicClock), sink.clone());
        let handle = ev.handle();
        ev.start(|_| Ok(())).unwrap();

        let guard = handle.work_guard();
        handle.schedule_now(|_| panic!("boom")).unwrap();
        handle.schedule_now(record(&log, "survivor")).unwrap();
        drop(guard);
        ev.join();

        assert_eq!(*log.lock(), vec!["survivor"]);
        let failures = sink.0.lock();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("boom"), "got: {}", failures[0]);
    }

    #[test]
    fn cancelled_delayed_task_never_runs() {
        let log = new_log();
        let (ev, handle) = started_loop();

        let guard = handle.work_guard();
        let delayed = handle
            .schedule_after(Duration::from_millis(40), record(&log, "cancelled"))
            .unwrap();
        delayed.cancel();
        delayed.cancel(); // idempotent

        thread::sleep(Duration::from_millis(90));
        handle.schedule_now(record(&log, "marker")).unwrap();
        drop(guard);
        ev.join();

        assert_eq!(*log.lock(), vec!["marker"]);
    }

    #[test]
    fn init_failure_terminates_without_dispatch() {
        let sink = Arc::new(CollectingSink::default());
        let mut ev: EventLoop<()> =
            EventLoop::with_parts(Arc::new(MonotonicClock), sink.clone());
        let handle = ev.handle();
        ev.start(|_| anyhow::bail!("no realm for you")).unwrap();
        ev.join();

        assert_eq!(handle.state(), LoopState::Terminated);
        let failures = sink.0.lock();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].contains("no realm for you"));
    }

    #[test]
    fn second_start_is_rejected() {
        let mut ev: EventLoop<()> = EventLoop::new();
        ev.start(|_| Ok(())).unwrap();
        assert!(matches!(
            ev.start(|_| Ok(())),
            Err(LoopError::AlreadyStarted)
        ));
        ev.join();
    }
}
