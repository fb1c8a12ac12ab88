//! Named, cancellable timers layered on the event loop's delayed tasks.
//!
//! The registry never holds callback references itself: it owns the timer
//! bookkeeping (ids, periods, keep-alive ticks, cancellation) and calls a
//! dispatch function with the timer id when a firing is due. The loop-owned
//! state resolves the id to the actual callback at execution time, which is
//! what makes a `clear` racing an already-due firing a reliable no-op.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::LoopError;
use crate::event_loop::{DelayedTask, Handle, WorkGuard};
use crate::metrics::{METRIC_TIMERS_CLEARED, METRIC_TIMERS_FIRED, METRIC_TIMERS_SET};

/// Delays below this are coerced up to it.
pub const MIN_TIMER_RESOLUTION: Duration = Duration::from_millis(1);

/// Identifies a timer for the life of its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// The raw id value, as handed to guest code.
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild an id from the raw value guest code handed back.
    pub fn from_u64(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of timer to arm.
#[derive(Debug, Clone, Copy)]
pub enum TimerKind {
    /// Fires once after `delay`.
    Once {
        /// Time until the single firing.
        delay: Duration,
    },
    /// Fires after `initial`, then every `period` on a monotonic base
    /// (`next = current_firing_deadline + period`), so callback stalls do
    /// not stretch the cadence.
    Repeating {
        /// Time until the first firing.
        initial: Duration,
        /// Spacing between subsequent firings.
        period: Duration,
    },
}

/// Tells the dispatch function whether the timer remains armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerFire {
    /// A repeating timer; the next firing is already scheduled.
    Repeat,
    /// The last firing this timer will produce; its registration is gone.
    Final,
}

struct TimerEntry<S: 'static> {
    period: Option<Duration>,
    sched: DelayedTask<S>,
    /// Holds the loop open while the timer is armed.
    _work: WorkGuard<S>,
}

struct Inner<S: 'static> {
    handle: Handle<S>,
    dispatch: Box<dyn Fn(&mut S, TimerId, TimerFire) + Send + Sync>,
    timers: Mutex<HashMap<TimerId, TimerEntry<S>>>,
    next_id: AtomicU64,
}

/// The timer registry: fresh ids, one-shot and repeating timers, idempotent
/// cancellation.
pub struct TimerRegistry<S: 'static> {
    inner: Arc<Inner<S>>,
}

impl<S: 'static> Clone for TimerRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: 'static> TimerRegistry<S> {
    /// Create a registry scheduling onto `handle`. `dispatch` is invoked on
    /// the loop thread for every firing that survives cancellation checks.
    pub fn new(
        handle: Handle<S>,
        dispatch: impl Fn(&mut S, TimerId, TimerFire) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle,
                dispatch: Box::new(dispatch),
                timers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Arm a timer and return its fresh id.
    pub fn set(&self, kind: TimerKind) -> Result<TimerId, LoopError> {
        let (delay, period) = match kind {
            TimerKind::Once { delay } => (delay, None),
            TimerKind::Repeating { initial, period } => {
                (initial, Some(period.max(MIN_TIMER_RESOLUTION)))
            }
        };
        let delay = delay.max(MIN_TIMER_RESOLUTION);

        let id = TimerId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let deadline = self.inner.handle.clock().now() + delay;
        let work = self.inner.handle.work_guard();
        {
            // Holding the registry lock across scheduling keeps a
            // short-delay firing from looking up the entry before it exists.
            let mut timers = self.inner.timers.lock();
            let sched = self
                .inner
                .handle
                .schedule_at(deadline, firing(self.inner.clone(), id, deadline))?;
            timers.insert(
                id,
                TimerEntry {
                    period,
                    sched,
                    _work: work,
                },
            );
        }
        metrics::counter!(METRIC_TIMERS_SET).increment(1);
        Ok(id)
    }

    /// Cancel a timer. Unknown and already-cleared ids are silent no-ops; a
    /// firing that is already due but not yet dispatched is suppressed.
    pub fn clear(&self, id: TimerId) {
        if let Some(entry) = self.inner.timers.lock().remove(&id) {
            entry.sched.cancel();
            metrics::counter!(METRIC_TIMERS_CLEARED).increment(1);
        }
    }

    /// Whether the timer is still armed.
    pub fn is_armed(&self, id: TimerId) -> bool {
        self.inner.timers.lock().contains_key(&id)
    }

    /// Number of armed timers.
    pub fn armed_count(&self) -> usize {
        self.inner.timers.lock().len()
    }
}

fn firing<S: 'static>(
    inner: Arc<Inner<S>>,
    id: TimerId,
    deadline: Instant,
) -> impl FnOnce(&mut S) + Send + 'static {
    move |state| fire(state, &inner, id, deadline)
}

fn fire<S: 'static>(state: &mut S, inner: &Arc<Inner<S>>, id: TimerId, deadline: Instant) {
    let fire_kind = {
        let mut timers = inner.timers.lock();
        match timers.get_mut(&id) {
            // Cleared after this firing became due; suppress.
            None => return,
            Some(entry) => match entry.period {
                None => {
                    timers.remove(&id);
                    TimerFire::Final
                }
                Some(period) => {
                    // Re-arm before running the callback so a slow callback
                    // does not push the cadence.
                    let next = deadline + period;
                    match inner
                        .handle
                        .schedule_at(next, firing(inner.clone(), id, next))
                    {
                        Ok(sched) => {
                            entry.sched = sched;
                            TimerFire::Repeat
                        }
                        Err(_) => {
                            // Loop is winding down; let the timer end.
                            timers.remove(&id);
                            TimerFire::Final
                        }
                    }
                }
            },
        }
    };
    metrics::counter!(METRIC_TIMERS_FIRED).increment(1);
    (inner.dispatch)(state, id, fire_kind);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;

    type Log = Arc<Mutex<Vec<(TimerId, TimerFire, Instant)>>>;

    fn timer_loop() -> (EventLoop<()>, Handle<()>, TimerRegistry<()>, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let mut ev = EventLoop::new();
        let handle = ev.handle();
        ev.start(|_| Ok(())).unwrap();
        let dispatch_log = log.clone();
        let registry = TimerRegistry::new(handle.clone(), move |_state: &mut (), id, kind| {
            dispatch_log.lock().push((id, kind, Instant::now()));
        });
        (ev, handle, registry, log)
    }

    #[test]
    fn one_shot_fires_exactly_once() {
        let (ev, _handle, registry, log) = timer_loop();
        let id = registry
            .set(TimerKind::Once {
                delay: Duration::from_millis(10),
            })
            .unwrap();
        ev.join();

        let fired = log.lock();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, id);
        assert_eq!(fired[0].1, TimerFire::Final);
        assert!(!registry.is_armed(id));
    }

    #[test]
    fn many_one_shots_fire_once_each() {
        let (ev, _handle, registry, log) = timer_loop();
        let mut ids = Vec::new();
        for _ in 0..8 {
            ids.push(
                registry
                    .set(TimerKind::Once {
                        delay: Duration::ZERO,
                    })
                    .unwrap(),
            );
        }
        ev.join();

        let fired = log.lock();
        assert_eq!(fired.len(), 8);
        let mut seen: Vec<TimerId> = fired.iter().map(|(id, _, _)| *id).collect();
        seen.sort_by_key(|id| id.as_u64());
        ids.sort_by_key(|id| id.as_u64());
        assert_eq!(seen, ids);
    }

    #[test]
    fn ids_are_never_reused() {
        let (ev, handle, registry, _log) = timer_loop();
        let a = registry
            .set(TimerKind::Once {
                delay: Duration::ZERO,
            })
            .unwrap();
        let b = registry
            .set(TimerKind::Once {
                delay: Duration::ZERO,
            })
            .unwrap();
        assert_ne!(a, b);
        handle.stop();
        ev.join();
    }

    #[test]
    fn clearing_before_the_deadline_suppresses_the_callback() {
        let (ev, handle, registry, log) = timer_loop();
        let guard = handle.work_guard();
        let id = registry
            .set(TimerKind::Once {
                delay: Duration::from_millis(40),
            })
            .unwrap();
        registry.clear(id);
        assert!(!registry.is_armed(id));

        std::thread::sleep(Duration::from_millis(90));
        drop(guard);
        ev.join();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn clearing_unknown_ids_is_silent() {
        let (ev, handle, registry, _log) = timer_loop();
        registry.clear(TimerId::from_u64(0));
        registry.clear(TimerId::from_u64(424242));
        let id = registry
            .set(TimerKind::Once {
                delay: Duration::ZERO,
            })
            .unwrap();
        registry.clear(id);
        registry.clear(id); // second clear of the same id
        handle.stop();
        ev.join();
    }

    #[test]
    fn repeating_timer_keeps_its_cadence_until_cleared() {
        let (ev, handle, registry, log) = timer_loop();
        let period = Duration::from_millis(25);
        let id = registry
            .set(TimerKind::Repeating {
                initial: period,
                period,
            })
            .unwrap();

        std::thread::sleep(Duration::from_millis(140));
        registry.clear(id);
        ev.join();

        let fired = log.lock();
        assert!(
            fired.len() >= 3,
            "expected at least 3 firings, got {}",
            fired.len()
        );
        assert!(fired.iter().all(|(_, kind, _)| *kind == TimerFire::Repeat));
        for pair in fired.windows(2) {
            let gap = pair[1].2 - pair[0].2;
            // Monotonic re-arming keeps entries at least a period apart,
            // modulo scheduler jitter on the early side.
            assert!(
                gap >= period.mul_f64(0.8),
                "firings only {gap:?} apart (period {period:?})"
            );
        }
    }

    #[test]
    fn zero_delay_is_coerced_to_the_minimum_resolution() {
        let (ev, _handle, registry, log) = timer_loop();
        registry
            .set(TimerKind::Once {
                delay: Duration::ZERO,
            })
            .unwrap();
        ev.join();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn armed_timer_alone_keeps_the_loop_alive() {
        let (ev, _handle, registry, log) = timer_loop();
        let begin = Instant::now();
        registry
            .set(TimerKind::Once {
                delay: Duration::from_millis(70),
            })
            .unwrap();
        ev.join();
        assert!(begin.elapsed() >= Duration::from_millis(70));
        assert_eq!(log.lock().len(), 1);
    }
}
