//! This crate provides the cooperative execution core of the dougless runtime.
//!
//! The [`EventLoop`] serializes all access to a loop-owned state object (the
//! JavaScript realm, in the full runtime) on a single dedicated thread. Every
//! other thread submits work by enqueuing tasks through a [`Handle`]; nothing
//! else ever touches the state object. The [`TimerRegistry`] layers named,
//! cancellable one-shot and repeating timers on top of the loop's
//! delayed-task primitive.
#![deny(dead_code, missing_docs, unused_mut)]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(any(test, debug_assertions), allow(clippy::disallowed_macros))]

mod clock;
mod error;
mod event_loop;
mod metrics;
mod timers;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{LoopError, StderrSink, TaskErrorSink, TaskFailure};
pub use event_loop::{DelayedTask, EventLoop, Handle, LoopState, TaskId, WorkGuard};
pub use timers::{MIN_TIMER_RESOLUTION, TimerFire, TimerId, TimerKind, TimerRegistry};
