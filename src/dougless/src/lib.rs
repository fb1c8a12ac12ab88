//! This crate is the dougless JavaScript runtime: a QuickJS realm owned by a
//! single-threaded cooperative event loop, with timers, permission-gated
//! host APIs executed on background workers, a line-oriented REPL, and the
//! `dougless` binary tying them together.
//!
//! The realm and everything that can touch it live on the loop thread; host
//! operations resolve their arguments there, run their blocking work (and
//! any interactive permission prompt) on a worker, and re-enter the loop
//! with exactly one resumption task per completion.
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(any(test, debug_assertions), allow(clippy::disallowed_macros))]

mod bridge;
mod error;
mod globals;
mod metrics;
mod realm;
pub mod repl;
mod runtime;
mod script;
mod workers;

/// The host-side error taxonomy delivered to JavaScript callbacks and
/// promise rejections.
pub use error::HostError;
/// The realm type the event loop owns; appears in handle signatures.
pub use realm::JsRealm;
/// The runtime: event loop + realm wiring.
pub use runtime::{ExitStatus, Runtime, RuntimeOptions};
/// A script plus the source-directory metadata config discovery needs.
pub use script::Script;

/// Core scheduling surface, re-exported for embedders.
pub use dougless_core::{
    Clock, Handle, LoopError, ManualClock, MonotonicClock, StderrSink, TaskErrorSink, TaskFailure,
};
/// Permission gate, re-exported for embedders.
pub use dougless_permissions::{
    CONFIG_FILE_NAME, Decision, PermissionDescriptor, PermissionKind, PermissionManager,
    PermissionManagerBuilder, PromptResponse, Prompter, TerminalPrompter,
};
