/*!
This module contains the definitions of the metrics emitted by the event loop
and the timer registry.
*/

// Counters, task dispatch
pub(crate) static METRIC_TASKS_DISPATCHED: &str = "eventloop_tasks_dispatched_total";
pub(crate) static METRIC_TASK_PANICS: &str = "eventloop_task_panics_total";

// Counters, timer lifecycle
pub(crate) static METRIC_TIMERS_SET: &str = "timers_set_total";
pub(crate) static METRIC_TIMERS_FIRED: &str = "timers_fired_total";
pub(crate) static METRIC_TIMERS_CLEARED: &str = "timers_cleared_total";
