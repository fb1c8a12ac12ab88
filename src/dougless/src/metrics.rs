/*!
This module contains the definitions of the metrics emitted by the host
bridge.
*/

// Counters, host operations submitted through the bridge
pub(crate) static METRIC_HOST_OPS: &str = "host_ops_total";
pub(crate) static METRIC_HOST_OP_API_LABEL: &str = "api";
