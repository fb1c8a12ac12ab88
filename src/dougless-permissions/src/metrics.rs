/*!
This module contains the definitions of the metrics emitted by the
permission gate.
*/

// Counters, policy queries
pub(crate) static METRIC_PERMISSION_QUERIES: &str = "permission_queries_total";
pub(crate) static METRIC_PERMISSION_KIND_LABEL: &str = "kind";
pub(crate) static METRIC_PERMISSION_OUTCOME_LABEL: &str = "outcome";

// Counters, interactive prompts
pub(crate) static METRIC_PERMISSION_PROMPTS: &str = "permission_prompts_total";
