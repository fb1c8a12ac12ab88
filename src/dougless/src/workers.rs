//! Shared worker pool for blocking host operations.
//!
//! A lazily-initialized tokio runtime whose blocking pool carries every
//! filesystem, subprocess and HTTP call the bridge submits, so the loop
//! thread never blocks. If runtime creation fails the `None` is cached
//! permanently and operations fall back to dedicated threads.

use std::sync::LazyLock;

use tokio::runtime::Runtime;

/// Environment variable to configure the number of worker runtime core
/// threads.
pub(crate) const ENV_WORKER_THREADS: &str = "DOUGLESS_WORKER_THREADS";

/// Default number of core threads for the worker runtime.
const DEFAULT_WORKER_THREADS: usize = 4;

static WORKER_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    let workers = std::env::var(ENV_WORKER_THREADS)
        .ok()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_WORKER_THREADS);

    match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("dougless-worker")
        .enable_time()
        .build()
    {
        Ok(runtime) => {
            tracing::debug!(workers, "initialized worker runtime");
            Some(runtime)
        }
        Err(err) => {
            tracing::error!(
                "failed to create the worker runtime: {err}. Host operations will run on \
                 dedicated threads."
            );
            None
        }
    }
});

/// Run `task` off the loop thread.
pub(crate) fn spawn(task: impl FnOnce() + Send + 'static) {
    match WORKER_RUNTIME.as_ref() {
        Some(runtime) => {
            runtime.spawn_blocking(task);
        }
        None => {
            if let Err(err) = std::thread::Builder::new()
                .name("dougless-worker".to_string())
                .spawn(task)
            {
                tracing::error!(%err, "failed to spawn a fallback worker thread");
            }
        }
    }
}
