//! Telemetry helpers for structured logging.

/// Install the default env-filtered fmt subscriber unless the host application
/// already set one. Filter directives come from `RUST_LOG`, e.g.
/// `RUST_LOG=prometheus_task_fabric=debug`.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
