//! Shared `tracing` initialization, so the CLI and any embedding caller get
//! the same env-filter-driven subscriber setup.

/// Initialize a global `tracing` subscriber honoring `RUST_LOG`, falling
/// back to `info` when it is unset or invalid. Idempotent within a single
/// process is not guaranteed — call this exactly once, typically at the top
/// of `main`.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
