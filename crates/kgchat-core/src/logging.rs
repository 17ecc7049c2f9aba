//! Structured logging with `tracing`.
//!
//! Every component logs through `tracing` macros with structured fields
//! (`agent_id`, `frame_type`, `attempt`, ...). The binary installs a single
//! stderr subscriber at startup via [`init_subscriber`].

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Arguments
///
/// * `level` - Minimum log level to display (e.g. `"warn"`, `"kgchat_client=debug"`).
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already installed
    let _ = subscriber.try_init();
}
