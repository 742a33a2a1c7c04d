//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g.
/// `RUST_LOG=sectorstream::repository=trace` to follow cache evictions.
///
/// # Example
/// ```
/// sectorstream::core::logging::init();
/// log::info!("Sector streaming started");
/// ```
pub fn init() {
    // try_init so hosts and tests can call this more than once
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();
}
