//! Process-wide logger bootstrap.

/// Environment variable holding the `env_logger` filter, e.g. `little_xr=debug`.
pub const LOG_ENV: &str = "LITTLE_XR_LOG";

/// Install `env_logger`, filtered by `LITTLE_XR_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let env = env_logger::Env::new().filter_or(LOG_ENV, "info");
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}
