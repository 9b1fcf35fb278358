use env_logger::Env;

/// Default filter when `RUST_LOG` is not set; message bodies are logged at debug
pub const DEFAULT_FILTER: &str = "debug";

/// Installs the process-wide logger. Call once, before any component starts.
pub fn init(default_filter: &str) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init()
}
