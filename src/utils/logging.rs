use log::LevelFilter;

///
/// Initializes the global logger. env_logger writes whole records at a
/// time, so concurrent tasks never interleave within a log line. The
/// `RUST_LOG` environment variable still overrides the level picked here.
///
pub fn init_logging(log_level: LevelFilter) {
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();
}
