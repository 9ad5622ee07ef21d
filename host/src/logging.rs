use std::sync::Once;

use log::LevelFilter;

static INIT_LOGGER: Once = Once::new();

/// Install the env_logger backend once; `RUST_LOG` overrides `level`.
pub fn init_logging(level: LevelFilter) {
    INIT_LOGGER.call_once(|| {
        let result = env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .format_timestamp_millis()
            .try_init();
        if result.is_ok() {
            log::info!("rig host logging initialised");
            log::info!("protocol version: {}", rig_protocol::VERSION);
        }
    });
}
