use env_logger::Builder;
use log::LevelFilter;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn initialize_logger() {
    INIT.call_once(|| {
        let mut builder = Builder::new();

        builder
            .filter_level(LevelFilter::Info)
            .filter_module("magnetite::buffer", LevelFilter::Debug)
            .filter_module("magnetite::container", LevelFilter::Debug)
            .filter_module("magnetite::concurrency", LevelFilter::Debug)
            .format_timestamp_millis()
            .parse_default_env()
            .init();
    });
}
