//! Tracing/logging initialization.
//!
//! JSON lines with timestamps; the level filter comes from `RUST_LOG` or the
//! caller. FIFO layer selection is logged at `debug`, contention retries at
//! `warn`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

pub fn init_with_filter(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(true)
        .with_current_span(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        init_with_filter("debug");
        init_with_filter("not a [valid filter");
        init();
        ::tracing::info!("still logging");
    }
}
