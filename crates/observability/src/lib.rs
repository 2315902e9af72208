//! Process-wide tracing setup shared by the binaries.

/// Initialize tracing with the filter from `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize tracing with an explicit filter, e.g. `gemledger_infra=debug`.
/// `RUST_LOG` still wins when it is set.
pub fn init_with_filter(filter: &str) {
    tracing::init_with_filter(filter);
}

/// Subscriber configuration (filters, JSON formatting).
pub mod tracing;
