use std::sync::atomic::{AtomicBool, Ordering};

/// Global flag to control router debug logging
pub static ROUTER_DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Set router debug logging on/off
pub fn set_router_debug(enabled: bool) {
    ROUTER_DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
    tracing::info!(
        "🔧 Router debug logging {}",
        if enabled { "ENABLED" } else { "DISABLED" }
    );
}

/// Check if router debug logging is enabled
pub fn is_router_debug_enabled() -> bool {
    ROUTER_DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Router debug macro - only emits if router debug is enabled
#[macro_export]
macro_rules! router_debug {
    ($($arg:tt)*) => {
        if $crate::log::ROUTER_DEBUG_ENABLED.load(std::sync::atomic::Ordering::Relaxed) {
            tracing::debug!($($arg)*);
        }
    };
}

/// Install a default tracing subscriber honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
