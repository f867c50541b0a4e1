use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Bound on how long a synchronized start waits for the destination
    /// endpoint to report IO running before giving up for this cycle
    pub io_start_timeout: Duration,

    /// Whether relays restart themselves when the destination's IO stops
    /// unexpectedly (e.g. after a transient hardware hiccup)
    pub auto_restart_relays: bool,

    /// Push the freshly selected endpoint to the inter-process notifier at
    /// construction time, not just after retargets
    pub notify_initial_endpoint: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            io_start_timeout: Duration::from_secs(3),
            auto_restart_relays: true,
            notify_initial_endpoint: true,
        }
    }
}
