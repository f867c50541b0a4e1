// Inter-process notifier boundary
//
// The router pushes the identity of the current physical endpoint to an
// out-of-process helper so audio can be recovered if this process dies
// abnormally. Delivery is best-effort: the controller logs failures and
// moves on. The transport itself lives outside this crate.

use colored::Colorize;
use tracing::info;

use crate::types::EndpointInfo;

/// Consumer of output-endpoint identity updates
pub trait OutputDeviceNotifier: Send + Sync {
    /// Best-effort, fire-and-forget push of the current output endpoint
    fn notify_current_output_device(&self, endpoint: &EndpointInfo) -> anyhow::Result<()>;
}

/// Notifier that drops every update
pub struct NoopNotifier;

impl OutputDeviceNotifier for NoopNotifier {
    fn notify_current_output_device(&self, _endpoint: &EndpointInfo) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Notifier that logs the payload an out-of-process consumer would receive
pub struct LoggingNotifier;

impl OutputDeviceNotifier for LoggingNotifier {
    fn notify_current_output_device(&self, endpoint: &EndpointInfo) -> anyhow::Result<()> {
        let payload = serde_json::to_string(endpoint)?;
        info!(
            "{} Current output device: {}",
            "NOTIFY_OUTPUT".bright_blue(),
            payload
        );
        Ok(())
    }
}
