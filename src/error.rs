use crate::hardware::HardwareError;

/// Errors surfaced by the output routing engine
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// The virtual loopback endpoint or a viable physical endpoint was absent
    /// at startup. Fatal to initialization.
    #[error("Audio device not found: {name}")]
    DeviceNotFound { name: String },

    /// A hardware adapter call failed during a retarget. Recoverable via the
    /// automatic revert to the previous endpoint.
    #[error("Hardware operation failed (status {status})")]
    HardwareOperationFailed { status: i32 },

    /// The automatic revert after a failed retarget itself failed. Both
    /// failures are surfaced; no further recovery is attempted.
    #[error("Revert to previous output device failed: {revert} (original failure: {original})")]
    RevertFailed {
        original: Box<RouterError>,
        revert: Box<RouterError>,
    },

    /// Any other adapter failure, treated like a hardware failure
    #[error("{0}")]
    Unspecified(String),
}

impl From<HardwareError> for RouterError {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::Status(status) => RouterError::HardwareOperationFailed { status },
            HardwareError::Other(message) => RouterError::Unspecified(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_status_maps_to_operation_failed() {
        let err: RouterError = HardwareError::Status(-10851).into();
        assert!(matches!(
            err,
            RouterError::HardwareOperationFailed { status: -10851 }
        ));
    }

    #[test]
    fn test_revert_failed_display_carries_both_failures() {
        let err = RouterError::RevertFailed {
            original: Box::new(RouterError::HardwareOperationFailed { status: -66 }),
            revert: Box::new(RouterError::HardwareOperationFailed { status: -77 }),
        };
        let text = err.to_string();
        assert!(text.contains("-66"), "display should carry the original status: {text}");
        assert!(text.contains("-77"), "display should carry the revert status: {text}");
    }

    #[test]
    fn test_device_not_found_display() {
        let err = RouterError::DeviceNotFound {
            name: "physical output endpoint".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Audio device not found: physical output endpoint"
        );
    }
}
