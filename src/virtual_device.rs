// Virtual loopback device surface
//
// The loopback driver itself lives out of process; this is the control
// surface the engine consumes. App volume/pan are one-way pass-through calls
// with no engine-side state.

use crate::error::{Result, RouterError};
use crate::hardware::{HardwareAdapter, HwResult};
use crate::types::EndpointInfo;

/// Control surface of the virtual loopback device and its UI-sounds
/// sub-endpoint
pub trait VirtualLoopbackDevice: Send + Sync {
    /// The main loopback endpoint applications render into
    fn endpoint(&self) -> EndpointInfo;

    /// The distinguished sub-endpoint carrying UI/alert sounds
    fn ui_sounds_endpoint(&self) -> EndpointInfo;

    /// Install the loopback endpoint as the platform default output
    fn set_as_default(&self) -> HwResult<()>;

    /// Restore `previous` as the platform default output
    fn unset_as_default(&self, previous: &EndpointInfo) -> HwResult<()>;

    /// Per-application volume override, keyed by pid and optional bundle id
    fn set_app_volume(&self, volume: f32, pid: i32, bundle_id: Option<&str>) -> HwResult<()>;

    /// Per-application pan override in [-1.0, 1.0]
    fn set_app_pan(&self, pan: f32, pid: i32, bundle_id: Option<&str>) -> HwResult<()>;
}

/// Resolve a loopback endpoint by UID. Surfaces
/// [`RouterError::DeviceNotFound`] when the driver is not installed or its
/// device has not come up yet.
pub fn find_loopback_endpoint(hardware: &dyn HardwareAdapter, uid: &str) -> Result<EndpointInfo> {
    let endpoints = hardware.endpoints()?;
    endpoints
        .into_iter()
        .find(|endpoint| endpoint.uid == uid)
        .ok_or_else(|| RouterError::DeviceNotFound {
            name: uid.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::MockHardware;

    #[test]
    fn test_find_loopback_endpoint_by_uid() {
        let hw = MockHardware::new();
        hw.add_output(40, "speakers", 2, 50);
        let loopback = hw.add_loopback(90, "loopback-uid");

        let found = find_loopback_endpoint(&*hw, "loopback-uid").unwrap();
        assert_eq!(found.id, loopback.id);

        let err = find_loopback_endpoint(&*hw, "missing-uid").unwrap_err();
        assert!(matches!(err, RouterError::DeviceNotFound { .. }));
    }
}
