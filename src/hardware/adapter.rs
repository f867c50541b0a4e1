// Hardware adapter contract
//
// Mirrors the subset of the platform HAL the routing engine needs: device
// enumeration, per-device queries, default-device control, data sources,
// blocking IO start/stop, and property-change subscriptions. Implementations
// must be callable from multiple threads; start_io/stop_io may block for
// unbounded time inside the platform.

use std::sync::Arc;

use crate::types::{DataSourceId, EndpointId, EndpointInfo};

/// Errors surfaced by the hardware abstraction layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum HardwareError {
    /// The platform call failed with a status code
    #[error("Hardware call failed (status {0})")]
    Status(i32),

    /// Any other adapter-level failure
    #[error("{0}")]
    Other(String),
}

pub type HwResult<T> = std::result::Result<T, HardwareError>;

/// Property changes pushed by the hardware layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEvent {
    VolumeChanged,
    MuteChanged,
    DataSourceChanged,
    /// The endpoint started running IO (some client began pulling frames)
    IoStarted,
    /// The endpoint stopped running IO
    IoStopped,
}

/// Callback invoked on property changes. Runs on an arbitrary hardware
/// notification thread; must not block.
pub type PropertyListener = Arc<dyn Fn(EndpointId, PropertyEvent) + Send + Sync>;

/// Handle identifying a property subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Platform audio hardware abstraction
pub trait HardwareAdapter: Send + Sync {
    /// Enumerate all endpoints currently known to the platform
    fn endpoints(&self) -> HwResult<Vec<EndpointInfo>>;

    /// Look up a single endpoint by id
    fn endpoint_info(&self, endpoint: EndpointId) -> HwResult<EndpointInfo>;

    /// Number of output channels the endpoint exposes
    fn output_channel_count(&self, endpoint: EndpointId) -> HwResult<u32>;

    /// Reported output latency in frames
    fn output_latency(&self, endpoint: EndpointId) -> HwResult<u32>;

    /// Current platform default output endpoint (`system` selects the
    /// alert/UI-sounds default where the platform distinguishes them)
    fn default_output_endpoint(&self, system: bool) -> HwResult<EndpointInfo>;

    /// Change the platform default output endpoint
    fn set_default_output_endpoint(&self, endpoint: EndpointId, system: bool) -> HwResult<()>;

    /// Currently selected data source on the endpoint's output scope
    fn data_source(&self, endpoint: EndpointId) -> HwResult<DataSourceId>;

    /// Select a data source on the endpoint's output scope
    fn set_data_source(&self, endpoint: EndpointId, source: DataSourceId) -> HwResult<()>;

    /// Whether the endpoint's output data source can be changed at all
    fn data_source_settable(&self, endpoint: EndpointId) -> HwResult<bool>;

    /// Master output volume in [0.0, 1.0]
    fn output_volume(&self, endpoint: EndpointId) -> HwResult<f32>;
    fn set_output_volume(&self, endpoint: EndpointId, volume: f32) -> HwResult<()>;

    /// Master output mute
    fn output_muted(&self, endpoint: EndpointId) -> HwResult<bool>;
    fn set_output_muted(&self, endpoint: EndpointId, muted: bool) -> HwResult<()>;

    /// Start IO on the endpoint. Blocking; returns once the platform accepts
    /// the start request. The endpoint reports actually running via
    /// `PropertyEvent::IoStarted` and `io_running`.
    fn start_io(&self, endpoint: EndpointId) -> HwResult<()>;

    /// Stop IO on the endpoint. Blocking.
    fn stop_io(&self, endpoint: EndpointId) -> HwResult<()>;

    /// Whether any client is currently running IO on the endpoint
    fn io_running(&self, endpoint: EndpointId) -> HwResult<bool>;

    /// Register for property changes on one endpoint
    fn subscribe(&self, endpoint: EndpointId, listener: PropertyListener) -> SubscriptionId;

    /// Remove a previously registered subscription. Unknown ids are ignored.
    fn unsubscribe(&self, subscription: SubscriptionId);
}
