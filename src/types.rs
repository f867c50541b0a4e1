// Core value types shared across the routing engine
//
// Endpoints are value-like handles; the hardware adapter is the source of
// truth for their live properties. Everything here is cheap to clone and
// serializable so it can cross the process boundary in notifier payloads.

use serde::{Deserialize, Serialize};

/// Opaque platform identifier for an audio endpoint (CoreAudio-style object id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u32);

impl std::fmt::Display for EndpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a hardware-reported selectable data source on a device
/// (e.g. a jack selection), distinct from the device itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceId(pub u32);

impl std::fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Audio endpoint information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub id: EndpointId,
    pub uid: String,
    pub output_channels: u32,
    pub latency_frames: u32,
    pub is_virtual_loopback: bool,
}

impl EndpointInfo {
    /// True when the endpoint can carry output audio at all
    pub fn is_output_capable(&self) -> bool {
        self.output_channels > 0
    }
}

/// Outcome of a synchronized relay start requested from the real-time path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStartStatus {
    /// The destination endpoint reported IO running within the bound
    Started,
    /// The relay could not be started, or the bounded wait elapsed
    NotStarting,
    /// The state lock was contended; a deferred start was scheduled and the
    /// caller should drop this audio cycle
    ReturningEarly,
}
