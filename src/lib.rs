// loopback-router - output routing engine for a virtual loopback audio device
//
// The engine interposes a virtual endpoint between applications and real
// hardware and keeps the two glued together:
// - controller: top-level coordinator (device selection, retargeting,
//   failure recovery, real-time synchronized start)
// - relay: per-path play-through lifecycle (primary + UI sounds)
// - controls: volume/mute/data-source mirroring between the pair
// - hardware: platform HAL boundary (trait, mock, Core Audio glue)
// - notifier: best-effort push of the current endpoint for crash recovery
// - worker: background task queue fed by real-time callers

pub mod config;
pub mod controller;
pub mod controls;
pub mod error;
pub mod hardware;
pub mod log;
pub mod notifier;
pub mod relay;
pub mod types;
pub mod virtual_device;
pub mod worker;

// Re-export commonly used types for easier imports
pub use config::RouterConfig;
pub use controller::{OutputChangedHook, OutputDeviceController, RouterSnapshot};
pub use controls::ControlSynchronizer;
pub use error::{Result, RouterError};
pub use hardware::{
    HardwareAdapter, HardwareError, HwResult, MockHardware, MockLoopbackDevice, PropertyEvent,
    PropertyListener, SubscriptionId,
};
pub use notifier::{LoggingNotifier, NoopNotifier, OutputDeviceNotifier};
pub use relay::PlayThroughRelay;
pub use types::{DataSourceId, EndpointId, EndpointInfo, SyncStartStatus};
pub use virtual_device::{find_loopback_endpoint, VirtualLoopbackDevice};
pub use worker::TaskQueue;

#[cfg(target_os = "macos")]
pub use hardware::CoreAudioHardware;
