// Hardware boundary - the platform audio abstraction consumed by the engine
//
// The engine never talks to the platform directly; everything goes through
// the HardwareAdapter trait so the routing logic is testable without real
// devices:
// - adapter: the trait, its error type, and property-change events
// - mock: scriptable in-memory adapter used by the test suite and CI
// - coreaudio: raw Core Audio implementation (macOS only)

pub mod adapter;
pub mod mock;

#[cfg(target_os = "macos")]
pub mod coreaudio;

pub use adapter::{
    HardwareAdapter, HardwareError, HwResult, PropertyEvent, PropertyListener, SubscriptionId,
};
pub use mock::{MockHardware, MockLoopbackDevice, StartIoGate};

#[cfg(target_os = "macos")]
pub use coreaudio::CoreAudioHardware;
