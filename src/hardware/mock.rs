// Scriptable in-memory hardware adapter
//
// Stands in for the platform HAL so the routing engine can be exercised
// without real devices (CI included). Failures are scripted per endpoint and
// per operation; property events can be injected to simulate hardware
// notifications. Enumeration order is insertion order, which the selection
// logic relies on for tie-breaking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::hardware::adapter::{
    HardwareAdapter, HardwareError, HwResult, PropertyEvent, PropertyListener, SubscriptionId,
};
use crate::types::{DataSourceId, EndpointId, EndpointInfo};
use crate::virtual_device::VirtualLoopbackDevice;

#[derive(Debug, Clone)]
struct MockEndpoint {
    info: EndpointInfo,
    volume: f32,
    muted: bool,
    data_source: DataSourceId,
    data_source_settable: bool,
    // IO start/stop is refcounted per client, as on real hardware; the
    // endpoint reports running while any client holds a start
    io_start_count: u32,
    channel_query_failure: Option<i32>,
    latency_query_failure: Option<i32>,
    start_io_failure: Option<i32>,
    stop_io_failure: Option<i32>,
    set_data_source_failure: Option<i32>,
    start_io_gate: Option<GateHandles>,
}

#[derive(Debug, Clone)]
struct GateHandles {
    entered: crossbeam_channel::Sender<()>,
    release: crossbeam_channel::Receiver<()>,
}

/// Test handle for holding a `start_io` call open, simulating a hardware
/// call that blocks for a long time
pub struct StartIoGate {
    /// Receives one message when a `start_io` call reaches the gate
    pub entered: crossbeam_channel::Receiver<()>,
    /// Send (or drop) to let the blocked call proceed
    pub release: crossbeam_channel::Sender<()>,
}

impl MockEndpoint {
    fn new(info: EndpointInfo) -> Self {
        Self {
            info,
            volume: 0.75,
            muted: false,
            data_source: DataSourceId(0),
            data_source_settable: false,
            io_start_count: 0,
            channel_query_failure: None,
            latency_query_failure: None,
            start_io_failure: None,
            stop_io_failure: None,
            set_data_source_failure: None,
            start_io_gate: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Defaults {
    output: Option<EndpointId>,
    system: Option<EndpointId>,
}

/// In-memory hardware adapter for tests
pub struct MockHardware {
    endpoints: Mutex<Vec<MockEndpoint>>,
    defaults: Mutex<Defaults>,
    listeners: Mutex<HashMap<u64, (EndpointId, PropertyListener)>>,
    next_subscription: AtomicU64,
    start_io_log: Mutex<Vec<EndpointId>>,
    stop_io_log: Mutex<Vec<EndpointId>>,
    set_data_source_log: Mutex<Vec<(EndpointId, DataSourceId)>>,
}

impl MockHardware {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(Vec::new()),
            defaults: Mutex::new(Defaults {
                output: None,
                system: None,
            }),
            listeners: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            start_io_log: Mutex::new(Vec::new()),
            stop_io_log: Mutex::new(Vec::new()),
            set_data_source_log: Mutex::new(Vec::new()),
        })
    }

    /// Install a physical output endpoint
    pub fn add_output(&self, id: u32, uid: &str, channels: u32, latency: u32) -> EndpointInfo {
        self.install(EndpointInfo {
            id: EndpointId(id),
            uid: uid.to_string(),
            output_channels: channels,
            latency_frames: latency,
            is_virtual_loopback: false,
        })
    }

    /// Install a virtual loopback endpoint
    pub fn add_loopback(&self, id: u32, uid: &str) -> EndpointInfo {
        self.install(EndpointInfo {
            id: EndpointId(id),
            uid: uid.to_string(),
            output_channels: 2,
            latency_frames: 0,
            is_virtual_loopback: true,
        })
    }

    fn install(&self, info: EndpointInfo) -> EndpointInfo {
        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints.push(MockEndpoint::new(info.clone()));
        info
    }

    /// Remove an endpoint, simulating an unplug
    pub fn remove_endpoint(&self, id: EndpointId) {
        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints.retain(|e| e.info.id != id);
    }

    pub fn set_default_output(&self, id: EndpointId) {
        self.defaults.lock().unwrap().output = Some(id);
    }

    pub fn set_system_default_output(&self, id: EndpointId) {
        self.defaults.lock().unwrap().system = Some(id);
    }

    fn with_endpoint<T>(
        &self,
        id: EndpointId,
        f: impl FnOnce(&mut MockEndpoint) -> HwResult<T>,
    ) -> HwResult<T> {
        let mut endpoints = self.endpoints.lock().unwrap();
        match endpoints.iter_mut().find(|e| e.info.id == id) {
            Some(endpoint) => f(endpoint),
            None => Err(HardwareError::Other(format!("unknown endpoint {id}"))),
        }
    }

    // --- failure scripting ---

    pub fn fail_channel_query(&self, id: EndpointId, status: i32) {
        let _ = self.with_endpoint(id, |e| {
            e.channel_query_failure = Some(status);
            Ok(())
        });
    }

    pub fn fail_latency_query(&self, id: EndpointId, status: i32) {
        let _ = self.with_endpoint(id, |e| {
            e.latency_query_failure = Some(status);
            Ok(())
        });
    }

    pub fn fail_start_io(&self, id: EndpointId, status: i32) {
        let _ = self.with_endpoint(id, |e| {
            e.start_io_failure = Some(status);
            Ok(())
        });
    }

    pub fn clear_start_io_failure(&self, id: EndpointId) {
        let _ = self.with_endpoint(id, |e| {
            e.start_io_failure = None;
            Ok(())
        });
    }

    pub fn fail_stop_io(&self, id: EndpointId, status: i32) {
        let _ = self.with_endpoint(id, |e| {
            e.stop_io_failure = Some(status);
            Ok(())
        });
    }

    pub fn fail_set_data_source(&self, id: EndpointId, status: i32) {
        let _ = self.with_endpoint(id, |e| {
            e.set_data_source_failure = Some(status);
            Ok(())
        });
    }

    /// Make the next `start_io` calls on the endpoint block until released,
    /// simulating an unbounded hardware call
    pub fn gate_start_io(&self, id: EndpointId) -> StartIoGate {
        let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
        let (release_tx, release_rx) = crossbeam_channel::unbounded();
        let _ = self.with_endpoint(id, |e| {
            e.start_io_gate = Some(GateHandles {
                entered: entered_tx,
                release: release_rx,
            });
            Ok(())
        });
        StartIoGate {
            entered: entered_rx,
            release: release_tx,
        }
    }

    /// Make the endpoint's data source selectable and seed its current value
    pub fn set_data_source_state(&self, id: EndpointId, source: DataSourceId, settable: bool) {
        let _ = self.with_endpoint(id, |e| {
            e.data_source = source;
            e.data_source_settable = settable;
            Ok(())
        });
    }

    /// Simulate clients running (or not running) IO on an endpoint, e.g. an
    /// application rendering into the loopback device. Does not synthesize
    /// events; inject those with [`MockHardware::emit`].
    pub fn set_io_running(&self, id: EndpointId, running: bool) {
        let _ = self.with_endpoint(id, |e| {
            e.io_start_count = u32::from(running);
            Ok(())
        });
    }

    /// Inject a property event as the hardware would
    pub fn emit(&self, id: EndpointId, event: PropertyEvent) {
        let targets: Vec<PropertyListener> = {
            let listeners = self.listeners.lock().unwrap();
            listeners
                .values()
                .filter(|(endpoint, _)| *endpoint == id)
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        for listener in targets {
            listener(id, event);
        }
    }

    // --- call recording ---

    pub fn start_io_calls(&self) -> Vec<EndpointId> {
        self.start_io_log.lock().unwrap().clone()
    }

    pub fn stop_io_calls(&self) -> Vec<EndpointId> {
        self.stop_io_log.lock().unwrap().clone()
    }

    pub fn set_data_source_calls(&self) -> Vec<(EndpointId, DataSourceId)> {
        self.set_data_source_log.lock().unwrap().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl HardwareAdapter for MockHardware {
    fn endpoints(&self) -> HwResult<Vec<EndpointInfo>> {
        let endpoints = self.endpoints.lock().unwrap();
        Ok(endpoints.iter().map(|e| e.info.clone()).collect())
    }

    fn endpoint_info(&self, endpoint: EndpointId) -> HwResult<EndpointInfo> {
        self.with_endpoint(endpoint, |e| Ok(e.info.clone()))
    }

    fn output_channel_count(&self, endpoint: EndpointId) -> HwResult<u32> {
        self.with_endpoint(endpoint, |e| match e.channel_query_failure {
            Some(status) => Err(HardwareError::Status(status)),
            None => Ok(e.info.output_channels),
        })
    }

    fn output_latency(&self, endpoint: EndpointId) -> HwResult<u32> {
        self.with_endpoint(endpoint, |e| match e.latency_query_failure {
            Some(status) => Err(HardwareError::Status(status)),
            None => Ok(e.info.latency_frames),
        })
    }

    fn default_output_endpoint(&self, system: bool) -> HwResult<EndpointInfo> {
        let defaults = *self.defaults.lock().unwrap();
        let id = if system { defaults.system } else { defaults.output };
        match id {
            Some(id) => self.endpoint_info(id),
            None => Err(HardwareError::Other("no default output endpoint".to_string())),
        }
    }

    fn set_default_output_endpoint(&self, endpoint: EndpointId, system: bool) -> HwResult<()> {
        // reject unknown ids like the platform would
        self.endpoint_info(endpoint)?;
        let mut defaults = self.defaults.lock().unwrap();
        if system {
            defaults.system = Some(endpoint);
        } else {
            defaults.output = Some(endpoint);
        }
        Ok(())
    }

    fn data_source(&self, endpoint: EndpointId) -> HwResult<DataSourceId> {
        self.with_endpoint(endpoint, |e| Ok(e.data_source))
    }

    fn set_data_source(&self, endpoint: EndpointId, source: DataSourceId) -> HwResult<()> {
        let result = self.with_endpoint(endpoint, |e| match e.set_data_source_failure {
            Some(status) => Err(HardwareError::Status(status)),
            None => {
                e.data_source = source;
                Ok(())
            }
        });
        if result.is_ok() {
            self.set_data_source_log
                .lock()
                .unwrap()
                .push((endpoint, source));
            self.emit(endpoint, PropertyEvent::DataSourceChanged);
        }
        result
    }

    fn data_source_settable(&self, endpoint: EndpointId) -> HwResult<bool> {
        self.with_endpoint(endpoint, |e| Ok(e.data_source_settable))
    }

    fn output_volume(&self, endpoint: EndpointId) -> HwResult<f32> {
        self.with_endpoint(endpoint, |e| Ok(e.volume))
    }

    fn set_output_volume(&self, endpoint: EndpointId, volume: f32) -> HwResult<()> {
        self.with_endpoint(endpoint, |e| {
            e.volume = volume;
            Ok(())
        })?;
        self.emit(endpoint, PropertyEvent::VolumeChanged);
        Ok(())
    }

    fn output_muted(&self, endpoint: EndpointId) -> HwResult<bool> {
        self.with_endpoint(endpoint, |e| Ok(e.muted))
    }

    fn set_output_muted(&self, endpoint: EndpointId, muted: bool) -> HwResult<()> {
        self.with_endpoint(endpoint, |e| {
            e.muted = muted;
            Ok(())
        })?;
        self.emit(endpoint, PropertyEvent::MuteChanged);
        Ok(())
    }

    fn start_io(&self, endpoint: EndpointId) -> HwResult<()> {
        // Block outside the state lock so other adapter calls stay usable
        // while this one is held open
        let gate = self.with_endpoint(endpoint, |e| Ok(e.start_io_gate.clone()))?;
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        let started = self.with_endpoint(endpoint, |e| match e.start_io_failure {
            Some(status) => Err(HardwareError::Status(status)),
            None => {
                e.io_start_count += 1;
                Ok(e.io_start_count == 1)
            }
        })?;
        self.start_io_log.lock().unwrap().push(endpoint);
        if started {
            self.emit(endpoint, PropertyEvent::IoStarted);
        }
        Ok(())
    }

    fn stop_io(&self, endpoint: EndpointId) -> HwResult<()> {
        let stopped = self.with_endpoint(endpoint, |e| match e.stop_io_failure {
            Some(status) => Err(HardwareError::Status(status)),
            None => {
                let last = e.io_start_count == 1;
                e.io_start_count = e.io_start_count.saturating_sub(1);
                Ok(last)
            }
        })?;
        self.stop_io_log.lock().unwrap().push(endpoint);
        if stopped {
            self.emit(endpoint, PropertyEvent::IoStopped);
        }
        Ok(())
    }

    fn io_running(&self, endpoint: EndpointId) -> HwResult<bool> {
        self.with_endpoint(endpoint, |e| Ok(e.io_start_count > 0))
    }

    fn subscribe(&self, endpoint: EndpointId, listener: PropertyListener) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .insert(id, (endpoint, listener));
        SubscriptionId(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.listeners.lock().unwrap().remove(&subscription.0);
    }
}

/// Mock virtual loopback device backed by a [`MockHardware`]
pub struct MockLoopbackDevice {
    hardware: Arc<MockHardware>,
    endpoint: EndpointInfo,
    ui_sounds: EndpointInfo,
    app_volumes: Mutex<Vec<(i32, Option<String>, f32)>>,
    app_pans: Mutex<Vec<(i32, Option<String>, f32)>>,
}

impl MockLoopbackDevice {
    /// Install the loopback endpoint pair into the mock and return the surface
    pub fn new(hardware: &Arc<MockHardware>, main_id: u32, ui_sounds_id: u32) -> Self {
        let endpoint = hardware.add_loopback(main_id, "mock-loopback");
        let ui_sounds = hardware.add_loopback(ui_sounds_id, "mock-loopback-ui");
        Self {
            hardware: Arc::clone(hardware),
            endpoint,
            ui_sounds,
            app_volumes: Mutex::new(Vec::new()),
            app_pans: Mutex::new(Vec::new()),
        }
    }

    pub fn app_volume_calls(&self) -> Vec<(i32, Option<String>, f32)> {
        self.app_volumes.lock().unwrap().clone()
    }

    pub fn app_pan_calls(&self) -> Vec<(i32, Option<String>, f32)> {
        self.app_pans.lock().unwrap().clone()
    }
}

impl VirtualLoopbackDevice for MockLoopbackDevice {
    fn endpoint(&self) -> EndpointInfo {
        self.endpoint.clone()
    }

    fn ui_sounds_endpoint(&self) -> EndpointInfo {
        self.ui_sounds.clone()
    }

    fn set_as_default(&self) -> HwResult<()> {
        self.hardware
            .set_default_output_endpoint(self.endpoint.id, false)?;
        // UI sounds route through the distinguished sub-endpoint
        self.hardware
            .set_default_output_endpoint(self.ui_sounds.id, true)
    }

    fn unset_as_default(&self, previous: &EndpointInfo) -> HwResult<()> {
        self.hardware
            .set_default_output_endpoint(previous.id, false)?;
        self.hardware.set_default_output_endpoint(previous.id, true)
    }

    fn set_app_volume(&self, volume: f32, pid: i32, bundle_id: Option<&str>) -> HwResult<()> {
        self.app_volumes
            .lock()
            .unwrap()
            .push((pid, bundle_id.map(str::to_string), volume));
        Ok(())
    }

    fn set_app_pan(&self, pan: f32, pid: i32, bundle_id: Option<&str>) -> HwResult<()> {
        self.app_pans
            .lock()
            .unwrap()
            .push((pid, bundle_id.map(str::to_string), pan));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_enumeration_preserves_insertion_order() {
        let hw = MockHardware::new();
        hw.add_output(40, "first", 2, 50);
        hw.add_output(41, "second", 2, 50);
        let uids: Vec<String> = hw.endpoints().unwrap().into_iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec!["first", "second"]);
    }

    #[test]
    fn test_scripted_start_io_failure() {
        let hw = MockHardware::new();
        let out = hw.add_output(40, "out", 2, 50);
        hw.fail_start_io(out.id, -50);
        let err = hw.start_io(out.id).unwrap_err();
        assert!(matches!(err, HardwareError::Status(-50)));
        assert!(hw.start_io_calls().is_empty(), "failed start must not be recorded");
    }

    #[test]
    fn test_subscription_receives_events_until_unsubscribed() {
        let hw = MockHardware::new();
        let out = hw.add_output(40, "out", 2, 50);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_listener = Arc::clone(&seen);
        let sub = hw.subscribe(
            out.id,
            Arc::new(move |_, _| {
                seen_in_listener.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hw.emit(out.id, PropertyEvent::VolumeChanged);
        hw.unsubscribe(sub);
        hw.emit(out.id, PropertyEvent::VolumeChanged);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_io_marks_running_and_emits() {
        let hw = MockHardware::new();
        let out = hw.add_output(40, "out", 2, 50);
        let started = Arc::new(AtomicUsize::new(0));
        let started_in_listener = Arc::clone(&started);
        hw.subscribe(
            out.id,
            Arc::new(move |_, event| {
                if event == PropertyEvent::IoStarted {
                    started_in_listener.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );
        hw.start_io(out.id).unwrap();
        assert!(hw.io_running(out.id).unwrap());
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_loopback_device_claims_defaults() {
        let hw = MockHardware::new();
        let out = hw.add_output(40, "out", 2, 50);
        hw.set_default_output(out.id);
        hw.set_system_default_output(out.id);
        let device = MockLoopbackDevice::new(&hw, 90, 91);

        device.set_as_default().unwrap();
        assert_eq!(hw.default_output_endpoint(false).unwrap().id, device.endpoint().id);
        assert_eq!(
            hw.default_output_endpoint(true).unwrap().id,
            device.ui_sounds_endpoint().id
        );

        device.unset_as_default(&out).unwrap();
        assert_eq!(hw.default_output_endpoint(false).unwrap().id, out.id);
        assert_eq!(hw.default_output_endpoint(true).unwrap().id, out.id);
    }
}
