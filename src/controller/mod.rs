// Output device controller - top-level routing coordinator
//
// Owns the current output endpoint, the control synchronizer, and both relays
// behind a single state lock. External events (user device selection, device
// removal, real-time start requests) are serialized here and driven through
// matched lifecycle transitions. Failure recovery re-enters the retarget body
// directly instead of re-locking, so the lock stays a plain mutex and the
// recovery depth bound of one is structural.
//
// The real-time path never blocks on the state lock: hardware calls made
// while the lock is held can stall indefinitely inside the platform, so a
// contended synchronized start trades a dropped audio cycle for a deferred
// start on the background task queue.

mod selection;

use colored::Colorize;
use serde::Serialize;
use std::sync::{Arc, Mutex, TryLockError};
use tracing::{error, info, warn};

use crate::config::RouterConfig;
use crate::controls::ControlSynchronizer;
use crate::error::{Result, RouterError};
use crate::hardware::HardwareAdapter;
use crate::notifier::OutputDeviceNotifier;
use crate::relay::PlayThroughRelay;
use crate::types::{DataSourceId, EndpointId, EndpointInfo, SyncStartStatus};
use crate::virtual_device::VirtualLoopbackDevice;
use crate::worker::TaskQueue;

/// Hook invoked under the state lock whenever the output endpoint changes,
/// e.g. to refresh a volume display
pub type OutputChangedHook = Box<dyn Fn(&EndpointInfo) + Send + Sync>;

/// Consistent view of the controller's routing state, read under the lock
#[derive(Debug, Clone, Serialize)]
pub struct RouterSnapshot {
    pub current_output: EndpointInfo,
    pub play_through_destination: Option<EndpointId>,
    pub ui_sounds_destination: Option<EndpointId>,
    pub controls_pair: Option<(EndpointId, EndpointId)>,
    pub controls_active: bool,
}

struct OutputState {
    current_output: EndpointInfo,
    controls: ControlSynchronizer,
    play_through: PlayThroughRelay,
    ui_sounds: PlayThroughRelay,
}

struct ControllerInner {
    hardware: Arc<dyn HardwareAdapter>,
    virtual_device: Arc<dyn VirtualLoopbackDevice>,
    notifier: Arc<dyn OutputDeviceNotifier>,
    output_changed: Option<OutputChangedHook>,
    config: RouterConfig,
    queue: TaskQueue,
    state: Mutex<OutputState>,
}

/// Top-level coordinator for output routing
pub struct OutputDeviceController {
    inner: Arc<ControllerInner>,
}

impl OutputDeviceController {
    /// Select the initial physical endpoint and bring the full route up.
    /// Fails with [`RouterError::DeviceNotFound`] when no viable endpoint
    /// exists.
    pub fn new(
        hardware: Arc<dyn HardwareAdapter>,
        virtual_device: Arc<dyn VirtualLoopbackDevice>,
        notifier: Arc<dyn OutputDeviceNotifier>,
        output_changed: Option<OutputChangedHook>,
        config: RouterConfig,
    ) -> Result<Self> {
        let initial = selection::pick_initial_output(&*hardware)?;
        let queue = TaskQueue::new("loopback-router-worker");

        let state = OutputState {
            current_output: initial.clone(),
            controls: ControlSynchronizer::new(Arc::clone(&hardware)),
            play_through: PlayThroughRelay::new(
                "play-through",
                Arc::clone(&hardware),
                queue.clone(),
                config.auto_restart_relays,
            ),
            ui_sounds: PlayThroughRelay::new(
                "ui-sounds",
                Arc::clone(&hardware),
                queue.clone(),
                config.auto_restart_relays,
            ),
        };

        let inner = Arc::new(ControllerInner {
            hardware,
            virtual_device,
            notifier,
            output_changed,
            config,
            queue,
            state: Mutex::new(state),
        });

        {
            let mut state = inner.state.lock().unwrap();
            let target = state.current_output.clone();
            inner.bind_to(&mut state, &target)?;
            inner.start_relays(&mut state)?;
            if inner.config.notify_initial_endpoint {
                inner.propagate_output_change(&state.current_output);
            }
        }

        info!(
            "{} Output routing initialized on '{}'",
            "ROUTER_READY".bright_green(),
            initial.uid
        );
        Ok(Self { inner })
    }

    // --- query surface ---

    pub fn current_output_endpoint(&self) -> EndpointInfo {
        self.inner.state.lock().unwrap().current_output.clone()
    }

    pub fn is_current_output_endpoint(&self, endpoint: EndpointId) -> bool {
        self.inner.state.lock().unwrap().current_output.id == endpoint
    }

    /// True only when the current output endpoint has a settable data source
    /// and its live value equals `source`
    pub fn is_current_output_data_source(&self, source: DataSourceId) -> bool {
        let state = self.inner.state.lock().unwrap();
        let endpoint = state.current_output.id;
        let settable = self
            .inner
            .hardware
            .data_source_settable(endpoint)
            .unwrap_or(false);
        settable
            && self
                .inner
                .hardware
                .data_source(endpoint)
                .map(|current| current == source)
                .unwrap_or(false)
    }

    /// Physical endpoints a user could route output to
    pub fn list_output_endpoints(&self) -> Result<Vec<EndpointInfo>> {
        let endpoints = self.inner.hardware.endpoints()?;
        Ok(endpoints
            .into_iter()
            .filter(|e| e.is_output_capable() && !e.is_virtual_loopback)
            .collect())
    }

    /// Consistent (endpoint, relay, synchronizer) view for diagnostics
    pub fn snapshot(&self) -> RouterSnapshot {
        let state = self.inner.state.lock().unwrap();
        RouterSnapshot {
            current_output: state.current_output.clone(),
            play_through_destination: state.play_through.destination().map(|d| d.id),
            ui_sounds_destination: state.ui_sounds.destination().map(|d| d.id),
            controls_pair: state.controls.pair().map(|(v, p)| (v.id, p.id)),
            controls_active: state.controls.is_active(),
        }
    }

    // --- mutation surface ---

    /// Retarget output to `target`. With `revert_on_failure`, a hardware
    /// failure rolls the route back to the previous endpoint (once; the
    /// revert itself is never retried) and the original failure is returned.
    pub fn set_output_device(
        &self,
        target: EndpointId,
        data_source: Option<DataSourceId>,
        revert_on_failure: bool,
    ) -> Result<()> {
        let target = self.inner.hardware.endpoint_info(target)?;
        if target.is_virtual_loopback {
            return Err(RouterError::Unspecified(format!(
                "refusing to route output into the loopback endpoint '{}'",
                target.uid
            )));
        }

        let mut state = self.inner.state.lock().unwrap();
        // Current endpoint must be re-read under the lock; another thread may
        // have retargeted since the caller decided to switch
        let previous = state.current_output.clone();

        match self
            .inner
            .apply_output_device(&mut state, &target, data_source)
        {
            Ok(_) => Ok(()),
            Err(original) if !revert_on_failure => {
                error!(
                    "{} Retarget to '{}' failed: {}",
                    "ROUTER_ERROR".bright_red(),
                    target.uid,
                    original
                );
                Err(original)
            }
            Err(original) => {
                warn!(
                    "{} Retarget to '{}' failed ({}), reverting to '{}'",
                    "ROUTER_REVERT".bright_yellow(),
                    target.uid,
                    original,
                    previous.uid
                );
                // Bounded recovery: one direct re-entry of the retarget body
                match self.inner.apply_output_device(&mut state, &previous, None) {
                    Ok(_) => Err(original),
                    Err(revert) => {
                        error!(
                            "{} Revert to '{}' also failed: {}",
                            "ROUTER_ERROR".bright_red(),
                            previous.uid,
                            revert
                        );
                        Err(RouterError::RevertFailed {
                            original: Box::new(original),
                            revert: Box::new(revert),
                        })
                    }
                }
            }
        }
    }

    /// Install the loopback endpoint as the OS default output
    pub fn set_as_os_default(&self) -> Result<()> {
        self.inner
            .virtual_device
            .set_as_default()
            .map_err(RouterError::from)
    }

    /// Hand the OS default output back to the current physical endpoint
    pub fn unset_as_os_default(&self) -> Result<()> {
        let current = self.current_output_endpoint();
        self.inner
            .virtual_device
            .unset_as_default(&current)
            .map_err(RouterError::from)
    }

    /// Per-application volume pass-through
    pub fn set_app_volume(&self, volume: f32, pid: i32, bundle_id: Option<&str>) -> Result<()> {
        self.inner
            .virtual_device
            .set_app_volume(volume, pid, bundle_id)
            .map_err(RouterError::from)
    }

    /// Per-application pan pass-through
    pub fn set_app_pan(&self, pan: f32, pid: i32, bundle_id: Option<&str>) -> Result<()> {
        self.inner
            .virtual_device
            .set_app_pan(pan, pid, bundle_id)
            .map_err(RouterError::from)
    }

    /// Synchronized relay start for the real-time IO path.
    ///
    /// Never blocks on a contended state lock: a retarget in flight may
    /// itself be blocked inside a hardware call, so contention returns
    /// [`SyncStartStatus::ReturningEarly`] immediately and a deferred start
    /// runs on the task queue once the lock frees. The deferred outcome is
    /// not reported back; the caller drops one audio cycle.
    pub fn start_play_through_sync(&self, use_ui_sounds_path: bool) -> SyncStartStatus {
        match self.inner.state.try_lock() {
            Ok(mut state) => {
                let timeout = self.inner.config.io_start_timeout;
                let relay = if use_ui_sounds_path {
                    &mut state.ui_sounds
                } else {
                    &mut state.play_through
                };
                if let Err(e) = relay.start() {
                    warn!(
                        "{} Synchronized relay start failed: {}",
                        "SYNC_START_WARN".bright_yellow(),
                        e
                    );
                    return SyncStartStatus::NotStarting;
                }
                match relay.wait_for_output_device_to_start(timeout) {
                    Ok(()) => SyncStartStatus::Started,
                    Err(e) => {
                        warn!(
                            "{} Output device did not report started: {}",
                            "SYNC_START_WARN".bright_yellow(),
                            e
                        );
                        SyncStartStatus::NotStarting
                    }
                }
            }
            Err(TryLockError::WouldBlock) => {
                crate::router_debug!("State lock contended, deferring relay start");
                let inner = Arc::clone(&self.inner);
                self.inner.queue.enqueue(move || {
                    let mut state = match inner.state.lock() {
                        Ok(state) => state,
                        Err(_) => return,
                    };
                    let relay = if use_ui_sounds_path {
                        &mut state.ui_sounds
                    } else {
                        &mut state.play_through
                    };
                    if let Err(e) = relay.start() {
                        warn!(
                            "{} Deferred relay start failed: {}",
                            "SYNC_START_WARN".bright_yellow(),
                            e
                        );
                        return;
                    }
                    relay.stop_if_idle();
                });
                SyncStartStatus::ReturningEarly
            }
            Err(TryLockError::Poisoned(e)) => {
                error!(
                    "{} State lock poisoned: {}",
                    "ROUTER_ERROR".bright_red(),
                    e
                );
                SyncStartStatus::NotStarting
            }
        }
    }
}

impl ControllerInner {
    /// Retarget body, steps shared by ordinary retargets and the revert
    /// path. Runs with the state lock already held and never locks itself.
    /// Returns whether the endpoint actually changed.
    fn apply_output_device(
        &self,
        state: &mut OutputState,
        target: &EndpointInfo,
        data_source: Option<DataSourceId>,
    ) -> Result<bool> {
        let changed = state.current_output.id != target.id;

        if changed {
            info!(
                "{} Switching output '{}' -> '{}'",
                "ROUTER_SWITCH".bright_cyan(),
                state.current_output.uid,
                target.uid
            );
            // Record the target first: if binding fails partway, the revert
            // sees a changed endpoint and rebuilds the full route
            state.current_output = target.clone();
            self.bind_to(state, target)?;
        }

        if let Some(source) = data_source {
            self.apply_data_source(target, source);
        }

        if changed {
            self.start_relays(state)?;
            // Still under the lock: observers never see an intermediate
            // endpoint
            self.propagate_output_change(&state.current_output);
        }
        Ok(changed)
    }

    /// Tear down and rebuild the synchronizer and both relays against a new
    /// destination. Deactivation (not a bare stop) keeps hardware
    /// notifications from restarting a relay mid-reconfiguration.
    fn bind_to(&self, state: &mut OutputState, target: &EndpointInfo) -> Result<()> {
        let virtual_main = self.virtual_device.endpoint();
        let virtual_ui = self.virtual_device.ui_sounds_endpoint();

        state.controls.deactivate();
        state.play_through.deactivate()?;
        state.ui_sounds.deactivate()?;

        state.controls.rebind(&virtual_main, target)?;
        state.controls.activate()?;
        state.play_through.activate(&virtual_main, target)?;
        state.ui_sounds.activate(&virtual_ui, target)?;
        Ok(())
    }

    fn start_relays(&self, state: &mut OutputState) -> Result<()> {
        state.play_through.start()?;
        state.ui_sounds.start()?;
        // A route nobody is rendering into should not keep hardware spinning
        state.play_through.stop_if_idle();
        state.ui_sounds.stop_if_idle();
        Ok(())
    }

    /// Data-source selection is partial success: failures are logged and
    /// never fail the retarget
    fn apply_data_source(&self, target: &EndpointInfo, source: DataSourceId) {
        match self.hardware.data_source_settable(target.id) {
            Ok(true) => {
                if let Err(e) = self.hardware.set_data_source(target.id, source) {
                    warn!(
                        "{} Could not select data source {} on '{}': {}",
                        "ROUTER_WARN".bright_yellow(),
                        source,
                        target.uid,
                        e
                    );
                }
            }
            Ok(false) => {
                crate::router_debug!("Data source on '{}' is fixed, skipping", target.uid)
            }
            Err(e) => warn!(
                "{} Data source query on '{}' failed, skipping: {}",
                "ROUTER_WARN".bright_yellow(),
                target.uid,
                e
            ),
        }
    }

    fn propagate_output_change(&self, endpoint: &EndpointInfo) {
        if let Err(e) = self.notifier.notify_current_output_device(endpoint) {
            warn!(
                "{} Notifier rejected output update: {}",
                "NOTIFY_WARN".bright_yellow(),
                e
            );
        }
        if let Some(hook) = &self.output_changed {
            hook(endpoint);
        }
    }
}

impl Clone for OutputDeviceController {
    /// Clones share the same routing state and task queue
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for OutputDeviceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputDeviceController")
            .field("current_output", &self.current_output_endpoint().uid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockHardware, MockLoopbackDevice};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    impl OutputDeviceNotifier for RecordingNotifier {
        fn notify_current_output_device(&self, endpoint: &EndpointInfo) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("notifier transport is down");
            }
            self.seen.lock().unwrap().push(endpoint.uid.clone());
            Ok(())
        }
    }

    impl RecordingNotifier {
        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    struct Fixture {
        hw: Arc<MockHardware>,
        device: Arc<MockLoopbackDevice>,
        notifier: Arc<RecordingNotifier>,
        controller: OutputDeviceController,
        a: EndpointInfo,
        b: EndpointInfo,
    }

    /// Endpoints a (50 frames) and b (10 frames) plus the loopback pair;
    /// platform default is the loopback, so init picks b
    fn fixture() -> Fixture {
        let hw = MockHardware::new();
        let a = hw.add_output(40, "a", 2, 50);
        let b = hw.add_output(41, "b", 2, 10);
        let device = Arc::new(MockLoopbackDevice::new(&hw, 90, 91));
        hw.set_default_output(device.endpoint().id);
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = OutputDeviceController::new(
            hw.clone(),
            device.clone(),
            notifier.clone(),
            None,
            RouterConfig::default(),
        )
        .expect("controller init");
        Fixture {
            hw,
            device,
            notifier,
            controller,
            a,
            b,
        }
    }

    #[test]
    fn test_initialization_binds_everything_to_initial_endpoint() {
        let f = fixture();
        assert_eq!(f.controller.current_output_endpoint().id, f.b.id);
        let snapshot = f.controller.snapshot();
        assert_eq!(snapshot.play_through_destination, Some(f.b.id));
        assert_eq!(snapshot.ui_sounds_destination, Some(f.b.id));
        assert!(snapshot.controls_active);
        assert_eq!(f.notifier.seen(), vec!["b"]);
    }

    #[test]
    fn test_retarget_moves_relays_and_controls() {
        let f = fixture();
        f.controller
            .set_output_device(f.a.id, None, true)
            .expect("retarget");

        assert!(f.controller.is_current_output_endpoint(f.a.id));
        let snapshot = f.controller.snapshot();
        assert_eq!(snapshot.play_through_destination, Some(f.a.id));
        assert_eq!(snapshot.ui_sounds_destination, Some(f.a.id));
        assert_eq!(snapshot.controls_pair.unwrap().1, f.a.id);
        assert_eq!(f.notifier.seen(), vec!["b", "a"]);
    }

    #[test]
    fn test_retarget_to_current_is_noop() {
        let f = fixture();
        let start_calls = f.hw.start_io_calls().len();

        f.controller
            .set_output_device(f.b.id, None, true)
            .expect("no-op retarget");

        assert_eq!(
            f.hw.start_io_calls().len(),
            start_calls,
            "no relay work may happen for a same-endpoint retarget"
        );
        assert_eq!(f.notifier.seen(), vec!["b"], "no notification for a no-op");
    }

    #[test]
    fn test_noop_retarget_still_applies_data_source() {
        let f = fixture();
        f.hw.set_data_source_state(f.b.id, DataSourceId(1), true);

        f.controller
            .set_output_device(f.b.id, Some(DataSourceId(7)), true)
            .expect("data source only");

        assert_eq!(f.hw.set_data_source_calls(), vec![(f.b.id, DataSourceId(7))]);
        assert!(f.controller.is_current_output_data_source(DataSourceId(7)));
    }

    #[test]
    fn test_data_source_failure_is_swallowed() {
        let f = fixture();
        f.hw.set_data_source_state(f.a.id, DataSourceId(1), true);
        f.hw.fail_set_data_source(f.a.id, -33);

        f.controller
            .set_output_device(f.a.id, Some(DataSourceId(7)), true)
            .expect("data-source failure must not fail the retarget");
        assert!(f.controller.is_current_output_endpoint(f.a.id));
    }

    #[test]
    fn test_is_current_output_data_source_requires_settable_and_match() {
        let f = fixture();

        // Fixed data source: never current even if the value matches
        f.hw.set_data_source_state(f.b.id, DataSourceId(7), false);
        assert!(!f.controller.is_current_output_data_source(DataSourceId(7)));

        f.hw.set_data_source_state(f.b.id, DataSourceId(7), true);
        assert!(f.controller.is_current_output_data_source(DataSourceId(7)));
        assert!(!f.controller.is_current_output_data_source(DataSourceId(8)));
    }

    #[test]
    fn test_notifier_failure_does_not_fail_retarget() {
        let f = fixture();
        f.notifier.fail.store(true, Ordering::SeqCst);
        f.controller
            .set_output_device(f.a.id, None, true)
            .expect("notifier failures are best-effort");
        assert!(f.controller.is_current_output_endpoint(f.a.id));
    }

    #[test]
    fn test_output_changed_hook_fires_on_retarget() {
        let hw = MockHardware::new();
        let a = hw.add_output(40, "a", 2, 50);
        hw.add_output(41, "b", 2, 10);
        let device = Arc::new(MockLoopbackDevice::new(&hw, 90, 91));
        hw.set_default_output(device.endpoint().id);

        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook_calls_in_hook = Arc::clone(&hook_calls);
        let controller = OutputDeviceController::new(
            hw.clone(),
            device,
            Arc::new(RecordingNotifier::default()),
            Some(Box::new(move |_| {
                hook_calls_in_hook.fetch_add(1, Ordering::SeqCst);
            })),
            RouterConfig::default(),
        )
        .unwrap();
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1, "initial selection fires the hook");

        controller.set_output_device(a.id, None, true).unwrap();
        assert_eq!(hook_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retarget_to_loopback_is_refused() {
        let f = fixture();
        let loopback_id = f.controller.snapshot().controls_pair.unwrap().0;
        let err = f
            .controller
            .set_output_device(loopback_id, None, true)
            .unwrap_err();
        assert!(matches!(err, RouterError::Unspecified(_)));
        assert!(f.controller.is_current_output_endpoint(f.b.id));
    }

    #[test]
    fn test_os_default_round_trip() {
        let f = fixture();
        f.controller.set_as_os_default().unwrap();
        assert!(f
            .hw
            .default_output_endpoint(false)
            .unwrap()
            .is_virtual_loopback);

        f.controller.unset_as_os_default().unwrap();
        assert_eq!(f.hw.default_output_endpoint(false).unwrap().id, f.b.id);
        assert_eq!(f.hw.default_output_endpoint(true).unwrap().id, f.b.id);
    }

    #[test]
    fn test_app_volume_and_pan_pass_through() {
        let f = fixture();
        f.controller
            .set_app_volume(0.5, 1234, Some("com.example.player"))
            .unwrap();
        f.controller.set_app_pan(-1.0, 1234, None).unwrap();

        assert_eq!(
            f.device.app_volume_calls(),
            vec![(1234, Some("com.example.player".to_string()), 0.5)]
        );
        assert_eq!(f.device.app_pan_calls(), vec![(1234, None, -1.0)]);
    }

    #[test]
    fn test_list_output_endpoints_hides_loopback() {
        let f = fixture();
        let uids: Vec<String> = f
            .controller
            .list_output_endpoints()
            .unwrap()
            .into_iter()
            .map(|e| e.uid)
            .collect();
        assert_eq!(uids, vec!["a", "b"]);
    }
}
