use loopback_router::{
    EndpointInfo, HardwareAdapter, MockHardware, MockLoopbackDevice, OutputDeviceController,
    OutputDeviceNotifier, RouterConfig, RouterError, VirtualLoopbackDevice,
};
use std::sync::{Arc, Mutex};

/// Notifier that records every endpoint uid it is handed
#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

impl OutputDeviceNotifier for RecordingNotifier {
    fn notify_current_output_device(&self, endpoint: &EndpointInfo) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(endpoint.uid.clone());
        Ok(())
    }
}

struct Rig {
    hw: Arc<MockHardware>,
    notifier: Arc<RecordingNotifier>,
    controller: OutputDeviceController,
    a: EndpointInfo,
    b: EndpointInfo,
}

/// Endpoints A(latency=50) and B(latency=10) plus the loopback pair.
/// With `default_is_loopback` the platform default is the loopback endpoint,
/// forcing latency-based selection; otherwise A is the default.
fn rig(default_is_loopback: bool) -> Rig {
    let hw = MockHardware::new();
    let a = hw.add_output(40, "A", 2, 50);
    let b = hw.add_output(41, "B", 2, 10);
    let device = Arc::new(MockLoopbackDevice::new(&hw, 90, 91));
    if default_is_loopback {
        hw.set_default_output(device.endpoint().id);
    } else {
        hw.set_default_output(a.id);
    }
    let notifier = Arc::new(RecordingNotifier::default());
    let controller = OutputDeviceController::new(
        hw.clone(),
        device,
        notifier.clone(),
        None,
        RouterConfig::default(),
    )
    .expect("controller should initialize against the mock hardware");
    Rig {
        hw,
        notifier,
        controller,
        a,
        b,
    }
}

#[test]
fn test_initial_selection_never_picks_the_loopback() {
    let rig = rig(true);
    let current = rig.controller.current_output_endpoint();
    assert!(
        !current.is_virtual_loopback,
        "initial selection returned the loopback endpoint"
    );
    assert_eq!(current.id, rig.b.id, "B has the lowest latency and must win");
}

#[test]
fn test_usable_platform_default_wins_over_latency() {
    let rig = rig(false);
    assert_eq!(
        rig.controller.current_output_endpoint().id,
        rig.a.id,
        "a non-loopback platform default is used directly"
    );
}

#[test]
fn test_successful_retarget_updates_the_whole_triple() {
    let rig = rig(true);

    rig.controller
        .set_output_device(rig.a.id, None, true)
        .expect("retarget B -> A should succeed");

    assert_eq!(rig.controller.current_output_endpoint().id, rig.a.id);
    let snapshot = rig.controller.snapshot();
    assert_eq!(snapshot.play_through_destination, Some(rig.a.id));
    assert_eq!(snapshot.ui_sounds_destination, Some(rig.a.id));
    assert_eq!(
        snapshot.controls_pair.map(|(_, physical)| physical),
        Some(rig.a.id),
        "control synchronizer must follow the new endpoint"
    );
    assert_eq!(
        rig.notifier.seen().last().map(String::as_str),
        Some("A"),
        "notifier must learn about the new endpoint"
    );
}

#[test]
fn test_failed_retarget_reverts_to_previous_endpoint() {
    let rig = rig(false); // current = A
    let d = rig.hw.add_output(42, "D", 2, 5);
    rig.hw.fail_start_io(d.id, -71);

    let err = rig
        .controller
        .set_output_device(d.id, None, true)
        .expect_err("retarget to a failing device must error");

    assert!(
        matches!(err, RouterError::HardwareOperationFailed { status: -71 }),
        "the original failure code must be reported, got: {err}"
    );
    assert_eq!(
        rig.controller.current_output_endpoint().id,
        rig.a.id,
        "state must roll back to the previous endpoint"
    );
    let snapshot = rig.controller.snapshot();
    assert_eq!(snapshot.play_through_destination, Some(rig.a.id));
    assert_eq!(snapshot.ui_sounds_destination, Some(rig.a.id));
}

#[test]
fn test_failed_retarget_without_revert_leaves_error_only() {
    let rig = rig(false);
    let d = rig.hw.add_output(42, "D", 2, 5);
    rig.hw.fail_start_io(d.id, -71);

    let err = rig
        .controller
        .set_output_device(d.id, None, false)
        .expect_err("retarget must fail");
    assert!(matches!(
        err,
        RouterError::HardwareOperationFailed { status: -71 }
    ));
    // No recovery was requested; the half-switched route reads as D
    assert_eq!(rig.controller.current_output_endpoint().id, d.id);
}

#[test]
fn test_revert_failure_surfaces_both_codes() {
    let rig = rig(false); // current = A
    let d = rig.hw.add_output(42, "D", 2, 5);
    rig.hw.fail_start_io(d.id, -71);
    rig.hw.fail_start_io(rig.a.id, -72);

    let err = rig
        .controller
        .set_output_device(d.id, None, true)
        .expect_err("both legs fail");

    match err {
        RouterError::RevertFailed { original, revert } => {
            assert!(matches!(
                *original,
                RouterError::HardwareOperationFailed { status: -71 }
            ));
            assert!(matches!(
                *revert,
                RouterError::HardwareOperationFailed { status: -72 }
            ));
        }
        other => panic!("expected RevertFailed, got: {other}"),
    }
}

#[test]
fn test_previous_endpoint_unplugged_mid_revert_is_revert_failed() {
    let rig = rig(false); // current = A
    let d = rig.hw.add_output(42, "D", 2, 5);
    rig.hw.fail_start_io(d.id, -71);
    // A disappears while the retarget is in flight; the revert has nothing
    // to go back to
    rig.hw.remove_endpoint(rig.a.id);

    let err = rig
        .controller
        .set_output_device(d.id, None, true)
        .expect_err("retarget and revert must both fail");
    assert!(
        matches!(err, RouterError::RevertFailed { .. }),
        "an unplugged previous endpoint surfaces as RevertFailed, got: {err}"
    );
}

#[test]
fn test_stop_failure_while_leaving_an_active_route_reverts() {
    let rig = rig(false); // current = A
    let d = rig.hw.add_output(42, "D", 2, 5);
    // Keep the route hot so the retarget has to stop A's IO, and make that
    // stop fail
    rig.hw
        .set_io_running(rig.controller.snapshot().controls_pair.unwrap().0, true);
    rig.controller.start_play_through_sync(false);
    rig.hw.fail_stop_io(rig.a.id, -61);

    let err = rig
        .controller
        .set_output_device(d.id, None, true)
        .expect_err("the blocking stop on the old destination fails");
    assert!(matches!(
        err,
        RouterError::HardwareOperationFailed { status: -61 }
    ));
    assert_eq!(
        rig.controller.current_output_endpoint().id,
        rig.a.id,
        "the revert must land back on A"
    );
}

#[test]
fn test_retarget_succeeds_after_transient_failure_clears() {
    let rig = rig(false); // current = A
    let d = rig.hw.add_output(42, "D", 2, 5);
    rig.hw.fail_start_io(d.id, -71);

    rig.controller
        .set_output_device(d.id, None, true)
        .expect_err("first attempt fails");
    assert_eq!(rig.controller.current_output_endpoint().id, rig.a.id);

    rig.hw.clear_start_io_failure(d.id);
    rig.controller
        .set_output_device(d.id, None, true)
        .expect("retry succeeds once the hardware recovers");
    assert_eq!(rig.controller.current_output_endpoint().id, d.id);
}

#[test]
fn test_second_retarget_returns_to_original_endpoint() {
    let rig = rig(true); // current = B

    rig.controller
        .set_output_device(rig.a.id, None, true)
        .expect("B -> A");
    rig.controller
        .set_output_device(rig.b.id, None, true)
        .expect("A -> B");

    assert_eq!(rig.controller.current_output_endpoint().id, rig.b.id);
    assert_eq!(rig.notifier.seen(), vec!["B", "A", "B"]);
    assert!(
        !rig.hw.io_running(rig.a.id).unwrap(),
        "the abandoned endpoint must not be left running"
    );
}
