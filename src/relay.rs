// Play-through relay lifecycle
//
// A relay binds a (source, destination) endpoint pair and keeps the
// destination's IO stream serviced so frames rendered into the source (the
// loopback device) reach real hardware. The relay does not touch samples -
// frame transport happens inside the platform once IO runs - it owns the
// lifecycle: activation, idempotent start, idle stop, bounded start waits,
// and autonomous restart when the destination's IO dies underneath it.

use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::error::{Result, RouterError};
use crate::hardware::{HardwareAdapter, HardwareError, PropertyEvent, PropertyListener, SubscriptionId};
use crate::types::EndpointInfo;
use crate::worker::TaskQueue;

/// Destination IO lifecycle as observed by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IoPhase {
    /// IO is not requested (or was stopped)
    Stopped,
    /// start_io was issued; the endpoint has not reported running yet
    Starting,
    /// The destination reported IO running
    Running,
    /// The last start attempt failed with this status
    Failed(i32),
}

#[derive(Debug)]
struct IoTracker {
    phase: Mutex<IoPhase>,
    changed: Condvar,
}

impl IoTracker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(IoPhase::Stopped),
            changed: Condvar::new(),
        })
    }

    fn set(&self, phase: IoPhase) {
        *self.phase.lock().unwrap() = phase;
        self.changed.notify_all();
    }

    fn get(&self) -> IoPhase {
        *self.phase.lock().unwrap()
    }

    /// Starting -> Running; any other phase is left alone
    fn advance_to_running(&self) {
        let mut phase = self.phase.lock().unwrap();
        if *phase == IoPhase::Starting {
            *phase = IoPhase::Running;
            self.changed.notify_all();
        }
    }
}

fn status_of(err: &HardwareError) -> i32 {
    match err {
        HardwareError::Status(status) => *status,
        HardwareError::Other(_) => -1,
    }
}

#[derive(Debug, Clone)]
struct RelayLink {
    source: EndpointInfo,
    destination: EndpointInfo,
    subscription: SubscriptionId,
}

/// Forwards audio from a source endpoint to a destination endpoint while
/// active. One instance per audio path (primary and UI sounds).
pub struct PlayThroughRelay {
    label: &'static str,
    hardware: Arc<dyn HardwareAdapter>,
    queue: TaskQueue,
    auto_restart: bool,
    link: Option<RelayLink>,
    tracker: Arc<IoTracker>,
    // Per-activation gate for autonomous restarts; cleared before teardown so
    // a notification arriving mid-stop cannot resurrect the IO stream
    restart_allowed: Arc<AtomicBool>,
}

impl PlayThroughRelay {
    pub fn new(
        label: &'static str,
        hardware: Arc<dyn HardwareAdapter>,
        queue: TaskQueue,
        auto_restart: bool,
    ) -> Self {
        Self {
            label,
            hardware,
            queue,
            auto_restart,
            link: None,
            tracker: IoTracker::new(),
            restart_allowed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_started(&self) -> bool {
        matches!(self.tracker.get(), IoPhase::Starting | IoPhase::Running)
    }

    pub fn source(&self) -> Option<&EndpointInfo> {
        self.link.as_ref().map(|link| &link.source)
    }

    pub fn destination(&self) -> Option<&EndpointInfo> {
        self.link.as_ref().map(|link| &link.destination)
    }

    /// Bind the relay to a (source, destination) pair. Rebinding away from a
    /// previous destination blocks while that destination's IO stops.
    pub fn activate(&mut self, source: &EndpointInfo, destination: &EndpointInfo) -> Result<()> {
        if let Some(link) = &self.link {
            if link.source.id == source.id && link.destination.id == destination.id {
                return Ok(());
            }
            self.deactivate()?;
        }

        let tracker = IoTracker::new();
        let restart_allowed = Arc::new(AtomicBool::new(true));
        let listener = self.make_listener(Arc::clone(&tracker), Arc::clone(&restart_allowed));
        let subscription = self.hardware.subscribe(destination.id, listener);

        self.tracker = tracker;
        self.restart_allowed = restart_allowed;
        self.link = Some(RelayLink {
            source: source.clone(),
            destination: destination.clone(),
            subscription,
        });

        info!(
            "{} Relay '{}' bound '{}' -> '{}'",
            "RELAY_BIND".bright_cyan(),
            self.label,
            source.uid,
            destination.uid
        );
        Ok(())
    }

    /// Unbind and stop. Also suppresses autonomous restart so hardware
    /// notifications arriving during reconfiguration cannot bring the old
    /// destination back up. Idempotent.
    pub fn deactivate(&mut self) -> Result<()> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };

        self.restart_allowed.store(false, Ordering::SeqCst);
        self.hardware.unsubscribe(link.subscription);

        let was_started = {
            let mut phase = self.tracker.phase.lock().unwrap();
            let started = matches!(*phase, IoPhase::Starting | IoPhase::Running);
            *phase = IoPhase::Stopped;
            self.tracker.changed.notify_all();
            started
        };

        info!(
            "{} Relay '{}' unbound from '{}'",
            "RELAY_UNBIND".bright_cyan(),
            self.label,
            link.destination.uid
        );

        if was_started {
            self.hardware.stop_io(link.destination.id)?;
        }
        Ok(())
    }

    /// Ensure the destination's IO is running. Idempotent; blocks until the
    /// platform accepts the start request.
    pub fn start(&mut self) -> Result<()> {
        let Some(link) = &self.link else {
            return Err(RouterError::Unspecified(format!(
                "relay '{}' is not active",
                self.label
            )));
        };

        {
            let mut phase = self.tracker.phase.lock().unwrap();
            if matches!(*phase, IoPhase::Starting | IoPhase::Running) {
                return Ok(());
            }
            *phase = IoPhase::Starting;
        }

        if let Err(e) = self.hardware.start_io(link.destination.id) {
            warn!(
                "{} Relay '{}' failed to start IO on '{}': {}",
                "RELAY_ERROR".bright_red(),
                self.label,
                link.destination.uid,
                e
            );
            self.tracker.set(IoPhase::Stopped);
            return Err(e.into());
        }

        // The destination reports running through its property event; when
        // another client already holds the stream open there is no edge to
        // observe, so catch up from the live state
        if matches!(self.hardware.io_running(link.destination.id), Ok(true)) {
            self.tracker.advance_to_running();
        }
        Ok(())
    }

    /// Stop the destination's IO if nothing is rendering into the source,
    /// so an unused route does not keep consuming CPU. Best-effort.
    pub fn stop_if_idle(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        if self.tracker.get() != IoPhase::Running {
            return;
        }

        match self.hardware.io_running(link.source.id) {
            Ok(true) => {} // audio flowing, keep the route hot
            Ok(false) => {
                self.tracker.set(IoPhase::Stopped);
                match self.hardware.stop_io(link.destination.id) {
                    Ok(()) => info!(
                        "{} Relay '{}' idle, stopped IO on '{}'",
                        "RELAY_IDLE".bright_blue(),
                        self.label,
                        link.destination.uid
                    ),
                    Err(e) => warn!(
                        "{} Relay '{}' failed to stop idle IO on '{}': {}",
                        "RELAY_WARN".bright_yellow(),
                        self.label,
                        link.destination.uid,
                        e
                    ),
                }
            }
            Err(e) => warn!(
                "{} Relay '{}' could not query source IO state: {}",
                "RELAY_WARN".bright_yellow(),
                self.label,
                e
            ),
        }
    }

    /// Block, bounded, until the destination reports IO running. Fails with a
    /// distinguished error when the relay was never asked to start, when the
    /// start failed, or when the bound elapses.
    pub fn wait_for_output_device_to_start(&self, timeout: Duration) -> Result<()> {
        if self.link.is_none() {
            return Err(RouterError::Unspecified(format!(
                "relay '{}' is not active",
                self.label
            )));
        }

        let deadline = Instant::now() + timeout;
        let mut phase = self.tracker.phase.lock().unwrap();
        loop {
            match *phase {
                IoPhase::Running => return Ok(()),
                IoPhase::Failed(status) => {
                    return Err(RouterError::HardwareOperationFailed { status })
                }
                IoPhase::Stopped => {
                    return Err(RouterError::Unspecified(format!(
                        "relay '{}' was never asked to start",
                        self.label
                    )))
                }
                IoPhase::Starting => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RouterError::Unspecified(format!(
                            "timed out waiting for relay '{}' output to start",
                            self.label
                        )));
                    }
                    let (guard, _) = self
                        .tracker
                        .changed
                        .wait_timeout(phase, deadline - now)
                        .unwrap();
                    phase = guard;
                }
            }
        }
    }

    fn make_listener(
        &self,
        tracker: Arc<IoTracker>,
        restart_allowed: Arc<AtomicBool>,
    ) -> PropertyListener {
        let hardware = Arc::clone(&self.hardware);
        let queue = self.queue.clone();
        let auto_restart = self.auto_restart;
        let label = self.label;

        Arc::new(move |endpoint, event| match event {
            PropertyEvent::IoStarted => tracker.advance_to_running(),
            PropertyEvent::IoStopped => {
                if !auto_restart || !restart_allowed.load(Ordering::SeqCst) {
                    return;
                }
                {
                    let mut phase = tracker.phase.lock().unwrap();
                    if *phase != IoPhase::Running {
                        return;
                    }
                    *phase = IoPhase::Starting;
                }
                info!(
                    "{} Relay '{}' destination IO stopped unexpectedly, restarting",
                    "RELAY_RESTART".bright_yellow(),
                    label
                );
                let hardware = Arc::clone(&hardware);
                let tracker = Arc::clone(&tracker);
                let restart_allowed = Arc::clone(&restart_allowed);
                queue.enqueue(move || {
                    if !restart_allowed.load(Ordering::SeqCst) {
                        tracker.set(IoPhase::Stopped);
                        return;
                    }
                    if let Err(e) = hardware.start_io(endpoint) {
                        warn!(
                            "{} Relay restart failed on endpoint {}: {}",
                            "RELAY_ERROR".bright_red(),
                            endpoint,
                            e
                        );
                        tracker.set(IoPhase::Failed(status_of(&e)));
                    } else if !restart_allowed.load(Ordering::SeqCst) {
                        // Deactivated while the restart was in flight; undo it
                        let _ = hardware.stop_io(endpoint);
                        tracker.set(IoPhase::Stopped);
                    }
                });
            }
            _ => {}
        })
    }
}

impl std::fmt::Debug for PlayThroughRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayThroughRelay")
            .field("label", &self.label)
            .field("destination", &self.destination().map(|d| d.uid.clone()))
            .field("phase", &self.tracker.get())
            .finish()
    }
}
