// Control synchronization between the loopback endpoint and real hardware
//
// While active, volume/mute/data-source state is mirrored between the pair
// so user-visible controls track the physical device even though
// applications render into the virtual one. Activation pushes the physical
// device's state once, then both sides are kept in sync through property
// listeners. An `applying` guard keeps a mirrored write from echoing back
// through the other side's listener.

use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{Result, RouterError};
use crate::hardware::{HardwareAdapter, PropertyEvent, PropertyListener, SubscriptionId};
use crate::types::EndpointInfo;

#[derive(Debug, Clone)]
struct SyncLink {
    virtual_endpoint: EndpointInfo,
    physical: EndpointInfo,
}

/// Mirrors volume/mute/data-source state between a (virtual, physical)
/// endpoint pair while active
pub struct ControlSynchronizer {
    hardware: Arc<dyn HardwareAdapter>,
    link: Option<SyncLink>,
    active: bool,
    subscriptions: Vec<SubscriptionId>,
    applying: Arc<AtomicBool>,
}

impl ControlSynchronizer {
    pub fn new(hardware: Arc<dyn HardwareAdapter>) -> Self {
        Self {
            hardware,
            link: None,
            active: false,
            subscriptions: Vec::new(),
            applying: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// The (virtual, physical) pair currently bound, if any
    pub fn pair(&self) -> Option<(&EndpointInfo, &EndpointInfo)> {
        self.link
            .as_ref()
            .map(|link| (&link.virtual_endpoint, &link.physical))
    }

    /// Change the endpoint pair. Refused while active: mirroring against a
    /// stale pair is undefined, so callers deactivate first.
    pub fn rebind(&mut self, virtual_endpoint: &EndpointInfo, physical: &EndpointInfo) -> Result<()> {
        if self.active {
            return Err(RouterError::Unspecified(
                "control synchronizer must be deactivated before rebinding".to_string(),
            ));
        }
        self.link = Some(SyncLink {
            virtual_endpoint: virtual_endpoint.clone(),
            physical: physical.clone(),
        });
        Ok(())
    }

    /// Begin mirroring. Idempotent and cheap; no blocking hardware IO.
    pub fn activate(&mut self) -> Result<()> {
        if self.active {
            return Ok(());
        }
        let Some(link) = self.link.clone() else {
            return Err(RouterError::Unspecified(
                "control synchronizer has no endpoint pair bound".to_string(),
            ));
        };

        // Seed the virtual endpoint with the physical device's state so
        // user-visible controls show the real hardware immediately
        let volume = self.hardware.output_volume(link.physical.id)?;
        self.hardware
            .set_output_volume(link.virtual_endpoint.id, volume)?;
        let muted = self.hardware.output_muted(link.physical.id)?;
        self.hardware
            .set_output_muted(link.virtual_endpoint.id, muted)?;

        let virtual_listener = self.make_listener(&link, MirrorDirection::VirtualToPhysical);
        let physical_listener = self.make_listener(&link, MirrorDirection::PhysicalToVirtual);
        self.subscriptions = vec![
            self.hardware
                .subscribe(link.virtual_endpoint.id, virtual_listener),
            self.hardware.subscribe(link.physical.id, physical_listener),
        ];
        self.active = true;

        info!(
            "{} Mirroring controls between '{}' and '{}'",
            "CTRL_SYNC".bright_cyan(),
            link.virtual_endpoint.uid,
            link.physical.uid
        );
        Ok(())
    }

    /// Stop mirroring. Idempotent and cheap.
    pub fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        for subscription in self.subscriptions.drain(..) {
            self.hardware.unsubscribe(subscription);
        }
        self.applying.store(false, Ordering::SeqCst);
        self.active = false;
    }

    fn make_listener(&self, link: &SyncLink, direction: MirrorDirection) -> PropertyListener {
        let hardware = Arc::clone(&self.hardware);
        let applying = Arc::clone(&self.applying);
        let (from, to) = match direction {
            MirrorDirection::VirtualToPhysical => {
                (link.virtual_endpoint.clone(), link.physical.clone())
            }
            MirrorDirection::PhysicalToVirtual => {
                (link.physical.clone(), link.virtual_endpoint.clone())
            }
        };

        Arc::new(move |_, event| {
            if applying.load(Ordering::SeqCst) {
                return; // our own mirrored write coming back around
            }
            let mirror = || -> crate::hardware::HwResult<()> {
                match event {
                    PropertyEvent::VolumeChanged => {
                        let volume = hardware.output_volume(from.id)?;
                        hardware.set_output_volume(to.id, volume)
                    }
                    PropertyEvent::MuteChanged => {
                        let muted = hardware.output_muted(from.id)?;
                        hardware.set_output_muted(to.id, muted)
                    }
                    PropertyEvent::DataSourceChanged
                        if direction == MirrorDirection::PhysicalToVirtual =>
                    {
                        // The physical device owns the data source; reflect it
                        let source = hardware.data_source(from.id)?;
                        hardware.set_data_source(to.id, source)
                    }
                    _ => Ok(()),
                }
            };
            applying.store(true, Ordering::SeqCst);
            if let Err(e) = mirror() {
                warn!(
                    "{} Failed to mirror {:?} from '{}' to '{}': {}",
                    "CTRL_SYNC_WARN".bright_yellow(),
                    event,
                    from.uid,
                    to.uid,
                    e
                );
            }
            applying.store(false, Ordering::SeqCst);
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MirrorDirection {
    VirtualToPhysical,
    PhysicalToVirtual,
}

impl std::fmt::Debug for ControlSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSynchronizer")
            .field("active", &self.active)
            .field("pair", &self.pair().map(|(v, p)| (v.uid.clone(), p.uid.clone())))
            .finish()
    }
}
