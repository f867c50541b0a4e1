// Core Audio implementation of the hardware adapter (macOS)
//
// Raw AudioObject property calls; no wrapper layer. Listener callbacks come
// in on Core Audio's notification threads and are translated into the
// engine's PropertyEvent values before they reach any subscriber.

use std::collections::HashMap;
use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use colored::Colorize;
use core_foundation::base::TCFType;
use core_foundation::string::CFString;
use coreaudio_sys::{
    kAudioDevicePropertyDataSource, kAudioDevicePropertyDeviceIsRunningSomewhere,
    kAudioDevicePropertyDeviceUID, kAudioDevicePropertyLatency, kAudioDevicePropertyMute,
    kAudioDevicePropertyStreamConfiguration, kAudioDevicePropertyVolumeScalar,
    kAudioHardwarePropertyDefaultOutputDevice, kAudioHardwarePropertyDefaultSystemOutputDevice,
    kAudioHardwarePropertyDevices, kAudioObjectPropertyElementMaster,
    kAudioObjectPropertyScopeGlobal, kAudioObjectPropertyScopeOutput, kAudioObjectSystemObject,
    AudioBufferList, AudioDeviceStart, AudioDeviceStop, AudioObjectAddPropertyListener,
    AudioObjectGetPropertyData, AudioObjectGetPropertyDataSize, AudioObjectID,
    AudioObjectIsPropertySettable, AudioObjectPropertyAddress, AudioObjectRemovePropertyListener,
    AudioObjectSetPropertyData, Boolean, OSStatus,
};
use tracing::warn;

use crate::hardware::adapter::{
    HardwareAdapter, HardwareError, HwResult, PropertyEvent, PropertyListener, SubscriptionId,
};
use crate::types::{DataSourceId, EndpointId, EndpointInfo};

fn address(selector: u32, scope: u32) -> AudioObjectPropertyAddress {
    AudioObjectPropertyAddress {
        mSelector: selector,
        mScope: scope,
        mElement: kAudioObjectPropertyElementMaster,
    }
}

fn check(status: OSStatus) -> HwResult<()> {
    if status != 0 {
        return Err(HardwareError::Status(status));
    }
    Ok(())
}

unsafe fn get_property<T: Copy>(
    object: AudioObjectID,
    addr: &AudioObjectPropertyAddress,
    mut value: T,
) -> HwResult<T> {
    let mut size = mem::size_of::<T>() as u32;
    check(AudioObjectGetPropertyData(
        object,
        addr,
        0,
        ptr::null(),
        &mut size,
        &mut value as *mut T as *mut c_void,
    ))?;
    Ok(value)
}

unsafe fn set_property<T: Copy>(
    object: AudioObjectID,
    addr: &AudioObjectPropertyAddress,
    value: T,
) -> HwResult<()> {
    check(AudioObjectSetPropertyData(
        object,
        addr,
        0,
        ptr::null(),
        mem::size_of::<T>() as u32,
        &value as *const T as *const c_void,
    ))
}

struct ListenerContext {
    endpoint: EndpointId,
    listener: PropertyListener,
}

/// Selectors a subscription listens on
const LISTENED_SELECTORS: [(u32, u32); 4] = [
    (kAudioDevicePropertyVolumeScalar, kAudioObjectPropertyScopeOutput),
    (kAudioDevicePropertyMute, kAudioObjectPropertyScopeOutput),
    (kAudioDevicePropertyDataSource, kAudioObjectPropertyScopeOutput),
    (
        kAudioDevicePropertyDeviceIsRunningSomewhere,
        kAudioObjectPropertyScopeGlobal,
    ),
];

unsafe extern "C" fn property_listener_proc(
    object: AudioObjectID,
    address_count: u32,
    addresses: *const AudioObjectPropertyAddress,
    client_data: *mut c_void,
) -> OSStatus {
    if client_data.is_null() {
        return 0;
    }
    let context = &*(client_data as *const ListenerContext);

    for i in 0..address_count as usize {
        let changed = &*addresses.add(i);
        let event = match changed.mSelector {
            s if s == kAudioDevicePropertyVolumeScalar => PropertyEvent::VolumeChanged,
            s if s == kAudioDevicePropertyMute => PropertyEvent::MuteChanged,
            s if s == kAudioDevicePropertyDataSource => PropertyEvent::DataSourceChanged,
            s if s == kAudioDevicePropertyDeviceIsRunningSomewhere => {
                let addr = address(
                    kAudioDevicePropertyDeviceIsRunningSomewhere,
                    kAudioObjectPropertyScopeGlobal,
                );
                match get_property::<u32>(object, &addr, 0) {
                    Ok(0) => PropertyEvent::IoStopped,
                    Ok(_) => PropertyEvent::IoStarted,
                    Err(_) => continue,
                }
            }
            _ => continue,
        };
        (context.listener)(context.endpoint, event);
    }
    0
}

struct SubscriptionEntry {
    device: AudioObjectID,
    // Boxed so the pointer handed to Core Audio stays stable
    context: Box<ListenerContext>,
}

/// Hardware adapter speaking to Core Audio directly
pub struct CoreAudioHardware {
    /// Device UIDs treated as virtual loopback endpoints
    loopback_uids: Vec<String>,
    subscriptions: Mutex<HashMap<u64, SubscriptionEntry>>,
    next_subscription: AtomicU64,
}

impl CoreAudioHardware {
    pub fn new(loopback_uids: Vec<String>) -> anyhow::Result<Arc<Self>> {
        let adapter = Arc::new(Self {
            loopback_uids,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        });
        // Fail fast when the HAL is unreachable (e.g. sandboxed build)
        adapter
            .endpoints()
            .context("Core Audio device enumeration failed")?;
        Ok(adapter)
    }

    fn device_uid(&self, device: AudioObjectID) -> HwResult<String> {
        unsafe {
            let addr = address(kAudioDevicePropertyDeviceUID, kAudioObjectPropertyScopeGlobal);
            let cf_uid: *const core_foundation::string::__CFString =
                get_property(device, &addr, ptr::null())?;
            if cf_uid.is_null() {
                return Err(HardwareError::Other(format!(
                    "device {device} reported a null UID"
                )));
            }
            let uid = CFString::wrap_under_create_rule(cf_uid);
            Ok(uid.to_string())
        }
    }

    fn device_ids(&self) -> HwResult<Vec<AudioObjectID>> {
        unsafe {
            let addr = address(kAudioHardwarePropertyDevices, kAudioObjectPropertyScopeGlobal);
            let mut size = 0u32;
            check(AudioObjectGetPropertyDataSize(
                kAudioObjectSystemObject,
                &addr,
                0,
                ptr::null(),
                &mut size,
            ))?;
            let count = size as usize / mem::size_of::<AudioObjectID>();
            let mut devices = vec![0 as AudioObjectID; count];
            check(AudioObjectGetPropertyData(
                kAudioObjectSystemObject,
                &addr,
                0,
                ptr::null(),
                &mut size,
                devices.as_mut_ptr() as *mut c_void,
            ))?;
            devices.truncate(size as usize / mem::size_of::<AudioObjectID>());
            Ok(devices)
        }
    }

    fn describe(&self, device: AudioObjectID) -> HwResult<EndpointInfo> {
        let uid = self.device_uid(device)?;
        let output_channels = self.output_channel_count(EndpointId(device)).unwrap_or(0);
        let latency_frames = self.output_latency(EndpointId(device)).unwrap_or(0);
        let is_virtual_loopback = self.loopback_uids.iter().any(|known| *known == uid);
        Ok(EndpointInfo {
            id: EndpointId(device),
            uid,
            output_channels,
            latency_frames,
            is_virtual_loopback,
        })
    }
}

impl HardwareAdapter for CoreAudioHardware {
    fn endpoints(&self) -> HwResult<Vec<EndpointInfo>> {
        let mut endpoints = Vec::new();
        for device in self.device_ids()? {
            match self.describe(device) {
                Ok(info) => endpoints.push(info),
                Err(e) => warn!(
                    "{} Skipping device {}: {}",
                    "COREAUDIO_WARN".bright_yellow(),
                    device,
                    e
                ),
            }
        }
        Ok(endpoints)
    }

    fn endpoint_info(&self, endpoint: EndpointId) -> HwResult<EndpointInfo> {
        self.describe(endpoint.0)
    }

    fn output_channel_count(&self, endpoint: EndpointId) -> HwResult<u32> {
        unsafe {
            let addr = address(
                kAudioDevicePropertyStreamConfiguration,
                kAudioObjectPropertyScopeOutput,
            );
            let mut size = 0u32;
            check(AudioObjectGetPropertyDataSize(
                endpoint.0,
                &addr,
                0,
                ptr::null(),
                &mut size,
            ))?;
            if (size as usize) < mem::size_of::<AudioBufferList>() {
                return Ok(0);
            }
            let mut buffer = vec![0u8; size as usize];
            check(AudioObjectGetPropertyData(
                endpoint.0,
                &addr,
                0,
                ptr::null(),
                &mut size,
                buffer.as_mut_ptr() as *mut c_void,
            ))?;
            let list = &*(buffer.as_ptr() as *const AudioBufferList);
            let buffers = list.mBuffers.as_ptr();
            let mut channels = 0u32;
            for i in 0..list.mNumberBuffers as usize {
                channels += (*buffers.add(i)).mNumberChannels;
            }
            Ok(channels)
        }
    }

    fn output_latency(&self, endpoint: EndpointId) -> HwResult<u32> {
        unsafe {
            let addr = address(kAudioDevicePropertyLatency, kAudioObjectPropertyScopeOutput);
            get_property::<u32>(endpoint.0, &addr, 0)
        }
    }

    fn default_output_endpoint(&self, system: bool) -> HwResult<EndpointInfo> {
        let selector = if system {
            kAudioHardwarePropertyDefaultSystemOutputDevice
        } else {
            kAudioHardwarePropertyDefaultOutputDevice
        };
        let device = unsafe {
            get_property::<AudioObjectID>(
                kAudioObjectSystemObject,
                &address(selector, kAudioObjectPropertyScopeGlobal),
                0,
            )?
        };
        self.describe(device)
    }

    fn set_default_output_endpoint(&self, endpoint: EndpointId, system: bool) -> HwResult<()> {
        let selector = if system {
            kAudioHardwarePropertyDefaultSystemOutputDevice
        } else {
            kAudioHardwarePropertyDefaultOutputDevice
        };
        unsafe {
            set_property(
                kAudioObjectSystemObject,
                &address(selector, kAudioObjectPropertyScopeGlobal),
                endpoint.0,
            )
        }
    }

    fn data_source(&self, endpoint: EndpointId) -> HwResult<DataSourceId> {
        let source = unsafe {
            get_property::<u32>(
                endpoint.0,
                &address(kAudioDevicePropertyDataSource, kAudioObjectPropertyScopeOutput),
                0,
            )?
        };
        Ok(DataSourceId(source))
    }

    fn set_data_source(&self, endpoint: EndpointId, source: DataSourceId) -> HwResult<()> {
        unsafe {
            set_property(
                endpoint.0,
                &address(kAudioDevicePropertyDataSource, kAudioObjectPropertyScopeOutput),
                source.0,
            )
        }
    }

    fn data_source_settable(&self, endpoint: EndpointId) -> HwResult<bool> {
        unsafe {
            let addr = address(kAudioDevicePropertyDataSource, kAudioObjectPropertyScopeOutput);
            let mut settable: Boolean = 0;
            check(AudioObjectIsPropertySettable(
                endpoint.0,
                &addr,
                &mut settable,
            ))?;
            Ok(settable != 0)
        }
    }

    fn output_volume(&self, endpoint: EndpointId) -> HwResult<f32> {
        unsafe {
            get_property::<f32>(
                endpoint.0,
                &address(
                    kAudioDevicePropertyVolumeScalar,
                    kAudioObjectPropertyScopeOutput,
                ),
                0.0,
            )
        }
    }

    fn set_output_volume(&self, endpoint: EndpointId, volume: f32) -> HwResult<()> {
        unsafe {
            set_property(
                endpoint.0,
                &address(
                    kAudioDevicePropertyVolumeScalar,
                    kAudioObjectPropertyScopeOutput,
                ),
                volume.clamp(0.0, 1.0),
            )
        }
    }

    fn output_muted(&self, endpoint: EndpointId) -> HwResult<bool> {
        let muted = unsafe {
            get_property::<u32>(
                endpoint.0,
                &address(kAudioDevicePropertyMute, kAudioObjectPropertyScopeOutput),
                0,
            )?
        };
        Ok(muted != 0)
    }

    fn set_output_muted(&self, endpoint: EndpointId, muted: bool) -> HwResult<()> {
        unsafe {
            set_property(
                endpoint.0,
                &address(kAudioDevicePropertyMute, kAudioObjectPropertyScopeOutput),
                u32::from(muted),
            )
        }
    }

    fn start_io(&self, endpoint: EndpointId) -> HwResult<()> {
        unsafe { check(AudioDeviceStart(endpoint.0, None)) }
    }

    fn stop_io(&self, endpoint: EndpointId) -> HwResult<()> {
        unsafe { check(AudioDeviceStop(endpoint.0, None)) }
    }

    fn io_running(&self, endpoint: EndpointId) -> HwResult<bool> {
        let running = unsafe {
            get_property::<u32>(
                endpoint.0,
                &address(
                    kAudioDevicePropertyDeviceIsRunningSomewhere,
                    kAudioObjectPropertyScopeGlobal,
                ),
                0,
            )?
        };
        Ok(running != 0)
    }

    fn subscribe(&self, endpoint: EndpointId, listener: PropertyListener) -> SubscriptionId {
        let context = Box::new(ListenerContext { endpoint, listener });
        let client_data = &*context as *const ListenerContext as *mut c_void;

        for (selector, scope) in LISTENED_SELECTORS {
            let addr = address(selector, scope);
            let status = unsafe {
                AudioObjectAddPropertyListener(
                    endpoint.0,
                    &addr,
                    Some(property_listener_proc),
                    client_data,
                )
            };
            if status != 0 {
                warn!(
                    "{} Could not listen for selector {:#x} on device {}: status {}",
                    "COREAUDIO_WARN".bright_yellow(),
                    selector,
                    endpoint,
                    status
                );
            }
        }

        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscriptions.lock().unwrap().insert(
            id,
            SubscriptionEntry {
                device: endpoint.0,
                context,
            },
        );
        SubscriptionId(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        let Some(entry) = self.subscriptions.lock().unwrap().remove(&subscription.0) else {
            return;
        };
        let client_data = &*entry.context as *const ListenerContext as *mut c_void;
        for (selector, scope) in LISTENED_SELECTORS {
            let addr = address(selector, scope);
            unsafe {
                AudioObjectRemovePropertyListener(
                    entry.device,
                    &addr,
                    Some(property_listener_proc),
                    client_data,
                );
            }
        }
        // entry.context dropped here, after the HAL stops referencing it
    }
}
