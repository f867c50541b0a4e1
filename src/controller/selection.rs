// Initial output endpoint selection
//
// At startup the platform default is used directly unless it is the loopback
// endpoint itself (left over from a previous run), in which case the lowest
// latency real output wins. Per-device query failures during the scan skip
// that device; only an empty result is fatal.

use colored::Colorize;
use tracing::{info, warn};

use crate::error::{Result, RouterError};
use crate::hardware::HardwareAdapter;
use crate::types::EndpointInfo;

pub(crate) fn pick_initial_output(hardware: &dyn HardwareAdapter) -> Result<EndpointInfo> {
    match hardware.default_output_endpoint(false) {
        Ok(default) if !default.is_virtual_loopback => {
            info!(
                "{} Using platform default output '{}'",
                "SELECT_DEFAULT".bright_green(),
                default.uid
            );
            return Ok(default);
        }
        Ok(default) => {
            info!(
                "{} Platform default '{}' is the loopback endpoint, scanning for real hardware",
                "SELECT_SCAN".bright_blue(),
                default.uid
            );
        }
        Err(e) => {
            warn!(
                "{} Could not read the platform default output: {}",
                "SELECT_WARN".bright_yellow(),
                e
            );
        }
    }
    lowest_latency_output(hardware)
}

/// Lowest-latency, output-capable, non-loopback endpoint; ties go to the
/// first enumerated
pub(crate) fn lowest_latency_output(hardware: &dyn HardwareAdapter) -> Result<EndpointInfo> {
    let endpoints = hardware.endpoints().map_err(RouterError::from)?;

    let mut best: Option<(EndpointInfo, u32)> = None;
    for endpoint in endpoints {
        if endpoint.is_virtual_loopback {
            continue;
        }
        let channels = match hardware.output_channel_count(endpoint.id) {
            Ok(channels) => channels,
            Err(e) => {
                warn!(
                    "{} Skipping '{}': channel query failed: {}",
                    "SELECT_WARN".bright_yellow(),
                    endpoint.uid,
                    e
                );
                continue;
            }
        };
        if channels == 0 {
            continue;
        }
        let latency = match hardware.output_latency(endpoint.id) {
            Ok(latency) => latency,
            Err(e) => {
                warn!(
                    "{} Skipping '{}': latency query failed: {}",
                    "SELECT_WARN".bright_yellow(),
                    endpoint.uid,
                    e
                );
                continue;
            }
        };
        crate::router_debug!("Candidate '{}': {} frames latency", endpoint.uid, latency);
        match &best {
            Some((_, best_latency)) if latency >= *best_latency => {}
            _ => best = Some((endpoint, latency)),
        }
    }

    match best {
        Some((endpoint, latency)) => {
            info!(
                "{} Selected '{}' ({} frames latency)",
                "SELECT_PICK".bright_green(),
                endpoint.uid,
                latency
            );
            Ok(endpoint)
        }
        None => Err(RouterError::DeviceNotFound {
            name: "physical output endpoint".to_string(),
        }),
    }
}
