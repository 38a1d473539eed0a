//! Input device enumeration and scoring.

use crate::errors::VoiceTypeError;
use crate::log_debug;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::SupportedBufferSize;

/// What we know about one input device, enough to rank candidates and to
/// print a useful listing for `--list-input-devices`.
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub host: String,
    pub max_input_channels: u16,
    pub default_sample_rate: u32,
    /// Estimated input latency in seconds, derived from the minimum buffer
    /// size when the backend reports one.
    pub default_latency: f32,
}

const FALLBACK_LATENCY_SECS: f32 = 0.02;

/// Enumerate input devices across every available host API. Enumeration is
/// never fatal: hosts or devices that fail to answer are skipped and logged.
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let mut infos = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_name = host_id.name();
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(err) => {
                log_debug(&format!("device_scan|host '{host_name}' unavailable: {err}"));
                continue;
            }
        };
        let devices = match host.input_devices() {
            Ok(devices) => devices,
            Err(err) => {
                log_debug(&format!("device_scan|host '{host_name}' scan failed: {err}"));
                continue;
            }
        };
        for device in devices {
            let name = match device.name() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let config = match device.default_input_config() {
                Ok(config) => config,
                Err(err) => {
                    log_debug(&format!("device_scan|skipping '{name}': {err}"));
                    continue;
                }
            };
            let rate = config.sample_rate().0;
            let latency = match config.buffer_size() {
                SupportedBufferSize::Range { min, .. } if rate > 0 => *min as f32 / rate as f32,
                _ => FALLBACK_LATENCY_SECS,
            };
            infos.push(AudioDeviceInfo {
                name,
                host: host_name.to_string(),
                max_input_channels: config.channels(),
                default_sample_rate: rate,
                default_latency: latency,
            });
        }
    }
    infos
}

/// Pick the most responsive candidate: lowest latency, then highest sample
/// rate. Ties keep the earliest entry so the choice is deterministic.
pub(super) fn select_best_input(devices: &[AudioDeviceInfo]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, info) in devices.iter().enumerate() {
        let better = match best {
            None => true,
            Some(best_idx) => {
                let current = &devices[best_idx];
                if info.default_latency != current.default_latency {
                    info.default_latency < current.default_latency
                } else {
                    info.default_sample_rate > current.default_sample_rate
                }
            }
        };
        if better {
            best = Some(idx);
        }
    }
    best
}

/// Resolve the device a session should open: the named device when one was
/// requested, otherwise the best-scoring input, otherwise the host default.
pub(super) fn find_input_device(
    preferred: Option<&str>,
) -> Result<cpal::Device, VoiceTypeError> {
    let not_found = |name: &str, detail: String| VoiceTypeError::AudioDevice {
        device: name.to_string(),
        operation: "select",
        channels: 0,
        sample_rate: 0,
        detail,
    };

    if let Some(name) = preferred {
        return device_by_name(name, None)
            .ok_or_else(|| not_found(name, "device not found on any host".into()));
    }

    let infos = list_input_devices();
    if let Some(best) = select_best_input(&infos) {
        let info = &infos[best];
        if let Some(device) = device_by_name(&info.name, Some(&info.host)) {
            log_debug(&format!(
                "device_scan|selected '{}' on {} latency={:.4}s rate={}Hz",
                info.name, info.host, info.default_latency, info.default_sample_rate
            ));
            return Ok(device);
        }
    }

    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| not_found("<default>", "no input device available".into()))
}

/// Look a device up by name, optionally pinned to the host it was scanned on.
fn device_by_name(name: &str, host_name: Option<&str>) -> Option<cpal::Device> {
    for host_id in cpal::available_hosts() {
        if let Some(wanted) = host_name {
            if host_id.name() != wanted {
                continue;
            }
        }
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(mut devices) = host.input_devices() else {
            continue;
        };
        if let Some(device) = devices.find(|d| d.name().map(|n| n == name).unwrap_or(false)) {
            return Some(device);
        }
    }
    None
}
