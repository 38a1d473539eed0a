//! Microphone capture with silence auto-stop.
//!
//! Audio is captured via CPAL on a dedicated thread, downmixed to mono f32,
//! and handed over as a single buffer when the session stops. A session stops
//! when asked to (toggle), when the silence window elapses, or when the
//! device disappears mid-stream.

mod capture;
mod device;
mod dispatch;
mod resample;
mod silence;
#[cfg(test)]
mod tests;

pub use capture::{AudioBuffer, AudioCapture, CaptureOutcome, StopReason};
pub use device::{list_input_devices, AudioDeviceInfo};
pub use silence::SilenceTracker;
