use std::env;
use std::path::PathBuf;

pub const DEFAULT_MODEL_NAME: &str = "distil-medium.en";
pub const DEFAULT_COMPUTE_TYPE: &str = "float16";
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_CHANNELS: u16 = 1;
pub const DEFAULT_SILENCE_THRESHOLD: f32 = 0.01;
pub const DEFAULT_SILENCE_DURATION_SECS: f32 = 1.5;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_ERROR_HISTORY: usize = 100;

pub(crate) const SOCKET_FILE_NAME: &str = "voicetype.sock";

/// Hard ceiling so a typo cannot configure an hour-long silence window.
pub(crate) const MAX_SILENCE_DURATION_SECS: f32 = 600.0;

/// Characters never valid in a device name; guards log and error formatting.
pub(crate) const FORBIDDEN_DEVICE_CHARS: &[char] = &['\n', '\r', '\0'];

pub(crate) fn default_socket_path() -> PathBuf {
    env::temp_dir().join(SOCKET_FILE_NAME)
}
