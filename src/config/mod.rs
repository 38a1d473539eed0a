//! Command-line parsing and validation helpers.

mod defaults;
mod validation;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use defaults::default_socket_path;
pub use defaults::{
    DEFAULT_CHANNELS, DEFAULT_COMPUTE_TYPE, DEFAULT_ERROR_HISTORY, DEFAULT_MODEL_NAME,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SAMPLE_RATE, DEFAULT_SILENCE_DURATION_SECS,
    DEFAULT_SILENCE_THRESHOLD,
};

/// CLI options for the VoiceType daemon. Validated values are passed into each
/// component at construction time; nothing reads ambient global state.
#[derive(Debug, Parser, Clone)]
#[command(about = "VoiceType - local voice dictation daemon", author, version)]
pub struct AppConfig {
    /// Speech model name recorded in diagnostics
    #[arg(long, default_value = DEFAULT_MODEL_NAME)]
    pub model: String,

    /// Path to the GGML model file loaded by whisper.cpp
    #[arg(long = "model-path", env = "VOICETYPE_MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Inference device preference
    #[arg(long, value_enum, default_value_t = ComputeDevice::Cuda)]
    pub device: ComputeDevice,

    /// Compute type recorded with the model handle (e.g. float16)
    #[arg(long = "compute-type", default_value = DEFAULT_COMPUTE_TYPE)]
    pub compute_type: String,

    /// Language passed to the model
    #[arg(long, default_value = "en")]
    pub lang: String,

    /// Target sample rate for captured audio (Hz)
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Input channel count requested from the device
    #[arg(long, default_value_t = DEFAULT_CHANNELS)]
    pub channels: u16,

    /// Mean-amplitude floor below which a block counts as silence
    #[arg(
        long = "silence-threshold",
        default_value_t = DEFAULT_SILENCE_THRESHOLD,
        allow_negative_numbers = true
    )]
    pub silence_threshold: f32,

    /// Continuous silence required before auto-stop (seconds, <= 0 disables)
    #[arg(
        long = "silence-duration",
        default_value_t = DEFAULT_SILENCE_DURATION_SECS,
        allow_negative_numbers = true
    )]
    pub silence_duration: f32,

    /// Block queue capacity between the audio callback and the consumer thread
    #[arg(long = "queue-capacity", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Preferred audio input device name
    #[arg(long = "input-device")]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Unix socket path for the toggle command channel
    #[arg(long = "socket-path", env = "VOICETYPE_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Start recording automatically once the model finishes loading
    #[arg(long = "auto-record", default_value_t = false)]
    pub auto_record: bool,

    /// Number of recent errors retained for diagnostics
    #[arg(long = "error-history", default_value_t = DEFAULT_ERROR_HISTORY)]
    pub error_history: usize,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOICETYPE_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOICETYPE_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcript snippets (debug log only)
    #[arg(
        long = "log-content",
        env = "VOICETYPE_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}

impl AppConfig {
    /// Socket path with the temp-dir default applied.
    pub fn resolved_socket_path(&self) -> PathBuf {
        self.socket_path.clone().unwrap_or_else(default_socket_path)
    }

    /// Snapshot of the capture-related settings handed to `AudioCapture`.
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            silence_threshold: self.silence_threshold,
            silence_duration_secs: self.silence_duration,
            queue_capacity: self.queue_capacity,
            preferred_device: self.input_device.clone(),
        }
    }

    /// Snapshot of the model-related settings handed to the transcriber.
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model: self.model.clone(),
            model_path: self.model_path.clone(),
            device: self.device,
            compute_type: self.compute_type.clone(),
            language: self.lang.clone(),
        }
    }
}

/// Tunable parameters for microphone capture and silence auto-stop.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub silence_threshold: f32,
    pub silence_duration_secs: f32,
    pub queue_capacity: usize,
    pub preferred_device: Option<String>,
}

/// Settings describing which speech model to load and how.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model: String,
    pub model_path: Option<PathBuf>,
    pub device: ComputeDevice,
    pub compute_type: String,
    pub language: String,
}

/// Where model inference runs. Cuda falls back to Cpu when loading fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ComputeDevice {
    Cuda,
    Cpu,
}

impl ComputeDevice {
    pub fn label(self) -> &'static str {
        match self {
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Cpu => "cpu",
        }
    }
}
