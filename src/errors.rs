//! Error taxonomy for the capture -> transcription pipeline.
//!
//! Every component raises exactly one error kind so callers can decide
//! retryability without inspecting message strings. A bounded recorder keeps
//! the most recent errors for diagnostics; it is the only error memory
//! beyond the log files.

use crate::lock_or_recover;
use crate::log_debug;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum VoiceTypeError {
    /// Device enumeration, stream open, or stream runtime failures.
    #[error(
        "audio device error during {operation} on '{device}' \
         ({channels}ch @ {sample_rate}Hz): {detail}"
    )]
    AudioDevice {
        device: String,
        operation: &'static str,
        channels: u16,
        sample_rate: u32,
        detail: String,
    },

    /// Model load failures after retries and fallback are exhausted.
    #[error("model error during {stage} for '{model}': {detail}")]
    Model {
        model: String,
        stage: &'static str,
        detail: String,
    },

    /// Inference failures on an otherwise loaded model.
    #[error("transcription failed ({audio_len} samples @ {sample_rate}Hz): {detail}")]
    Transcription {
        audio_len: usize,
        sample_rate: u32,
        detail: String,
    },

    /// Command socket bind/listen failures after retries.
    #[error("command socket failed: {0}")]
    Hotkey(String),

    /// Reserved for resource-exhaustion conditions (threads, queues).
    #[error("resource limit reached: {0}")]
    Resource(String),
}

impl VoiceTypeError {
    pub fn kind(&self) -> &'static str {
        match self {
            VoiceTypeError::AudioDevice { .. } => "audio_device",
            VoiceTypeError::Model { .. } => "model",
            VoiceTypeError::Transcription { .. } => "transcription",
            VoiceTypeError::Hotkey(_) => "hotkey",
            VoiceTypeError::Resource(_) => "resource",
        }
    }

    /// Device-class errors are the only kind worth retrying a stream open for.
    pub fn is_device_error(&self) -> bool {
        matches!(self, VoiceTypeError::AudioDevice { .. })
    }
}

/// One remembered failure, cheap enough to keep around in bulk.
#[derive(Debug, Clone)]
pub struct RecordedError {
    pub timestamp: SystemTime,
    pub kind: &'static str,
    pub message: String,
}

/// Bounded ring buffer of recent errors, oldest evicted first.
pub struct ErrorRecorder {
    capacity: usize,
    entries: Mutex<VecDeque<RecordedError>>,
}

impl ErrorRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Log the error and remember it for later inspection.
    pub fn record(&self, error: &VoiceTypeError) {
        log_debug(&format!("error|kind={}|{error}", error.kind()));
        let mut entries = lock_or_recover(&self.entries, "error recorder");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(RecordedError {
            timestamp: SystemTime::now(),
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    /// Most recent errors, newest last.
    pub fn recent(&self, count: usize) -> Vec<RecordedError> {
        let entries = lock_or_recover(&self.entries, "error recorder");
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.entries, "error recorder").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock_or_recover(&self.entries, "error recorder").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_error(detail: &str) -> VoiceTypeError {
        VoiceTypeError::Hotkey(detail.to_string())
    }

    #[test]
    fn recorder_evicts_oldest_beyond_capacity() {
        let recorder = ErrorRecorder::new(3);
        for i in 0..5 {
            recorder.record(&sample_error(&format!("failure {i}")));
        }
        let recent = recorder.recent(10);
        assert_eq!(recent.len(), 3);
        assert!(recent[0].message.contains("failure 2"));
        assert!(recent[2].message.contains("failure 4"));
    }

    #[test]
    fn recent_limits_to_requested_count() {
        let recorder = ErrorRecorder::new(10);
        for i in 0..4 {
            recorder.record(&sample_error(&format!("failure {i}")));
        }
        let recent = recorder.recent(2);
        assert_eq!(recent.len(), 2);
        assert!(recent[1].message.contains("failure 3"));
    }

    #[test]
    fn clear_empties_the_buffer() {
        let recorder = ErrorRecorder::new(4);
        recorder.record(&sample_error("boom"));
        assert!(!recorder.is_empty());
        recorder.clear();
        assert!(recorder.is_empty());
    }

    #[test]
    fn kinds_label_each_variant() {
        let device = VoiceTypeError::AudioDevice {
            device: "mic".into(),
            operation: "start",
            channels: 1,
            sample_rate: 16_000,
            detail: "busy".into(),
        };
        assert_eq!(device.kind(), "audio_device");
        assert!(device.is_device_error());
        assert_eq!(sample_error("x").kind(), "hotkey");
        assert!(!sample_error("x").is_device_error());
    }
}
