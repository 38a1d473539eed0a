use std::time::{Duration, Instant};

/// Mean absolute amplitude of one block; the signal level the auto-stop
/// decision is based on.
pub(super) fn mean_amplitude(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    block.iter().map(|s| s.abs()).sum::<f32>() / block.len() as f32
}

/// Tracks how long the input has stayed below the silence threshold.
///
/// The timer starts on the first quiet block and resets as soon as a loud
/// block arrives. A non-positive window disables auto-stop entirely.
pub struct SilenceTracker {
    threshold: f32,
    window: Option<Duration>,
    quiet_since: Option<Instant>,
}

impl SilenceTracker {
    pub fn new(threshold: f32, window_secs: f32) -> Self {
        let window = (window_secs > 0.0).then(|| Duration::from_secs_f32(window_secs));
        Self {
            threshold,
            window,
            quiet_since: None,
        }
    }

    /// Feed one block's level; returns true once silence has lasted strictly
    /// longer than the window.
    pub fn observe(&mut self, level: f32, now: Instant) -> bool {
        let Some(window) = self.window else {
            return false;
        };
        if level >= self.threshold {
            self.quiet_since = None;
            return false;
        }
        let start = *self.quiet_since.get_or_insert(now);
        now.duration_since(start) > window
    }

    pub fn reset(&mut self) {
        self.quiet_since = None;
    }
}
