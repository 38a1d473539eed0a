use anyhow::{bail, Result};
use clap::Parser;

use super::defaults::{FORBIDDEN_DEVICE_CHARS, MAX_SILENCE_DURATION_SECS};
use super::AppConfig;

impl AppConfig {
    /// Parse CLI arguments and validate ranges. Exits with clap's error
    /// formatting on parse failure; returns an error for invalid values.
    pub fn parse_args() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(8_000..=96_000).contains(&self.sample_rate) {
            bail!(
                "--sample-rate must be between 8000 and 96000, got {}",
                self.sample_rate
            );
        }
        if !(1..=8).contains(&self.channels) {
            bail!("--channels must be between 1 and 8, got {}", self.channels);
        }
        if !self.silence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.silence_threshold)
        {
            bail!(
                "--silence-threshold must be between 0.0 and 1.0, got {}",
                self.silence_threshold
            );
        }
        if !self.silence_duration.is_finite() || self.silence_duration > MAX_SILENCE_DURATION_SECS
        {
            bail!(
                "--silence-duration must be a finite value no greater than {MAX_SILENCE_DURATION_SECS}, got {}",
                self.silence_duration
            );
        }
        if !(8..=1024).contains(&self.queue_capacity) {
            bail!(
                "--queue-capacity must be between 8 and 1024, got {}",
                self.queue_capacity
            );
        }
        if !(1..=10_000).contains(&self.error_history) {
            bail!(
                "--error-history must be between 1 and 10000, got {}",
                self.error_history
            );
        }
        if self.lang != "auto"
            && !(self.lang.len() == 2 && self.lang.chars().all(|c| c.is_ascii_lowercase()))
        {
            bail!(
                "--lang must be \"auto\" or a two-letter code like \"en\", got {:?}",
                self.lang
            );
        }
        if let Some(device) = &self.input_device {
            if device.trim().is_empty() || device.contains(FORBIDDEN_DEVICE_CHARS) {
                bail!("--input-device must be a plain device name");
            }
        }
        if let Some(path) = &self.model_path {
            if !path.exists() {
                bail!("--model-path does not exist: {}", path.display());
            }
        }
        Ok(())
    }
}
