//! Bounded retry with exponential backoff and an optional one-shot fallback.
//!
//! The policy is a pure combinator: what counts as retryable comes from the
//! caller's predicate, so the same type serves audio stream opens and model
//! loads with different rules. Every failed attempt is logged and pushed into
//! the error recorder.

use crate::errors::{ErrorRecorder, VoiceTypeError};
use crate::log_debug;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            backoff,
        }
    }

    /// Delay slept after the Nth failed attempt: `initial * backoff^(N-1)`.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1) as i32;
        let factor = self.backoff.powi(exponent);
        if factor.is_finite() && factor >= 0.0 {
            self.initial_delay.mul_f64(factor)
        } else {
            self.initial_delay
        }
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    pub fn run<T, Op, Pred>(
        &self,
        recorder: &ErrorRecorder,
        label: &str,
        op: Op,
        is_retryable: Pred,
    ) -> Result<T, VoiceTypeError>
    where
        Op: FnMut() -> Result<T, VoiceTypeError>,
        Pred: FnMut(&VoiceTypeError) -> bool,
    {
        self.run_with_fallback(
            recorder,
            label,
            op,
            is_retryable,
            None::<fn() -> Result<T, VoiceTypeError>>,
        )
    }

    /// Like [`run`](Self::run), but invokes `fallback` exactly once after the
    /// last retryable failure and returns its result instead of the error.
    pub fn run_with_fallback<T, Op, Pred, Fb>(
        &self,
        recorder: &ErrorRecorder,
        label: &str,
        mut op: Op,
        mut is_retryable: Pred,
        fallback: Option<Fb>,
    ) -> Result<T, VoiceTypeError>
    where
        Op: FnMut() -> Result<T, VoiceTypeError>,
        Pred: FnMut(&VoiceTypeError) -> bool,
        Fb: FnOnce() -> Result<T, VoiceTypeError>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    recorder.record(&err);
                    log_debug(&format!(
                        "retry|op={label}|attempt={attempt}/{}|error={err}",
                        self.max_attempts
                    ));
                    if !is_retryable(&err) {
                        tracing::warn!(op = label, attempt, "non-retryable failure");
                        return Err(err);
                    }
                    if attempt < self.max_attempts {
                        let delay = self.delay_for_attempt(attempt);
                        log_debug(&format!(
                            "retry|op={label}|sleeping_ms={}",
                            delay.as_millis()
                        ));
                        thread::sleep(delay);
                    }
                    last_error = Some(err);
                }
            }
        }

        if let Some(fallback) = fallback {
            log_debug(&format!("retry|op={label}|attempts exhausted, using fallback"));
            return fallback();
        }

        Err(last_error.unwrap_or_else(|| {
            VoiceTypeError::Resource(format!("retry of {label} finished without an error"))
        }))
    }
}
