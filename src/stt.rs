//! Speech-to-text: model loading with GPU-to-CPU fallback and transcription.
//!
//! The whisper.cpp model is loaded lazily on first use and reused for every
//! capture. Loading retries with backoff; when the GPU attempts are exhausted
//! the model is loaded once more on the CPU and the session keeps that device
//! from then on.

use crate::audio::AudioBuffer;
use crate::config::{ComputeDevice, ModelConfig};
use crate::errors::{ErrorRecorder, VoiceTypeError};
use crate::retry::RetryPolicy;
use crate::{lock_or_recover, log_debug};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_BEAM_SIZE: u32 = 5;
pub const MIN_SILENCE_MS: u32 = 500;

/// Decoding knobs handed to the backend on every request.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    pub language: String,
    pub beam_size: u32,
    /// Minimum trailing silence (ms) a backend may use to gate decoding.
    pub min_silence_ms: u32,
}

/// Where the actual inference happens. The production backend wraps
/// whisper.cpp; tests substitute a scripted one.
pub trait SpeechBackend: Send + Sync + 'static {
    type Model: Send;

    fn load(
        &self,
        config: &ModelConfig,
        device: ComputeDevice,
    ) -> Result<Self::Model, VoiceTypeError>;

    fn transcribe(
        &self,
        model: &mut Self::Model,
        buffer: &AudioBuffer,
        options: &TranscribeOptions,
    ) -> Result<String, VoiceTypeError>;
}

struct ModelState<M> {
    model: Option<M>,
    device: ComputeDevice,
}

/// Serializes model access: loading happens at most once even when several
/// threads race into `ensure_loaded`, and transcription requests queue on the
/// same lock because whisper states are not meant to run concurrently.
pub struct Transcriber<B: SpeechBackend> {
    backend: B,
    config: ModelConfig,
    options: TranscribeOptions,
    recorder: Arc<ErrorRecorder>,
    load_retry: RetryPolicy,
    state: Mutex<ModelState<B::Model>>,
}

impl<B: SpeechBackend> Transcriber<B> {
    pub fn new(backend: B, config: ModelConfig, recorder: Arc<ErrorRecorder>) -> Self {
        let options = TranscribeOptions {
            language: config.language.clone(),
            beam_size: DEFAULT_BEAM_SIZE,
            min_silence_ms: MIN_SILENCE_MS,
        };
        let device = config.device;
        Self {
            backend,
            config,
            options,
            recorder,
            load_retry: RetryPolicy::new(3, Duration::from_secs(1), 2.0),
            state: Mutex::new(ModelState {
                model: None,
                device,
            }),
        }
    }

    #[cfg(test)]
    fn with_load_retry(mut self, policy: RetryPolicy) -> Self {
        self.load_retry = policy;
        self
    }

    pub fn is_loaded(&self) -> bool {
        lock_or_recover(&self.state, "model state").model.is_some()
    }

    /// The device the model currently targets; flips to Cpu after a GPU
    /// loading failure.
    pub fn device(&self) -> ComputeDevice {
        lock_or_recover(&self.state, "model state").device
    }

    /// Load the model if it is not resident yet.
    pub fn ensure_loaded(&self) -> Result<(), VoiceTypeError> {
        let mut state = lock_or_recover(&self.state, "model state");
        if state.model.is_some() {
            return Ok(());
        }
        let device = state.device;
        let started = Instant::now();
        let loaded = self.load_retry.run(
            &self.recorder,
            "model_load",
            || self.backend.load(&self.config, device),
            |_| true,
        );
        match loaded {
            Ok(model) => {
                state.model = Some(model);
                tracing::info!(
                    model = %self.config.model,
                    device = device.label(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model loaded"
                );
                Ok(())
            }
            Err(err) if device == ComputeDevice::Cuda => {
                log_debug(&format!("model_load|{err}; retrying on cpu"));
                let model = self
                    .backend
                    .load(&self.config, ComputeDevice::Cpu)
                    .map_err(|cpu_err| {
                        self.recorder.record(&cpu_err);
                        cpu_err
                    })?;
                state.device = ComputeDevice::Cpu;
                state.model = Some(model);
                tracing::warn!(model = %self.config.model, "model loaded on cpu after gpu failure");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Transcribe one capture. Returns the trimmed transcript, which may be
    /// empty when the audio carried no recognizable speech.
    ///
    /// The model must already be resident; callers load it up front via
    /// [`ensure_loaded`](Self::ensure_loaded). Transcription is latency
    /// sensitive and must never hide a multi-second model load.
    pub fn transcribe(&self, buffer: &AudioBuffer) -> Result<String, VoiceTypeError> {
        if buffer.samples.is_empty() {
            return Ok(String::new());
        }
        let mut state = lock_or_recover(&self.state, "model state");
        let model = state.model.as_mut().ok_or_else(|| {
            let err = VoiceTypeError::Model {
                model: self.config.model.clone(),
                stage: "transcribe",
                detail: "model is not loaded; call ensure_loaded first".into(),
            };
            self.recorder.record(&err);
            err
        })?;
        let started = Instant::now();
        let text = self
            .backend
            .transcribe(model, buffer, &self.options)
            .map_err(|err| {
                self.recorder.record(&err);
                err
            })?;
        tracing::debug!(
            audio_secs = buffer.duration_secs(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcription finished"
        );
        Ok(text.trim().to_string())
    }
}

#[cfg(unix)]
mod platform {
    use super::{SpeechBackend, TranscribeOptions};
    use crate::audio::AudioBuffer;
    use crate::config::{ComputeDevice, ModelConfig};
    use crate::errors::VoiceTypeError;
    use crate::log_debug;
    use std::io;
    use std::os::raw::{c_char, c_uint, c_void};
    use std::os::unix::io::AsRawFd;
    use std::sync::Once;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// whisper.cpp-backed inference.
    pub struct WhisperBackend;

    pub struct WhisperModel {
        ctx: WhisperContext,
    }

    impl SpeechBackend for WhisperBackend {
        type Model = WhisperModel;

        /// Loads the GGML model from disk. stderr is redirected to /dev/null
        /// for the duration because whisper.cpp prints verbose init banners.
        fn load(
            &self,
            config: &ModelConfig,
            device: ComputeDevice,
        ) -> Result<Self::Model, VoiceTypeError> {
            install_whisper_log_silencer();

            let model_err = |stage: &'static str, detail: String| VoiceTypeError::Model {
                model: config.model.clone(),
                stage,
                detail,
            };
            let path = config
                .model_path
                .as_ref()
                .ok_or_else(|| model_err("load", "--model-path is required".into()))?;
            let path = path
                .to_str()
                .ok_or_else(|| model_err("load", "model path is not valid UTF-8".into()))?;

            let mut params = WhisperContextParameters::default();
            params.use_gpu(device == ComputeDevice::Cuda);

            let silencer = StderrSilencer::install()
                .map_err(|err| model_err("load", format!("stderr redirect failed: {err}")))?;
            let ctx = WhisperContext::new_with_params(path, params);
            drop(silencer);

            let ctx = ctx.map_err(|err| model_err("load", err.to_string()))?;
            Ok(WhisperModel { ctx })
        }

        fn transcribe(
            &self,
            model: &mut Self::Model,
            buffer: &AudioBuffer,
            options: &TranscribeOptions,
        ) -> Result<String, VoiceTypeError> {
            let transcription_err = |detail: String| VoiceTypeError::Transcription {
                audio_len: buffer.samples.len(),
                sample_rate: buffer.sample_rate,
                detail,
            };

            let mut state = model
                .ctx
                .create_state()
                .map_err(|err| transcription_err(format!("failed to create state: {err}")))?;

            let mut params = if options.beam_size > 1 {
                FullParams::new(SamplingStrategy::BeamSearch {
                    beam_size: options.beam_size as i32,
                    patience: -1.0,
                })
            } else {
                FullParams::new(SamplingStrategy::Greedy { best_of: 1 })
            };
            if options.language.eq_ignore_ascii_case("auto") {
                params.set_language(None);
                params.set_detect_language(true);
            } else {
                params.set_language(Some(&options.language));
                params.set_detect_language(false);
            }
            // Limit CPU usage so laptops don't max out all cores.
            params.set_n_threads(num_cpus::get().min(8) as i32);
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);
            params.set_suppress_blank(true);

            // Pad the tail with the minimum silence window so whisper closes
            // the final segment instead of truncating a word at the cut.
            let pad = buffer.sample_rate as usize * options.min_silence_ms as usize / 1000;
            let mut samples = Vec::with_capacity(buffer.samples.len() + pad);
            samples.extend_from_slice(&buffer.samples);
            samples.resize(samples.len() + pad, 0.0);

            state
                .full(params, &samples)
                .map_err(|err| transcription_err(err.to_string()))?;

            let num_segments = match state.full_n_segments() {
                Ok(count) if count >= 0 => count,
                Ok(_) => {
                    log_debug("whisper|negative segment count");
                    return Ok(String::new());
                }
                Err(err) => {
                    log_debug(&format!("whisper|failed to read segment count: {err}"));
                    return Ok(String::new());
                }
            };

            // Whisper splits output into small segments; join the trimmed
            // pieces and drop the [BLANK_AUDIO] marker.
            let mut parts: Vec<String> = Vec::new();
            for i in 0..num_segments {
                match state.full_get_segment_text_lossy(i) {
                    Ok(text) => {
                        let text = text.replace("[BLANK_AUDIO]", "");
                        let text = text.trim();
                        if !text.is_empty() {
                            parts.push(text.to_string());
                        }
                    }
                    Err(err) => log_debug(&format!("whisper|failed to read segment {i}: {err}")),
                }
            }
            Ok(parts.join(" "))
        }
    }

    /// Redirects fd 2 to /dev/null until dropped.
    struct StderrSilencer {
        orig_stderr: libc::c_int,
        _null: std::fs::File,
    }

    impl StderrSilencer {
        fn install() -> io::Result<Self> {
            let null = std::fs::OpenOptions::new().write(true).open("/dev/null")?;
            // SAFETY: dup(2) duplicates the stderr descriptor; we restore it
            // in Drop and close the duplicate, so no descriptor leaks.
            let orig_stderr = unsafe { libc::dup(2) };
            if orig_stderr < 0 {
                return Err(io::Error::last_os_error());
            }
            let redirected = unsafe { libc::dup2(null.as_raw_fd(), 2) };
            if redirected < 0 {
                unsafe { libc::close(orig_stderr) };
                return Err(io::Error::last_os_error());
            }
            Ok(Self {
                orig_stderr,
                _null: null,
            })
        }
    }

    impl Drop for StderrSilencer {
        fn drop(&mut self) {
            // SAFETY: restores the descriptor saved in install.
            unsafe {
                libc::dup2(self.orig_stderr, 2);
                libc::close(self.orig_stderr);
            }
        }
    }

    fn install_whisper_log_silencer() {
        static INSTALL_LOG_CALLBACK: Once = Once::new();
        INSTALL_LOG_CALLBACK.call_once(|| unsafe {
            whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
        });
    }

    unsafe extern "C" fn whisper_log_callback(
        _level: c_uint,
        _text: *const c_char,
        _user_data: *mut c_void,
    ) {
        // Silence the default whisper.cpp logger; banners go nowhere.
    }
}

#[cfg(unix)]
pub use platform::WhisperBackend;

#[cfg(not(unix))]
mod platform {
    use super::{SpeechBackend, TranscribeOptions};
    use crate::audio::AudioBuffer;
    use crate::config::{ComputeDevice, ModelConfig};
    use crate::errors::VoiceTypeError;

    /// Stub for unsupported targets such as Windows.
    pub struct WhisperBackend;

    impl SpeechBackend for WhisperBackend {
        type Model = ();

        fn load(
            &self,
            config: &ModelConfig,
            _device: ComputeDevice,
        ) -> Result<Self::Model, VoiceTypeError> {
            Err(VoiceTypeError::Model {
                model: config.model.clone(),
                stage: "load",
                detail: "transcription is currently supported only on Unix-like platforms".into(),
            })
        }

        fn transcribe(
            &self,
            _model: &mut Self::Model,
            buffer: &AudioBuffer,
            _options: &TranscribeOptions,
        ) -> Result<String, VoiceTypeError> {
            Err(VoiceTypeError::Transcription {
                audio_len: buffer.samples.len(),
                sample_rate: buffer.sample_rate,
                detail: "transcription is currently supported only on Unix-like platforms".into(),
            })
        }
    }
}

#[cfg(not(unix))]
pub use platform::WhisperBackend;
