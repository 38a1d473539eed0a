//! Capture sessions: a dedicated thread owns the CPAL stream and drains the
//! block queue until the session stops.
//!
//! The stream handle is not `Send`, so it never leaves the capture thread.
//! `start` blocks until the stream is confirmed open (or failed) and `stop`
//! collects the finished buffer through a one-slot outcome channel.

use super::device::find_input_device;
use super::dispatch::BlockDispatcher;
use super::resample::resample_to_rate;
use super::silence::{mean_amplitude, SilenceTracker};
use crate::config::CaptureConfig;
use crate::errors::{ErrorRecorder, VoiceTypeError};
use crate::retry::RetryPolicy;
use crate::{lock_or_recover, log_debug};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const BLOCK_WAIT: Duration = Duration::from_millis(100);
const READY_TIMEOUT: Duration = Duration::from_secs(10);
const OUTCOME_TIMEOUT: Duration = Duration::from_secs(2);

/// Mono f32 PCM at a known sample rate, ready for transcription.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Why a capture session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Stopped by an explicit toggle.
    Manual,
    /// The silence window elapsed.
    SilenceTimeout,
    /// The stream failed mid-session; whatever was captured is still usable.
    Error(String),
}

/// Everything a finished session hands back.
#[derive(Debug)]
pub struct CaptureOutcome {
    pub buffer: Option<AudioBuffer>,
    pub reason: StopReason,
    pub blocks: usize,
    pub dropped: usize,
}

struct SessionHandle {
    stop_flag: Arc<AtomicBool>,
    outcome_rx: Receiver<CaptureOutcome>,
    thread: JoinHandle<()>,
}

/// Owns at most one capture session at a time. `start` while a session is
/// live is refused rather than queued.
pub struct AudioCapture {
    config: CaptureConfig,
    recorder: Arc<ErrorRecorder>,
    stream_retry: RetryPolicy,
    active: Arc<AtomicBool>,
    session: Mutex<Option<SessionHandle>>,
}

impl AudioCapture {
    pub fn new(config: CaptureConfig, recorder: Arc<ErrorRecorder>) -> Self {
        Self {
            config,
            recorder,
            stream_retry: RetryPolicy::new(2, Duration::from_millis(500), 1.0),
            active: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Open the microphone and begin capturing. Blocks until the stream is
    /// confirmed running. `on_auto_stop` fires from the capture thread when
    /// the session ends on its own (silence or stream failure), after the
    /// outcome is already collectable via [`stop`](Self::stop).
    pub fn start<F>(&self, on_auto_stop: F) -> Result<(), VoiceTypeError>
    where
        F: Fn(StopReason) + Send + 'static,
    {
        let mut session = lock_or_recover(&self.session, "capture session");
        if self.active.load(Ordering::SeqCst) {
            return Err(VoiceTypeError::Resource(
                "a capture session is already running".into(),
            ));
        }
        // A finished auto-stop session nobody collected; discard it.
        if let Some(stale) = session.take() {
            let _ = stale.outcome_rx.try_recv();
            let _ = stale.thread.join();
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<Result<String, VoiceTypeError>>(1);
        let (outcome_tx, outcome_rx) = bounded::<CaptureOutcome>(1);

        self.active.store(true, Ordering::SeqCst);
        let worker = SessionWorker {
            config: self.config.clone(),
            recorder: self.recorder.clone(),
            stream_retry: self.stream_retry.clone(),
            stop_flag: stop_flag.clone(),
            active: self.active.clone(),
            ready_tx,
            outcome_tx,
            on_auto_stop: Box::new(on_auto_stop),
        };
        let thread = thread::Builder::new()
            .name("voicetype-capture".into())
            .spawn(move || worker.run())
            .map_err(|err| {
                self.active.store(false, Ordering::SeqCst);
                VoiceTypeError::Resource(format!("failed to spawn capture thread: {err}"))
            })?;

        match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(device_name)) => {
                tracing::info!(device = %device_name, "capture started");
                *session = Some(SessionHandle {
                    stop_flag,
                    outcome_rx,
                    thread,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                stop_flag.store(true, Ordering::SeqCst);
                self.active.store(false, Ordering::SeqCst);
                Err(VoiceTypeError::Resource(
                    "timed out waiting for the audio stream to open".into(),
                ))
            }
        }
    }

    /// End the current session and collect its buffer. Returns `None` when no
    /// session exists or the capture thread failed to hand one back in time.
    pub fn stop(&self) -> Option<CaptureOutcome> {
        let handle = lock_or_recover(&self.session, "capture session").take()?;
        handle.stop_flag.store(true, Ordering::SeqCst);
        match handle.outcome_rx.recv_timeout(OUTCOME_TIMEOUT) {
            Ok(outcome) => {
                let _ = handle.thread.join();
                log_debug(&format!(
                    "capture|stopped reason={:?} blocks={} dropped={}",
                    outcome.reason, outcome.blocks, outcome.dropped
                ));
                Some(outcome)
            }
            Err(_) => {
                log_debug("capture|stop timed out waiting for outcome");
                None
            }
        }
    }

    /// Stop and discard whatever was captured.
    pub fn abort(&self) {
        let _ = self.stop();
    }
}

struct SessionWorker {
    config: CaptureConfig,
    recorder: Arc<ErrorRecorder>,
    stream_retry: RetryPolicy,
    stop_flag: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    ready_tx: Sender<Result<String, VoiceTypeError>>,
    outcome_tx: Sender<CaptureOutcome>,
    on_auto_stop: Box<dyn Fn(StopReason) + Send>,
}

struct OpenedStream {
    stream: cpal::Stream,
    device_name: String,
    device_rate: u32,
}

impl SessionWorker {
    fn run(self) {
        let (block_tx, block_rx) = bounded::<Vec<f32>>(self.config.queue_capacity.max(1));
        let dropped = Arc::new(AtomicUsize::new(0));
        let stream_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

        let opened = self.stream_retry.run_with_fallback(
            &self.recorder,
            "audio_stream_open",
            || {
                open_requested_stream(
                    &self.config,
                    block_tx.clone(),
                    dropped.clone(),
                    stream_error.clone(),
                )
            },
            |err| err.is_device_error(),
            Some(|| {
                open_default_stream(
                    &self.config,
                    block_tx.clone(),
                    dropped.clone(),
                    stream_error.clone(),
                )
            }),
        );
        let opened = match opened {
            Ok(opened) => opened,
            Err(err) => {
                let _ = self.ready_tx.send(Err(err));
                self.active.store(false, Ordering::SeqCst);
                return;
            }
        };
        if let Err(err) = opened.stream.play() {
            let play_err = VoiceTypeError::AudioDevice {
                device: opened.device_name.clone(),
                operation: "play",
                channels: self.config.channels,
                sample_rate: opened.device_rate,
                detail: err.to_string(),
            };
            self.recorder.record(&play_err);
            let _ = self.ready_tx.send(Err(play_err));
            self.active.store(false, Ordering::SeqCst);
            return;
        }
        let _ = self.ready_tx.send(Ok(opened.device_name.clone()));
        log_debug(&format!(
            "capture|streaming from '{}' at {}Hz",
            opened.device_name, opened.device_rate
        ));
        // The stream callback holds its own sender; dropping ours lets the
        // queue disconnect when the stream dies instead of idling forever.
        drop(block_tx);

        let mut tracker = SilenceTracker::new(
            self.config.silence_threshold,
            self.config.silence_duration_secs,
        );
        let (blocks, reason) =
            consume_blocks(&block_rx, &self.stop_flag, &stream_error, &mut tracker);

        if let Err(err) = opened.stream.pause() {
            log_debug(&format!("capture|failed to pause audio stream: {err}"));
        }
        drop(opened.stream);

        let dropped_blocks = dropped.load(Ordering::Relaxed);
        if dropped_blocks > 0 {
            log_debug(&format!(
                "capture|dropped {dropped_blocks} blocks (queue full)"
            ));
        }
        let outcome = session_outcome(
            blocks,
            reason,
            opened.device_rate,
            self.config.sample_rate,
            dropped_blocks,
        );

        let auto_reason = match &outcome.reason {
            StopReason::Manual => None,
            other => Some(other.clone()),
        };
        // The outcome must be collectable before anyone reacts to auto-stop.
        let _ = self.outcome_tx.send(outcome);
        self.active.store(false, Ordering::SeqCst);
        if let Some(reason) = auto_reason {
            (self.on_auto_stop)(reason);
        }
    }
}

/// Drain the block queue until the session is told to stop, the silence
/// window elapses, or the stream reports a failure.
pub(super) fn consume_blocks(
    block_rx: &Receiver<Vec<f32>>,
    stop_flag: &AtomicBool,
    stream_error: &Mutex<Option<String>>,
    tracker: &mut SilenceTracker,
) -> (Vec<Vec<f32>>, StopReason) {
    let mut blocks: Vec<Vec<f32>> = Vec::new();
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return (blocks, StopReason::Manual);
        }
        if let Some(detail) = lock_or_recover(stream_error, "stream error slot").take() {
            return (blocks, StopReason::Error(detail));
        }
        match block_rx.recv_timeout(BLOCK_WAIT) {
            Ok(block) => {
                let level = mean_amplitude(&block);
                blocks.push(block);
                if tracker.observe(level, Instant::now()) {
                    return (blocks, StopReason::SilenceTimeout);
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                return (blocks, StopReason::Error("audio stream disconnected".into()));
            }
        }
    }
}

/// Fold the captured blocks into the final outcome. A session that produced
/// no frames hands back `buffer: None` so callers can tell "stopped with
/// nothing" from "stopped with audio".
pub(super) fn session_outcome(
    blocks: Vec<Vec<f32>>,
    reason: StopReason,
    device_rate: u32,
    target_rate: u32,
    dropped: usize,
) -> CaptureOutcome {
    let block_count = blocks.len();
    let samples = concat_blocks(blocks);
    let samples = resample_to_rate(&samples, device_rate, target_rate);
    let buffer = (!samples.is_empty()).then(|| AudioBuffer {
        samples,
        sample_rate: target_rate,
    });
    CaptureOutcome {
        buffer,
        reason,
        blocks: block_count,
        dropped,
    }
}

pub(super) fn concat_blocks(blocks: Vec<Vec<f32>>) -> Vec<f32> {
    let total = blocks.iter().map(Vec::len).sum();
    let mut samples = Vec::with_capacity(total);
    for block in blocks {
        samples.extend_from_slice(&block);
    }
    samples
}

/// Open the configured device at the requested rate and channel count.
fn open_requested_stream(
    config: &CaptureConfig,
    block_tx: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
    stream_error: Arc<Mutex<Option<String>>>,
) -> Result<OpenedStream, VoiceTypeError> {
    let device = find_input_device(config.preferred_device.as_deref())?;
    let device_name = device
        .name()
        .unwrap_or_else(|_| "unknown input device".to_string());
    let device_err = |operation: &'static str, detail: String| VoiceTypeError::AudioDevice {
        device: device_name.clone(),
        operation,
        channels: config.channels,
        sample_rate: config.sample_rate,
        detail,
    };

    let format = device
        .default_input_config()
        .map_err(|err| device_err("query", err.to_string()))?
        .sample_format();
    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: BufferSize::Default,
    };
    let stream = build_stream(
        &device,
        &stream_config,
        format,
        usize::from(config.channels),
        block_tx,
        dropped,
        stream_error,
    )
    .map_err(|err| device_err("open", err.to_string()))?;

    Ok(OpenedStream {
        stream,
        device_name,
        device_rate: config.sample_rate,
    })
}

/// Last-resort path: the host default device at its native format, resampled
/// to the target rate after capture.
fn open_default_stream(
    config: &CaptureConfig,
    block_tx: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
    stream_error: Arc<Mutex<Option<String>>>,
) -> Result<OpenedStream, VoiceTypeError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| VoiceTypeError::AudioDevice {
            device: "<default>".into(),
            operation: "open",
            channels: config.channels,
            sample_rate: config.sample_rate,
            detail: "no default input device".into(),
        })?;
    let device_name = device
        .name()
        .unwrap_or_else(|_| "default input device".to_string());

    let default_config = device
        .default_input_config()
        .map_err(|err| VoiceTypeError::AudioDevice {
            device: device_name.clone(),
            operation: "query",
            channels: config.channels,
            sample_rate: config.sample_rate,
            detail: err.to_string(),
        })?;
    let format = default_config.sample_format();
    let stream_config: StreamConfig = default_config.into();
    let device_rate = stream_config.sample_rate.0;
    let channels = usize::from(stream_config.channels.max(1));

    log_debug(&format!(
        "capture|falling back to '{device_name}' native config {}Hz {}ch",
        device_rate, channels
    ));
    let stream = build_stream(
        &device,
        &stream_config,
        format,
        channels,
        block_tx,
        dropped,
        stream_error,
    )
    .map_err(|err| VoiceTypeError::AudioDevice {
        device: device_name.clone(),
        operation: "open",
        channels: stream_config.channels,
        sample_rate: device_rate,
        detail: err.to_string(),
    })?;

    Ok(OpenedStream {
        stream,
        device_name,
        device_rate,
    })
}

/// Convert every supported sample type to f32 up front so the rest of the
/// pipeline stays format-agnostic.
fn build_stream(
    device: &cpal::Device,
    stream_config: &StreamConfig,
    format: SampleFormat,
    channels: usize,
    block_tx: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
    stream_error: Arc<Mutex<Option<String>>>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    // First failure wins; the consume loop turns it into StopReason::Error.
    let err_fn = move |err: cpal::StreamError| {
        log_debug(&format!("audio_stream_error: {err}"));
        let mut slot = lock_or_recover(&stream_error, "stream error slot");
        if slot.is_none() {
            *slot = Some(err.to_string());
        }
    };
    let pump = BlockDispatcher::new(block_tx, dropped);
    match format {
        SampleFormat::F32 => device.build_input_stream(
            stream_config,
            move |data: &[f32], _| pump.push(data, channels, |sample| sample),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            stream_config,
            move |data: &[i16], _| {
                pump.push(data, channels, |sample| sample as f32 / 32_768.0_f32)
            },
            err_fn,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            stream_config,
            move |data: &[u16], _| {
                pump.push(data, channels, |sample| {
                    (sample as f32 - 32_768.0_f32) / 32_768.0_f32
                })
            },
            err_fn,
            None,
        ),
        _ => Err(cpal::BuildStreamError::StreamConfigNotSupported),
    }
}
