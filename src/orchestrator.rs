//! The dictation state machine.
//!
//! A single event-loop thread owns all state; workers and the socket listener
//! only post `AppEvent`s onto the bounded queue. Blocking work (model loads,
//! capture start/stop, transcription) runs behind the `Pipeline` trait on
//! short-lived worker threads, and everything user-visible goes through the
//! `Frontend` trait.

use crate::audio::{AudioCapture, StopReason};
use crate::log_debug;
use crate::stt::{SpeechBackend, Transcriber};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const EVENT_QUEUE_CAPACITY: usize = 64;
const EVENT_TICK: Duration = Duration::from_millis(100);
/// How long error popups stay up.
const ERROR_DISPLAY: Duration = Duration::from_secs(3);
/// How long the "no speech" notice stays up.
const EMPTY_NOTICE_DISPLAY: Duration = Duration::from_secs(2);

const STATUS_LOADING: &str = "Loading model...";
const STATUS_RECORDING: &str = "Recording...";
const STATUS_TRANSCRIBING: &str = "Transcribing...";
const STATUS_NO_SPEECH: &str = "No speech detected";

/// Everything that can happen to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    /// Hotkey or socket toggle: start recording, or stop and transcribe.
    Toggle,
    ModelLoaded,
    ModelLoadFailed(String),
    CaptureStarted,
    CaptureFailed(String),
    /// The capture session auto-stopped after the silence window.
    SilenceTimeout,
    TranscriptReady(String),
    TranscriptEmpty,
    TranscriptFailed(String),
    /// Acknowledged and logged; components keep their startup settings.
    SettingsChanged,
    Shutdown,
}

impl AppEvent {
    /// Content-free name for the debug log; transcript text stays out of it.
    fn label(&self) -> &'static str {
        match self {
            AppEvent::Toggle => "toggle",
            AppEvent::ModelLoaded => "model_loaded",
            AppEvent::ModelLoadFailed(_) => "model_load_failed",
            AppEvent::CaptureStarted => "capture_started",
            AppEvent::CaptureFailed(_) => "capture_failed",
            AppEvent::SilenceTimeout => "silence_timeout",
            AppEvent::TranscriptReady(_) => "transcript_ready",
            AppEvent::TranscriptEmpty => "transcript_empty",
            AppEvent::TranscriptFailed(_) => "transcript_failed",
            AppEvent::SettingsChanged => "settings_changed",
            AppEvent::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    LoadingModel,
    Recording,
    Transcribing,
    ShowingError,
}

/// User-facing surface. Implementations must not block the event loop.
pub trait Frontend: Send {
    fn display_status(&self, message: &str);
    fn hide_status(&self);
    fn deliver_text(&self, text: &str);
    fn notify_recording_state(&self, recording: bool);
}

/// Backing workers. Each `spawn_*` must return immediately and report its
/// result by posting an event.
pub trait Pipeline: Send {
    fn spawn_model_load(&self, events: Sender<AppEvent>);
    fn spawn_capture_start(&self, events: Sender<AppEvent>);
    fn spawn_stop_and_transcribe(&self, events: Sender<AppEvent>);
    fn abort_capture(&self);
}

pub struct Orchestrator {
    state: OrchestratorState,
    pending_toggle: bool,
    auto_record: bool,
    model_loaded: bool,
    status_clear_at: Option<Instant>,
    events_tx: Sender<AppEvent>,
    events_rx: Receiver<AppEvent>,
    pipeline: Box<dyn Pipeline>,
    frontend: Box<dyn Frontend>,
    shutdown: Option<&'static AtomicBool>,
    running: bool,
}

impl Orchestrator {
    pub fn new(pipeline: Box<dyn Pipeline>, frontend: Box<dyn Frontend>, auto_record: bool) -> Self {
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_CAPACITY);
        Self {
            state: OrchestratorState::Idle,
            pending_toggle: false,
            auto_record,
            model_loaded: false,
            status_clear_at: None,
            events_tx,
            events_rx,
            pipeline,
            frontend,
            shutdown: None,
            running: false,
        }
    }

    /// Poll this flag every tick; setting it behaves like a Shutdown event.
    /// Signal handlers can only flip an atomic, hence the static flag.
    pub fn with_shutdown_flag(mut self, flag: &'static AtomicBool) -> Self {
        self.shutdown = Some(flag);
        self
    }

    /// Sender half of the event queue, for the socket listener and workers.
    pub fn events(&self) -> Sender<AppEvent> {
        self.events_tx.clone()
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Run until shutdown. Ticks the status-clear deadline between events.
    pub fn run(&mut self) {
        self.running = true;
        self.bootstrap();
        while self.running {
            if let Some(flag) = self.shutdown {
                if flag.load(Ordering::Relaxed) {
                    flag.store(false, Ordering::Relaxed);
                    self.handle_event(AppEvent::Shutdown);
                    continue;
                }
            }
            match self.events_rx.recv_timeout(EVENT_TICK) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.check_deadline(Instant::now());
        }
    }

    fn bootstrap(&mut self) {
        if self.auto_record {
            log_debug("orchestrator|auto-record: loading model at startup");
            self.pending_toggle = true;
            self.begin_model_load();
        }
    }

    fn handle_event(&mut self, event: AppEvent) {
        log_debug(&format!(
            "orchestrator|state={:?} event={}",
            self.state,
            event.label()
        ));
        match event {
            AppEvent::Toggle => self.on_toggle(),
            AppEvent::ModelLoaded => self.on_model_loaded(),
            AppEvent::ModelLoadFailed(detail) => {
                self.model_loaded = false;
                self.pending_toggle = false;
                self.show_error(&format!("Model load failed: {detail}"));
            }
            AppEvent::CaptureStarted => {
                if self.state == OrchestratorState::Recording {
                    self.frontend.notify_recording_state(true);
                    self.frontend.display_status(STATUS_RECORDING);
                }
            }
            AppEvent::CaptureFailed(detail) => {
                self.show_error(&format!("Recording failed: {detail}"));
            }
            AppEvent::SilenceTimeout => {
                if self.state == OrchestratorState::Recording {
                    self.begin_transcription();
                }
            }
            AppEvent::TranscriptReady(text) => {
                self.frontend.deliver_text(&text);
                self.frontend.hide_status();
                self.status_clear_at = None;
                self.state = OrchestratorState::Idle;
            }
            AppEvent::TranscriptEmpty => {
                self.frontend.display_status(STATUS_NO_SPEECH);
                self.status_clear_at = Some(Instant::now() + EMPTY_NOTICE_DISPLAY);
                self.state = OrchestratorState::Idle;
            }
            AppEvent::TranscriptFailed(detail) => {
                self.show_error(&format!("Transcription failed: {detail}"));
            }
            AppEvent::SettingsChanged => {
                log_debug("orchestrator|settings changed; components keep startup values");
            }
            AppEvent::Shutdown => {
                if self.state == OrchestratorState::Recording {
                    self.pipeline.abort_capture();
                    self.frontend.notify_recording_state(false);
                }
                self.frontend.hide_status();
                self.running = false;
            }
        }
    }

    fn on_toggle(&mut self) {
        match self.state {
            OrchestratorState::Idle => {
                if self.model_loaded {
                    self.begin_recording();
                } else {
                    self.pending_toggle = true;
                    self.begin_model_load();
                }
            }
            OrchestratorState::LoadingModel => {
                self.pending_toggle = true;
            }
            OrchestratorState::Recording => {
                self.begin_transcription();
            }
            OrchestratorState::Transcribing | OrchestratorState::ShowingError => {
                log_debug("orchestrator|toggle ignored in current state");
            }
        }
    }

    fn on_model_loaded(&mut self) {
        self.model_loaded = true;
        self.frontend.hide_status();
        self.status_clear_at = None;
        if std::mem::take(&mut self.pending_toggle) {
            self.begin_recording();
        } else {
            self.state = OrchestratorState::Idle;
        }
    }

    fn begin_model_load(&mut self) {
        self.state = OrchestratorState::LoadingModel;
        self.frontend.display_status(STATUS_LOADING);
        self.pipeline.spawn_model_load(self.events_tx.clone());
    }

    fn begin_recording(&mut self) {
        self.state = OrchestratorState::Recording;
        self.pipeline.spawn_capture_start(self.events_tx.clone());
    }

    fn begin_transcription(&mut self) {
        self.state = OrchestratorState::Transcribing;
        self.frontend.notify_recording_state(false);
        self.frontend.display_status(STATUS_TRANSCRIBING);
        self.pipeline.spawn_stop_and_transcribe(self.events_tx.clone());
    }

    /// Any failure clears the recording state before showing the message.
    fn show_error(&mut self, message: &str) {
        if self.state == OrchestratorState::Recording {
            self.pipeline.abort_capture();
        }
        self.frontend.notify_recording_state(false);
        self.frontend.display_status(message);
        self.state = OrchestratorState::ShowingError;
        self.status_clear_at = Some(Instant::now() + ERROR_DISPLAY);
    }

    fn check_deadline(&mut self, now: Instant) {
        let Some(clear_at) = self.status_clear_at else {
            return;
        };
        if now < clear_at {
            return;
        }
        self.status_clear_at = None;
        self.frontend.hide_status();
        if self.state == OrchestratorState::ShowingError {
            self.state = OrchestratorState::Idle;
        }
    }
}

/// Production pipeline: real capture and transcription on worker threads,
/// one result event per job.
pub struct VoicePipeline<B: SpeechBackend> {
    capture: Arc<AudioCapture>,
    transcriber: Arc<Transcriber<B>>,
}

impl<B: SpeechBackend> VoicePipeline<B> {
    pub fn new(capture: Arc<AudioCapture>, transcriber: Arc<Transcriber<B>>) -> Self {
        Self {
            capture,
            transcriber,
        }
    }
}

fn spawn_worker<F>(name: &str, events: &Sender<AppEvent>, job: F)
where
    F: FnOnce() -> AppEvent + Send + 'static,
{
    let events = events.clone();
    let spawned = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _ = events.send(job());
        });
    if let Err(err) = spawned {
        log_debug(&format!("worker|failed to spawn {name}: {err}"));
    }
}

impl<B: SpeechBackend> Pipeline for VoicePipeline<B> {
    fn spawn_model_load(&self, events: Sender<AppEvent>) {
        let transcriber = self.transcriber.clone();
        spawn_worker("voicetype-model-load", &events, move || {
            match transcriber.ensure_loaded() {
                Ok(()) => AppEvent::ModelLoaded,
                Err(err) => AppEvent::ModelLoadFailed(err.to_string()),
            }
        });
    }

    fn spawn_capture_start(&self, events: Sender<AppEvent>) {
        let capture = self.capture.clone();
        let auto_events = events.clone();
        spawn_worker("voicetype-capture-start", &events, move || {
            let result = capture.start(move |reason| {
                let event = match reason {
                    StopReason::SilenceTimeout => AppEvent::SilenceTimeout,
                    StopReason::Error(detail) => AppEvent::CaptureFailed(detail),
                    StopReason::Manual => return,
                };
                let _ = auto_events.send(event);
            });
            match result {
                Ok(()) => AppEvent::CaptureStarted,
                Err(err) => AppEvent::CaptureFailed(err.to_string()),
            }
        });
    }

    fn spawn_stop_and_transcribe(&self, events: Sender<AppEvent>) {
        let capture = self.capture.clone();
        let transcriber = self.transcriber.clone();
        spawn_worker("voicetype-transcribe", &events, move || {
            let Some(outcome) = capture.stop() else {
                return AppEvent::TranscriptEmpty;
            };
            if let Some(buffer) = &outcome.buffer {
                log_debug(&format!(
                    "capture|record duration_s={:.2} blocks={} dropped={} reason={:?}",
                    buffer.duration_secs(),
                    outcome.blocks,
                    outcome.dropped,
                    outcome.reason
                ));
            }
            match outcome.buffer {
                None => AppEvent::TranscriptEmpty,
                Some(buffer) => match transcriber.transcribe(&buffer) {
                    Ok(text) if text.is_empty() => AppEvent::TranscriptEmpty,
                    Ok(text) => AppEvent::TranscriptReady(text),
                    Err(err) => AppEvent::TranscriptFailed(err.to_string()),
                },
            }
        });
    }

    fn abort_capture(&self) {
        self.capture.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Calls(Mutex<Vec<String>>);

    impl Calls {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().unwrap().push(entry.into());
        }

        fn take(&self) -> Vec<String> {
            let mut calls = self.0.lock().unwrap();
            std::mem::take(&mut *calls)
        }
    }

    struct FakePipeline(Arc<Calls>);

    impl Pipeline for FakePipeline {
        fn spawn_model_load(&self, _events: Sender<AppEvent>) {
            self.0.push("model_load");
        }
        fn spawn_capture_start(&self, _events: Sender<AppEvent>) {
            self.0.push("capture_start");
        }
        fn spawn_stop_and_transcribe(&self, _events: Sender<AppEvent>) {
            self.0.push("stop_transcribe");
        }
        fn abort_capture(&self) {
            self.0.push("abort");
        }
    }

    struct FakeFrontend(Arc<Calls>);

    impl Frontend for FakeFrontend {
        fn display_status(&self, message: &str) {
            self.0.push(format!("status:{message}"));
        }
        fn hide_status(&self) {
            self.0.push("hide");
        }
        fn deliver_text(&self, text: &str) {
            self.0.push(format!("deliver:{text}"));
        }
        fn notify_recording_state(&self, recording: bool) {
            self.0.push(format!("recording:{recording}"));
        }
    }

    fn fixture(auto_record: bool) -> (Orchestrator, Arc<Calls>, Arc<Calls>) {
        let pipeline_calls = Arc::new(Calls::default());
        let frontend_calls = Arc::new(Calls::default());
        let orchestrator = Orchestrator::new(
            Box::new(FakePipeline(pipeline_calls.clone())),
            Box::new(FakeFrontend(frontend_calls.clone())),
            auto_record,
        );
        (orchestrator, pipeline_calls, frontend_calls)
    }

    #[test]
    fn first_toggle_loads_model_then_records() {
        let (mut orch, pipeline, frontend) = fixture(false);

        orch.handle_event(AppEvent::Toggle);
        assert_eq!(orch.state(), OrchestratorState::LoadingModel);
        assert_eq!(pipeline.take(), vec!["model_load"]);
        assert_eq!(frontend.take(), vec!["status:Loading model..."]);

        orch.handle_event(AppEvent::ModelLoaded);
        assert_eq!(orch.state(), OrchestratorState::Recording);
        assert_eq!(pipeline.take(), vec!["capture_start"]);

        orch.handle_event(AppEvent::CaptureStarted);
        assert_eq!(
            frontend.take(),
            vec!["hide", "recording:true", "status:Recording..."]
        );
    }

    #[test]
    fn toggle_while_recording_transcribes_and_delivers() {
        let (mut orch, pipeline, frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::ModelLoaded);
        orch.handle_event(AppEvent::CaptureStarted);
        pipeline.take();
        frontend.take();

        orch.handle_event(AppEvent::Toggle);
        assert_eq!(orch.state(), OrchestratorState::Transcribing);
        assert_eq!(pipeline.take(), vec!["stop_transcribe"]);
        assert_eq!(
            frontend.take(),
            vec!["recording:false", "status:Transcribing..."]
        );

        orch.handle_event(AppEvent::TranscriptReady("hello there".into()));
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert_eq!(frontend.take(), vec!["deliver:hello there", "hide"]);
    }

    #[test]
    fn model_stays_loaded_for_later_toggles() {
        let (mut orch, pipeline, _frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::ModelLoaded);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::TranscriptReady("one".into()));
        pipeline.take();

        orch.handle_event(AppEvent::Toggle);
        assert_eq!(orch.state(), OrchestratorState::Recording);
        // Straight to capture; no second model load.
        assert_eq!(pipeline.take(), vec!["capture_start"]);
    }

    #[test]
    fn empty_transcript_shows_notice_then_clears() {
        let (mut orch, _pipeline, frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::ModelLoaded);
        orch.handle_event(AppEvent::Toggle);
        frontend.take();

        orch.handle_event(AppEvent::TranscriptEmpty);
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert_eq!(frontend.take(), vec!["status:No speech detected"]);

        // Before the notice interval elapses nothing is hidden.
        orch.check_deadline(Instant::now());
        assert_eq!(frontend.take(), Vec::<String>::new());

        orch.check_deadline(Instant::now() + Duration::from_secs(3));
        assert_eq!(frontend.take(), vec!["hide"]);

        // The deadline is one-shot.
        orch.check_deadline(Instant::now() + Duration::from_secs(10));
        assert_eq!(frontend.take(), Vec::<String>::new());
    }

    #[test]
    fn model_load_failure_shows_error_then_returns_to_idle() {
        let (mut orch, pipeline, frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        pipeline.take();
        frontend.take();

        orch.handle_event(AppEvent::ModelLoadFailed("no such file".into()));
        assert_eq!(orch.state(), OrchestratorState::ShowingError);
        assert_eq!(
            frontend.take(),
            vec!["recording:false", "status:Model load failed: no such file"]
        );

        // Toggles are ignored while the error is up.
        orch.handle_event(AppEvent::Toggle);
        assert_eq!(pipeline.take(), Vec::<String>::new());

        orch.check_deadline(Instant::now() + Duration::from_secs(4));
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert_eq!(frontend.take(), vec!["hide"]);

        // The queued toggle was dropped with the failure; the next one loads
        // the model again.
        orch.handle_event(AppEvent::Toggle);
        assert_eq!(orch.state(), OrchestratorState::LoadingModel);
        assert_eq!(pipeline.take(), vec!["model_load"]);
    }

    #[test]
    fn silence_timeout_stops_and_transcribes() {
        let (mut orch, pipeline, _frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::ModelLoaded);
        pipeline.take();

        orch.handle_event(AppEvent::SilenceTimeout);
        assert_eq!(orch.state(), OrchestratorState::Transcribing);
        assert_eq!(pipeline.take(), vec!["stop_transcribe"]);

        // A stale timeout arriving later is a no-op.
        orch.handle_event(AppEvent::TranscriptEmpty);
        orch.handle_event(AppEvent::SilenceTimeout);
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert_eq!(pipeline.take(), Vec::<String>::new());
    }

    #[test]
    fn capture_failure_aborts_and_clears_recording_state() {
        let (mut orch, pipeline, frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::ModelLoaded);
        pipeline.take();
        frontend.take();

        orch.handle_event(AppEvent::CaptureFailed("device unplugged".into()));
        assert_eq!(orch.state(), OrchestratorState::ShowingError);
        assert_eq!(pipeline.take(), vec!["abort"]);
        assert_eq!(
            frontend.take(),
            vec![
                "recording:false",
                "status:Recording failed: device unplugged"
            ]
        );
    }

    #[test]
    fn toggle_is_ignored_while_transcribing() {
        let (mut orch, pipeline, _frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::ModelLoaded);
        orch.handle_event(AppEvent::Toggle);
        pipeline.take();

        orch.handle_event(AppEvent::Toggle);
        assert_eq!(orch.state(), OrchestratorState::Transcribing);
        assert_eq!(pipeline.take(), Vec::<String>::new());
    }

    #[test]
    fn repeated_toggles_while_loading_collapse_to_one_recording() {
        let (mut orch, pipeline, _frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::Toggle);
        pipeline.take();

        orch.handle_event(AppEvent::ModelLoaded);
        assert_eq!(orch.state(), OrchestratorState::Recording);
        assert_eq!(pipeline.take(), vec!["capture_start"]);
    }

    #[test]
    fn auto_record_starts_recording_once_the_model_is_ready() {
        let (mut orch, pipeline, _frontend) = fixture(true);
        orch.bootstrap();
        assert_eq!(orch.state(), OrchestratorState::LoadingModel);
        assert_eq!(pipeline.take(), vec!["model_load"]);

        orch.handle_event(AppEvent::ModelLoaded);
        assert_eq!(orch.state(), OrchestratorState::Recording);
        assert_eq!(pipeline.take(), vec!["capture_start"]);
    }

    #[test]
    fn settings_changed_leaves_state_untouched() {
        let (mut orch, pipeline, frontend) = fixture(false);
        orch.handle_event(AppEvent::SettingsChanged);
        assert_eq!(orch.state(), OrchestratorState::Idle);
        assert_eq!(pipeline.take(), Vec::<String>::new());
        assert_eq!(frontend.take(), Vec::<String>::new());
    }

    #[test]
    fn shutdown_while_recording_aborts_capture() {
        let (mut orch, pipeline, frontend) = fixture(false);
        orch.handle_event(AppEvent::Toggle);
        orch.handle_event(AppEvent::ModelLoaded);
        pipeline.take();
        frontend.take();

        orch.handle_event(AppEvent::Shutdown);
        assert!(!orch.running);
        assert_eq!(pipeline.take(), vec!["abort"]);
        assert_eq!(frontend.take(), vec!["recording:false", "hide"]);
    }
}
