//! VoiceType daemon entrypoint.
//!
//! Wires the components together and runs the orchestrator event loop: the
//! unix socket posts toggles, worker threads capture and transcribe, and the
//! console frontend prints transcripts to stdout.

use anyhow::Result;
use std::io::{self, Write};
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use voicetype::audio::{list_input_devices, AudioCapture};
use voicetype::config::AppConfig;
use voicetype::errors::ErrorRecorder;
use voicetype::orchestrator::{AppEvent, Frontend, Orchestrator, VoicePipeline};
use voicetype::socket::CommandChannel;
use voicetype::stt::{Transcriber, WhisperBackend};
use voicetype::{init_logging, log_debug, log_debug_content, log_file_path, log_panic};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[cfg(unix)]
extern "C" fn handle_signal(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_signal_handlers() {
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
fn install_signal_handlers() {}

/// Stdout frontend: transcripts on their own lines, status messages prefixed
/// so scripts can filter them out.
struct ConsoleFrontend;

impl Frontend for ConsoleFrontend {
    fn display_status(&self, message: &str) {
        println!("[voicetype] {message}");
    }

    fn hide_status(&self) {}

    fn deliver_text(&self, text: &str) {
        log_debug_content(&format!("transcript|{text}"));
        println!("{text}");
        let _ = io::stdout().flush();
    }

    fn notify_recording_state(&self, recording: bool) {
        log_debug(&format!("frontend|recording={recording}"));
    }
}

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;

    if config.list_input_devices {
        print_input_devices();
        return Ok(());
    }

    init_logging(&config);
    panic::set_hook(Box::new(|info| log_panic(info)));
    log_debug("=== VoiceType started ===");
    log_debug(&format!("Log file: {:?}", log_file_path()));

    install_signal_handlers();

    let recorder = Arc::new(ErrorRecorder::new(config.error_history));
    let capture = Arc::new(AudioCapture::new(config.capture_config(), recorder.clone()));
    let transcriber = Arc::new(Transcriber::new(
        WhisperBackend,
        config.model_config(),
        recorder.clone(),
    ));
    let pipeline = VoicePipeline::new(capture, transcriber);

    let mut orchestrator = Orchestrator::new(
        Box::new(pipeline),
        Box::new(ConsoleFrontend),
        config.auto_record,
    )
    .with_shutdown_flag(&SHUTDOWN);

    let channel = CommandChannel::new(config.resolved_socket_path(), recorder.clone());
    let toggle_events = orchestrator.events();
    match channel.start(move || {
        let _ = toggle_events.send(AppEvent::Toggle);
    }) {
        Ok(()) => println!("[voicetype] listening on {}", channel.path().display()),
        Err(err) => {
            // The daemon still works without the toggle socket.
            recorder.record(&err);
            eprintln!("voicetype: command socket unavailable: {err}");
        }
    }

    orchestrator.run();

    channel.stop();
    log_debug("=== VoiceType stopped ===");
    Ok(())
}

fn print_input_devices() {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("No audio input devices detected.");
        return;
    }
    println!("Detected audio input devices:");
    for info in devices {
        println!(
            "  {} [{}] {}ch @ {}Hz (latency ~{:.1} ms)",
            info.name,
            info.host,
            info.max_input_channels,
            info.default_sample_rate,
            info.default_latency * 1000.0
        );
    }
}
