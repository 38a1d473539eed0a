//! Unix-socket command channel.
//!
//! External tools (hotkey daemons, scripts) toggle recording by connecting to
//! the socket and writing `toggle`. The listener polls with a non-blocking
//! accept loop so shutdown never waits on a client.

#[cfg(unix)]
mod platform {
    use crate::errors::{ErrorRecorder, VoiceTypeError};
    use crate::{lock_or_recover, log_debug};
    use std::io::{ErrorKind, Read};
    use std::os::unix::net::UnixListener;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    const BIND_ATTEMPTS: u32 = 3;
    const BIND_RETRY_STEP: Duration = Duration::from_secs(2);
    const ACCEPT_POLL: Duration = Duration::from_millis(100);
    const READ_TIMEOUT: Duration = Duration::from_secs(2);
    const MAX_COMMAND_BYTES: usize = 1024;

    const TOGGLE_COMMAND: &str = "toggle";

    struct ListenerHandle {
        running: Arc<AtomicBool>,
        thread: JoinHandle<()>,
    }

    /// Listens on a unix socket for one-line commands.
    pub struct CommandChannel {
        path: PathBuf,
        recorder: Arc<ErrorRecorder>,
        worker: Mutex<Option<ListenerHandle>>,
    }

    impl CommandChannel {
        pub fn new(path: PathBuf, recorder: Arc<ErrorRecorder>) -> Self {
            Self {
                path,
                recorder,
                worker: Mutex::new(None),
            }
        }

        pub fn path(&self) -> &PathBuf {
            &self.path
        }

        /// Bind the socket and start accepting commands. A stale socket file
        /// from a previous run is removed before each bind attempt.
        pub fn start<F>(&self, on_toggle: F) -> Result<(), VoiceTypeError>
        where
            F: Fn() + Send + 'static,
        {
            let mut worker = lock_or_recover(&self.worker, "command channel");
            if worker.is_some() {
                return Err(VoiceTypeError::Hotkey(
                    "command channel already started".into(),
                ));
            }

            let listener = self.bind_with_retry()?;
            listener.set_nonblocking(true).map_err(|err| {
                VoiceTypeError::Hotkey(format!("failed to set non-blocking: {err}"))
            })?;

            let running = Arc::new(AtomicBool::new(true));
            let thread_running = running.clone();
            let path = self.path.clone();
            let thread = thread::Builder::new()
                .name("voicetype-socket".into())
                .spawn(move || listen_loop(listener, thread_running, on_toggle, path))
                .map_err(|err| {
                    VoiceTypeError::Hotkey(format!("failed to spawn listener thread: {err}"))
                })?;

            tracing::info!(path = %self.path.display(), "command channel listening");
            *worker = Some(ListenerHandle { running, thread });
            Ok(())
        }

        fn bind_with_retry(&self) -> Result<UnixListener, VoiceTypeError> {
            let mut last_error = String::new();
            for attempt in 1..=BIND_ATTEMPTS {
                if self.path.exists() {
                    let _ = std::fs::remove_file(&self.path);
                }
                match UnixListener::bind(&self.path) {
                    Ok(listener) => return Ok(listener),
                    Err(err) => {
                        last_error = err.to_string();
                        let bind_err = VoiceTypeError::Hotkey(format!(
                            "bind attempt {attempt}/{BIND_ATTEMPTS} on {} failed: {err}",
                            self.path.display()
                        ));
                        self.recorder.record(&bind_err);
                        if attempt < BIND_ATTEMPTS {
                            thread::sleep(BIND_RETRY_STEP * attempt);
                        }
                    }
                }
            }
            Err(VoiceTypeError::Hotkey(format!(
                "could not bind {} after {BIND_ATTEMPTS} attempts: {last_error}",
                self.path.display()
            )))
        }

        /// Stop the listener and remove the socket file.
        pub fn stop(&self) {
            let handle = lock_or_recover(&self.worker, "command channel").take();
            if let Some(handle) = handle {
                handle.running.store(false, Ordering::SeqCst);
                if handle.thread.join().is_err() {
                    log_debug("socket|listener thread panicked during shutdown");
                }
            }
            if self.path.exists() {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    impl Drop for CommandChannel {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn listen_loop<F>(
        listener: UnixListener,
        running: Arc<AtomicBool>,
        on_toggle: F,
        path: PathBuf,
    ) where
        F: Fn() + Send + 'static,
    {
        while running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    if let Err(err) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
                        log_debug(&format!("socket|failed to set read timeout: {err}"));
                        continue;
                    }
                    // Accepted sockets inherit non-blocking mode on some
                    // platforms; reads must block until data or timeout.
                    if let Err(err) = stream.set_nonblocking(false) {
                        log_debug(&format!("socket|failed to clear non-blocking: {err}"));
                        continue;
                    }
                    let raw = read_command(&mut stream);
                    handle_command(&raw, &on_toggle);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(err) => {
                    log_debug(&format!("socket|accept failed: {err}"));
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        log_debug(&format!("socket|listener on {} stopped", path.display()));
    }

    /// Read the full command line. A client may split its payload across
    /// several writes, so keep reading until a newline, EOF, the size cap, or
    /// the read timeout.
    fn read_command<R: Read>(stream: &mut R) -> Vec<u8> {
        let mut raw = Vec::with_capacity(128);
        let mut chunk = [0u8; 256];
        while raw.len() < MAX_COMMAND_BYTES {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(len) => {
                    raw.extend_from_slice(&chunk[..len]);
                    if raw.contains(&b'\n') {
                        break;
                    }
                }
                Err(err) => {
                    log_debug(&format!("socket|read ended: {err}"));
                    break;
                }
            }
        }
        raw.truncate(MAX_COMMAND_BYTES);
        raw
    }

    fn handle_command<F: Fn()>(raw: &[u8], on_toggle: &F) {
        let text = String::from_utf8_lossy(raw);
        let command = text.lines().next().unwrap_or("").trim();
        if command == TOGGLE_COMMAND {
            on_toggle();
        } else if !command.is_empty() {
            log_debug(&format!("socket|ignoring unknown command {command:?}"));
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::io::Write;
        use std::os::unix::net::UnixStream;
        use std::sync::atomic::AtomicUsize;
        use std::time::Instant;

        fn scratch_path(tag: &str) -> PathBuf {
            std::env::temp_dir().join(format!(
                "voicetype-test-{}-{tag}.sock",
                std::process::id()
            ))
        }

        fn channel(tag: &str) -> (CommandChannel, Arc<AtomicUsize>) {
            let recorder = Arc::new(ErrorRecorder::new(8));
            let channel = CommandChannel::new(scratch_path(tag), recorder);
            (channel, Arc::new(AtomicUsize::new(0)))
        }

        fn send(path: &PathBuf, payload: &[u8]) {
            let mut stream = UnixStream::connect(path).expect("connect");
            stream.write_all(payload).expect("write");
        }

        fn wait_for(toggles: &AtomicUsize, expected: usize) -> bool {
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if toggles.load(Ordering::SeqCst) == expected {
                    return true;
                }
                thread::sleep(Duration::from_millis(10));
            }
            toggles.load(Ordering::SeqCst) == expected
        }

        #[test]
        fn toggle_command_invokes_callback() {
            let (channel, toggles) = channel("toggle");
            let counter = toggles.clone();
            channel
                .start(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("start");

            send(channel.path(), b"toggle\n");
            assert!(wait_for(&toggles, 1));

            send(channel.path(), b"toggle");
            assert!(wait_for(&toggles, 2));

            let path = channel.path().clone();
            channel.stop();
            assert!(!path.exists());
        }

        #[test]
        fn command_split_across_writes_still_fires() {
            let (channel, toggles) = channel("split");
            let counter = toggles.clone();
            channel
                .start(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("start");

            let mut stream = UnixStream::connect(channel.path()).expect("connect");
            stream.write_all(b"tog").expect("first write");
            stream.flush().expect("flush");
            thread::sleep(Duration::from_millis(50));
            stream.write_all(b"gle\n").expect("second write");
            drop(stream);

            assert!(wait_for(&toggles, 1));
            channel.stop();
        }

        #[test]
        fn unknown_commands_are_ignored() {
            let (channel, toggles) = channel("unknown");
            let counter = toggles.clone();
            channel
                .start(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("start");

            send(channel.path(), b"ping\n");
            send(channel.path(), b"TOGGLE\n");
            // Prove the listener is still alive and never fired for the others.
            send(channel.path(), b"toggle\n");
            assert!(wait_for(&toggles, 1));
            channel.stop();
        }

        #[test]
        fn stale_socket_file_is_replaced_on_bind() {
            let (channel, toggles) = channel("stale");
            std::fs::write(channel.path(), b"stale").expect("create stale file");

            let counter = toggles.clone();
            channel
                .start(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .expect("start over stale file");
            send(channel.path(), b"toggle\n");
            assert!(wait_for(&toggles, 1));
            channel.stop();
        }

        #[test]
        fn second_start_is_refused() {
            let (channel, _toggles) = channel("double");
            channel.start(|| {}).expect("first start");
            assert!(channel.start(|| {}).is_err());
            channel.stop();
        }
    }
}

#[cfg(unix)]
pub use platform::CommandChannel;

#[cfg(not(unix))]
mod platform {
    use crate::errors::{ErrorRecorder, VoiceTypeError};
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Stub for targets without unix sockets.
    pub struct CommandChannel {
        path: PathBuf,
    }

    impl CommandChannel {
        pub fn new(path: PathBuf, _recorder: Arc<ErrorRecorder>) -> Self {
            Self { path }
        }

        pub fn path(&self) -> &PathBuf {
            &self.path
        }

        pub fn start<F>(&self, _on_toggle: F) -> Result<(), VoiceTypeError>
        where
            F: Fn() + Send + 'static,
        {
            Err(VoiceTypeError::Hotkey(
                "the command socket is currently supported only on Unix-like platforms".into(),
            ))
        }

        pub fn stop(&self) {}
    }
}

#[cfg(not(unix))]
pub use platform::CommandChannel;
