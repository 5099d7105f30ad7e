use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;

use hostbus_frame::{opcode, opcode_name, Frame, FrameConfig};
use hostbus_transport::{clear_cloexec, pipe_pair};
use tracing::{debug, error, info, warn};

use crate::channel::LocalChannel;
use crate::error::{RendererError, Result};
use crate::protocol::{encode_c_string, encode_size, RealizeConfig, RendererEvent};
use crate::reader_loop::{FrameHandler, ReaderExit, ReaderLoop};
use crate::view::RendererView;
use crate::writer_loop::WriterLoop;

/// Configuration for a [`ChildProcessRenderer`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Helper executable. Invoked as `helper <read-fd> <write-fd> [extra_args...]`.
    pub helper_path: PathBuf,
    pub extra_args: Vec<String>,
    /// How long to wait for the init frame. Default: 3 s.
    pub handshake_timeout: Duration,
    /// How often to check for the init frame. Default: 10 ms.
    pub handshake_poll_interval: Duration,
    /// Reader loop stop-check interval. Default: 100 ms.
    pub read_poll_interval: Duration,
    /// How long to wait for exit after `TERMINATE` before killing. Default: 2 s.
    pub shutdown_grace: Duration,
    /// Scripts registered with `INJECT_SCRIPT` right after the handshake.
    pub inject_scripts: Vec<String>,
    /// Commands that may wait for the writer thread. Default: 8192.
    pub max_queued_commands: usize,
    pub frame: FrameConfig,
}

impl SupervisorConfig {
    pub fn new(helper_path: impl Into<PathBuf>) -> Self {
        Self {
            helper_path: helper_path.into(),
            extra_args: Vec::new(),
            handshake_timeout: Duration::from_secs(3),
            handshake_poll_interval: Duration::from_millis(10),
            read_poll_interval: Duration::from_millis(100),
            shutdown_grace: Duration::from_secs(2),
            inject_scripts: Vec::new(),
            max_queued_commands: 8192,
            frame: FrameConfig::default(),
        }
    }
}

/// Lifecycle of one renderer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Unstarted,
    Spawning,
    Connected,
    Draining,
    Closed,
}

/// Receives renderer events on the reader thread.
pub type EventCallback = Arc<dyn Fn(RendererEvent) + Send + Sync>;

#[derive(Default)]
struct Shared {
    initialized: AtomicBool,
    draining: AtomicBool,
    pixel_ratio_bits: AtomicU32,
    on_event: Mutex<Option<EventCallback>>,
}

impl Shared {
    fn pixel_ratio(&self) -> f32 {
        f32::from_bits(self.pixel_ratio_bits.load(Ordering::SeqCst))
    }

    fn deliver(&self, event: RendererEvent) {
        let callback = lock(&self.on_event).clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }
}

struct Process {
    state: RendererState,
    child: Option<Child>,
    reader: Option<ReaderLoop>,
}

/// The live pipe pair plus the thread that writes to it.
struct Link {
    channel: Arc<LocalChannel>,
    writer: WriterLoop,
}

/// A renderer running as a helper subprocess connected by two pipes.
///
/// Command methods only queue a frame for the writer thread, so they never
/// block and may be called from event callbacks. A command that was queued
/// can still be lost if the helper dies before reading it. [`Self::start`]
/// and [`Self::shutdown`] must not be called from callbacks: they join the
/// reader thread those callbacks run on.
pub struct ChildProcessRenderer {
    config: SupervisorConfig,
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
    process: Mutex<Process>,
}

impl ChildProcessRenderer {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            link: Mutex::new(None),
            process: Mutex::new(Process {
                state: RendererState::Unstarted,
                child: None,
                reader: None,
            }),
        }
    }

    /// Install the event callback, replacing any previous one.
    pub fn set_event_callback(&self, callback: impl Fn(RendererEvent) + Send + Sync + 'static) {
        *lock(&self.shared.on_event) = Some(Arc::new(callback));
    }

    /// Current lifecycle state. A connected renderer whose channel dropped
    /// reports `Closed`; call [`Self::shutdown`] to reap it.
    pub fn state(&self) -> RendererState {
        let state = lock(&self.process).state;
        if state == RendererState::Connected && !self.is_live() {
            return RendererState::Closed;
        }
        state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == RendererState::Connected
    }

    /// OS process id of the helper, while one is running.
    pub fn pid(&self) -> Option<u32> {
        lock(&self.process).child.as_ref().map(Child::id)
    }

    /// Spawn the helper and wait for its init frame.
    ///
    /// Returns the reported device pixel ratio. On any failure every resource
    /// acquired so far is released and the state is `Closed`; calling `start`
    /// again creates fresh pipes.
    pub fn start(&self) -> Result<f32> {
        let mut process = lock(&self.process);
        if process.state == RendererState::Connected && self.is_live() {
            return Ok(self.shared.pixel_ratio());
        }

        self.teardown(&mut process);
        process.state = RendererState::Spawning;
        self.shared.initialized.store(false, Ordering::SeqCst);
        self.shared.draining.store(false, Ordering::SeqCst);

        match self.spawn(&mut process) {
            Ok(ratio) => {
                process.state = RendererState::Connected;
                info!(pid = ?process.child.as_ref().map(Child::id), ratio, "renderer connected");
                Ok(ratio)
            }
            Err(err) => {
                warn!(path = ?self.config.helper_path, error = %err, "renderer unavailable");
                self.teardown(&mut process);
                process.state = RendererState::Closed;
                Err(err)
            }
        }
    }

    /// Stop the reader, ask the helper to exit, wait out the grace period,
    /// kill if needed, and release both pipes. Idempotent.
    pub fn shutdown(&self) {
        let mut process = lock(&self.process);
        if matches!(
            process.state,
            RendererState::Unstarted | RendererState::Closed
        ) {
            return;
        }
        process.state = RendererState::Draining;
        self.teardown(&mut process);
        process.state = RendererState::Closed;
        info!("renderer closed");
    }

    fn spawn(&self, process: &mut Process) -> Result<f32> {
        // host → child and child → host
        let (child_read, host_write) = pipe_pair()?;
        let (host_read, child_write) = pipe_pair()?;
        let child_read_fd = child_read.as_raw_fd();
        let child_write_fd = child_write.as_raw_fd();

        let mut command = Command::new(&self.config.helper_path);
        command
            .arg(child_read_fd.to_string())
            .arg(child_write_fd.to_string())
            .args(&self.config.extra_args)
            .stdin(Stdio::null());
        // SAFETY: the hook runs between fork and exec and only calls fcntl(2),
        // which is async-signal-safe.
        unsafe {
            command.pre_exec(move || {
                clear_cloexec(child_read_fd)?;
                clear_cloexec(child_write_fd)
            });
        }

        let child = command.spawn().map_err(|source| RendererError::Spawn {
            path: self.config.helper_path.clone(),
            source,
        })?;
        drop(child_read);
        drop(child_write);
        debug!(pid = child.id(), path = ?self.config.helper_path, "spawned renderer helper");
        process.child = Some(child);

        let channel = Arc::new(LocalChannel::new(
            host_read,
            host_write,
            self.config.frame.clone(),
        ));
        let writer = WriterLoop::spawn(
            "hostbus-renderer-writer",
            Arc::clone(&channel),
            self.config.max_queued_commands,
        )?;
        *lock(&self.link) = Some(Link {
            channel: Arc::clone(&channel),
            writer,
        });

        process.reader = Some(ReaderLoop::spawn(
            "hostbus-renderer-reader",
            Arc::clone(&channel),
            self.config.read_poll_interval,
            EventPump {
                shared: Arc::clone(&self.shared),
            },
        )?);

        let ratio = self.wait_for_init(process)?;

        for script in &self.config.inject_scripts {
            self.send(opcode::INJECT_SCRIPT, &encode_c_string(script)?)?;
        }
        self.send(opcode::INJECT_SHIMS, &[])?;

        Ok(ratio)
    }

    fn wait_for_init(&self, process: &mut Process) -> Result<f32> {
        let deadline = Instant::now() + self.config.handshake_timeout;
        loop {
            if self.shared.initialized.load(Ordering::SeqCst) {
                return Ok(self.shared.pixel_ratio());
            }
            if let Some(child) = process.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    if self.shared.initialized.load(Ordering::SeqCst) {
                        return Ok(self.shared.pixel_ratio());
                    }
                    return Err(RendererError::ChildExited(status));
                }
            }
            if Instant::now() >= deadline {
                return Err(RendererError::HandshakeTimeout(
                    self.config.handshake_timeout,
                ));
            }
            std::thread::sleep(self.config.handshake_poll_interval);
        }
    }

    fn teardown(&self, process: &mut Process) {
        self.shared.draining.store(true, Ordering::SeqCst);
        if let Some(reader) = process.reader.as_ref() {
            reader.request_stop();
        }

        let link = lock(&self.link).take();
        if let Some(mut link) = link {
            if !link.channel.is_closed() {
                if let Err(err) = link.writer.enqueue(opcode::TERMINATE, Bytes::new()) {
                    debug!(error = %err, "terminate not delivered");
                }
            }
            link.writer.close();

            // A killed helper turns any write still in progress into EPIPE,
            // so the writer is joined only after reaping.
            if let Some(child) = process.child.take() {
                reap(child, self.config.shutdown_grace);
            }
            let written = link.writer.join();
            debug!(written, "writer loop finished");
            link.channel.close();
        }

        if let Some(child) = process.child.take() {
            reap(child, self.config.shutdown_grace);
        }

        if let Some(reader) = process.reader.take() {
            let exit = reader.join();
            debug!(?exit, "reader loop finished");
        }
    }

    fn is_live(&self) -> bool {
        lock(&self.link)
            .as_ref()
            .is_some_and(|link| !link.channel.is_closed())
    }

    fn send(&self, opcode: u16, payload: &[u8]) -> Result<()> {
        let link = lock(&self.link);
        match link.as_ref().filter(|link| !link.channel.is_closed()) {
            Some(link) => link.writer.enqueue(opcode, Bytes::copy_from_slice(payload)),
            None => {
                debug!(op = opcode_name(opcode), "renderer not connected, command dropped");
                Err(RendererError::NotConnected)
            }
        }
    }
}

fn reap(mut child: Child, grace: Duration) {
    let pid = child.id();
    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(pid, %status, "renderer exited");
                return;
            }
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            Ok(None) => break,
            Err(err) => {
                warn!(pid, error = %err, "failed to poll renderer exit");
                break;
            }
        }
    }

    warn!(pid, "renderer did not exit in time, killing");
    if let Err(err) = child.kill() {
        warn!(pid, error = %err, "kill failed");
    }
    if let Err(err) = child.wait() {
        warn!(pid, error = %err, "wait after kill failed");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for ChildProcessRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RendererView for ChildProcessRenderer {
    fn device_pixel_ratio(&self) -> f32 {
        self.shared.pixel_ratio()
    }

    fn realize(&self, config: &RealizeConfig) -> Result<()> {
        self.send(opcode::REALIZE, &config.encode()?)
    }

    fn navigate(&self, url: &str) -> Result<()> {
        self.send(opcode::NAVIGATE, &encode_c_string(url)?)
    }

    fn run_script(&self, source: &str) -> Result<()> {
        self.send(opcode::RUN_SCRIPT, &encode_c_string(source)?)
    }

    fn inject_script(&self, source: &str) -> Result<()> {
        self.send(opcode::INJECT_SCRIPT, &encode_c_string(source)?)
    }

    fn set_size(&self, width: u32, height: u32) -> Result<()> {
        self.send(opcode::SET_SIZE, &encode_size(width, height))
    }

    fn set_keyboard_focus(&self, focus: bool) -> Result<()> {
        self.send(opcode::SET_KEYBOARD_FOCUS, &[u8::from(focus)])
    }
}

/// Reader-thread handler: decodes events and forwards them.
struct EventPump {
    shared: Arc<Shared>,
}

impl FrameHandler for EventPump {
    fn on_frame(&mut self, frame: Frame) {
        let event = match RendererEvent::from_frame(&frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(op = opcode_name(frame.opcode), "ignoring non-event frame");
                return;
            }
            Err(err) => {
                warn!(op = opcode_name(frame.opcode), error = %err, "dropping malformed event");
                return;
            }
        };

        match &event {
            RendererEvent::Init { pixel_ratio } => {
                self.shared
                    .pixel_ratio_bits
                    .store(pixel_ratio.to_bits(), Ordering::SeqCst);
                self.shared.initialized.store(true, Ordering::SeqCst);
            }
            RendererEvent::Console { tag, text } => log_console(tag, text),
            _ => {}
        }
        self.shared.deliver(event);
    }

    fn on_exit(&mut self, exit: &ReaderExit) {
        if *exit != ReaderExit::Stopped && !self.shared.draining.load(Ordering::SeqCst) {
            self.shared.deliver(RendererEvent::Disconnected);
        }
    }
}

fn log_console(tag: &str, text: &str) {
    match tag {
        "error" => error!(target: "hostbus::console", tag, "{text}"),
        "warn" => warn!(target: "hostbus::console", tag, "{text}"),
        _ => info!(target: "hostbus::console", tag, "{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings() {
        let cfg = SupervisorConfig::new("/usr/libexec/renderer");
        assert_eq!(cfg.handshake_timeout, Duration::from_secs(3));
        assert_eq!(cfg.handshake_poll_interval, Duration::from_millis(10));
        assert!(cfg.shutdown_grace > Duration::ZERO);
    }

    #[test]
    fn commands_before_start_are_rejected() {
        let renderer = ChildProcessRenderer::new(SupervisorConfig::new("/nonexistent"));
        assert_eq!(renderer.state(), RendererState::Unstarted);
        assert!(matches!(
            renderer.navigate("about:blank"),
            Err(RendererError::NotConnected)
        ));
        renderer.shutdown();
        assert_eq!(renderer.state(), RendererState::Unstarted);
    }

    #[test]
    fn missing_helper_leaves_renderer_closed() {
        let renderer = ChildProcessRenderer::new(SupervisorConfig::new(
            "/nonexistent/hostbus-renderer-helper",
        ));
        let err = renderer.start().unwrap_err();
        assert!(matches!(err, RendererError::Spawn { .. }));
        assert_eq!(renderer.state(), RendererState::Closed);
        assert!(renderer.pid().is_none());
    }
}
