use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use hostbus_frame::Frame;
use tracing::{debug, warn};

use crate::channel::LocalChannel;
use crate::error::{RendererError, Result};

/// A descriptor-backed source the loop can wait on with a bound.
pub trait FrameSource: Send + Sync + 'static {
    /// Wait up to `timeout` for one frame; `Ok(None)` on timeout.
    fn poll_frame(&self, timeout: Duration) -> Result<Option<Frame>>;
}

impl FrameSource for LocalChannel {
    fn poll_frame(&self, timeout: Duration) -> Result<Option<Frame>> {
        self.poll(timeout)
    }
}

/// Receives frames on the reader thread, one at a time, in arrival order.
pub trait FrameHandler: Send + 'static {
    fn on_frame(&mut self, frame: Frame);

    /// Called once, on the reader thread, after the last frame.
    fn on_exit(&mut self, _exit: &ReaderExit) {}
}

impl<F> FrameHandler for F
where
    F: FnMut(Frame) + Send + 'static,
{
    fn on_frame(&mut self, frame: Frame) {
        self(frame)
    }
}

/// Why a reader loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// Stop was requested.
    Stopped,
    /// The peer closed its end.
    Disconnected,
    /// A protocol or I/O error tore the channel down.
    Failed(String),
}

/// A dedicated thread that drains one [`FrameSource`].
///
/// The stop flag is checked once per poll interval; after a stop request no
/// further frames are decoded even if bytes remain buffered. Dropping the
/// handle requests stop and joins.
pub struct ReaderLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<ReaderExit>>,
}

impl ReaderLoop {
    pub fn spawn<S, H>(
        name: &str,
        source: Arc<S>,
        poll_interval: Duration,
        mut handler: H,
    ) -> Result<Self>
    where
        S: FrameSource,
        H: FrameHandler,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let exit = run(&*source, poll_interval, &thread_stop, &mut handler);
                handler.on_exit(&exit);
                exit
            })
            .map_err(RendererError::Io)?;

        debug!(thread = name, "reader loop started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Ask the loop to exit at its next poll boundary. Does not wait.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// True until the thread has returned.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Wait for the loop to end on its own (or after [`Self::request_stop`]).
    ///
    /// Must not be called from inside the handler.
    pub fn join(mut self) -> ReaderExit {
        self.join_inner()
    }

    /// Request stop and wait for the thread.
    pub fn stop(self) -> ReaderExit {
        self.request_stop();
        self.join()
    }

    fn join_inner(&mut self) -> ReaderExit {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| ReaderExit::Failed("reader thread panicked".to_string())),
            None => ReaderExit::Stopped,
        }
    }
}

impl Drop for ReaderLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
            self.join_inner();
        }
    }
}

fn run<S: FrameSource, H: FrameHandler>(
    source: &S,
    poll_interval: Duration,
    stop: &AtomicBool,
    handler: &mut H,
) -> ReaderExit {
    loop {
        if stop.load(Ordering::SeqCst) {
            return ReaderExit::Stopped;
        }
        match source.poll_frame(poll_interval) {
            Ok(Some(frame)) => handler.on_frame(frame),
            Ok(None) => continue,
            Err(RendererError::NotConnected) => {
                debug!("reader loop: peer closed");
                return ReaderExit::Disconnected;
            }
            Err(err) => {
                warn!(error = %err, "reader loop: channel failed");
                return ReaderExit::Failed(err.to_string());
            }
        }
    }
}
