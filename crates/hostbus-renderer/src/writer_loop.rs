use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use bytes::Bytes;
use hostbus_frame::{opcode_name, Frame};
use tracing::debug;

use crate::channel::LocalChannel;
use crate::error::{RendererError, Result};

/// Somewhere the writer thread can put frames, blocking as long as it must.
pub trait FrameSink: Send + Sync + 'static {
    fn send_frame(&self, opcode: u16, payload: &[u8]) -> Result<()>;
}

impl FrameSink for LocalChannel {
    fn send_frame(&self, opcode: u16, payload: &[u8]) -> Result<()> {
        self.send(opcode, payload)
    }
}

/// A dedicated thread that owns the blocking writes to one [`FrameSink`].
///
/// [`WriterLoop::enqueue`] never blocks, so it is safe to call from a reader
/// callback while the peer is itself blocked writing to us. Frames go out in
/// enqueue order. The queue holds at most `capacity` frames; beyond that
/// `enqueue` fails with [`RendererError::QueueFull`].
///
/// After the first failed write the thread exits and every later `enqueue`
/// reports [`RendererError::NotConnected`].
pub struct WriterLoop {
    queue: Option<SyncSender<Frame>>,
    capacity: usize,
    handle: Option<JoinHandle<usize>>,
}

impl WriterLoop {
    pub fn spawn<S: FrameSink>(name: &str, sink: Arc<S>, capacity: usize) -> Result<Self> {
        let capacity = capacity.max(1);
        let (queue, frames) = mpsc::sync_channel(capacity);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run(&*sink, frames))
            .map_err(RendererError::Io)?;

        debug!(thread = name, capacity, "writer loop started");
        Ok(Self {
            queue: Some(queue),
            capacity,
            handle: Some(handle),
        })
    }

    /// Queue one frame for the writer thread.
    pub fn enqueue(&self, opcode: u16, payload: impl Into<Bytes>) -> Result<()> {
        let Some(queue) = self.queue.as_ref() else {
            return Err(RendererError::NotConnected);
        };
        match queue.try_send(Frame::new(opcode, payload)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                debug!(op = opcode_name(frame.opcode), "writer queue full");
                Err(RendererError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(RendererError::NotConnected),
        }
    }

    /// Stop accepting frames. The thread writes what is already queued and
    /// then exits.
    pub fn close(&mut self) {
        self.queue = None;
    }

    /// Close and wait for the thread. Returns how many frames were written.
    ///
    /// Blocks while the sink blocks; make sure the peer is reading or gone.
    pub fn join(mut self) -> usize {
        self.join_inner()
    }

    fn join_inner(&mut self) -> usize {
        self.close();
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for WriterLoop {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.join_inner();
        }
    }
}

fn run<S: FrameSink>(sink: &S, frames: Receiver<Frame>) -> usize {
    let mut written = 0;
    for frame in frames {
        if let Err(err) = sink.send_frame(frame.opcode, &frame.payload) {
            debug!(op = opcode_name(frame.opcode), error = %err, "writer loop: sink failed");
            break;
        }
        written += 1;
    }
    debug!(written, "writer loop finished");
    written
}

#[cfg(test)]
mod tests {
    use std::sync::{Condvar, Mutex};

    use hostbus_frame::{opcode, FrameConfig};
    use hostbus_transport::pipe_pair;

    use super::*;

    /// Records opcodes; every write blocks until [`GatedSink::open`].
    #[derive(Default)]
    struct GatedSink {
        frames: Mutex<Vec<u16>>,
        open: Mutex<bool>,
        opened: Condvar,
    }

    impl GatedSink {
        fn open(&self) {
            *self.open.lock().expect("lock") = true;
            self.opened.notify_all();
        }
    }

    impl FrameSink for GatedSink {
        fn send_frame(&self, opcode: u16, _payload: &[u8]) -> Result<()> {
            let mut open = self.open.lock().expect("lock");
            while !*open {
                open = self.opened.wait(open).expect("wait");
            }
            self.frames.lock().expect("lock").push(opcode);
            Ok(())
        }
    }

    #[test]
    fn frames_are_written_in_order() {
        let sink = Arc::new(GatedSink::default());
        sink.open();
        let writer = WriterLoop::spawn("test-writer", Arc::clone(&sink), 16)
            .expect("writer should start");

        for op in [opcode::NAVIGATE, opcode::RUN_SCRIPT, opcode::SET_SIZE] {
            writer.enqueue(op, Bytes::new()).expect("enqueue should succeed");
        }
        assert_eq!(writer.join(), 3);
        assert_eq!(
            *sink.frames.lock().expect("lock"),
            vec![opcode::NAVIGATE, opcode::RUN_SCRIPT, opcode::SET_SIZE]
        );
    }

    #[test]
    fn enqueue_does_not_block_on_a_stuck_sink() {
        let sink = Arc::new(GatedSink::default());
        let writer = WriterLoop::spawn("test-writer", Arc::clone(&sink), 2)
            .expect("writer should start");

        // One frame may be held by the blocked thread, two more fill the queue.
        let mut accepted = 0;
        let mut full = false;
        for _ in 0..8 {
            match writer.enqueue(opcode::RUN_SCRIPT, Bytes::new()) {
                Ok(()) => accepted += 1,
                Err(RendererError::QueueFull { capacity }) => {
                    assert_eq!(capacity, 2);
                    full = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(full);
        assert!((2..=3).contains(&accepted));

        sink.open();
        assert_eq!(writer.join(), accepted);
    }

    #[test]
    fn failed_write_disconnects_the_queue() {
        let (gone, host_write) = pipe_pair().expect("pipe should be created");
        let (host_read, _idle) = pipe_pair().expect("pipe should be created");
        let channel = Arc::new(LocalChannel::new(host_read, host_write, FrameConfig::default()));
        drop(gone);

        let writer =
            WriterLoop::spawn("test-writer", channel, 4).expect("writer should start");
        writer
            .enqueue(opcode::NAVIGATE, Bytes::from_static(b"about:blank\0"))
            .expect("first enqueue should succeed");

        let mut saw_disconnect = false;
        for _ in 0..200 {
            if matches!(
                writer.enqueue(opcode::RUN_SCRIPT, Bytes::new()),
                Err(RendererError::NotConnected)
            ) {
                saw_disconnect = true;
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(saw_disconnect);
    }
}
