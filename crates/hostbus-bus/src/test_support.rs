use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use hostbus_net::ClientId;
use hostbus_renderer::RendererError;
use hostbus_variant::Variant;

use crate::error::Result;
use crate::sink::{LocalSink, RemoteSink};

#[derive(Default)]
pub struct RecordingLocal {
    posted: Mutex<Vec<Vec<Variant>>>,
    attempts: AtomicUsize,
    fail: bool,
}

impl RecordingLocal {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn posted(&self) -> Vec<Vec<Variant>> {
        self.posted.lock().expect("lock").clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl LocalSink for RecordingLocal {
    fn post(&self, message: &[Variant]) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RendererError::NotConnected.into());
        }
        self.posted.lock().expect("lock").push(message.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    To(ClientId, Vec<Variant>),
    Broadcast(Option<ClientId>, Vec<Variant>),
}

#[derive(Default)]
pub struct RecordingRemote {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingRemote {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("lock").clone()
    }

    pub fn take(&self) -> Vec<Sent> {
        std::mem::take(&mut *self.sent.lock().expect("lock"))
    }
}

impl RemoteSink for RecordingRemote {
    fn send(&self, client: ClientId, message: &[Variant]) -> Result<()> {
        self.sent
            .lock()
            .expect("lock")
            .push(Sent::To(client, message.to_vec()));
        Ok(())
    }

    fn broadcast(&self, message: &[Variant], exclude: Option<ClientId>) -> Result<usize> {
        self.sent
            .lock()
            .expect("lock")
            .push(Sent::Broadcast(exclude, message.to_vec()));
        Ok(1)
    }
}
