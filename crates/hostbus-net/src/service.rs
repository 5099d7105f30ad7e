use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::channel::NetworkChannel;
use crate::error::{NetError, Result};

/// A thread that calls `serve(true)` until the channel is cancelled.
///
/// Dropping it cancels the channel and joins the thread.
pub struct ServiceThread {
    channel: Arc<NetworkChannel>,
    handle: Option<JoinHandle<()>>,
}

impl ServiceThread {
    pub fn spawn(channel: Arc<NetworkChannel>) -> Result<Self> {
        let worker = Arc::clone(&channel);
        let handle = std::thread::Builder::new()
            .name("hostbus-net-serve".to_string())
            .spawn(move || run(&worker))
            .map_err(NetError::Io)?;
        Ok(Self {
            channel,
            handle: Some(handle),
        })
    }

    pub fn channel(&self) -> &Arc<NetworkChannel> {
        &self.channel
    }

    /// Cancel the channel and wait for the thread.
    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        self.channel.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("network service thread panicked");
            }
        }
    }
}

impl Drop for ServiceThread {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

fn run(channel: &NetworkChannel) {
    debug!(port = channel.port(), "network service thread started");
    loop {
        match channel.serve(true) {
            Ok(()) => {}
            Err(NetError::Closed) => break,
            Err(err) => {
                warn!(error = %err, "serve failed");
                // Avoid spinning on a persistent poll failure.
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    debug!("network service thread finished");
}
