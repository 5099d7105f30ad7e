//! Transport adapters between the bus and its two kinds of peer.

use std::sync::{Arc, Weak};

use hostbus_frame::ByteOrder;
use hostbus_net::{ClientId, Message, NetworkChannel, NetworkHandler};
use hostbus_renderer::{ChildProcessRenderer, RendererEvent, RendererView};
use hostbus_variant::{decode_array, decode_json_array, encode_array, encode_json_array, Variant};
use tracing::{debug, warn};

use crate::bus::FunctionBus;
use crate::error::Result;
use crate::route::Origin;

/// Outbound path to the embedded renderer.
pub trait LocalSink: Send + Sync {
    fn post(&self, message: &[Variant]) -> Result<()>;
}

/// Outbound path to network clients.
pub trait RemoteSink: Send + Sync {
    fn send(&self, client: ClientId, message: &[Variant]) -> Result<()>;

    /// Deliver to every connected client except `exclude`. Clients that
    /// vanish mid-broadcast are skipped silently. Returns the recipient count.
    fn broadcast(&self, message: &[Variant], exclude: Option<ClientId>) -> Result<usize>;
}

impl LocalSink for ChildProcessRenderer {
    fn post(&self, message: &[Variant]) -> Result<()> {
        self.post_message(message)?;
        Ok(())
    }
}

/// How outbound arrays are encoded on the network transport.
///
/// Inbound messages are accepted in either form: text frames are JSON,
/// binary frames are the variant codec in little-endian order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireProtocol {
    /// JSON arrays in text frames.
    #[default]
    Json,
    /// Variant codec payloads in binary frames.
    Binary,
}

impl WireProtocol {
    pub fn encode(self, message: &[Variant]) -> Result<Message> {
        Ok(match self {
            WireProtocol::Json => Message::Text(encode_json_array(message)),
            WireProtocol::Binary => Message::Binary(encode_array(message, ByteOrder::Little)?),
        })
    }

    pub fn decode(message: &Message) -> Result<Vec<Variant>> {
        Ok(match message {
            Message::Text(text) => decode_json_array(text)?,
            Message::Binary(bytes) => decode_array(bytes, ByteOrder::Little)?,
        })
    }
}

/// [`RemoteSink`] over a [`NetworkChannel`].
pub struct NetworkSink {
    channel: Arc<NetworkChannel>,
    protocol: WireProtocol,
}

impl NetworkSink {
    pub fn new(channel: Arc<NetworkChannel>, protocol: WireProtocol) -> Self {
        Self { channel, protocol }
    }

    pub fn channel(&self) -> &Arc<NetworkChannel> {
        &self.channel
    }
}

impl RemoteSink for NetworkSink {
    fn send(&self, client: ClientId, message: &[Variant]) -> Result<()> {
        let encoded = self.protocol.encode(message)?;
        self.channel
            .send(client, encoded.as_bytes(), encoded.is_binary())?;
        Ok(())
    }

    fn broadcast(&self, message: &[Variant], exclude: Option<ClientId>) -> Result<usize> {
        let encoded = self.protocol.encode(message)?;
        Ok(self
            .channel
            .broadcast(encoded.as_bytes(), exclude, encoded.is_binary()))
    }
}

/// Feeds network channel events into a bus.
///
/// Holds the bus weakly: the bus owns the channel through its sink, so a
/// strong reference here would leak both.
pub struct NetworkBinding {
    bus: Weak<FunctionBus>,
}

impl NetworkBinding {
    pub fn new(bus: &Arc<FunctionBus>) -> Self {
        Self {
            bus: Arc::downgrade(bus),
        }
    }
}

impl NetworkHandler for NetworkBinding {
    fn on_connect(&self, client: ClientId) {
        if let Some(bus) = self.bus.upgrade() {
            bus.client_connected(client);
        }
    }

    fn on_message(&self, client: ClientId, message: Message) {
        let Some(bus) = self.bus.upgrade() else {
            return;
        };
        match WireProtocol::decode(&message) {
            Ok(values) => bus.dispatch(&values, Origin::Client(client)),
            Err(err) => warn!(%client, error = %err, "undecodable message, dropping"),
        }
    }

    fn on_disconnect(&self, client: ClientId) {
        if let Some(bus) = self.bus.upgrade() {
            bus.client_disconnected(client);
        }
    }
}

/// Connect `bus` and `channel` in both directions.
pub fn bind_network(bus: &Arc<FunctionBus>, channel: &Arc<NetworkChannel>, protocol: WireProtocol) {
    bus.attach_remote(Arc::new(NetworkSink::new(Arc::clone(channel), protocol)));
    channel.set_handler(Arc::new(NetworkBinding::new(bus)));
}

/// Connect `bus` and a child-process renderer in both directions.
///
/// Replaces the renderer's event callback. Script messages are dispatched
/// with [`Origin::Local`]; a lost channel closes the bus's local link.
pub fn bind_renderer(bus: &Arc<FunctionBus>, renderer: &Arc<ChildProcessRenderer>) {
    let weak = Arc::downgrade(bus);
    renderer.set_event_callback(move |event| {
        let Some(bus) = weak.upgrade() else {
            return;
        };
        match event {
            RendererEvent::ScriptMessage(values) => bus.dispatch(&values, Origin::Local),
            RendererEvent::Disconnected => bus.close_local(),
            RendererEvent::Init { pixel_ratio } => debug!(pixel_ratio, "renderer initialized"),
            RendererEvent::LoadFinished => debug!("renderer load finished"),
            RendererEvent::Console { .. } => {}
        }
    });
    let sink: Arc<dyn LocalSink> = Arc::clone(renderer) as Arc<dyn LocalSink>;
    bus.attach_local(sink);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_protocol_uses_text_frames() {
        let message = WireProtocol::Json
            .encode(&[Variant::from("getWidth"), Variant::Number(640.0)])
            .expect("encode should succeed");
        assert_eq!(message, Message::Text("[\"getWidth\",640.0]".to_string()));
    }

    #[test]
    fn binary_protocol_is_little_endian() {
        let message = WireProtocol::Binary
            .encode(&[Variant::Number(1.0)])
            .expect("encode should succeed");
        let bytes = message.as_bytes();
        assert!(message.is_binary());
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..], &1.0f64.to_le_bytes());
    }

    #[test]
    fn decode_accepts_both_forms() {
        let values = vec![Variant::from("ping"), Variant::Bool(true)];
        for protocol in [WireProtocol::Json, WireProtocol::Binary] {
            let message = protocol.encode(&values).expect("encode should succeed");
            assert_eq!(
                WireProtocol::decode(&message).expect("decode should succeed"),
                values
            );
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(WireProtocol::decode(&Message::Text("{}".into())).is_err());
        assert!(WireProtocol::decode(&Message::Binary(vec![9u8].into())).is_err());
    }
}
