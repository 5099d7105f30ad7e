use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use hostbus_frame::{opcode::net, FrameConfig, FrameError, FrameReader, FrameWriter};

use crate::client::Message;
use crate::error::{NetError, Result};

/// Blocking client for a [`crate::NetworkChannel`].
pub struct NetClient {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
}

impl NetClient {
    /// Connect and introduce ourselves with `user_agent`.
    pub fn connect(addr: SocketAddr, user_agent: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let reader_stream = stream.try_clone()?;

        let config = FrameConfig::network();
        let mut client = Self {
            reader: FrameReader::with_config(reader_stream, config.clone()),
            writer: FrameWriter::with_config(stream, config),
        };
        client.writer.send(net::HELLO, user_agent.as_bytes())?;
        Ok(client)
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.writer.send(net::TEXT, text.as_bytes())?;
        Ok(())
    }

    pub fn send_binary(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.send(net::BINARY, payload)?;
        Ok(())
    }

    pub fn send(&mut self, message: &Message) -> Result<()> {
        match message {
            Message::Text(text) => self.send_text(text),
            Message::Binary(bytes) => self.send_binary(bytes),
        }
    }

    /// Wait up to `timeout` for the next message; `None` waits forever.
    ///
    /// `Ok(None)` on timeout. Partially received frames are kept for the
    /// next call.
    pub fn recv(&mut self, timeout: Option<Duration>) -> Result<Option<Message>> {
        // A zero timeout is rejected by the OS API; treat it as the shortest wait.
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        self.reader.get_ref().set_read_timeout(timeout)?;
        loop {
            let frame = match self.reader.read_frame() {
                Ok(frame) => frame,
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Ok(None);
                }
                Err(FrameError::ChannelClosed) => return Err(NetError::Closed),
                Err(err) => return Err(err.into()),
            };
            match frame.opcode {
                net::TEXT => {
                    let text = String::from_utf8(frame.payload.to_vec()).map_err(|_| {
                        NetError::Io(std::io::Error::new(
                            ErrorKind::InvalidData,
                            "text frame is not UTF-8",
                        ))
                    })?;
                    return Ok(Some(Message::Text(text)));
                }
                net::BINARY => return Ok(Some(Message::Binary(frame.payload))),
                _ => continue,
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.writer.get_ref().local_addr()?)
    }
}
