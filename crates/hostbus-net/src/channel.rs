use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use hostbus_frame::{decode_frame, encode_frame, opcode::net, FrameConfig};
use hostbus_transport::{pipe_pair, poll_fds, Interest, PipeReader, PipeWriter, PollEntry};
use tracing::{debug, info, warn};

use crate::addr::{bind_from, FIRST_PORT};
use crate::client::{ClientId, ClientInfo, Message, NetworkHandler};
use crate::error::{NetError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

pub const DEFAULT_MAX_QUEUED_FRAMES: usize = 1024;

/// How the listening port is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelection {
    /// Exactly this port; 0 lets the OS pick.
    Fixed(u16),
    /// Lowest free port at or above `first`.
    Probe { first: u16 },
    /// This port if it is free, otherwise the lowest free port at or above
    /// `fallback`.
    Preferred { port: u16, fallback: u16 },
}

impl Default for PortSelection {
    fn default() -> Self {
        PortSelection::Probe { first: FIRST_PORT }
    }
}

/// Configuration for a [`NetworkChannel`].
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Interface to listen on. Default: all IPv4 interfaces.
    pub bind_address: IpAddr,
    pub port: PortSelection,
    /// Upper bound on one blocking `serve` wait. Default: 50 ms.
    pub poll_timeout: Duration,
    /// Framing for client connections. Default: little-endian, 16 MiB max.
    pub frame: FrameConfig,
    /// Outbound frames a client may have queued before it is dropped as too
    /// slow. Default: 1024.
    pub max_queued_frames: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: PortSelection::default(),
            poll_timeout: Duration::from_millis(50),
            frame: FrameConfig::network(),
            max_queued_frames: DEFAULT_MAX_QUEUED_FRAMES,
        }
    }
}

impl NetworkConfig {
    /// Loopback-only listener on an OS-chosen port.
    pub fn loopback() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: PortSelection::Fixed(0),
            ..Self::default()
        }
    }
}

struct ClientContext {
    stream: TcpStream,
    peer: SocketAddr,
    read_buf: BytesMut,
    write_queue: VecDeque<Bytes>,
    /// Bytes of the queue head already written.
    write_offset: usize,
    user_agent: Option<String>,
    /// Set when the queue hit its cap; the next `serve` drops the client.
    overflowed: bool,
}

impl ClientContext {
    /// Queue `frame` unless the client is already over its cap.
    fn enqueue(&mut self, id: ClientId, frame: Bytes, max: usize) -> bool {
        if self.overflowed {
            return false;
        }
        if self.write_queue.len() >= max {
            warn!(client = %id, queued = self.write_queue.len(), "client not reading, dropping it");
            self.overflowed = true;
            return false;
        }
        self.write_queue.push_back(frame);
        true
    }
}

enum Event {
    Connected(ClientId),
    Message(ClientId, Message),
    Disconnected(ClientId),
}

/// A TCP listener serving many clients, each with its own read accumulator
/// and FIFO of outbound frames.
///
/// `send`/`broadcast` only enqueue and may be called from any thread; bytes
/// move when some thread calls [`NetworkChannel::serve`] (usually a
/// [`crate::ServiceThread`]). At most one write is issued per client per
/// writability signal, so frames are never interleaved.
pub struct NetworkChannel {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: NetworkConfig,
    clients: Mutex<HashMap<ClientId, ClientContext>>,
    next_id: AtomicU64,
    handler: Mutex<Option<Arc<dyn NetworkHandler>>>,
    wake_reader: PipeReader,
    wake_writer: PipeWriter,
    cancelled: AtomicBool,
}

impl NetworkChannel {
    /// Bind and start listening. Nothing is accepted until `serve` runs.
    pub fn listen(config: NetworkConfig) -> Result<Self> {
        let listener = match config.port {
            PortSelection::Fixed(port) => {
                let addr = SocketAddr::new(config.bind_address, port);
                TcpListener::bind(addr).map_err(|source| NetError::Bind { addr, source })?
            }
            PortSelection::Probe { first } => bind_from(config.bind_address, first)?.0,
            PortSelection::Preferred { port, fallback } => {
                let addr = SocketAddr::new(config.bind_address, port);
                match TcpListener::bind(addr) {
                    Ok(listener) => listener,
                    Err(err) if err.kind() == ErrorKind::AddrInUse => {
                        warn!(%addr, "preferred port taken, probing from {fallback}");
                        bind_from(config.bind_address, fallback)?.0
                    }
                    Err(source) => return Err(NetError::Bind { addr, source }),
                }
            }
        };
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let (wake_reader, wake_writer) = pipe_pair()?;
        wake_reader.set_nonblocking(true)?;
        wake_writer.set_nonblocking(true)?;

        info!(%local_addr, "network channel listening");

        Ok(Self {
            listener,
            local_addr,
            config,
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            handler: Mutex::new(None),
            wake_reader,
            wake_writer,
            cancelled: AtomicBool::new(false),
        })
    }

    /// Install the event handler, replacing any previous one.
    pub fn set_handler(&self, handler: Arc<dyn NetworkHandler>) {
        *lock(&self.handler) = Some(handler);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Queue one message for one client.
    ///
    /// A client whose queue is full is scheduled for disconnection and the
    /// call fails with [`NetError::QueueFull`].
    pub fn send(&self, client: ClientId, payload: &[u8], binary: bool) -> Result<()> {
        let frame = self.encode(payload, binary)?;
        let queued = {
            let mut clients = lock(&self.clients);
            let ctx = clients
                .get_mut(&client)
                .ok_or(NetError::UnknownClient(client))?;
            ctx.enqueue(client, frame, self.config.max_queued_frames)
        };
        self.wake();
        if queued {
            Ok(())
        } else {
            Err(NetError::QueueFull(client))
        }
    }

    /// Queue one message for every connected client except `exclude`.
    ///
    /// The recipient set is the clients connected when the call takes the
    /// lock. Clients over their queue cap are skipped and dropped on the
    /// next `serve`. Returns how many clients the message was queued for.
    pub fn broadcast(&self, payload: &[u8], exclude: Option<ClientId>, binary: bool) -> usize {
        let frame = match self.encode(payload, binary) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "broadcast payload rejected");
                return 0;
            }
        };

        let (count, targets) = {
            let mut clients = lock(&self.clients);
            let mut count = 0;
            let mut targets = 0;
            for (id, ctx) in clients.iter_mut() {
                if Some(*id) == exclude {
                    continue;
                }
                targets += 1;
                if ctx.enqueue(*id, frame.clone(), self.config.max_queued_frames) {
                    count += 1;
                }
            }
            (count, targets)
        };

        if targets > 0 {
            self.wake();
        }
        count
    }

    /// Run one service iteration: accept, read, write one frame per writable
    /// client, then report events to the handler.
    ///
    /// With `block` the call waits up to the configured poll timeout for
    /// activity; without it the call only handles what is ready now.
    pub fn serve(&self, block: bool) -> Result<()> {
        if self.is_cancelled() {
            return Err(NetError::Closed);
        }

        let (mut entries, ids) = self.poll_set();
        let timeout = if block {
            self.config.poll_timeout
        } else {
            Duration::ZERO
        };
        poll_fds(&mut entries, Some(timeout))?;

        if entries[1].readable() {
            self.drain_wake();
        }

        let mut events = Vec::new();
        if entries[0].readable() {
            self.accept_pending(&mut events);
        }

        {
            let mut clients = lock(&self.clients);
            for (entry, id) in entries[2..].iter().zip(&ids) {
                let Some(ctx) = clients.get_mut(id) else {
                    continue;
                };
                let mut alive = !ctx.overflowed;
                if alive && entry.readable() {
                    alive = self.read_client(*id, ctx, &mut events);
                }
                if alive && entry.writable() {
                    alive = write_one(*id, ctx);
                }
                if !alive {
                    if let Some(ctx) = clients.remove(id) {
                        let _ = ctx.stream.shutdown(Shutdown::Both);
                    }
                    debug!(client = %id, "client disconnected");
                    events.push(Event::Disconnected(*id));
                }
            }
        }

        self.dispatch(events);
        Ok(())
    }

    /// Stop serving and drop every client. Wakes a blocked `serve`.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped: Vec<ClientId> = {
            let mut clients = lock(&self.clients);
            clients
                .drain()
                .map(|(id, ctx)| {
                    let _ = ctx.stream.shutdown(Shutdown::Both);
                    id
                })
                .collect()
        };
        self.wake();
        info!(clients = dropped.len(), "network channel cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn client_count(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut infos: Vec<ClientInfo> = lock(&self.clients)
            .iter()
            .map(|(id, ctx)| ClientInfo {
                id: *id,
                peer: ctx.peer,
                user_agent: ctx.user_agent.clone(),
                pending_frames: ctx.write_queue.len(),
            })
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// First client whose user agent contains `fragment`.
    pub fn find_client_by_user_agent(&self, fragment: &str) -> Option<ClientId> {
        self.clients()
            .into_iter()
            .find(|info| {
                info.user_agent
                    .as_deref()
                    .is_some_and(|ua| ua.contains(fragment))
            })
            .map(|info| info.id)
    }

    fn encode(&self, payload: &[u8], binary: bool) -> Result<Bytes> {
        let opcode = if binary { net::BINARY } else { net::TEXT };
        if payload.len() > self.config.frame.max_payload_size {
            return Err(NetError::Frame(hostbus_frame::FrameError::Malformed {
                length: payload.len(),
                max: self.config.frame.max_payload_size,
            }));
        }
        let mut buf = BytesMut::new();
        encode_frame(opcode, payload, self.config.frame.byte_order, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Listener, wake pipe, then one entry per client (ids in the same order).
    fn poll_set(&self) -> (Vec<PollEntry>, Vec<ClientId>) {
        let clients = lock(&self.clients);
        let mut entries = Vec::with_capacity(clients.len() + 2);
        let mut ids = Vec::with_capacity(clients.len());

        entries.push(PollEntry::new(self.listener.as_raw_fd(), Interest::Readable));
        entries.push(PollEntry::new(self.wake_reader.as_raw_fd(), Interest::Readable));
        for (id, ctx) in clients.iter() {
            let interest = if ctx.write_queue.is_empty() {
                Interest::Readable
            } else {
                Interest::Both
            };
            entries.push(PollEntry::new(ctx.stream.as_raw_fd(), interest));
            ids.push(*id);
        }
        (entries, ids)
    }

    fn accept_pending(&self, events: &mut Vec<Event>) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(%peer, error = %err, "dropping connection");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);
                    let id = ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
                    lock(&self.clients).insert(
                        id,
                        ClientContext {
                            stream,
                            peer,
                            read_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
                            write_queue: VecDeque::new(),
                            write_offset: 0,
                            user_agent: None,
                            overflowed: false,
                        },
                    );
                    info!(client = %id, %peer, "client connected");
                    events.push(Event::Connected(id));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    return;
                }
            }
        }
    }

    /// Read everything available and decode complete frames. Returns `false`
    /// if the client must be dropped.
    fn read_client(&self, id: ClientId, ctx: &mut ClientContext, events: &mut Vec<Event>) -> bool {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut open = true;
        loop {
            match ctx.stream.read(&mut chunk) {
                Ok(0) => {
                    open = false;
                    break;
                }
                Ok(n) => ctx.read_buf.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(client = %id, error = %err, "read failed");
                    open = false;
                    break;
                }
            }
        }

        loop {
            let frame = match decode_frame(
                &mut ctx.read_buf,
                self.config.frame.max_payload_size,
                self.config.frame.byte_order,
            ) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(err) => {
                    warn!(client = %id, error = %err, "protocol error, dropping client");
                    return false;
                }
            };

            match frame.opcode {
                net::HELLO => {
                    let agent = String::from_utf8_lossy(&frame.payload).into_owned();
                    debug!(client = %id, user_agent = %agent, "client hello");
                    ctx.user_agent = Some(agent);
                }
                net::TEXT => match String::from_utf8(frame.payload.to_vec()) {
                    Ok(text) => events.push(Event::Message(id, Message::Text(text))),
                    Err(_) => warn!(client = %id, "dropping non-UTF-8 text frame"),
                },
                net::BINARY => events.push(Event::Message(id, Message::Binary(frame.payload))),
                other => debug!(client = %id, opcode = other, "ignoring unknown opcode"),
            }
        }

        open
    }

    fn wake(&self) {
        match (&self.wake_writer).write(&[1]) {
            Ok(_) => {}
            // Full pipe: a wakeup is already pending.
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => debug!(error = %err, "wake failed"),
        }
    }

    fn drain_wake(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.wake_reader).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }

    fn dispatch(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let handler = lock(&self.handler).clone();
        let Some(handler) = handler else {
            return;
        };
        for event in events {
            match event {
                Event::Connected(id) => handler.on_connect(id),
                Event::Message(id, message) => handler.on_message(id, message),
                Event::Disconnected(id) => handler.on_disconnect(id),
            }
        }
    }
}

/// Issue exactly one write for the head of the queue. Returns `false` if the
/// client must be dropped.
fn write_one(id: ClientId, ctx: &mut ClientContext) -> bool {
    let Some(frame) = ctx.write_queue.front() else {
        return true;
    };
    match ctx.stream.write(&frame[ctx.write_offset..]) {
        Ok(0) => false,
        Ok(n) => {
            ctx.write_offset += n;
            if ctx.write_offset == frame.len() {
                ctx.write_queue.pop_front();
                ctx.write_offset = 0;
            }
            true
        }
        Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => true,
        Err(err) => {
            debug!(client = %id, error = %err, "write failed");
            false
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for NetworkChannel {
    fn drop(&mut self) {
        self.cancel();
    }
}
