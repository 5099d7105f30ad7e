//! Named-function dispatch and routed emission.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use hostbus_net::ClientId;
use hostbus_variant::Variant;
use tracing::{debug, trace, warn};

use crate::queue::UiQueue;
use crate::route::{Destination, Origin};
use crate::sink::{LocalSink, RemoteSink};

/// Handler callback: the arguments after the function name, plus the origin.
pub type Handler = Arc<dyn Fn(&[Variant], Origin) + Send + Sync>;

type ClientHook = Arc<dyn Fn(ClientId) + Send + Sync>;

/// Messages held for a renderer that has not said "ready" yet.
pub const DEFAULT_PENDING_LIMIT: usize = 4096;

/// Connection state of the embedded local renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Outbound messages are buffered until the renderer says "ready".
    AwaitingReady,
    /// Outbound messages are posted immediately.
    Ready,
    /// The renderer is gone. Outbound messages and local dispatch are dropped.
    Closed,
}

struct Registration {
    min_args: usize,
    handler: Handler,
}

struct LocalLink {
    state: LinkState,
    sink: Option<Arc<dyn LocalSink>>,
    pending: VecDeque<Vec<Variant>>,
    limit: usize,
    /// Messages refused since the buffer last filled up.
    dropped: usize,
}

impl LocalLink {
    fn post(&mut self, message: Vec<Variant>) {
        match self.state {
            LinkState::Closed => trace!("local renderer closed, dropping message"),
            LinkState::AwaitingReady => self.buffer(message),
            LinkState::Ready => match self.sink.clone() {
                Some(sink) => {
                    if let Err(err) = sink.post(&message) {
                        warn!(error = %err, "local post failed, closing link");
                        self.close();
                    }
                }
                None => self.buffer(message),
            },
        }
    }

    fn buffer(&mut self, message: Vec<Variant>) {
        if self.pending.len() < self.limit {
            self.pending.push_back(message);
            return;
        }
        self.dropped += 1;
        if self.dropped == 1 {
            warn!(limit = self.limit, "local startup buffer full, dropping newer messages");
        }
    }

    fn flush(&mut self) {
        let Some(sink) = self.sink.clone() else {
            return;
        };
        if self.dropped > 0 {
            warn!(dropped = self.dropped, "messages lost while the renderer was not ready");
            self.dropped = 0;
        }
        while let Some(message) = self.pending.pop_front() {
            if let Err(err) = sink.post(&message) {
                warn!(error = %err, "local flush failed, closing link");
                self.close();
                return;
            }
        }
    }

    fn close(&mut self) {
        self.state = LinkState::Closed;
        self.pending.clear();
        self.dropped = 0;
    }
}

/// Transport-agnostic RPC/event bus.
///
/// Inbound Variant Arrays are routed by their first element to a registered
/// [`Handler`]. Outbound events go to the local renderer, to network clients,
/// or both. Nothing here returns an error: unknown functions, short argument
/// lists and transport failures are logged and dropped.
pub struct FunctionBus {
    handlers: RwLock<HashMap<String, Registration>>,
    local: Mutex<LocalLink>,
    remote: RwLock<Option<Arc<dyn RemoteSink>>>,
    on_connect: RwLock<Option<ClientHook>>,
    on_disconnect: RwLock<Option<ClientHook>>,
    queue: UiQueue,
}

impl FunctionBus {
    /// A bus whose local renderer starts in [`LinkState::AwaitingReady`].
    pub fn new() -> Self {
        Self::with_local_state(LinkState::AwaitingReady, DEFAULT_PENDING_LIMIT)
    }

    /// Like [`new`](Self::new), holding at most `limit` messages before the
    /// renderer is ready. Later ones are dropped with a warning.
    pub fn with_pending_limit(limit: usize) -> Self {
        Self::with_local_state(LinkState::AwaitingReady, limit)
    }

    /// A bus with no embedded renderer. Local emits are dropped.
    pub fn network_only() -> Self {
        Self::with_local_state(LinkState::Closed, 0)
    }

    fn with_local_state(state: LinkState, limit: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            local: Mutex::new(LocalLink {
                state,
                sink: None,
                pending: VecDeque::new(),
                limit,
                dropped: 0,
            }),
            remote: RwLock::new(None),
            on_connect: RwLock::new(None),
            on_disconnect: RwLock::new(None),
            queue: UiQueue::new(),
        }
    }

    /// Register or replace the handler for `name`.
    ///
    /// Calls carrying fewer than `min_args` arguments never reach `handler`.
    pub fn set_handler(
        &self,
        name: impl Into<String>,
        min_args: usize,
        handler: impl Fn(&[Variant], Origin) + Send + Sync + 'static,
    ) {
        let registration = Registration {
            min_args,
            handler: Arc::new(handler),
        };
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), registration);
    }

    pub fn remove_handler(&self, name: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Route one inbound message to its handler.
    ///
    /// The handler runs on the calling thread, outside every bus lock, so it
    /// may emit or register handlers itself.
    pub fn dispatch(&self, message: &[Variant], origin: Origin) {
        if origin == Origin::Local && self.local_state() == LinkState::Closed {
            debug!("local renderer closed, dropping inbound call");
            return;
        }

        let Some((head, args)) = message.split_first() else {
            warn!(%origin, "empty message, dropping");
            return;
        };
        let Some(name) = head.as_str() else {
            warn!(%origin, kind = head.kind(), "function name is not a string, dropping");
            return;
        };

        let (min_args, handler) = {
            let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
            match handlers.get(name) {
                Some(registration) => (registration.min_args, Arc::clone(&registration.handler)),
                None => {
                    warn!(function = name, %origin, "unknown function, dropping");
                    return;
                }
            }
        };

        if args.len() < min_args {
            warn!(
                function = name,
                %origin,
                expected = min_args,
                got = args.len(),
                "too few arguments, dropping"
            );
            return;
        }

        trace!(function = name, %origin, args = args.len(), "dispatch");
        handler(args, origin);
    }

    /// Send `[name, args...]` to `destination`, skipping `exclude`.
    pub fn emit(
        &self,
        name: &str,
        args: &[Variant],
        destination: Destination,
        exclude: Option<Origin>,
    ) {
        let mut message = Vec::with_capacity(args.len() + 1);
        message.push(Variant::from(name));
        message.extend_from_slice(args);
        self.emit_message(message, destination, exclude);
    }

    /// Like [`emit`](Self::emit) for a message that already carries its name.
    pub fn emit_message(
        &self,
        message: Vec<Variant>,
        destination: Destination,
        exclude: Option<Origin>,
    ) {
        let to_local = matches!(destination, Destination::All | Destination::Local)
            && exclude != Some(Origin::Local);

        match destination {
            Destination::All => {
                self.with_remote(|remote| {
                    let skip = exclude.and_then(Origin::client);
                    if let Err(err) = remote.broadcast(&message, skip) {
                        warn!(error = %err, "broadcast failed");
                    }
                });
            }
            Destination::Client(id) => {
                if exclude == Some(Origin::Client(id)) {
                    return;
                }
                self.with_remote(|remote| {
                    if let Err(err) = remote.send(id, &message) {
                        debug!(client = %id, error = %err, "send failed");
                    }
                });
            }
            Destination::Local => {}
        }

        if to_local {
            self.local.lock().unwrap_or_else(PoisonError::into_inner).post(message);
        }
    }

    fn with_remote(&self, f: impl FnOnce(&dyn RemoteSink)) {
        let remote = self
            .remote
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match remote {
            Some(remote) => f(remote.as_ref()),
            None => trace!("no network sink attached"),
        }
    }

    /// Attach the embedded renderer. Buffered messages stay buffered until
    /// [`mark_local_ready`](Self::mark_local_ready).
    pub fn attach_local(&self, sink: Arc<dyn LocalSink>) {
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        local.sink = Some(sink);
        if local.state == LinkState::Ready {
            local.flush();
        }
    }

    /// The renderer signalled "ready": flush the buffer in order and post
    /// directly from now on.
    pub fn mark_local_ready(&self) {
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        match local.state {
            LinkState::AwaitingReady => {
                debug!(buffered = local.pending.len(), "local renderer ready");
                local.state = LinkState::Ready;
                local.flush();
            }
            LinkState::Ready => trace!("duplicate ready signal"),
            LinkState::Closed => debug!("ready signal after close ignored"),
        }
    }

    /// Drop the embedded renderer. Pending and future local messages are
    /// discarded.
    pub fn close_local(&self) {
        let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
        if local.state != LinkState::Closed {
            debug!(dropped = local.pending.len(), "local renderer link closed");
        }
        local.close();
        local.sink = None;
    }

    pub fn local_state(&self) -> LinkState {
        self.local.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn pending_local(&self) -> usize {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }

    pub fn attach_remote(&self, sink: Arc<dyn RemoteSink>) {
        *self.remote.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    pub fn detach_remote(&self) {
        *self.remote.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Called by the network binding when a client joins.
    pub fn client_connected(&self, client: ClientId) {
        debug!(%client, "client joined bus");
        let hook = self
            .on_connect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(client);
        }
    }

    /// Called by the network binding when a client leaves.
    pub fn client_disconnected(&self, client: ClientId) {
        debug!(%client, "client left bus");
        let hook = self
            .on_disconnect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(client);
        }
    }

    pub fn set_connect_hook(&self, hook: impl Fn(ClientId) + Send + Sync + 'static) {
        *self.on_connect.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn set_disconnect_hook(&self, hook: impl Fn(ClientId) + Send + Sync + 'static) {
        *self.on_disconnect.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Defer `block` to the next [`idle`](Self::idle). Never blocks.
    pub fn queue(&self, block: impl FnOnce() + Send + 'static) {
        self.queue.push(block);
    }

    /// Run every queued block on the calling thread. Returns how many ran.
    pub fn idle(&self) -> usize {
        self.queue.pump()
    }

    /// A cloneable handle onto the deferred-block queue.
    pub fn ui_queue(&self) -> &UiQueue {
        &self.queue
    }
}

impl Default for FunctionBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FunctionBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("FunctionBus")
            .field("handlers", &handlers)
            .field("local", &self.local_state())
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::test_support::{RecordingLocal, RecordingRemote, Sent};

    fn s(text: &str) -> Variant {
        Variant::from(text)
    }

    #[test]
    fn dispatch_invokes_handler_with_arguments() {
        let bus = FunctionBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            bus.set_handler("add", 2, move |args, origin| {
                seen.lock().expect("lock").push((args.to_vec(), origin));
            });
        }

        bus.dispatch(&[s("add"), Variant::Number(1.0), Variant::Number(2.0)], Origin::Local);

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, vec![Variant::Number(1.0), Variant::Number(2.0)]);
        assert_eq!(seen[0].1, Origin::Local);
    }

    #[test]
    fn too_few_arguments_never_reach_handler() {
        let bus = FunctionBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            bus.set_handler("foo", 2, move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.dispatch(&[s("foo")], Origin::Local);
        bus.dispatch(&[s("foo"), Variant::Number(1.0)], Origin::Local);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        bus.dispatch(&[s("foo"), Variant::Number(1.0), Variant::Number(2.0), Variant::Number(3.0)], Origin::Local);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unknown_and_malformed_calls_are_dropped() {
        let bus = FunctionBus::new();
        bus.dispatch(&[], Origin::Local);
        bus.dispatch(&[s("missing")], Origin::Local);
        bus.dispatch(&[Variant::Number(3.0)], Origin::Local);
        bus.dispatch(&[Variant::Null, s("x")], Origin::Local);
    }

    #[test]
    fn set_handler_replaces_previous() {
        let bus = FunctionBus::new();
        let which = Arc::new(AtomicUsize::new(0));
        for id in 1..=2 {
            let which = Arc::clone(&which);
            bus.set_handler("f", 0, move |_, _| which.store(id, Ordering::SeqCst));
        }

        bus.dispatch(&[s("f")], Origin::Local);
        assert_eq!(which.load(Ordering::SeqCst), 2);
        assert!(bus.remove_handler("f"));
        assert!(!bus.has_handler("f"));
    }

    #[test]
    fn handler_may_reenter_bus() {
        let bus = Arc::new(FunctionBus::new());
        let remote = Arc::new(RecordingRemote::default());
        bus.attach_remote(remote.clone());
        {
            let weak = Arc::downgrade(&bus);
            bus.set_handler("ping", 0, move |_, origin| {
                if let Some(bus) = weak.upgrade() {
                    bus.emit("pong", &[], origin.reply_to(), None);
                }
            });
        }

        let client = ClientId::new(7);
        bus.dispatch(&[s("ping")], Origin::Client(client));

        assert_eq!(remote.sent(), vec![Sent::To(client, vec![s("pong")])]);
    }

    #[test]
    fn local_emits_buffer_until_ready_in_order() {
        let bus = FunctionBus::new();
        let local = Arc::new(RecordingLocal::default());
        bus.attach_local(local.clone());

        bus.emit("x", &[], Destination::Local, None);
        bus.emit("y", &[Variant::Number(1.0)], Destination::All, None);
        bus.emit("z", &[], Destination::Local, None);
        assert!(local.posted().is_empty());
        assert_eq!(bus.pending_local(), 3);

        bus.mark_local_ready();
        assert_eq!(
            local.posted(),
            vec![vec![s("x")], vec![s("y"), Variant::Number(1.0)], vec![s("z")]]
        );
        assert_eq!(bus.pending_local(), 0);

        bus.emit("after", &[], Destination::Local, None);
        assert_eq!(local.posted().len(), 4);
        assert_eq!(local.posted()[3], vec![s("after")]);
    }

    #[test]
    fn startup_buffer_keeps_oldest_messages_up_to_its_limit() {
        let bus = FunctionBus::with_pending_limit(2);
        let local = Arc::new(RecordingLocal::default());
        bus.attach_local(local.clone());

        for name in ["a", "b", "c", "d"] {
            bus.emit(name, &[], Destination::Local, None);
        }
        assert_eq!(bus.pending_local(), 2);

        bus.mark_local_ready();
        assert_eq!(local.posted(), vec![vec![s("a")], vec![s("b")]]);

        bus.emit("e", &[], Destination::Local, None);
        assert_eq!(local.posted().len(), 3);
    }

    #[test]
    fn ready_before_attach_flushes_on_attach() {
        let bus = FunctionBus::new();
        bus.emit("early", &[], Destination::Local, None);
        bus.mark_local_ready();

        let local = Arc::new(RecordingLocal::default());
        bus.attach_local(local.clone());
        assert_eq!(local.posted(), vec![vec![s("early")]]);
    }

    #[test]
    fn closed_link_drops_emit_and_local_dispatch() {
        let bus = FunctionBus::new();
        let local = Arc::new(RecordingLocal::default());
        bus.attach_local(local.clone());
        bus.emit("lost", &[], Destination::Local, None);

        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            bus.set_handler("f", 0, move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.close_local();
        assert_eq!(bus.local_state(), LinkState::Closed);
        assert_eq!(bus.pending_local(), 0);

        bus.mark_local_ready();
        bus.emit("also-lost", &[], Destination::Local, None);
        bus.dispatch(&[s("f")], Origin::Local);
        bus.dispatch(&[s("f")], Origin::Client(ClientId::new(1)));

        assert!(local.posted().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_post_closes_link() {
        let bus = FunctionBus::new();
        let local = Arc::new(RecordingLocal::failing());
        bus.attach_local(local.clone());
        bus.mark_local_ready();

        bus.emit("x", &[], Destination::Local, None);
        assert_eq!(bus.local_state(), LinkState::Closed);
        bus.emit("y", &[], Destination::Local, None);
        assert_eq!(local.attempts(), 1);
    }

    #[test]
    fn routing_honors_destination_and_exclude() {
        let bus = FunctionBus::new();
        let local = Arc::new(RecordingLocal::default());
        let remote = Arc::new(RecordingRemote::default());
        bus.attach_local(local.clone());
        bus.attach_remote(remote.clone());
        bus.mark_local_ready();

        let a = ClientId::new(1);
        let b = ClientId::new(2);

        bus.emit("all", &[], Destination::All, None);
        bus.emit("not-a", &[], Destination::All, Some(Origin::Client(a)));
        bus.emit("not-local", &[], Destination::All, Some(Origin::Local));
        bus.emit("only-b", &[], Destination::Client(b), None);
        bus.emit("skipped", &[], Destination::Client(b), Some(Origin::Client(b)));
        bus.emit("local", &[], Destination::Local, None);

        assert_eq!(
            local.posted(),
            vec![vec![s("all")], vec![s("not-a")], vec![s("local")]]
        );
        assert_eq!(
            remote.sent(),
            vec![
                Sent::Broadcast(None, vec![s("all")]),
                Sent::Broadcast(Some(a), vec![s("not-a")]),
                Sent::Broadcast(None, vec![s("not-local")]),
                Sent::To(b, vec![s("only-b")]),
            ]
        );
    }

    #[test]
    fn network_only_bus_drops_local_emits() {
        let bus = FunctionBus::network_only();
        let remote = Arc::new(RecordingRemote::default());
        bus.attach_remote(remote.clone());

        bus.emit("x", &[], Destination::All, None);
        assert_eq!(bus.pending_local(), 0);
        assert_eq!(remote.sent().len(), 1);
    }

    #[test]
    fn queued_blocks_wait_for_idle() {
        let bus = FunctionBus::new();
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let ran = Arc::clone(&ran);
            bus.queue(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(bus.idle(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(bus.idle(), 0);
    }

    #[test]
    fn client_hooks_fire() {
        let bus = FunctionBus::new();
        let joined = Arc::new(Mutex::new(Vec::new()));
        {
            let joined = Arc::clone(&joined);
            bus.set_connect_hook(move |id| joined.lock().expect("lock").push(id));
        }
        bus.client_connected(ClientId::new(3));
        bus.client_disconnected(ClientId::new(3));
        assert_eq!(*joined.lock().expect("lock"), vec![ClientId::new(3)]);
    }
}
