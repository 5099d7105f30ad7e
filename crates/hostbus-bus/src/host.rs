//! Built-in functions that connect a host's parameter/state model to the bus.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use hostbus_net::{local_url, public_url, ClientId, PortSelection, FIRST_PORT};
use hostbus_variant::Variant;
use tracing::{debug, info, warn};

use crate::bus::FunctionBus;
use crate::route::{Destination, Origin};

/// Reserved state key holding the listening port across restarts.
pub const PORT_STATE_KEY: &str = "_ws_port";

/// The host side of the bridge: the authoritative parameter and state owner.
///
/// Every mutating call is made from [`FunctionBus::idle`], never from a
/// transport thread. Queries may be made from any thread.
pub trait HostModel: Send + Sync {
    /// Apply a parameter change from a peer. The host is expected to report
    /// it back through exactly one [`HostBridge::parameter_changed`].
    fn set_parameter_value(&self, index: u32, value: f32);

    /// Begin (`true`) or end (`false`) a gesture on a parameter.
    fn edit_parameter(&self, _index: u32, _started: bool) {}

    /// Store a state entry. Not reported back.
    fn set_state(&self, _key: &str, _value: &str) {}

    fn send_note(&self, _channel: u8, _note: u8, _velocity: u8) {}

    fn sample_rate(&self) -> f64;

    fn is_standalone(&self) -> bool {
        false
    }

    /// Current view size in pixels.
    fn size(&self) -> (u32, u32);

    fn set_size(&self, _width: u32, _height: u32) {}

    fn is_resizable(&self) -> bool {
        false
    }

    fn set_keyboard_focus(&self, _focus: bool) {}
}

/// Static values reported by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Initial view width in CSS pixels.
    pub init_width_css: f64,
    /// Initial view height in CSS pixels.
    pub init_height_css: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            init_width_css: 640.0,
            init_height_css: 480.0,
        }
    }
}

#[derive(Default)]
struct Mirror {
    parameters: BTreeMap<u32, f32>,
    states: BTreeMap<String, String>,
    /// Parameters whose next change notification is swallowed.
    suppressed: HashSet<u32>,
    persisted_port: Option<u16>,
    port: Option<u16>,
}

/// Registers the built-in functions on a bus and mirrors host changes out.
///
/// Keeps the last known parameter values and state entries so newly joined
/// network clients can be brought up to date.
pub struct HostBridge {
    bus: Arc<FunctionBus>,
    model: Arc<dyn HostModel>,
    config: BridgeConfig,
    mirror: Mutex<Mirror>,
}

impl HostBridge {
    /// Create the bridge and register its functions on `bus`.
    ///
    /// The bus only holds the bridge weakly; keep the returned `Arc` alive
    /// for as long as the functions should answer.
    pub fn install(
        bus: Arc<FunctionBus>,
        model: Arc<dyn HostModel>,
        config: BridgeConfig,
    ) -> Arc<Self> {
        let bridge = Arc::new(Self {
            bus,
            model,
            config,
            mirror: Mutex::new(Mirror::default()),
        });
        bridge.register_builtins();

        let weak = Arc::downgrade(&bridge);
        bridge.bus.set_connect_hook(move |client| {
            let Some(bridge) = weak.upgrade() else {
                return;
            };
            let weak = Arc::downgrade(&bridge);
            bridge.bus.queue(move || {
                if let Some(bridge) = weak.upgrade() {
                    bridge.replay(client);
                }
            });
        });
        bridge
    }

    pub fn bus(&self) -> &Arc<FunctionBus> {
        &self.bus
    }

    /// The host reports a parameter value.
    ///
    /// Broadcast to every peer unless this notification is the echo of a
    /// peer's own `setParameterValue`, in which case it is swallowed once.
    pub fn parameter_changed(&self, index: u32, value: f32) {
        let echo = {
            let mut mirror = self.mirror();
            mirror.parameters.insert(index, value);
            mirror.suppressed.remove(&index)
        };
        if echo {
            debug!(index, value, "suppressed parameter echo");
            return;
        }
        self.bus.emit(
            "parameterChanged",
            &[Variant::from(index), Variant::from(value)],
            Destination::All,
            None,
        );
    }

    /// The host reports a state entry. The reserved port key is consumed
    /// here and never forwarded.
    pub fn state_changed(&self, key: &str, value: &str) {
        if key == PORT_STATE_KEY {
            let port = value.trim().parse::<u16>().ok().filter(|port| *port != 0);
            debug!(port = ?port, "persisted port restored");
            self.mirror().persisted_port = port;
            return;
        }
        self.mirror()
            .states
            .insert(key.to_string(), value.to_string());
        self.bus.emit(
            "stateChanged",
            &[Variant::from(key), Variant::from(value)],
            Destination::All,
            None,
        );
    }

    /// The host view was resized.
    pub fn size_changed(&self, width: u32, height: u32) {
        self.bus.emit(
            "sizeChanged",
            &[Variant::from(width), Variant::from(height)],
            Destination::All,
            None,
        );
    }

    /// Port to listen on: the persisted one if it is still free, otherwise a
    /// probe. [`network_started`](Self::network_started) re-persists whatever
    /// port was actually bound.
    pub fn port_selection(&self) -> PortSelection {
        match self.mirror().persisted_port {
            Some(port) => PortSelection::Preferred {
                port,
                fallback: FIRST_PORT,
            },
            None => PortSelection::Probe { first: FIRST_PORT },
        }
    }

    /// Record the port the network channel ended up on and persist it if
    /// it changed.
    pub fn network_started(&self, port: u16) {
        let changed = {
            let mut mirror = self.mirror();
            mirror.port = Some(port);
            let changed = mirror.persisted_port != Some(port);
            mirror.persisted_port = Some(port);
            changed
        };
        info!(url = %local_url(port), "network bus up");
        if changed {
            self.model.set_state(PORT_STATE_KEY, &port.to_string());
        }
    }

    pub fn port(&self) -> Option<u16> {
        self.mirror().port
    }

    /// Best-effort address for other machines, falling back to loopback.
    pub fn public_url(&self) -> Option<String> {
        self.port()
            .map(|port| public_url(port).unwrap_or_else(|| local_url(port)))
    }

    pub fn parameter(&self, index: u32) -> Option<f32> {
        self.mirror().parameters.get(&index).copied()
    }

    pub fn state(&self, key: &str) -> Option<String> {
        self.mirror().states.get(key).cloned()
    }

    fn mirror(&self) -> MutexGuard<'_, Mirror> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send every known parameter and state entry to one client.
    fn replay(&self, client: ClientId) {
        let (parameters, states) = {
            let mirror = self.mirror();
            (mirror.parameters.clone(), mirror.states.clone())
        };
        debug!(
            %client,
            parameters = parameters.len(),
            states = states.len(),
            "replaying host state"
        );
        let to = Destination::Client(client);
        for (index, value) in parameters {
            self.bus.emit(
                "parameterChanged",
                &[Variant::from(index), Variant::from(value)],
                to,
                None,
            );
        }
        for (key, value) in states {
            self.bus
                .emit("stateChanged", &[Variant::from(key), Variant::from(value)], to, None);
        }
    }

    fn reply(&self, name: &str, value: impl Into<Variant>, origin: Origin) {
        self.bus.emit(name, &[value.into()], origin.reply_to(), None);
    }

    /// Register `name` with a handler that receives the live bridge.
    fn handle(
        self: &Arc<Self>,
        name: &str,
        min_args: usize,
        f: impl Fn(&Arc<HostBridge>, &[Variant], Origin) + Send + Sync + 'static,
    ) {
        let weak = Arc::downgrade(self);
        self.bus.set_handler(name, min_args, move |args, origin| {
            if let Some(bridge) = weak.upgrade() {
                f(&bridge, args, origin);
            }
        });
    }

    /// Run `f` against the model on the next idle.
    fn defer(self: &Arc<Self>, f: impl FnOnce(&HostBridge) + Send + 'static) {
        let weak: Weak<HostBridge> = Arc::downgrade(self);
        self.bus.queue(move || {
            if let Some(bridge) = weak.upgrade() {
                f(&bridge);
            }
        });
    }

    fn register_builtins(self: &Arc<Self>) {
        self.handle("getInitWidthCSS", 0, |b, _, origin| {
            b.reply("getInitWidthCSS", b.config.init_width_css, origin);
        });
        self.handle("getInitHeightCSS", 0, |b, _, origin| {
            b.reply("getInitHeightCSS", b.config.init_height_css, origin);
        });
        self.handle("getSampleRate", 0, |b, _, origin| {
            b.reply("getSampleRate", b.model.sample_rate(), origin);
        });
        self.handle("isStandalone", 0, |b, _, origin| {
            b.reply("isStandalone", b.model.is_standalone(), origin);
        });
        self.handle("getWidth", 0, |b, _, origin| {
            b.reply("getWidth", b.model.size().0, origin);
        });
        self.handle("getHeight", 0, |b, _, origin| {
            b.reply("getHeight", b.model.size().1, origin);
        });
        self.handle("isResizable", 0, |b, _, origin| {
            b.reply("isResizable", b.model.is_resizable(), origin);
        });
        self.handle("getPublicUrl", 0, |b, _, origin| {
            b.reply("getPublicUrl", b.public_url(), origin);
        });
        self.handle("ping", 0, |b, _, origin| {
            b.bus.emit("pong", &[], origin.reply_to(), None);
        });

        self.handle("sendNote", 3, |b, args, _| {
            let (Some(channel), Some(note), Some(velocity)) =
                (byte_arg(args, 0), byte_arg(args, 1), byte_arg(args, 2))
            else {
                warn!("sendNote: expected three numbers");
                return;
            };
            b.defer(move |b| b.model.send_note(channel, note, velocity));
        });

        self.handle("editParameter", 2, |b, args, _| {
            let Some(index) = index_arg(args, 0) else {
                warn!("editParameter: bad index");
                return;
            };
            let started = bool_arg(args, 1);
            b.defer(move |b| b.model.edit_parameter(index, started));
        });

        self.handle("setParameterValue", 2, |b, args, origin| {
            let (Some(index), Some(value)) = (index_arg(args, 0), number_arg(args, 1)) else {
                warn!(%origin, "setParameterValue: expected index and value");
                return;
            };
            let narrowed = value as f32;
            b.defer(move |b| {
                {
                    let mut mirror = b.mirror();
                    mirror.parameters.insert(index, narrowed);
                    mirror.suppressed.insert(index);
                }
                b.model.set_parameter_value(index, narrowed);
            });
            // Peers see the value exactly as the caller sent it.
            b.bus
                .emit("parameterChanged", &args[..2], Destination::All, Some(origin));
        });

        self.handle("setState", 2, |b, args, origin| {
            let (Some(key), Some(value)) = (string_arg(args, 0), string_arg(args, 1)) else {
                warn!(%origin, "setState: expected key and value strings");
                return;
            };
            let (key, value) = (key.to_string(), value.to_string());
            b.bus.emit(
                "stateChanged",
                &[Variant::from(key.as_str()), Variant::from(value.as_str())],
                Destination::All,
                Some(origin),
            );
            b.defer(move |b| {
                b.mirror().states.insert(key.clone(), value.clone());
                b.model.set_state(&key, &value);
            });
        });

        self.handle("setWidth", 1, |b, args, _| {
            if let Some(width) = index_arg(args, 0) {
                b.defer(move |b| b.model.set_size(width, b.model.size().1));
            }
        });
        self.handle("setHeight", 1, |b, args, _| {
            if let Some(height) = index_arg(args, 0) {
                b.defer(move |b| b.model.set_size(b.model.size().0, height));
            }
        });
        self.handle("setSize", 2, |b, args, _| {
            if let (Some(width), Some(height)) = (index_arg(args, 0), index_arg(args, 1)) {
                b.defer(move |b| b.model.set_size(width, height));
            }
        });
        self.handle("setKeyboardFocus", 1, |b, args, _| {
            let focus = bool_arg(args, 0);
            b.defer(move |b| b.model.set_keyboard_focus(focus));
        });

        self.handle("ready", 0, |b, _, origin| match origin {
            Origin::Local => b.bus.mark_local_ready(),
            Origin::Client(client) => debug!(%client, "ignoring ready from network client"),
        });

        self.handle("broadcast", 1, |b, args, origin| {
            b.bus
                .emit("messageReceived", args, Destination::All, Some(origin));
        });
    }
}

fn number_arg(args: &[Variant], i: usize) -> Option<f64> {
    args.get(i).and_then(Variant::as_f64).filter(|n| n.is_finite())
}

fn index_arg(args: &[Variant], i: usize) -> Option<u32> {
    number_arg(args, i)
        .filter(|n| *n >= 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n as u32)
}

fn byte_arg(args: &[Variant], i: usize) -> Option<u8> {
    number_arg(args, i)
        .filter(|n| *n >= 0.0 && *n <= 255.0)
        .map(|n| n as u8)
}

fn string_arg(args: &[Variant], i: usize) -> Option<&str> {
    args.get(i).and_then(Variant::as_str)
}

/// Booleans arrive as `true`/`false` from JSON peers and sometimes as 0/1.
fn bool_arg(args: &[Variant], i: usize) -> bool {
    match args.get(i) {
        Some(Variant::Bool(b)) => *b,
        Some(Variant::Number(n)) => *n != 0.0,
        _ => false,
    }
}
