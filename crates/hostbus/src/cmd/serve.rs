use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use hostbus_bus::{bind_network, bind_renderer, BridgeConfig, FunctionBus, HostBridge, HostModel};
use hostbus_net::{
    local_url, public_url, NetworkChannel, NetworkConfig, PortSelection, ServiceThread,
};
use hostbus_renderer::{ChildProcessRenderer, RendererView, SupervisorConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, parse_optional_duration, ServeArgs};
use crate::exit::{io_error, net_error, renderer_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_record, OutputFormat};

const IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// In-memory host: a bank of parameters plus a string state store, optionally
/// backed by a JSON file.
struct DemoHost {
    bridge: OnceLock<Weak<HostBridge>>,
    parameters: Mutex<Vec<f32>>,
    states: Mutex<BTreeMap<String, String>>,
    state_file: Option<PathBuf>,
    size: Mutex<(u32, u32)>,
}

impl DemoHost {
    fn new(parameter_count: u32, state_file: Option<PathBuf>) -> CliResult<Self> {
        let states = match &state_file {
            Some(path) if path.exists() => load_states(path)?,
            _ => BTreeMap::new(),
        };
        Ok(Self {
            bridge: OnceLock::new(),
            parameters: Mutex::new(vec![0.0; parameter_count as usize]),
            states: Mutex::new(states),
            state_file,
            size: Mutex::new((640, 480)),
        })
    }

    fn bridge(&self) -> Option<Arc<HostBridge>> {
        self.bridge.get().and_then(Weak::upgrade)
    }

    /// Report every stored value to the bridge, as a host does at startup.
    fn announce(&self, bridge: &HostBridge) {
        let parameters = self.parameters.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for (index, value) in parameters.into_iter().enumerate() {
            bridge.parameter_changed(index as u32, value);
        }
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for (key, value) in states {
            bridge.state_changed(&key, &value);
        }
    }

    fn save_states(&self) {
        let Some(path) = &self.state_file else {
            return;
        };
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let result = serde_json::to_string_pretty(&states)
            .map_err(std::io::Error::other)
            .and_then(|text| fs::write(path, text));
        if let Err(err) = result {
            warn!(path = %path.display(), error = %err, "failed to save host state");
        }
    }
}

impl HostModel for DemoHost {
    fn set_parameter_value(&self, index: u32, value: f32) {
        {
            let mut parameters = self.parameters.lock().unwrap_or_else(PoisonError::into_inner);
            match parameters.get_mut(index as usize) {
                Some(slot) => *slot = value,
                None => {
                    warn!(index, "no such parameter");
                    return;
                }
            }
        }
        debug!(index, value, "parameter set");
        if let Some(bridge) = self.bridge() {
            bridge.parameter_changed(index, value);
        }
    }

    fn edit_parameter(&self, index: u32, started: bool) {
        debug!(index, started, "parameter gesture");
    }

    fn set_state(&self, key: &str, value: &str) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        self.save_states();
    }

    fn send_note(&self, channel: u8, note: u8, velocity: u8) {
        info!(channel, note, velocity, "note");
    }

    fn sample_rate(&self) -> f64 {
        48_000.0
    }

    fn is_standalone(&self) -> bool {
        true
    }

    fn size(&self) -> (u32, u32) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_size(&self, width: u32, height: u32) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner) = (width, height);
        if let Some(bridge) = self.bridge() {
            bridge.size_changed(width, height);
        }
    }

    fn is_resizable(&self) -> bool {
        true
    }
}

fn load_states(path: &PathBuf) -> CliResult<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    serde_json::from_str(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("{} is not a JSON object of strings: {err}", path.display()),
        )
    })
}

#[derive(Serialize)]
struct ListeningOutput {
    event: &'static str,
    port: u16,
    local_url: String,
    public_url: Option<String>,
}

pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    let duration = parse_optional_duration(args.duration.as_deref())?;
    let running = install_ctrlc_handler()?;

    let host = Arc::new(DemoHost::new(args.parameters, args.state_file.clone())?);
    let bus = Arc::new(if args.renderer.is_some() {
        FunctionBus::new()
    } else {
        FunctionBus::network_only()
    });
    let bridge = HostBridge::install(Arc::clone(&bus), host.clone(), BridgeConfig::default());
    let _ = host.bridge.set(Arc::downgrade(&bridge));
    host.announce(&bridge);

    let port = match (args.port, args.probe_from) {
        (Some(port), _) => PortSelection::Fixed(port),
        (None, Some(first)) => PortSelection::Probe { first },
        (None, None) => bridge.port_selection(),
    };
    let config = NetworkConfig {
        bind_address: args.bind,
        port,
        ..NetworkConfig::default()
    };
    let channel = Arc::new(NetworkChannel::listen(config).map_err(|err| net_error("listen failed", err))?);
    bind_network(&bus, &channel, args.protocol.into());
    bridge.network_started(channel.port());

    print_record(
        &ListeningOutput {
            event: "listening",
            port: channel.port(),
            local_url: local_url(channel.port()),
            public_url: public_url(channel.port()),
        },
        format,
    );

    let service =
        ServiceThread::spawn(Arc::clone(&channel)).map_err(|err| net_error("serve failed", err))?;

    let renderer = match &args.renderer {
        Some(path) => {
            let renderer = Arc::new(ChildProcessRenderer::new(SupervisorConfig::new(path)));
            bind_renderer(&bus, &renderer);
            renderer
                .start()
                .map_err(|err| renderer_error("renderer start failed", err))?;
            let url = args
                .url
                .clone()
                .unwrap_or_else(|| local_url(channel.port()));
            renderer
                .navigate(&url)
                .map_err(|err| renderer_error("navigate failed", err))?;
            Some(renderer)
        }
        None => None,
    };

    let started = Instant::now();
    while running.load(Ordering::SeqCst) {
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        bus.idle();
        std::thread::sleep(IDLE_INTERVAL);
    }

    info!("shutting down");
    if let Some(renderer) = renderer {
        renderer.shutdown();
    }
    service.stop();
    bus.idle();
    Ok(SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "hostbus-serve-{tag}-{}-{}.json",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ))
    }

    #[test]
    fn demo_host_ignores_out_of_range_parameters() {
        let host = DemoHost::new(2, None).expect("host should build");
        host.set_parameter_value(5, 1.0);
        host.set_parameter_value(1, 0.5);
        assert_eq!(*host.parameters.lock().expect("lock"), vec![0.0, 0.5]);
    }

    #[test]
    fn demo_host_persists_state_file() {
        let path = temp_path("persist");
        let host = DemoHost::new(0, Some(path.clone())).expect("host should build");
        host.set_state("_ws_port", "49170");

        let reloaded = DemoHost::new(0, Some(path.clone())).expect("host should reload");
        assert_eq!(
            reloaded.states.lock().expect("lock").get("_ws_port").map(String::as_str),
            Some("49170")
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn invalid_state_file_is_data_invalid() {
        let path = temp_path("invalid");
        fs::write(&path, "[1, 2]").expect("write should work");
        let err = DemoHost::new(0, Some(path.clone())).err().expect("load should fail");
        assert_eq!(err.code, DATA_INVALID);
        let _ = fs::remove_file(&path);
    }
}
