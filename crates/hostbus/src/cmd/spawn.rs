use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hostbus_renderer::{ChildProcessRenderer, RendererEvent, RendererView, SupervisorConfig};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, parse_optional_duration, SpawnArgs};
use crate::exit::{renderer_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, OutputFormat};

const WAIT_SLICE: Duration = Duration::from_millis(20);

pub fn run(args: SpawnArgs, format: OutputFormat) -> CliResult<i32> {
    let handshake_timeout = parse_duration(&args.handshake_timeout)?;
    let duration = parse_optional_duration(args.duration.as_deref())?;
    let running = install_ctrlc_handler()?;

    let mut config = SupervisorConfig::new(&args.helper);
    config.extra_args = args.extra_args.clone();
    config.handshake_timeout = handshake_timeout;
    let renderer = ChildProcessRenderer::new(config);

    let disconnected = Arc::new(AtomicBool::new(false));
    {
        let disconnected = Arc::clone(&disconnected);
        renderer.set_event_callback(move |event| {
            if matches!(event, RendererEvent::Disconnected) {
                disconnected.store(true, Ordering::SeqCst);
            }
            print_event(&event, format);
        });
    }

    let pixel_ratio = renderer
        .start()
        .map_err(|err| renderer_error("renderer start failed", err))?;
    info!(pid = ?renderer.pid(), pixel_ratio, "renderer connected");

    renderer
        .navigate(&args.url)
        .map_err(|err| renderer_error("navigate failed", err))?;
    if let Some(script) = &args.script {
        renderer
            .run_script(script)
            .map_err(|err| renderer_error("run script failed", err))?;
    }

    let started = Instant::now();
    while running.load(Ordering::SeqCst) && !disconnected.load(Ordering::SeqCst) {
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        std::thread::sleep(WAIT_SLICE);
    }

    let lost = disconnected.load(Ordering::SeqCst);
    renderer.shutdown();
    Ok(if lost { FAILURE } else { SUCCESS })
}
