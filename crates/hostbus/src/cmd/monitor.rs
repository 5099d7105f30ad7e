use std::sync::atomic::Ordering;
use std::time::Duration;

use hostbus_bus::WireProtocol;
use hostbus_net::NetClient;
use hostbus_variant::Variant;
use tracing::warn;

use crate::cmd::{install_ctrlc_handler, MonitorArgs};
use crate::exit::{net_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const RECV_SLICE: Duration = Duration::from_millis(100);

pub fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let running = install_ctrlc_handler()?;
    let mut client = NetClient::connect(args.addr, &args.user_agent)
        .map_err(|err| net_error("connect failed", err))?;
    let peer = args.addr.to_string();

    let mut printed = 0usize;
    while running.load(Ordering::SeqCst) {
        let Some(message) = client
            .recv(Some(RECV_SLICE))
            .map_err(|err| net_error("receive failed", err))?
        else {
            continue;
        };

        let values = match WireProtocol::decode(&message) {
            Ok(values) => values,
            Err(err) => {
                warn!(error = %err, "undecodable message");
                continue;
            }
        };

        if !wanted(&values, args.functions.as_deref()) {
            continue;
        }

        print_message(&values, &peer, format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            return Ok(SUCCESS);
        }
    }

    Ok(SUCCESS)
}

fn wanted(values: &[Variant], functions: Option<&[String]>) -> bool {
    let Some(functions) = functions else {
        return true;
    };
    values
        .first()
        .and_then(|head| head.as_str())
        .is_some_and(|name| functions.iter().any(|f| f == name))
}
