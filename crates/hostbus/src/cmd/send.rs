use std::time::{Duration, Instant};

use hostbus_bus::WireProtocol;
use hostbus_net::{Message, NetClient, NetError};
use hostbus_variant::{from_json, Variant};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{bus_error, net_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let mut client = NetClient::connect(args.addr, "hostbus-send")
        .map_err(|err| net_error("connect failed", err))?;

    let mut message = Vec::with_capacity(args.args.len() + 1);
    message.push(Variant::from(args.function.as_str()));
    message.extend(args.args.iter().map(|arg| parse_arg(arg)));

    let protocol = if args.binary {
        WireProtocol::Binary
    } else {
        WireProtocol::Json
    };
    let encoded = protocol
        .encode(&message)
        .map_err(|err| bus_error("encode failed", err))?;
    client
        .send(&encoded)
        .map_err(|err| net_error("send failed", err))?;

    if let Some(name) = &args.wait {
        let reply = wait_for(&mut client, name, wait_timeout)?;
        print_message(&reply, &args.addr.to_string(), format);
    }

    Ok(SUCCESS)
}

/// JSON scalars keep their type; anything else becomes a string.
fn parse_arg(arg: &str) -> Variant {
    serde_json::from_str::<serde_json::Value>(arg)
        .ok()
        .and_then(|value| from_json(&value).ok())
        .unwrap_or_else(|| Variant::from(arg))
}

trait MessageSource {
    fn next_message(&mut self, timeout: Duration) -> Result<Option<Message>, NetError>;
}

impl MessageSource for NetClient {
    fn next_message(&mut self, timeout: Duration) -> Result<Option<Message>, NetError> {
        self.recv(Some(timeout))
    }
}

/// Skip messages until one named `name` arrives.
fn wait_for<S: MessageSource>(
    source: &mut S,
    name: &str,
    timeout: Duration,
) -> CliResult<Vec<Variant>> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CliError::new(
                TIMEOUT,
                format!("no {name} reply within {timeout:?}"),
            ));
        }
        let Some(message) = source
            .next_message(remaining)
            .map_err(|err| net_error("receive failed", err))?
        else {
            continue;
        };
        let values = WireProtocol::decode(&message).map_err(|err| bus_error("bad reply", err))?;
        if values.first().and_then(Variant::as_str) == Some(name) {
            return Ok(values);
        }
    }
}
