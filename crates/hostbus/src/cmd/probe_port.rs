use serde::Serialize;

use hostbus_net::find_available_port;

use crate::cmd::ProbePortArgs;
use crate::exit::{net_error, CliResult, SUCCESS};
use crate::output::{print_record, OutputFormat};

#[derive(Serialize)]
struct ProbeOutput {
    bind: String,
    first: u16,
    port: u16,
}

pub fn run(args: ProbePortArgs, format: OutputFormat) -> CliResult<i32> {
    let port =
        find_available_port(args.bind, args.first).map_err(|err| net_error("probe failed", err))?;
    print_record(
        &ProbeOutput {
            bind: args.bind.to_string(),
            first: args.first,
            port,
        },
        format,
    );
    Ok(SUCCESS)
}
