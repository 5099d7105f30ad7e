//! Minimal renderer helper used by tests and `hostbus spawn`.
//!
//! Speaks the local pipe protocol without drawing anything:
//! - sends `HANDLE_INIT` (pixel ratio 1.0) on startup
//! - answers `NAVIGATE` with `HANDLE_LOAD_FINISHED`, then `["ready"]`
//! - reports each `RUN_SCRIPT` source back as `["console", "log", source]`
//! - exits on `TERMINATE` or when the host closes its pipe

use std::process::ExitCode;

use hostbus_frame::{opcode, ByteOrder, FrameReader, FrameWriter};
use hostbus_renderer::protocol::{decode_c_string, encode_pixel_ratio};
use hostbus_transport::{PipeReader, PipeWriter};
use hostbus_variant::{encode_array, Variant};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let (Some(read_fd), Some(write_fd)) = (
        args.get(1).and_then(|a| a.parse().ok()),
        args.get(2).and_then(|a| a.parse().ok()),
    ) else {
        eprintln!("usage: stub-renderer <read-fd> <write-fd>");
        return ExitCode::from(64);
    };

    // SAFETY: the supervisor hands us these two descriptors and nothing else
    // in this process refers to them.
    let (reader, writer) = unsafe {
        (
            PipeReader::from_raw_fd(read_fd),
            PipeWriter::from_raw_fd(write_fd),
        )
    };

    match run(FrameReader::new(reader), FrameWriter::new(writer)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("stub-renderer: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    mut reader: FrameReader<PipeReader>,
    mut writer: FrameWriter<PipeWriter>,
) -> Result<(), Box<dyn std::error::Error>> {
    writer.send(opcode::HANDLE_INIT, &encode_pixel_ratio(1.0))?;

    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(err) if err.is_disconnect() => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        match frame.opcode {
            opcode::NAVIGATE => {
                writer.send(opcode::HANDLE_LOAD_FINISHED, &[])?;
                post(&mut writer, &[Variant::from("ready")])?;
            }
            opcode::RUN_SCRIPT => {
                let source = decode_c_string(&frame.payload)?;
                post(
                    &mut writer,
                    &[Variant::from("console"), Variant::from("log"), Variant::from(source)],
                )?;
            }
            opcode::TERMINATE => return Ok(()),
            _ => {}
        }
    }
}

fn post(
    writer: &mut FrameWriter<PipeWriter>,
    values: &[Variant],
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = encode_array(values, ByteOrder::Native)?;
    writer.send(opcode::HANDLE_SCRIPT_MESSAGE, &payload)?;
    Ok(())
}
