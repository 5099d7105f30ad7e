use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hostbus_renderer::RendererEvent;
use hostbus_variant::{encode_json_array, Variant};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    function: &'a str,
    args: &'a [Variant],
    peer: &'a str,
    timestamp: String,
}

/// Print one bus message: element 0 is the function name.
pub fn print_message(message: &[Variant], peer: &str, format: OutputFormat) {
    let (function, args) = split_message(message);
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                function,
                args,
                peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FUNCTION", "ARGS", "PEER"])
                .add_row(vec![
                    function.to_string(),
                    format_args_list(args),
                    peer.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("{function}({}) peer={peer}", format_args_list(args));
        }
        OutputFormat::Raw => {
            print_line(&encode_json_array(message));
        }
    }
}

#[derive(Serialize)]
struct EventOutput<'a> {
    event: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
    timestamp: String,
}

/// Print one renderer lifecycle event.
pub fn print_event(event: &RendererEvent, format: OutputFormat) {
    let (name, detail) = match event {
        RendererEvent::Init { pixel_ratio } => {
            ("init", Some(serde_json::json!({ "pixel_ratio": pixel_ratio })))
        }
        RendererEvent::LoadFinished => ("load-finished", None),
        RendererEvent::ScriptMessage(values) => {
            return print_message(values, "renderer", format);
        }
        RendererEvent::Console { tag, text } => (
            "console",
            Some(serde_json::json!({ "tag": tag, "text": text })),
        ),
        RendererEvent::Disconnected => ("disconnected", None),
    };

    match format {
        OutputFormat::Json => {
            let out = EventOutput {
                event: name,
                detail,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "DETAIL"])
                .add_row(vec![
                    name.to_string(),
                    detail.map(|d| d.to_string()).unwrap_or_default(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => match detail {
            Some(detail) => println!("{name} {detail}"),
            None => println!("{name}"),
        },
    }
}

/// Print a serializable record as JSON, or as `key: value` lines otherwise.
pub fn print_record<T: Serialize>(record: &T, format: OutputFormat) {
    let value = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
    match format {
        OutputFormat::Json | OutputFormat::Raw => println!("{value}"),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            if let serde_json::Value::Object(fields) = &value {
                for (key, field) in fields {
                    table.add_row(vec![key.clone(), plain(field)]);
                }
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            if let serde_json::Value::Object(fields) = &value {
                for (key, field) in fields {
                    println!("{key}: {}", plain(field));
                }
            }
        }
    }
    let _ = std::io::stdout().flush();
}

fn plain(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn print_line(line: &str) {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "{line}");
    let _ = out.flush();
}

fn split_message(message: &[Variant]) -> (&str, &[Variant]) {
    match message.split_first() {
        Some((head, args)) => (head.as_str().unwrap_or("?"), args),
        None => ("?", &[]),
    }
}

fn format_args_list(args: &[Variant]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
