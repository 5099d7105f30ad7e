//! Opcode tables.
//!
//! Local pipe opcodes are small consecutive integers shared with the renderer
//! helper. Commands flow host → renderer, events flow renderer → host.
//! Network opcodes live in [`net`] and never appear on a local pipe.

/// Create the renderer view (payload: realize parameters).
pub const REALIZE: u16 = 0;

/// Load a URL (payload: NUL-terminated UTF-8).
pub const NAVIGATE: u16 = 1;

/// Evaluate a script in the loaded page (payload: NUL-terminated UTF-8).
pub const RUN_SCRIPT: u16 = 2;

/// Install the host-object shims before page scripts run (no payload).
pub const INJECT_SHIMS: u16 = 3;

/// Register a script to run on every page load (payload: NUL-terminated UTF-8).
pub const INJECT_SCRIPT: u16 = 4;

/// Resize the view (payload: width u32, height u32).
pub const SET_SIZE: u16 = 5;

/// Grab or release keyboard focus (payload: one byte, 0 or 1).
pub const SET_KEYBOARD_FOCUS: u16 = 6;

/// Ask the renderer to exit (no payload).
pub const TERMINATE: u16 = 7;

/// Renderer is up (payload: f32 device pixel ratio).
pub const HANDLE_INIT: u16 = 8;

/// Script posted a message (payload: encoded variant array).
pub const HANDLE_SCRIPT_MESSAGE: u16 = 9;

/// Page finished loading (no payload).
pub const HANDLE_LOAD_FINISHED: u16 = 10;

/// Opcodes used between the network channel and its clients.
pub mod net {
    /// Client introduces itself (payload: user agent, UTF-8).
    pub const HELLO: u16 = 1;

    /// Text message (payload: UTF-8 JSON).
    pub const TEXT: u16 = 2;

    /// Binary message (payload: encoded variant array).
    pub const BINARY: u16 = 3;

    /// Returns a human-readable name for a network opcode.
    pub fn opcode_name(opcode: u16) -> &'static str {
        match opcode {
            HELLO => "HELLO",
            TEXT => "TEXT",
            BINARY => "BINARY",
            _ => "UNKNOWN",
        }
    }
}

/// Returns a human-readable name for a local opcode.
pub fn opcode_name(opcode: u16) -> &'static str {
    match opcode {
        REALIZE => "REALIZE",
        NAVIGATE => "NAVIGATE",
        RUN_SCRIPT => "RUN_SCRIPT",
        INJECT_SHIMS => "INJECT_SHIMS",
        INJECT_SCRIPT => "INJECT_SCRIPT",
        SET_SIZE => "SET_SIZE",
        SET_KEYBOARD_FOCUS => "SET_KEYBOARD_FOCUS",
        TERMINATE => "TERMINATE",
        HANDLE_INIT => "HANDLE_INIT",
        HANDLE_SCRIPT_MESSAGE => "HANDLE_SCRIPT_MESSAGE",
        HANDLE_LOAD_FINISHED => "HANDLE_LOAD_FINISHED",
        _ => "UNKNOWN",
    }
}

/// Returns true if the opcode is a host → renderer command.
pub fn is_command(opcode: u16) -> bool {
    opcode <= TERMINATE
}

/// Returns true if the opcode is a renderer → host event.
pub fn is_event(opcode: u16) -> bool {
    (HANDLE_INIT..=HANDLE_LOAD_FINISHED).contains(&opcode)
}
