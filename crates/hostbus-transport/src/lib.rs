//! Byte-stream plumbing underneath hostbus channels.
//!
//! Provides the two OS facilities every channel needs:
//! - Anonymous pipe pairs whose child-side ends can be handed to a
//!   spawned process by descriptor number
//! - Bounded-wait readiness checks over one or many descriptors
//!
//! This is the lowest layer of hostbus. Framing, processes and sockets
//! all build on top of the [`PipeReader`]/[`PipeWriter`] types and the
//! [`poll`] helpers provided here.

pub mod error;

#[cfg(unix)]
pub mod pipe;
#[cfg(unix)]
pub mod poll;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use pipe::{clear_cloexec, pipe_pair, PipeReader, PipeWriter};
#[cfg(unix)]
pub use poll::{poll_fds, wait_readable, wait_writable, Interest, PollEntry};
