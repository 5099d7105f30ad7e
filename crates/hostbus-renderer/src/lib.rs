//! Out-of-process renderer support.
//!
//! A renderer helper is spawned with two inherited pipe descriptors. The
//! host talks to it with framed commands ([`hostbus_frame::opcode`]) queued
//! onto a [`WriterLoop`], and a dedicated [`ReaderLoop`] turns the helper's
//! frames into [`RendererEvent`]s.
//!
//! ```text
//! host ──NAVIGATE/RUN_SCRIPT/...──▶ helper
//! host ◀──HANDLE_INIT/SCRIPT_MESSAGE/LOAD_FINISHED── helper
//! ```

pub mod channel;
pub mod error;
pub mod protocol;
pub mod reader_loop;
pub mod supervisor;
pub mod view;
pub mod writer_loop;

pub use channel::LocalChannel;
pub use error::{RendererError, Result};
pub use protocol::{dispatch_script, RealizeConfig, RendererEvent};
pub use reader_loop::{FrameHandler, FrameSource, ReaderExit, ReaderLoop};
pub use supervisor::{ChildProcessRenderer, EventCallback, RendererState, SupervisorConfig};
pub use view::RendererView;
pub use writer_loop::{FrameSink, WriterLoop};
