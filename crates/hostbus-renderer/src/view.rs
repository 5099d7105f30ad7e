use hostbus_variant::Variant;

use crate::error::Result;
use crate::protocol::{dispatch_script, RealizeConfig};

/// The command surface of one renderer backend.
///
/// Every backend (child process, in-process engine, test double) offers the
/// same capability set; which one is used is decided by configuration.
pub trait RendererView: Send + Sync {
    /// Scale factor reported by the renderer at startup.
    fn device_pixel_ratio(&self) -> f32;

    fn realize(&self, config: &RealizeConfig) -> Result<()>;

    fn navigate(&self, url: &str) -> Result<()>;

    fn run_script(&self, source: &str) -> Result<()>;

    /// Register a script to run at the start of every page load.
    fn inject_script(&self, source: &str) -> Result<()>;

    fn set_size(&self, width: u32, height: u32) -> Result<()>;

    fn set_keyboard_focus(&self, focus: bool) -> Result<()>;

    /// Deliver a variant array to page scripts as a `message` event.
    fn post_message(&self, values: &[Variant]) -> Result<()> {
        self.run_script(&dispatch_script(values))
    }
}
