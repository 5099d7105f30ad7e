/// Errors a bus sink can report. They stop at the bus boundary: `emit` and
/// `dispatch` log them and carry on.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The local renderer rejected or failed a post.
    #[error("renderer error: {0}")]
    Renderer(#[from] hostbus_renderer::RendererError),

    /// The network channel rejected a send.
    #[error("network error: {0}")]
    Net(#[from] hostbus_net::NetError),

    /// A message could not be encoded.
    #[error("variant error: {0}")]
    Variant(#[from] hostbus_variant::VariantError),
}

pub type Result<T> = std::result::Result<T, BusError>;
