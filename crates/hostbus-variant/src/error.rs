/// Errors that can occur while encoding or decoding variants.
#[derive(Debug, thiserror::Error)]
pub enum VariantError {
    /// A string value contains NUL, which the binary encoding uses as its terminator.
    #[error("string at index {index} contains an embedded NUL")]
    EmbeddedNul { index: usize },

    /// The buffer ended inside a value.
    #[error("truncated value (tag {tag} at offset {offset})")]
    Truncated { tag: u8, offset: usize },

    /// A tag byte that names no known kind.
    #[error("unknown tag {tag} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },

    /// A string value is not valid UTF-8.
    #[error("invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    /// JSON text could not be parsed or produced.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON shape with no variant equivalent (objects, nested arrays, ...).
    #[error("unsupported json value: {0}")]
    UnsupportedJson(String),
}

pub type Result<T> = std::result::Result<T, VariantError>;
