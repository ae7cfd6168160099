//! Wire decoding error types.

/// Errors from decoding a message header off the wire.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The buffer is shorter than a full header.
    #[error("unexpected end of input: need {need} bytes, have {have}")]
    UnexpectedEof { need: usize, have: usize },

    /// The command word is not a known command.
    #[error("invalid command word: {word}")]
    InvalidCommand { word: u16 },

    /// The size field is smaller than the header itself.
    #[error("invalid size field: {size} (minimum {minimum})")]
    InvalidSize { size: u32, minimum: u32 },

    /// Reserved or padding bytes are non-zero.
    #[error("non-zero reserved bytes at header offset {offset}")]
    NonZeroReserved { offset: usize },
}
