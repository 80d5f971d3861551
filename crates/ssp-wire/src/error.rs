//! Wire layer errors.

use ssp_codec::CodecError;
use thiserror::Error;

/// Errors raised while framing messages or driving a link.
#[derive(Error, Debug)]
pub enum WireError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    /// A line that is not a well formed frame.
    #[error("Bad frame: {0}")]
    Frame(String),
    /// A decoded value that is not a valid protocol message.
    #[error("Bad message: {0}")]
    Message(String),
    #[error("Unknown action code {0}")]
    UnknownAction(u8),
    #[error("Link configuration error: {0}")]
    Config(String),
    #[error("Link closed")]
    LinkClosed,
}

pub type WireResult<T> = Result<T, WireError>;
