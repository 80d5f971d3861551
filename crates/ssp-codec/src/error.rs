//! Codec error types.

use ssp_types::RegIx;
use thiserror::Error;

/// Errors raised while encoding, decoding or parsing SSP values.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    /// The input ended before the value was complete.
    #[error("buffer underflow: needed {needed} bytes, {available} left")]
    Underflow { needed: usize, available: usize },

    /// A registry index that this ontology doesn't know.
    ///
    /// Distinct from malformed data: the caller may fetch the definition
    /// and retry.
    #[error("unknown registry index {0}")]
    UnknownRegIx(RegIx),

    /// The bytes or the requested schema encoding are not well formed.
    #[error("binary format error: {0}")]
    BinaryFormat(String),

    /// A value doesn't fit the requested type.
    #[error("type error: {0}")]
    Type(String),

    /// SSP-ASCII or ontology text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// A symbol index with no known name.
    #[error("unknown symbol {0}")]
    UnknownSymbol(u64),

    /// A registry index, label or symbol was redefined differently.
    #[error("conflicting definition: {0}")]
    Conflict(String),

    /// Reading an ontology file failed.
    #[error("IO error: {0}")]
    Io(String),
}

impl CodecError {
    /// Whether fetching a missing definition could make a retry succeed.
    pub fn is_unknown_definition(&self) -> bool {
        matches!(self, Self::UnknownRegIx(_) | Self::UnknownSymbol(_))
    }
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<hex::FromHexError> for CodecError {
    fn from(e: hex::FromHexError) -> Self {
        Self::Parse(format!("invalid hex: {e}"))
    }
}

/// Convenience alias.
pub type CodecResult<T> = Result<T, CodecError>;
