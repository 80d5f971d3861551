//! Error types for the node and its remote-call helpers.

use ssp_codec::CodecError;
use ssp_types::{ErrorCode, ProtocolFault};
use ssp_wire::WireError;
use thiserror::Error;

/// Node-level errors.
#[derive(Error, Debug)]
pub enum NodeError {
    /// A topology or routing rule refused the operation.
    #[error(transparent)]
    Fault(#[from] ProtocolFault),

    /// Framing or transport failure.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A value did not fit its declared type.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// No link with this index.
    #[error("no link {0}")]
    NoSuchLink(usize),
}

/// Alias for node results.
pub type NodeResult<T> = Result<T, NodeError>;

/// Failure of a request/reply exchange.
///
/// Only [`RpcError::Timeout`] is worth retrying.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Nothing arrived within the timeout, after all retries.
    #[error("no reply")]
    Timeout,

    /// The remote side refused the request.
    #[error("nack: {code}")]
    Nack { code: ErrorCode },

    /// Every ticket is waiting for a reply.
    #[error("no free ticket")]
    NoTicket,

    /// No link leads towards the destination.
    #[error("no route to {to}")]
    NoRoute { to: u8 },

    /// The request or its answer could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The request could not be sent.
    #[error(transparent)]
    Node(NodeError),

    /// The reply arrived but had an unexpected shape.
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

impl From<ProtocolFault> for RpcError {
    fn from(fault: ProtocolFault) -> Self {
        match fault {
            ProtocolFault::TicketsExhausted => Self::NoTicket,
            ProtocolFault::NoRoute { to } => Self::NoRoute { to },
            fault => Self::Node(NodeError::Fault(fault)),
        }
    }
}

impl From<NodeError> for RpcError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::Fault(fault) => fault.into(),
            NodeError::Codec(e) => Self::Codec(e),
            NodeError::Wire(WireError::Codec(e)) => Self::Codec(e),
            e => Self::Node(e),
        }
    }
}

impl From<WireError> for RpcError {
    fn from(e: WireError) -> Self {
        NodeError::Wire(e).into()
    }
}
