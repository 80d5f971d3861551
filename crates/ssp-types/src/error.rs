//! Structured protocol diagnostics.
//!
//! A [`ProtocolFault`] never stops a node. It is logged, published as a node
//! event and the offending message is dropped.

use crate::constants::{ComponentId, ErrorCode};
use thiserror::Error;

/// Faults a node reports while running the topology and routing protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolFault {
    /// A `cinfo` carried a different protocol version.
    #[error("cinfo with wrong version: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },

    /// A `cinfo` carried a different magic byte.
    #[error("cinfo with wrong magic byte: expected {expected:#04x}, got {got:#04x}")]
    BadMagic { expected: u8, got: u8 },

    /// Our own announcement came back to us.
    #[error("direct loop detected on link {link}")]
    DirectLoop { link: usize },

    /// Forwarding would send the message back on the link it came from.
    #[error("dropping message to {to}: next hop is the inbound link {link}")]
    RoutingLoop { to: u8, link: usize },

    /// No routing table entry and no parent.
    #[error("dropping message to {to}: no route")]
    NoRoute { to: u8 },

    /// A message arrived without a destination.
    #[error("dropping message without destination")]
    InvalidDestination,

    /// A reply/ack/nack referenced a ticket nobody is waiting for.
    #[error("unknown ticket {ticket}")]
    UnknownTicket { ticket: u8 },

    /// A reply/ack/nack carried no ticket.
    #[error("reply without ticket")]
    MissingTicket,

    /// All tickets are awaiting replies.
    #[error("all tickets are occupied")]
    TicketsExhausted,

    /// A link-level newid named an impossible parent.
    #[error("newid with invalid parent {parent}")]
    InvalidParent { parent: ComponentId },

    /// A newid offered a lower priority than we already hold.
    #[error("ignoring newid with lower priority {offered} (ours {ours})")]
    LowerPriority { offered: u8, ours: u8 },

    /// A net cinfo reached a node that is not central.
    #[error("ignoring net cinfo as we are not central")]
    NotCentral,

    /// A cinfo arrived while neither side can assign addresses.
    #[error("ignoring cinfo where none is networked")]
    NotNetworked,

    /// A net newid named a link index we don't have.
    #[error("net newid names unknown link {link}")]
    UnknownLink { link: u8 },

    /// The central ran out of component ids.
    #[error("no free component id")]
    NoFreeId,

    /// A local object refused a request.
    #[error("request rejected with {code}")]
    Rejected { code: ErrorCode },

    /// A message could not be handled in this context.
    #[error("unhandled message: {0}")]
    Unhandled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display() {
        let fault = ProtocolFault::RoutingLoop { to: 7, link: 2 };
        assert_eq!(
            fault.to_string(),
            "dropping message to 7: next hop is the inbound link 2"
        );
        let fault = ProtocolFault::BadMagic {
            expected: 0xA6,
            got: 0x11,
        };
        assert!(fault.to_string().contains("0xa6"));
    }
}
