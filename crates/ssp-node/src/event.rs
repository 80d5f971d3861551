//! Node events, published on a broadcast channel.

use ssp_types::{ComponentId, ProtocolFault};
use ssp_wire::LinkIndex;

/// Something observable happened to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// The node received an address.
    Networked {
        id: ComponentId,
        parent: ComponentId,
    },
    /// The node lost its address.
    NonNetworked,
    /// A message was dropped or an operation refused.
    Fault(ProtocolFault),
    /// A message was forwarded.
    Routed { to: u8, link: LinkIndex },
    /// A link came up or went down.
    LinkState { link: LinkIndex, online: bool },
}
