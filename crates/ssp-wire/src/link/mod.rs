//! Transports to one neighbor each.
//!
//! A link is owned by one node. Once attached it runs its own receive task
//! and hands decoded frames to the node through [`LinkSink`]. Sending only
//! enqueues; nothing is guaranteed beyond what the transport provides.

mod local;
mod serial;
mod stream;
mod udp;

pub use local::LocalLink;
pub use serial::SerialLink;
pub use stream::StreamLink;
pub use udp::UdpLink;

use crate::error::{WireError, WireResult};
use crate::frame::{protocol_for, Frame};
use crate::message::Message;
use ssp_codec::Ontology;
use ssp_types::config::{LinkConfig, LinkKind};
use ssp_types::ComponentId;
use std::fmt;
use std::sync::{Arc, Weak};

/// Position of a link in its node's link table.
pub type LinkIndex = usize;

/// Receiver of a link's inbound traffic.
pub trait LinkSink: Send + Sync {
    fn handle_frame(&self, link: LinkIndex, frame: Frame);

    fn link_state_changed(&self, link: LinkIndex, online: bool);
}

/// A bidirectional channel to one neighbor.
pub trait Link: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn is_online(&self) -> bool;

    /// Whether the node may announce itself on this link unprompted.
    fn probe_automatically(&self) -> bool {
        true
    }

    /// Queues a frame for `to`.
    fn send(&self, to: ComponentId, message: &Message) -> WireResult<()>;

    /// Starts delivering inbound frames to `sink` under `index`.
    fn attach(&self, sink: Weak<dyn LinkSink>, index: LinkIndex) -> WireResult<()>;

    /// Stops the link's tasks. Pending sends are dropped.
    fn close(&self);
}

/// Hands one frame to the sink. False once the sink is gone.
pub(crate) fn deliver(sink: &Weak<dyn LinkSink>, index: LinkIndex, frame: Frame) -> bool {
    match sink.upgrade() {
        Some(sink) => {
            sink.handle_frame(index, frame);
            true
        }
        None => false,
    }
}

pub(crate) fn notify_state(sink: &Weak<dyn LinkSink>, index: LinkIndex, online: bool) {
    if let Some(sink) = sink.upgrade() {
        sink.link_state_changed(index, online);
    }
}

/// Opens a configured link.
pub async fn open_link(config: &LinkConfig, ont: Arc<Ontology>) -> WireResult<Arc<dyn Link>> {
    let protocol = protocol_for(config.protocol, ont);
    match config.kind {
        LinkKind::Serial => {
            let port = config
                .port
                .clone()
                .ok_or_else(|| WireError::Config("serial link needs a port".into()))?;
            Ok(Arc::new(
                SerialLink::new(port, config.baud, protocol)
                    .with_probe_automatically(config.probe_automatically),
            ))
        }
        LinkKind::Udp => {
            let (Some(rx_port), Some(tx_port)) = (config.rx_port, config.tx_port) else {
                return Err(WireError::Config(
                    "udp link needs rx_port and tx_port".into(),
                ));
            };
            let link = UdpLink::bind(rx_port, tx_port, protocol).await?;
            Ok(Arc::new(
                link.with_probe_automatically(config.probe_automatically),
            ))
        }
    }
}
