//! Sparvio Serial Protocol wire layer.
//!
//! Turns typed protocol messages into line-delimited frames and moves those
//! frames over point-to-point links.
//!
//! ## Architecture
//!
//! - **protocol**: the message definitions, loaded into the registry at
//!   fixed indices starting at 32
//! - **Message**: tagged protocol message, encoded through the codec
//! - **LineReader / FrameDecoder**: reassemble lines from a byte stream and
//!   decode them with a hex or ASCII [`FrameProtocol`]
//! - **Link**: transport to one neighbor (in-process pair, byte stream,
//!   serial port, UDP datagrams). Inbound frames go to a [`LinkSink`]

pub mod error;
pub mod frame;
pub mod link;
pub mod message;
pub mod protocol;

pub use error::{WireError, WireResult};
pub use frame::{AsciiProtocol, Frame, FrameDecoder, FrameProtocol, HexProtocol, LineReader};
pub use link::{Link, LinkIndex, LinkSink};
pub use message::{ComponentInfo, Message, NameMap, NewId, ReplyTo};
pub use protocol::protocol_ontology;
