//! Sparvio Serial Protocol node.
//!
//! A node joins a tree-shaped network of components over point-to-point
//! links. One node becomes the central and hands out addresses, everyone
//! else receives an id from it and routes traffic for the subtree below.
//!
//! ## Architecture
//!
//! - **Node** ([`node`]): addressing state, central election, routing and
//!   delivery to the hosted object. Effects run outside the state lock.
//! - **Central** ([`central`]): the directory the elected central keeps.
//! - **Networker** ([`networker`]): periodic probing of unknown neighbors.
//! - **RPC** ([`rpc`]): ticketed get/set/call against remote objects,
//!   routed ([`ComponentProxy`]) or straight over a link ([`LinkProxy`]).
//! - **Local objects** ([`local`]): what this node exposes, and the default
//!   request handling for it.

pub mod central;
pub mod error;
pub mod event;
pub mod local;
pub mod networker;
pub mod node;
pub mod rpc;
pub mod subscriptions;
pub mod telemetry;
pub mod tickets;

pub use central::{Central, DirectoryEntry};
pub use error::{NodeError, NodeResult, RpcError};
pub use event::NodeEvent;
pub use local::{FunctionSig, Interface, LocalDispatcher, LocalObject};
pub use node::Node;
pub use rpc::{ComponentProxy, LinkProxy};
pub use subscriptions::{Report, SubscriptionId};
pub use telemetry::init_tracing;
