//! Request/reply helpers for talking to remote objects.
//!
//! Every request takes a fresh ticket, which is released when the answer
//! arrives, when the wait times out, or when the caller drops the future.
//! An `ack` only signals progress: it is shown to the progress callback
//! and restarts the timeout.

use crate::error::RpcError;
use crate::node::Node;
use crate::subscriptions::{Report, SubscriptionId};
use ssp_codec::{Symbol, Value};
use ssp_types::constants::LINK_ID;
use ssp_types::ComponentId;
use ssp_wire::{LinkIndex, Message, NameMap, ReplyTo};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Called with the body of each `ack` (and the final reply) of a call.
pub type Progress<'a> = &'a (dyn Fn(&Value) + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Component(ComponentId),
    Link(LinkIndex),
}

/// Releases a ticket when the request ends, however it ends.
struct TicketGuard<'a> {
    node: &'a Node,
    tk: u8,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.node.release_ticket(self.tk);
    }
}

/// Request machinery shared by both proxy kinds.
#[derive(Clone)]
struct Requester {
    node: Arc<Node>,
    target: Target,
}

impl Requester {
    fn send(&self, message: Message) -> Result<(), RpcError> {
        match self.target {
            Target::Component(id) => self.node.send(id, message)?,
            Target::Link(link) => self.node.send_on_link(link, message)?,
        }
        Ok(())
    }

    async fn request(
        &self,
        mut message: Message,
        timeout: Duration,
        progress: Option<Progress<'_>>,
    ) -> Result<Value, RpcError> {
        let (tk, mut answers) = self.node.allocate_ticket()?;
        let _guard = TicketGuard {
            node: &self.node,
            tk,
        };
        let from = match self.target {
            Target::Component(_) => self.node.id(),
            Target::Link(_) => LINK_ID,
        };
        message.set_reply(ReplyTo { from, tk });
        self.send(message)?;

        loop {
            let answer = match tokio::time::timeout(timeout, answers.recv()).await {
                Ok(Some(answer)) => answer,
                Ok(None) | Err(_) => return Err(RpcError::Timeout),
            };
            match answer {
                Message::Ack { body, .. } => {
                    if let Some(progress) = progress {
                        progress(&body);
                    }
                }
                Message::Reply { body, .. } => {
                    if let Some(progress) = progress {
                        progress(&body);
                    }
                    return Ok(body);
                }
                Message::Nack { code, .. } => return Err(RpcError::Nack { code }),
                other => return Err(RpcError::UnexpectedReply(other.to_string())),
            }
        }
    }

    async fn get(&self, var: &str) -> Result<Value, RpcError> {
        let message = Message::Uget {
            reply: None,
            var: vec![Symbol::new(var)],
        };
        let timeout = Duration::from_millis(self.node.rpc_config().get_timeout_ms);
        match self.request(message, timeout, None).await? {
            Value::List(mut items) if items.len() == 1 => Ok(items.remove(0)),
            other => Ok(other),
        }
    }

    async fn call(
        &self,
        func: &str,
        arg: Value,
        progress: Option<Progress<'_>>,
    ) -> Result<Value, RpcError> {
        let rpc = self.node.rpc_config();
        let timeout = Duration::from_millis(rpc.call_timeout_ms);
        for attempt in 0..=rpc.call_retries {
            let message = Message::Call {
                reply: None,
                sym: Symbol::new(func),
                arg: arg.clone(),
            };
            match self.request(message, timeout, progress).await {
                Err(RpcError::Timeout) => {
                    debug!(func, attempt, target = ?self.target, "SSP rpc: call timed out");
                }
                result => return result,
            }
        }
        Err(RpcError::Timeout)
    }

    fn call_oneway(&self, func: &str, arg: Value) -> Result<(), RpcError> {
        self.send(Message::Call {
            reply: None,
            sym: Symbol::new(func),
            arg,
        })
    }

    async fn set_multi(&self, values: NameMap) -> Result<Value, RpcError> {
        let timeout = Duration::from_millis(self.node.rpc_config().set_timeout_ms);
        let message = Message::Set {
            reply: None,
            map: values,
        };
        self.request(message, timeout, None).await
    }

    async fn get_variables(&self) -> Result<Vec<Symbol>, RpcError> {
        let timeout = Duration::from_millis(self.node.rpc_config().get_timeout_ms);
        // The reply address is filled in by `request`.
        let message = Message::GetVarList {
            reply: ReplyTo { from: 0, tk: 0 },
        };
        let body = self.request(message, timeout, None).await?;
        let items = body
            .as_list()
            .ok_or_else(|| RpcError::UnexpectedReply(format!("variable list {body:?}")))?;
        items
            .iter()
            .map(|item| match item {
                Value::Symbol(s) => Ok(s.clone()),
                Value::String(s) => Ok(Symbol::new(s)),
                other => Err(RpcError::UnexpectedReply(format!("variable name {other:?}"))),
            })
            .collect()
    }
}

/// Remote operations on a component, addressed through the network.
#[derive(Clone)]
pub struct ComponentProxy {
    inner: Requester,
}

impl ComponentProxy {
    pub(crate) fn new(node: Arc<Node>, id: ComponentId) -> Self {
        Self {
            inner: Requester {
                node,
                target: Target::Component(id),
            },
        }
    }

    pub fn id(&self) -> ComponentId {
        match self.inner.target {
            Target::Component(id) => id,
            Target::Link(_) => LINK_ID,
        }
    }

    /// Whether a route to the component exists.
    pub fn is_online(&self) -> bool {
        self.inner.node.can_reach(self.id())
    }

    /// Reads one variable.
    pub async fn get(&self, var: &str) -> Result<Value, RpcError> {
        self.inner.get(var).await
    }

    /// Calls a function, retrying on timeout as configured.
    pub async fn call(&self, func: &str, arg: impl Into<Value>) -> Result<Value, RpcError> {
        self.inner.call(func, arg.into(), None).await
    }

    /// Like [`call`](Self::call), reporting every ack body to `progress`.
    pub async fn call_with_progress(
        &self,
        func: &str,
        arg: impl Into<Value>,
        progress: Progress<'_>,
    ) -> Result<Value, RpcError> {
        self.inner.call(func, arg.into(), Some(progress)).await
    }

    /// Calls without waiting for, or asking for, an answer.
    pub fn call_oneway(&self, func: &str, arg: impl Into<Value>) -> Result<(), RpcError> {
        self.inner.call_oneway(func, arg.into())
    }

    pub async fn set(&self, var: &str, value: impl Into<Value>) -> Result<Value, RpcError> {
        self.inner
            .set_multi(vec![(Symbol::new(var), value.into())])
            .await
    }

    /// Assigns several variables in one message.
    pub async fn set_multi(&self, values: NameMap) -> Result<Value, RpcError> {
        self.inner.set_multi(values).await
    }

    pub async fn get_variables(&self) -> Result<Vec<Symbol>, RpcError> {
        self.inner.get_variables().await
    }

    /// Runs `callback` on every report of `symbols` from this component.
    pub fn add_subscriber(
        &self,
        symbols: &[&str],
        callback: impl Fn(&Report) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.node.subscribe(self.id(), symbols, callback)
    }

    pub fn remove_subscriber(&self, id: SubscriptionId) {
        self.inner.node.unsubscribe(id);
    }
}

/// Remote operations on whatever sits at the other end of one link.
///
/// Works before either side has an address: requests go to the link
/// pseudo-address and are answered on the same link.
#[derive(Clone)]
pub struct LinkProxy {
    inner: Requester,
}

impl LinkProxy {
    pub(crate) fn new(node: Arc<Node>, link: LinkIndex) -> Self {
        Self {
            inner: Requester {
                node,
                target: Target::Link(link),
            },
        }
    }

    pub fn link(&self) -> LinkIndex {
        match self.inner.target {
            Target::Link(link) => link,
            Target::Component(_) => 0,
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner
            .node
            .link(self.link())
            .map(|l| l.is_online())
            .unwrap_or(false)
    }

    pub async fn get(&self, var: &str) -> Result<Value, RpcError> {
        self.inner.get(var).await
    }

    pub async fn call(&self, func: &str, arg: impl Into<Value>) -> Result<Value, RpcError> {
        self.inner.call(func, arg.into(), None).await
    }

    pub fn call_oneway(&self, func: &str, arg: impl Into<Value>) -> Result<(), RpcError> {
        self.inner.call_oneway(func, arg.into())
    }

    pub async fn set(&self, var: &str, value: impl Into<Value>) -> Result<Value, RpcError> {
        self.inner
            .set_multi(vec![(Symbol::new(var), value.into())])
            .await
    }

    pub async fn get_variables(&self) -> Result<Vec<Symbol>, RpcError> {
        self.inner.get_variables().await
    }
}
