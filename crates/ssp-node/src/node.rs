//! The SSP node: addressing, central election, routing and local delivery.
//!
//! All topology state lives in one [`NodeState`] behind a mutex. Handlers
//! run under the lock and only record what should happen next in an
//! [`Outbox`]. Link sends, event publication, local-object dispatch and
//! user callbacks happen after the lock is released.

use crate::central::{Central, DirectoryEntry};
use crate::error::{NodeError, NodeResult};
use crate::event::NodeEvent;
use crate::local::{LocalDispatcher, LocalObject};
use crate::networker::Networker;
use crate::rpc::{ComponentProxy, LinkProxy};
use crate::subscriptions::{Report, ReportCallback, SubscriptionId, Subscriptions};
use crate::tickets::{TicketReceiver, Tickets};
use chrono::{DateTime, Utc};
use ssp_codec::{Ontology, Symbol, Value};
use ssp_types::config::{NetworkConfig, RpcConfig, SspConfig};
use ssp_types::constants::{
    component_of, CENTRAL_ID, COMPONENT_MODULUS, INVALID_COMPONENT_ID, LINK_ID, SSP_MAGIC_BYTE,
    SSP_VERSION,
};
use ssp_types::scheduler::{ImmediateScheduler, Scheduler};
use ssp_types::{ComponentId, ErrorCode, ProtocolFault};
use ssp_wire::link::open_link;
use ssp_wire::{
    protocol_ontology, ComponentInfo, Frame, Link, LinkIndex, LinkSink, Message, NameMap, NewId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 1024;

struct LinkSlot {
    link: Arc<dyn Link>,
    /// Id of the component on the other end, 0 while unknown.
    neighbor: ComponentId,
}

/// Topology state of one node.
struct NodeState {
    id: ComponentId,
    parent: ComponentId,
    priority: u8,
    base_priority: u8,
    serial: u32,
    name: String,
    links: Vec<Option<LinkSlot>>,
    /// component id → link towards it
    routes: HashMap<ComponentId, LinkIndex>,
    tickets: Tickets,
    central: Option<Central>,
}

/// Deferred local work.
enum Work {
    /// A request for the local object. `link` is where it came from.
    Dispatch {
        link: Option<LinkIndex>,
        message: Message,
    },
    Report(Report),
    Networked(ComponentId),
}

/// Effects recorded under the state lock.
#[derive(Default)]
struct Outbox {
    sends: Vec<(Arc<dyn Link>, ComponentId, Message)>,
    events: Vec<NodeEvent>,
    work: Vec<Work>,
}

impl Outbox {
    fn fault(&mut self, fault: ProtocolFault) {
        self.events.push(NodeEvent::Fault(fault));
    }
}

impl NodeState {
    fn link(&self, index: LinkIndex) -> Option<&LinkSlot> {
        self.links.get(index).and_then(|slot| slot.as_ref())
    }

    fn send_on(&self, out: &mut Outbox, link: LinkIndex, to: ComponentId, message: Message) {
        match self.link(link) {
            Some(slot) => out.sends.push((slot.link.clone(), to, message)),
            None => debug!(link, %message, "SSP: link is gone, dropping message"),
        }
    }

    fn parent_link(&self) -> Option<LinkIndex> {
        if self.parent == INVALID_COMPONENT_ID {
            return None;
        }
        self.routes.get(&self.parent).copied()
    }

    fn our_cinfo(&self, link: LinkIndex) -> ComponentInfo {
        let priority = if self.parent_link() == Some(link) {
            self.base_priority
        } else {
            self.priority
        };
        let mut cinfo = ComponentInfo::new(self.serial, self.id, priority, self.name.clone());
        cinfo.parent = self.parent;
        cinfo
    }

    fn register_neighbor(&mut self, link: LinkIndex, id: ComponentId) {
        if let Some(Some(slot)) = self.links.get_mut(link) {
            slot.neighbor = id;
        }
        self.routes.insert(id, link);
    }

    fn clear_neighbors(&mut self) {
        for slot in self.links.iter_mut().flatten() {
            slot.neighbor = INVALID_COMPONENT_ID;
        }
    }

    fn forget_network(&mut self, out: &mut Outbox) {
        let was_networked = self.id != INVALID_COMPONENT_ID;
        self.parent = INVALID_COMPONENT_ID;
        self.id = INVALID_COMPONENT_ID;
        self.central = None;
        self.routes.clear();
        self.clear_neighbors();
        if was_networked {
            info!(name = %self.name, "SSP: left network");
            out.events.push(NodeEvent::NonNetworked);
        }
    }

    fn networked(&mut self, out: &mut Outbox) {
        info!(id = self.id, parent = self.parent, priority = self.priority, "SSP: networked");
        out.events.push(NodeEvent::Networked {
            id: self.id,
            parent: self.parent,
        });
        out.work.push(Work::Networked(self.id));
    }

    fn act_as_central(&mut self, out: &mut Outbox) {
        self.priority = self.base_priority;
        self.id = CENTRAL_ID;
        self.parent = INVALID_COMPONENT_ID;
        self.central = Some(Central::new(&self.name, self.serial));
        info!(name = %self.name, priority = self.priority, "SSP: acting as central");
        self.networked(out);
    }

    fn drop_link(&mut self, link: LinkIndex, out: &mut Outbox) {
        let was_parent = self.parent_link() == Some(link);
        if let Some(Some(slot)) = self.links.get_mut(link) {
            slot.neighbor = INVALID_COMPONENT_ID;
        }
        self.routes.retain(|_, l| *l != link);
        if was_parent {
            info!(link, "SSP: lost parent link");
            self.forget_network(out);
            if self.base_priority > 0 {
                self.act_as_central(out);
            }
        }
    }

    /// Entry point for every inbound or locally looped message.
    fn handle(
        &mut self,
        from_link: Option<LinkIndex>,
        to: u8,
        message: Message,
        received_at: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        if to == INVALID_COMPONENT_ID {
            out.fault(ProtocolFault::InvalidDestination);
            return;
        }
        if to == LINK_ID {
            match from_link {
                Some(link) => self.handle_link_level(link, message, received_at, out),
                None => out.fault(ProtocolFault::Unhandled(format!(
                    "link-level {message} without a link"
                ))),
            }
            return;
        }
        if self.id != INVALID_COMPONENT_ID && component_of(to) == self.id {
            self.handle_addressed(from_link, message, received_at, out);
            return;
        }
        self.forward(from_link, to, message, out);
    }

    fn handle_addressed(
        &mut self,
        from_link: Option<LinkIndex>,
        message: Message,
        received_at: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        match message {
            Message::Cinfo(cinfo) => match from_link {
                Some(link) => self.handle_net_cinfo(link, cinfo, out),
                None => out.fault(ProtocolFault::Unhandled("net cinfo from ourselves".into())),
            },
            Message::Newid(newid) => self.handle_net_newid(newid, out),
            m @ (Message::Reply { .. } | Message::Ack { .. } | Message::Nack { .. }) => {
                if let Err(fault) = self.tickets.dispatch(m) {
                    out.fault(fault);
                }
            }
            Message::Rep { reports } => out.work.push(Work::Report(Report {
                reports,
                received_at,
            })),
            message => out.work.push(Work::Dispatch {
                link: from_link,
                message,
            }),
        }
    }

    fn handle_link_level(
        &mut self,
        link: LinkIndex,
        message: Message,
        received_at: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        match message {
            Message::Cinfo(cinfo) => self.handle_link_cinfo(link, cinfo, out),
            Message::Newid(newid) => self.handle_link_newid(link, newid, out),
            m @ (Message::Reply { .. } | Message::Ack { .. } | Message::Nack { .. }) => {
                if let Err(fault) = self.tickets.dispatch(m) {
                    out.fault(fault);
                }
            }
            Message::Rep { reports } => out.work.push(Work::Report(Report {
                reports,
                received_at,
            })),
            message => out.work.push(Work::Dispatch {
                link: Some(link),
                message,
            }),
        }
    }

    fn forward(&mut self, from_link: Option<LinkIndex>, to: u8, message: Message, out: &mut Outbox) {
        let next = self
            .routes
            .get(&component_of(to))
            .copied()
            .or_else(|| self.parent_link());
        match next {
            Some(next) if Some(next) == from_link => {
                out.fault(ProtocolFault::RoutingLoop { to, link: next });
            }
            Some(next) => {
                debug!(to, link = next, %message, "SSP: forwarding");
                self.send_on(out, next, to, message);
                out.events.push(NodeEvent::Routed { to, link: next });
            }
            None => out.fault(ProtocolFault::NoRoute { to }),
        }
    }

    /// Sends a message that starts at this node.
    fn originate(
        &mut self,
        to: u8,
        message: Message,
        out: &mut Outbox,
    ) -> Result<(), ProtocolFault> {
        if to == INVALID_COMPONENT_ID || to == LINK_ID {
            return Err(ProtocolFault::InvalidDestination);
        }
        let component = component_of(to);
        if let Some(link) = self.routes.get(&component).copied() {
            self.send_on(out, link, to, message);
            return Ok(());
        }
        if self.id != INVALID_COMPONENT_ID && component == self.id {
            self.handle_addressed(None, message, Utc::now(), out);
            return Ok(());
        }
        if self.central.is_none() {
            if let Some(link) = self.routes.get(&CENTRAL_ID).copied() {
                self.send_on(out, link, to, message);
                return Ok(());
            }
        }
        Err(ProtocolFault::NoRoute { to })
    }

    fn check_header(cinfo: &ComponentInfo) -> Result<(), ProtocolFault> {
        if cinfo.version != SSP_VERSION {
            return Err(ProtocolFault::VersionMismatch {
                expected: SSP_VERSION,
                got: cinfo.version,
            });
        }
        if cinfo.magic != SSP_MAGIC_BYTE {
            return Err(ProtocolFault::BadMagic {
                expected: SSP_MAGIC_BYTE,
                got: cinfo.magic,
            });
        }
        Ok(())
    }

    fn handle_link_cinfo(&mut self, link: LinkIndex, cinfo: ComponentInfo, out: &mut Outbox) {
        if let Err(fault) = Self::check_header(&cinfo) {
            out.fault(fault);
            return;
        }
        if self.parent_link() == Some(link) {
            // Our parent re-announced itself: start over.
            self.forget_network(out);
            if self.base_priority > 0 {
                self.act_as_central(out);
            }
        }
        if cinfo.priority == self.priority {
            if self.serial != 0 && cinfo.serial == self.serial {
                out.fault(ProtocolFault::DirectLoop { link });
                return;
            }
            if cinfo.serial < self.serial {
                self.priority = self.priority.saturating_sub(1);
            }
        }
        if cinfo.priority > self.priority {
            self.forget_network(out);
            self.routes.insert(cinfo.id, link);
            self.priority = cinfo.priority - 1;
            info!(
                neighbor = %cinfo.name,
                priority = cinfo.priority,
                "SSP: yielding to stronger neighbor"
            );
            let ours = self.our_cinfo(link);
            self.send_on(out, link, LINK_ID, Message::Cinfo(ours));
            return;
        }
        if self.central.is_some() {
            self.assign_id(link, cinfo, false, out);
            return;
        }
        if let Some(parent_link) = self.parent_link() {
            let Ok(tk) = u8::try_from(link) else {
                out.fault(ProtocolFault::Unhandled(format!("link index {link} too large")));
                return;
            };
            let mut net = cinfo;
            net.tk = tk;
            net.parent = self.id;
            debug!(neighbor = %net.name, "SSP: asking central for neighbor's address");
            self.send_on(out, parent_link, CENTRAL_ID, Message::Cinfo(net));
            return;
        }
        out.fault(ProtocolFault::NotNetworked);
    }

    fn handle_link_newid(&mut self, link: LinkIndex, newid: NewId, out: &mut Outbox) {
        let parent = newid.tk;
        if parent == INVALID_COMPONENT_ID || parent == LINK_ID || parent >= COMPONENT_MODULUS {
            out.fault(ProtocolFault::InvalidParent { parent });
            return;
        }
        if self.parent_link() == Some(link) {
            self.forget_network(out);
        }
        if newid.priority < self.priority {
            out.fault(ProtocolFault::LowerPriority {
                offered: newid.priority,
                ours: self.priority,
            });
            return;
        }
        if self.central.take().is_some() {
            info!("SSP: giving up the central role");
        }
        self.clear_neighbors();
        self.routes.clear();
        self.id = newid.id;
        self.priority = newid.priority;
        if !newid.name.is_empty() {
            self.name = newid.name;
        }
        self.parent = parent;
        self.register_neighbor(link, parent);
        if parent != CENTRAL_ID {
            self.routes.insert(CENTRAL_ID, link);
        }
        self.networked(out);
    }

    fn handle_net_cinfo(&mut self, link: LinkIndex, cinfo: ComponentInfo, out: &mut Outbox) {
        if let Err(fault) = Self::check_header(&cinfo) {
            out.fault(fault);
            return;
        }
        if self.central.is_none() {
            out.fault(ProtocolFault::NotCentral);
            return;
        }
        self.assign_id(link, cinfo, true, out);
    }

    fn handle_net_newid(&mut self, newid: NewId, out: &mut Outbox) {
        let link = LinkIndex::from(newid.tk);
        if self.link(link).is_none() {
            out.fault(ProtocolFault::UnknownLink { link: newid.tk });
            return;
        }
        let id = newid.id;
        let forwarded = NewId {
            tk: self.id,
            ..newid
        };
        self.send_on(out, link, LINK_ID, Message::Newid(forwarded));
        self.register_neighbor(link, id);
    }

    /// Central side of a `cinfo`: register and answer with `newid`. A net
    /// cinfo is answered to the component that forwarded it.
    fn assign_id(&mut self, link: LinkIndex, cinfo: ComponentInfo, net: bool, out: &mut Outbox) {
        self.priority = self.priority.saturating_add(1);
        let own_id = self.id;
        let Some(central) = self.central.as_mut() else {
            out.fault(ProtocolFault::NotCentral);
            return;
        };
        let Some(id) = central.register(&cinfo) else {
            out.fault(ProtocolFault::NoFreeId);
            return;
        };
        let registered = central
            .by_id(id)
            .map(|e| e.name.clone())
            .unwrap_or_default();
        let name = if registered == cinfo.name {
            String::new()
        } else {
            registered
        };
        self.routes.insert(id, link);
        if net {
            let newid = NewId {
                tk: cinfo.tk,
                id,
                priority: self.priority,
                name,
            };
            self.send_on(out, link, cinfo.parent, Message::Newid(newid));
        } else {
            let newid = NewId {
                tk: own_id,
                id,
                priority: self.priority,
                name,
            };
            self.send_on(out, link, LINK_ID, Message::Newid(newid));
            self.register_neighbor(link, id);
        }
    }
}

/// A network participant.
///
/// A node owns its links, keeps the addressing state, forwards traffic for
/// others and hosts at most one [`LocalObject`]. It requires a running tokio
/// runtime.
pub struct Node {
    this: Weak<Node>,
    ont: Arc<Ontology>,
    network: NetworkConfig,
    rpc: RpcConfig,
    state: Mutex<NodeState>,
    events: broadcast::Sender<NodeEvent>,
    scheduler: Arc<dyn Scheduler>,
    subscriptions: Subscriptions,
    default_report: RwLock<Option<ReportCallback>>,
    local: RwLock<Option<Arc<LocalDispatcher>>>,
    networker: Mutex<Option<Networker>>,
}

impl Node {
    /// A node whose callbacks run immediately on the delivering task.
    pub fn new(config: &SspConfig, ont: Arc<Ontology>) -> Arc<Self> {
        Self::with_scheduler(config, ont, Arc::new(ImmediateScheduler))
    }

    pub fn with_scheduler(
        config: &SspConfig,
        ont: Arc<Ontology>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = NodeState {
            id: INVALID_COMPONENT_ID,
            parent: INVALID_COMPONENT_ID,
            priority: 0,
            base_priority: config.node.base_priority,
            serial: config.node.resolved_serial(),
            name: config.node.name.clone(),
            links: Vec::new(),
            routes: HashMap::new(),
            tickets: Tickets::new(),
            central: None,
        };
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            ont,
            network: config.network.clone(),
            rpc: config.rpc.clone(),
            state: Mutex::new(state),
            events,
            scheduler,
            subscriptions: Subscriptions::new(),
            default_report: RwLock::new(None),
            local: RwLock::new(None),
            networker: Mutex::new(None),
        })
    }

    /// Builds a node from configuration and opens every configured link.
    pub async fn open(config: &SspConfig) -> NodeResult<Arc<Self>> {
        let ont = protocol_ontology()?;
        let node = Self::new(config, ont.clone());
        for link_config in &config.links {
            let link = open_link(link_config, ont.clone()).await?;
            node.add_link(link)?;
        }
        Ok(node)
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` under the state lock, then applies its effects.
    fn with_state<R>(&self, f: impl FnOnce(&mut NodeState, &mut Outbox) -> R) -> R {
        let mut out = Outbox::default();
        let result = {
            let mut state = self.lock();
            f(&mut state, &mut out)
        };
        self.flush(out);
        result
    }

    pub fn ontology(&self) -> &Arc<Ontology> {
        &self.ont
    }

    pub fn rpc_config(&self) -> &RpcConfig {
        &self.rpc
    }

    pub fn id(&self) -> ComponentId {
        self.lock().id
    }

    pub fn parent(&self) -> ComponentId {
        self.lock().parent
    }

    pub fn priority(&self) -> u8 {
        self.lock().priority
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn serial(&self) -> u32 {
        self.lock().serial
    }

    pub fn is_central(&self) -> bool {
        self.lock().central.is_some()
    }

    pub fn is_networked(&self) -> bool {
        self.lock().id != INVALID_COMPONENT_ID
    }

    /// The central's directory; empty on other nodes.
    pub fn directory(&self) -> Vec<DirectoryEntry> {
        self.lock()
            .central
            .as_ref()
            .map(|c| c.entries().to_vec())
            .unwrap_or_default()
    }

    /// Resolves a component name, serial or id text through the directory.
    pub fn lookup(&self, key: &str) -> ComponentId {
        self.lock()
            .central
            .as_ref()
            .map(|c| c.lookup(key))
            .unwrap_or(INVALID_COMPONENT_ID)
    }

    /// The link a message for `to` would leave on.
    pub fn route(&self, to: u8) -> Option<LinkIndex> {
        let state = self.lock();
        state
            .routes
            .get(&component_of(to))
            .copied()
            .or_else(|| state.parent_link())
    }

    /// Whether a message to `to` can currently be delivered.
    pub fn can_reach(&self, to: u8) -> bool {
        let state = self.lock();
        let component = component_of(to);
        (state.id != INVALID_COMPONENT_ID && component == state.id)
            || state.routes.contains_key(&component)
            || (state.central.is_none() && state.routes.contains_key(&CENTRAL_ID))
    }

    /// Neighbor id per link, 0 where unknown or the link was removed.
    pub fn neighbors(&self) -> Vec<ComponentId> {
        self.lock()
            .links
            .iter()
            .map(|slot| slot.as_ref().map(|s| s.neighbor).unwrap_or(INVALID_COMPONENT_ID))
            .collect()
    }

    pub fn has_active_links(&self) -> bool {
        self.lock()
            .links
            .iter()
            .flatten()
            .any(|slot| slot.link.is_online())
    }

    pub fn link(&self, index: LinkIndex) -> Option<Arc<dyn Link>> {
        self.lock().link(index).map(|slot| slot.link.clone())
    }

    pub fn events(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// Takes ownership of a link and starts receiving on it.
    pub fn add_link(&self, link: Arc<dyn Link>) -> NodeResult<LinkIndex> {
        let index = {
            let mut state = self.lock();
            state.links.push(Some(LinkSlot {
                link: link.clone(),
                neighbor: INVALID_COMPONENT_ID,
            }));
            state.links.len() - 1
        };
        info!(link = index, name = link.name(), "SSP: link added");
        let sink: Weak<dyn LinkSink> = self.this.clone();
        link.attach(sink, index)?;
        Ok(index)
    }

    /// Closes a link and forgets every route over it.
    pub fn remove_link(&self, index: LinkIndex) -> NodeResult<()> {
        let slot = self.with_state(|state, out| {
            let slot = state.links.get_mut(index).and_then(Option::take);
            if slot.is_some() {
                state.drop_link(index, out);
            }
            slot
        });
        let slot = slot.ok_or(NodeError::NoSuchLink(index))?;
        slot.link.close();
        Ok(())
    }

    /// Self-elects if configured to compete, then starts probing neighbors.
    pub fn start(&self) {
        self.with_state(|state, out| {
            if state.base_priority > 0 && state.central.is_none() {
                state.act_as_central(out);
            }
        });
        let mut networker = self.networker.lock().unwrap_or_else(|e| e.into_inner());
        if networker.is_none() {
            *networker = Some(Networker::spawn(self.this.clone(), self.network.clone()));
        }
    }

    /// Stops probing and closes all links.
    pub fn shutdown(&self) {
        if let Some(networker) = self
            .networker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            networker.stop();
        }
        let links: Vec<Arc<dyn Link>> = self
            .lock()
            .links
            .iter()
            .flatten()
            .map(|slot| slot.link.clone())
            .collect();
        for link in links {
            link.close();
        }
        info!("SSP: node shut down");
    }

    /// Leaves the network: no id, no parent, no routes.
    pub fn forget_network(&self) {
        self.with_state(|state, out| state.forget_network(out));
    }

    /// Our announcement as it would be sent on `link`.
    pub fn our_cinfo(&self, link: LinkIndex) -> ComponentInfo {
        self.lock().our_cinfo(link)
    }

    /// Announces this node on one link.
    pub fn probe(&self, link: LinkIndex) -> NodeResult<()> {
        self.with_state(|state, out| {
            if state.link(link).is_none() {
                return Err(NodeError::NoSuchLink(link));
            }
            let cinfo = state.our_cinfo(link);
            state.send_on(out, link, LINK_ID, Message::Cinfo(cinfo));
            Ok(())
        })
    }

    /// Announces this node on every online link whose neighbor is unknown.
    pub fn probe_unknown_neighbors(&self) -> usize {
        self.with_state(|state, out| {
            let targets: Vec<LinkIndex> = state
                .links
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| slot.as_ref().map(|s| (i, s)))
                .filter(|(_, s)| {
                    s.neighbor == INVALID_COMPONENT_ID
                        && s.link.probe_automatically()
                        && s.link.is_online()
                })
                .map(|(i, _)| i)
                .collect();
            for &link in &targets {
                let cinfo = state.our_cinfo(link);
                state.send_on(out, link, LINK_ID, Message::Cinfo(cinfo));
            }
            targets.len()
        })
    }

    /// Routes a message that starts here.
    pub fn send(&self, to: u8, message: Message) -> NodeResult<()> {
        Ok(self.with_state(|state, out| state.originate(to, message, out))?)
    }

    /// Sends straight to whoever is on `link`, bypassing routing.
    pub fn send_on_link(&self, link: LinkIndex, message: Message) -> NodeResult<()> {
        let link = self.link(link).ok_or(NodeError::NoSuchLink(link))?;
        link.send(LINK_ID, &message)?;
        Ok(())
    }

    /// Entry point for every received message.
    pub fn handle_message(
        &self,
        from_link: Option<LinkIndex>,
        to: u8,
        message: Message,
        received_at: DateTime<Utc>,
    ) {
        self.with_state(|state, out| state.handle(from_link, to, message, received_at, out));
    }

    /// Reserves a ticket. Replies to it arrive on the returned receiver.
    pub fn allocate_ticket(&self) -> Result<(u8, TicketReceiver), ProtocolFault> {
        self.lock().tickets.allocate()
    }

    pub fn release_ticket(&self, tk: u8) {
        self.lock().tickets.release(tk);
    }

    pub fn pending_tickets(&self) -> usize {
        self.lock().tickets.len()
    }

    /// Hosts `object`, replacing any previous one.
    pub fn set_local_object(&self, object: Arc<dyn LocalObject>) {
        let dispatcher = Arc::new(LocalDispatcher::new(object, self.ont.clone()));
        *self.local.write().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
    }

    pub fn local_dispatcher(&self) -> Option<Arc<LocalDispatcher>> {
        self.local.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Reports new values of the local object to its subscribers. Returns
    /// how many `rep` messages went out.
    pub fn publish(&self, values: NameMap) -> usize {
        let Some(dispatcher) = self.local_dispatcher() else {
            return 0;
        };
        let mut sent = 0;
        for (to, report) in dispatcher.reports(self.id(), &values) {
            match self.send(to, report) {
                Ok(()) => sent += 1,
                Err(e) => warn!(to, error = %e, "SSP: can't deliver report"),
            }
        }
        sent
    }

    /// Receives reports no subscription claims.
    pub fn set_default_report_handler(&self, callback: impl Fn(&Report) + Send + Sync + 'static) {
        *self
            .default_report
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Watches `symbols` on a remote object. The network subscription is
    /// shared by every local callback on the same symbol.
    pub fn subscribe(
        &self,
        object: u8,
        symbols: &[&str],
        callback: impl Fn(&Report) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let symbols = symbols.iter().map(|s| Symbol::new(*s)).collect();
        let (id, fresh) = self.subscriptions.add(object, symbols, Arc::new(callback));
        if !fresh.is_empty() {
            let from = self.id();
            if let Err(e) = self.send(object, Message::Sub { from, sym: fresh }) {
                warn!(object, error = %e, "SSP: can't send sub");
            }
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let Some((object, stale)) = self.subscriptions.remove(id) else {
            return;
        };
        if !stale.is_empty() {
            let from = self.id();
            if let Err(e) = self.send(object, Message::Unsub { from, sym: stale }) {
                warn!(object, error = %e, "SSP: can't send unsub");
            }
        }
    }

    /// Remote operations on a component.
    pub fn component(&self, id: ComponentId) -> NodeResult<ComponentProxy> {
        let node = self.this.upgrade().ok_or(ProtocolFault::NotNetworked)?;
        Ok(ComponentProxy::new(node, id))
    }

    /// Remote operations on the neighbor at `link`, usable before addressing.
    pub fn link_proxy(&self, link: LinkIndex) -> NodeResult<LinkProxy> {
        let node = self.this.upgrade().ok_or(ProtocolFault::NotNetworked)?;
        if self.link(link).is_none() {
            return Err(NodeError::NoSuchLink(link));
        }
        Ok(LinkProxy::new(node, link))
    }

    fn publish_event(&self, event: NodeEvent) {
        if let NodeEvent::Fault(fault) = &event {
            warn!(fault = %fault, "SSP: dropped");
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn flush(&self, out: Outbox) {
        for (link, to, message) in out.sends {
            if let Err(e) = link.send(to, &message) {
                warn!(link = link.name(), to, %message, error = %e, "SSP: send failed");
            }
        }
        for event in out.events {
            self.publish_event(event);
        }
        for work in out.work {
            match work {
                Work::Dispatch { link, message } => self.dispatch_local(link, message),
                Work::Report(report) => self.deliver_report(report),
                Work::Networked(id) => {
                    if let Some(dispatcher) = self.local_dispatcher() {
                        self.scheduler
                            .post_job(Box::new(move || dispatcher.object().networked(id)));
                    }
                }
            }
        }
    }

    fn deliver_report(&self, report: Report) {
        let mut callbacks = self.subscriptions.callbacks_for(&report);
        if callbacks.is_empty() {
            let default = self
                .default_report
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .clone();
            match default {
                Some(cb) => callbacks.push(cb),
                None => {
                    debug!("SSP: report without subscriber");
                    return;
                }
            }
        }
        for callback in callbacks {
            let report = report.clone();
            self.scheduler.post_job(Box::new(move || callback(&report)));
        }
    }

    fn dispatch_local(&self, link: Option<LinkIndex>, message: Message) {
        let Some(node) = self.this.upgrade() else {
            return;
        };
        let reply_to = message.reply_to();
        let Some(dispatcher) = self.local_dispatcher() else {
            // Nothing hosted here: answer what expects an answer.
            let Some(reply) = reply_to else {
                debug!(%message, "SSP: no local object");
                return;
            };
            let own_id = self.id();
            let answer = match message {
                Message::GetVarList { .. } => Message::Reply {
                    from: own_id,
                    tk: reply.tk,
                    body: Value::List(Vec::new()),
                },
                _ => Message::Nack {
                    from: own_id,
                    tk: reply.tk,
                    code: ErrorCode::UnknownObject,
                },
            };
            self.answer(link, reply.from, answer);
            return;
        };
        tokio::spawn(async move {
            let own_id = node.id();
            if let (Some(answer), Some(reply)) =
                (dispatcher.dispatch(own_id, message).await, reply_to)
            {
                node.answer(link, reply.from, answer);
            }
        });
    }

    /// Sends an answer back to the requester. Link-level requests are
    /// answered on the link they came in on.
    fn answer(&self, link: Option<LinkIndex>, to: ComponentId, answer: Message) {
        let result = match (to, link) {
            (LINK_ID, Some(link)) => self.send_on_link(link, answer),
            (LINK_ID, None) => Err(ProtocolFault::InvalidDestination.into()),
            (to, _) => self.send(to, answer),
        };
        if let Err(e) = result {
            warn!(to, error = %e, "SSP: can't deliver answer");
        }
    }
}

impl LinkSink for Node {
    fn handle_frame(&self, link: LinkIndex, frame: Frame) {
        self.handle_message(Some(link), frame.to, frame.message, frame.received_at);
    }

    fn link_state_changed(&self, link: LinkIndex, online: bool) {
        debug!(link, online, "SSP: link state changed");
        self.with_state(|state, out| {
            if !online {
                state.drop_link(link, out);
            }
            out.events.push(NodeEvent::LinkState { link, online });
        });
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(networker) = self
            .networker
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            networker.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(base_priority: u8, serial: u32) -> NodeState {
        NodeState {
            id: 0,
            parent: 0,
            priority: 0,
            base_priority,
            serial,
            name: "n".into(),
            links: Vec::new(),
            routes: HashMap::new(),
            tickets: Tickets::new(),
            central: None,
        }
    }

    fn events(out: &Outbox) -> Vec<NodeEvent> {
        out.events.clone()
    }

    #[test]
    fn test_invalid_destination() {
        let mut st = state(0, 5);
        let mut out = Outbox::default();
        st.handle(None, 0, Message::Get { var: vec![] }, Utc::now(), &mut out);
        assert_eq!(events(&out), vec![NodeEvent::Fault(ProtocolFault::InvalidDestination)]);
    }

    #[test]
    fn test_unnetworked_has_no_route() {
        let mut st = state(0, 5);
        let mut out = Outbox::default();
        let err = st
            .originate(9, Message::Get { var: vec![] }, &mut out)
            .unwrap_err();
        assert_eq!(err, ProtocolFault::NoRoute { to: 9 });
    }

    #[test]
    fn test_central_self_election() {
        let mut st = state(50, 5);
        let mut out = Outbox::default();
        st.act_as_central(&mut out);
        assert_eq!((st.id, st.parent, st.priority), (1, 0, 50));
        assert_eq!(
            events(&out),
            vec![NodeEvent::Networked { id: 1, parent: 0 }]
        );
        assert_eq!(st.central.as_ref().map(|c| c.entries().len()), Some(1));
    }

    #[test]
    fn test_newid_with_invalid_parent() {
        let mut st = state(0, 5);
        let mut out = Outbox::default();
        for parent in [0, 200, 255] {
            st.handle_link_newid(
                0,
                NewId {
                    tk: parent,
                    id: 4,
                    priority: 9,
                    name: String::new(),
                },
                &mut out,
            );
        }
        assert_eq!(out.events.len(), 3);
        assert!(out
            .events
            .iter()
            .all(|e| matches!(e, NodeEvent::Fault(ProtocolFault::InvalidParent { .. }))));
        assert_eq!(st.id, 0);
    }

    #[test]
    fn test_bad_header_rejected() {
        let mut st = state(0, 5);
        let mut out = Outbox::default();
        let mut cinfo = ComponentInfo::new(9, 0, 50, "x");
        cinfo.version = 2;
        st.handle_link_cinfo(0, cinfo, &mut out);
        let mut cinfo = ComponentInfo::new(9, 0, 50, "x");
        cinfo.magic = 0x11;
        st.handle_link_cinfo(0, cinfo, &mut out);
        assert_eq!(
            events(&out),
            vec![
                NodeEvent::Fault(ProtocolFault::VersionMismatch { expected: 3, got: 2 }),
                NodeEvent::Fault(ProtocolFault::BadMagic { expected: 0xA6, got: 0x11 }),
            ]
        );
        assert_eq!(st.priority, 0);
    }

    #[test]
    fn test_own_cinfo_is_a_direct_loop() {
        let mut st = state(0, 5);
        st.priority = 7;
        let mut out = Outbox::default();
        st.handle_link_cinfo(0, ComponentInfo::new(5, 0, 7, "n"), &mut out);
        assert_eq!(
            events(&out),
            vec![NodeEvent::Fault(ProtocolFault::DirectLoop { link: 0 })]
        );
    }

    #[test]
    fn test_net_cinfo_needs_central() {
        let mut st = state(0, 5);
        st.id = 3;
        let mut out = Outbox::default();
        st.handle(Some(0), 3, Message::Cinfo(ComponentInfo::new(9, 0, 0, "x")), Utc::now(), &mut out);
        assert_eq!(events(&out), vec![NodeEvent::Fault(ProtocolFault::NotCentral)]);
    }

    #[test]
    fn test_reply_to_unknown_ticket() {
        let mut st = state(0, 5);
        st.id = 3;
        let mut out = Outbox::default();
        st.handle(
            Some(0),
            3,
            Message::Reply { from: 1, tk: 44, body: Value::Null },
            Utc::now(),
            &mut out,
        );
        assert_eq!(
            events(&out),
            vec![NodeEvent::Fault(ProtocolFault::UnknownTicket { ticket: 44 })]
        );
    }
}
