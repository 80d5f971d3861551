//! Networks of in-process nodes joined by local links.

use async_trait::async_trait;
use ssp_codec::{Format, Symbol, Value};
use ssp_types::config::SspConfig;
use ssp_types::scheduler::{QueueScheduler, Scheduler};
use ssp_types::constants::LINK_ID;
use ssp_types::{ComponentId, ErrorCode, ProtocolFault};
use ssp_node::{Interface, LocalObject, Node, NodeEvent, RpcError};
use ssp_wire::link::LocalLink;
use ssp_wire::{protocol_ontology, ComponentInfo, Frame, Link, LinkIndex, LinkSink, Message, NewId, ReplyTo};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const WAIT: Duration = Duration::from_secs(3);

fn config(name: &str, serial: u32, base_priority: u8) -> SspConfig {
    let mut config = SspConfig::default();
    config.node.name = name.to_string();
    config.node.serial = serial;
    config.node.base_priority = base_priority;
    config.network.first_probe_ms = 10;
    config.network.probe_interval_ms = 40;
    config.rpc.get_timeout_ms = 500;
    config.rpc.set_timeout_ms = 500;
    config.rpc.call_timeout_ms = 500;
    config
}

fn node(name: &str, serial: u32, base_priority: u8) -> Arc<Node> {
    Node::new(&config(name, serial, base_priority), protocol_ontology().unwrap())
}

fn connect(a: &Arc<Node>, b: &Arc<Node>) -> (LinkIndex, LinkIndex) {
    let (left, right) = LocalLink::pair("left", "right");
    let ia = a.add_link(Arc::new(left)).unwrap();
    let ib = b.add_link(Arc::new(right)).unwrap();
    (ia, ib)
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn expect_event(
    events: &mut broadcast::Receiver<NodeEvent>,
    wanted: impl Fn(&NodeEvent) -> bool,
) -> NodeEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("event")
}

/// A sensor with one variable and a few functions.
struct Sensor {
    interface: Interface,
    temp: Mutex<f64>,
    calls: AtomicUsize,
    watchers: Mutex<Vec<(String, ComponentId, bool)>>,
}

impl Sensor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            interface: Interface::new()
                .variable("temp", Format::Float)
                .function("echo", Format::Any, Format::Any)
                .function("count", Format::Null, Format::UInt32)
                .event("overheat"),
            temp: Mutex::new(19.5),
            calls: AtomicUsize::new(0),
            watchers: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LocalObject for Sensor {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn get(&self, var: &Symbol) -> Option<Value> {
        (var.name() == "temp").then(|| Value::Float(*self.temp.lock().unwrap()))
    }

    fn set(&self, _var: &Symbol, value: Value) -> Result<(), ErrorCode> {
        *self.temp.lock().unwrap() = value.as_f64().ok_or(ErrorCode::DataError)?;
        Ok(())
    }

    async fn call(&self, func: &Symbol, arg: Value) -> Result<Value, ErrorCode> {
        match func.name() {
            "echo" => Ok(arg),
            "count" => {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(Value::Int(n as i64))
            }
            _ => Err(ErrorCode::Fail),
        }
    }

    fn subscription_changed(&self, symbol: &Symbol, subscriber: ComponentId, active: bool) {
        self.watchers
            .lock()
            .unwrap()
            .push((symbol.name().to_string(), subscriber, active));
    }
}

/// The far end of a link, driven by the test.
struct Wire {
    link: LocalLink,
    frames: mpsc::UnboundedReceiver<Frame>,
    _sink: Arc<dyn LinkSink>,
}

struct Collect(mpsc::UnboundedSender<Frame>);

impl LinkSink for Collect {
    fn handle_frame(&self, _link: LinkIndex, frame: Frame) {
        let _ = self.0.send(frame);
    }

    fn link_state_changed(&self, _link: LinkIndex, _online: bool) {}
}

impl Wire {
    fn attach(node: &Arc<Node>) -> (Self, LinkIndex) {
        let (ours, theirs) = LocalLink::pair("node", "wire");
        let index = node.add_link(Arc::new(ours)).unwrap();
        let (tx, frames) = mpsc::unbounded_channel();
        let sink: Arc<dyn LinkSink> = Arc::new(Collect(tx));
        theirs.attach(Arc::downgrade(&sink), 0).unwrap();
        (
            Self {
                link: theirs,
                frames,
                _sink: sink,
            },
            index,
        )
    }

    fn send(&self, to: u8, message: Message) {
        self.link.send(to, &message).unwrap();
    }

    /// Plays central: assigns `id` to the node with us as parent.
    fn adopt(&self, id: ComponentId) {
        self.send(
            LINK_ID,
            Message::Newid(NewId {
                tk: 1,
                id,
                priority: 100,
                name: String::new(),
            }),
        );
    }

    async fn next_where(&mut self, wanted: impl Fn(&Frame) -> bool) -> Frame {
        tokio::time::timeout(WAIT, async {
            loop {
                let frame = self.frames.recv().await.expect("wire closed");
                if wanted(&frame) {
                    return frame;
                }
            }
        })
        .await
        .expect("frame")
    }
}

fn is_call(frame: &Frame) -> bool {
    matches!(frame.message, Message::Call { .. })
}

#[tokio::test]
async fn test_central_assigns_address_and_answers_calls() {
    let a = node("alpha", 100, 50);
    let b = node("beta", 200, 0);
    a.set_local_object(Sensor::new());
    connect(&a, &b);
    a.start();
    b.start();

    wait_until("beta networked", || b.id() != 0 && b.parent() == 1).await;
    assert!(a.is_central());
    assert_eq!(a.id(), 1);
    assert_eq!(b.id(), 2);
    assert!(!b.is_central());
    let names: Vec<String> = a.directory().into_iter().map(|e| e.name).collect();
    assert_eq!(names, ["alpha", "beta"]);
    assert_eq!(a.lookup("beta"), 2);
    assert_eq!(a.lookup("200"), 2);

    // The reply carries the request's ticket.
    let (tk, mut answers) = b.allocate_ticket().unwrap();
    b.send(
        1,
        Message::Call {
            reply: Some(ReplyTo { from: b.id(), tk }),
            sym: Symbol::new("echo"),
            arg: Value::Int(7),
        },
    )
    .unwrap();
    let reply = tokio::time::timeout(WAIT, answers.recv()).await.unwrap().unwrap();
    assert_eq!(
        reply,
        Message::Reply {
            from: 1,
            tk,
            body: Value::Int(7)
        }
    );
    assert_eq!(b.pending_tickets(), 0);

    let central = b.component(1).unwrap();
    assert!(central.is_online());
    assert_eq!(
        central.call("echo", "hello").await.unwrap(),
        Value::String("hello".into())
    );
    assert_eq!(central.get("temp").await.unwrap(), Value::Float(19.5));
    central.set("temp", 22.0).await.unwrap();
    assert_eq!(central.get("temp").await.unwrap(), Value::Float(22.0));

    let vars = central.get_variables().await.unwrap();
    assert_eq!(vars[0], Symbol::new("temp"));
    assert!(vars.contains(&Symbol::new("funcSigs")));

    a.shutdown();
    b.shutdown();
}

#[tokio::test]
async fn test_remote_refusals_surface_as_nacks() {
    let a = node("alpha", 100, 50);
    let b = node("beta", 200, 0);
    a.set_local_object(Sensor::new());
    connect(&a, &b);
    a.start();
    b.start();
    wait_until("beta networked", || b.parent() == 1).await;

    let central = b.component(1).unwrap();
    let err = central.call("selfdestruct", Value::Null).await.unwrap_err();
    assert!(matches!(err, RpcError::Nack { code: ErrorCode::UnknownVariable }));
    let err = central.set("temp", "warm").await.unwrap_err();
    assert!(matches!(err, RpcError::Nack { code: ErrorCode::ArgumentError }));
    let err = central.call("count", 5).await.unwrap_err();
    assert!(matches!(err, RpcError::Nack { code: ErrorCode::ArgumentError }));

    // Beta hosts nothing.
    let beta = a.component(2).unwrap();
    let err = beta.get("temp").await.unwrap_err();
    assert!(matches!(err, RpcError::Nack { code: ErrorCode::UnknownObject }));
    assert!(beta.get_variables().await.unwrap().is_empty());
}

async fn elect(first_prober_is_lower_serial: bool) {
    let mut quiet = config("alpha", 100, 50);
    quiet.network.first_probe_ms = 60_000;
    let a = Node::new(&quiet, protocol_ontology().unwrap());
    quiet.node.name = "bravo".into();
    quiet.node.serial = 200;
    let b = Node::new(&quiet, protocol_ontology().unwrap());
    let (la, lb) = connect(&a, &b);
    a.start();
    b.start();
    assert!(a.is_central() && b.is_central());

    if first_prober_is_lower_serial {
        a.probe(la).unwrap();
    } else {
        b.probe(lb).unwrap();
    }

    wait_until("single central", || !b.is_central() && b.id() == 2).await;
    assert!(a.is_central());
    assert_eq!(a.id(), 1);
    assert_eq!(b.parent(), 1);
    assert!(b.priority() > 50);
    assert_eq!(a.directory().len(), 2);
}

#[tokio::test]
async fn test_equal_priority_lower_serial_wins_when_probing_first() {
    elect(true).await;
}

#[tokio::test]
async fn test_equal_priority_lower_serial_wins_when_probed_first() {
    elect(false).await;
}

#[tokio::test]
async fn test_multi_hop_addressing() {
    let a = node("alpha", 100, 50);
    let b = node("bravo", 200, 0);
    let c = node("charlie", 300, 0);
    a.set_local_object(Sensor::new());
    connect(&a, &b);
    connect(&b, &c);
    for n in [&a, &b, &c] {
        n.start();
    }

    let settled = || {
        c.id() != 0
            && b.id() != 0
            && c.parent() == b.id()
            && [&a, &b, &c]
                .iter()
                .all(|n| n.neighbors().iter().all(|id| *id != 0))
    };
    wait_until("three-node tree", &settled).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(settled());

    let c_id = c.id();
    assert_eq!(a.directory().len(), 3);
    assert_eq!(a.lookup("charlie"), c_id);
    assert_eq!(b.neighbors(), vec![1, c_id]);
    // Charlie reaches the central through bravo, and back.
    assert_eq!(c.route(1), Some(0));
    let central = c.component(1).unwrap();
    assert_eq!(central.call("count", Value::Null).await.unwrap(), Value::Int(1));
    assert_eq!(central.call("echo", 3).await.unwrap(), Value::Int(3));
}

#[tokio::test]
async fn test_message_back_onto_inbound_link_is_dropped() {
    let b = node("bravo", 200, 0);
    let mut events = b.events();
    let (wire, link) = Wire::attach(&b);

    // A stronger neighbor announces itself; bravo routes id 1 over the wire.
    wire.send(LINK_ID, Message::Cinfo(ComponentInfo::new(5, 1, 50, "hub")));
    wait_until("route to hub", || b.route(1) == Some(link)).await;
    assert_eq!(b.priority(), 49);

    wire.send(1, Message::Get { var: vec![] });
    let event = expect_event(&mut events, |e| matches!(e, NodeEvent::Fault(_))).await;
    assert_eq!(
        event,
        NodeEvent::Fault(ProtocolFault::RoutingLoop { to: 1, link })
    );
}

#[tokio::test]
async fn test_unroutable_message_is_reported() {
    let b = node("bravo", 200, 0);
    let mut events = b.events();
    let (wire, _) = Wire::attach(&b);
    wire.send(77, Message::Get { var: vec![] });
    let event = expect_event(&mut events, |e| matches!(e, NodeEvent::Fault(_))).await;
    assert_eq!(event, NodeEvent::Fault(ProtocolFault::NoRoute { to: 77 }));
}

#[tokio::test]
async fn test_call_retries_on_fresh_tickets() {
    let mut cfg = config("bravo", 200, 0);
    cfg.rpc.call_timeout_ms = 60;
    cfg.rpc.call_retries = 2;
    let b = Node::new(&cfg, protocol_ontology().unwrap());
    let (mut wire, _) = Wire::attach(&b);
    wire.adopt(2);
    wait_until("adopted", || b.id() == 2).await;

    let central = b.component(1).unwrap();
    let call = tokio::spawn(async move { central.call("reboot", Value::Null).await });

    let mut tickets = Vec::new();
    for _ in 0..3 {
        let frame = wire.next_where(is_call).await;
        assert_eq!(frame.to, 1);
        tickets.push(frame.message.ticket().unwrap());
    }
    tickets.dedup();
    assert_eq!(tickets.len(), 3);

    assert!(matches!(call.await.unwrap(), Err(RpcError::Timeout)));
    assert_eq!(b.pending_tickets(), 0);
}

#[tokio::test]
async fn test_acks_report_progress_and_extend_timeout() {
    let mut cfg = config("bravo", 200, 0);
    cfg.rpc.call_timeout_ms = 200;
    let b = Node::new(&cfg, protocol_ontology().unwrap());
    let (mut wire, _) = Wire::attach(&b);
    wire.adopt(2);
    wait_until("adopted", || b.id() == 2).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let central = b.component(1).unwrap();
    let call = tokio::spawn(async move {
        let progress = move |v: &Value| sink.lock().unwrap().push(v.clone());
        central.call_with_progress("calibrate", Value::Null, &progress).await
    });

    let frame = wire.next_where(is_call).await;
    let tk = frame.message.ticket().unwrap();
    assert_eq!(frame.message.from(), Some(2));
    for percent in [30, 60] {
        tokio::time::sleep(Duration::from_millis(120)).await;
        wire.send(
            2,
            Message::Ack {
                from: 1,
                tk,
                body: Value::Int(percent),
            },
        );
    }
    tokio::time::sleep(Duration::from_millis(120)).await;
    wire.send(
        2,
        Message::Reply {
            from: 1,
            tk,
            body: Value::Bool(true),
        },
    );

    assert_eq!(call.await.unwrap().unwrap(), Value::Bool(true));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![Value::Int(30), Value::Int(60), Value::Bool(true)]
    );
}

#[tokio::test]
async fn test_subscriptions_are_shared_per_symbol() {
    let a = node("alpha", 100, 50);
    let b = node("beta", 200, 0);
    let sensor = Sensor::new();
    a.set_local_object(sensor.clone());
    connect(&a, &b);
    a.start();
    b.start();
    wait_until("beta networked", || b.parent() == 1).await;
    let b_id = b.id();

    let hits = Arc::new(AtomicUsize::new(0));
    let central = b.component(1).unwrap();
    let subs: Vec<_> = (0..2)
        .map(|_| {
            let hits = hits.clone();
            central.add_subscriber(&["temp"], move |report| {
                assert_eq!(report.value(1, "temp"), Some(&Value::Float(30.0)));
                hits.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let dispatcher = a.local_dispatcher().unwrap();
    wait_until("sub delivered", || dispatcher.subscribers("temp") == vec![b_id]).await;
    assert_eq!(sensor.watchers.lock().unwrap().len(), 1);

    assert_eq!(a.publish(vec![(Symbol::new("temp"), Value::Float(30.0))]), 1);
    wait_until("both callbacks", || hits.load(Ordering::SeqCst) == 2).await;

    central.remove_subscriber(subs[0]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(dispatcher.subscribers("temp"), vec![b_id]);
    central.remove_subscriber(subs[1]);
    wait_until("unsub delivered", || dispatcher.subscribers("temp").is_empty()).await;
    assert_eq!(
        *sensor.watchers.lock().unwrap(),
        vec![
            ("temp".to_string(), b_id, true),
            ("temp".to_string(), b_id, false)
        ]
    );
}

#[tokio::test]
async fn test_link_proxy_works_without_addresses() {
    let a = node("alpha", 100, 0);
    let b = node("beta", 200, 0);
    a.set_local_object(Sensor::new());
    let (_, lb) = connect(&a, &b);
    assert!(!a.is_networked() && !b.is_networked());

    let neighbor = b.link_proxy(lb).unwrap();
    assert!(neighbor.is_online());
    assert_eq!(neighbor.get("temp").await.unwrap(), Value::Float(19.5));
    assert_eq!(neighbor.call("echo", 9).await.unwrap(), Value::Int(9));
}

#[tokio::test]
async fn test_unclaimed_reports_reach_default_handler() {
    let b = node("bravo", 200, 0);
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    b.set_default_report_handler(move |report| {
        sink.lock().unwrap().push(report.reports.clone());
    });
    let (wire, _) = Wire::attach(&b);
    wire.send(
        LINK_ID,
        Message::Rep {
            reports: vec![(9, vec![(Symbol::new("rpm"), Value::Int(1200))])],
        },
    );
    wait_until("report", || !received.lock().unwrap().is_empty()).await;
    assert_eq!(received.lock().unwrap()[0][0].0, 9);
}

#[tokio::test]
async fn test_losing_parent_link_leaves_network() {
    let b = node("bravo", 200, 0);
    let mut events = b.events();
    let (wire, link) = Wire::attach(&b);
    wire.adopt(4);
    expect_event(&mut events, |e| matches!(e, NodeEvent::Networked { id: 4, parent: 1 })).await;

    b.remove_link(link).unwrap();
    assert_eq!(b.id(), 0);
    assert_eq!(b.route(1), None);
    expect_event(&mut events, |e| *e == NodeEvent::NonNetworked).await;
}

#[tokio::test]
async fn test_ticket_exhaustion() {
    let b = node("bravo", 200, 0);
    let mut held = Vec::new();
    for _ in 0..249 {
        held.push(b.allocate_ticket().unwrap());
    }
    assert_eq!(
        b.allocate_ticket().unwrap_err(),
        ProtocolFault::TicketsExhausted
    );
    b.release_ticket(17);
    assert_eq!(b.allocate_ticket().unwrap().0, 17);

    let proxy = b.component(1).unwrap();
    assert!(matches!(proxy.get("temp").await, Err(RpcError::NoTicket)));
}

#[tokio::test]
async fn test_unnetworked_request_has_no_route() {
    let b = node("bravo", 200, 0);
    let proxy = b.component(5).unwrap();
    assert!(!proxy.is_online());
    assert!(matches!(proxy.get("temp").await, Err(RpcError::NoRoute { to: 5 })));
    assert_eq!(b.pending_tickets(), 0);
}

struct Announced {
    interface: Interface,
    ids: Mutex<Vec<ComponentId>>,
}

#[async_trait]
impl LocalObject for Announced {
    fn interface(&self) -> &Interface {
        &self.interface
    }

    fn get(&self, _var: &Symbol) -> Option<Value> {
        None
    }

    fn networked(&self, id: ComponentId) {
        self.ids.lock().unwrap().push(id);
    }
}

#[tokio::test]
async fn test_callbacks_wait_for_queue_scheduler() {
    let scheduler = Arc::new(QueueScheduler::new());
    let a = Node::with_scheduler(
        &config("alpha", 100, 50),
        protocol_ontology().unwrap(),
        scheduler.clone(),
    );
    let object = Arc::new(Announced {
        interface: Interface::new(),
        ids: Mutex::new(Vec::new()),
    });
    a.set_local_object(object.clone());
    a.start();

    assert!(a.is_central());
    assert!(scheduler.has_job());
    assert!(object.ids.lock().unwrap().is_empty());
    assert_eq!(scheduler.run_to_completion(), 1);
    assert_eq!(*object.ids.lock().unwrap(), [1]);
    a.shutdown();
}
