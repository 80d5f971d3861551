//! Objects hosted by this node and the default request handling for them.
//!
//! A [`LocalObject`] only has to answer get/set/call. The
//! [`LocalDispatcher`] takes care of the protocol around it: type checks,
//! nack codes, reply addressing and the subscriber sets behind `publish`.

use async_trait::async_trait;
use dashmap::DashMap;
use ssp_codec::cast::cast_to;
use ssp_codec::{Format, Ontology, Symbol, Value};
use ssp_types::{ComponentId, ErrorCode};
use ssp_wire::protocol::sym;
use ssp_wire::{Message, NameMap, ReplyTo};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Functionality a node exposes to the network.
#[async_trait]
pub trait LocalObject: Send + Sync {
    /// Declared variables, functions and events.
    fn interface(&self) -> &Interface;

    /// Current value of a variable, `None` if unknown.
    fn get(&self, var: &Symbol) -> Option<Value>;

    /// Assigns a variable. The value has already been cast to the declared
    /// type.
    fn set(&self, _var: &Symbol, _value: Value) -> Result<(), ErrorCode> {
        Err(ErrorCode::NotSupported)
    }

    /// Runs a function. The argument has already been cast to the declared
    /// argument type.
    async fn call(&self, _func: &Symbol, _arg: Value) -> Result<Value, ErrorCode> {
        Err(ErrorCode::NotSupported)
    }

    /// A remote component started (`active`) or stopped watching `symbol`.
    fn subscription_changed(&self, _symbol: &Symbol, _subscriber: ComponentId, _active: bool) {}

    /// The hosting node received address `id`.
    fn networked(&self, _id: ComponentId) {}
}

/// A declared function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub name: Symbol,
    pub arg: Format,
    pub ret: Format,
}

/// Declared surface of a local object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Interface {
    pub variables: Vec<(Symbol, Format)>,
    pub functions: Vec<FunctionSig>,
    pub events: Vec<Symbol>,
}

impl Interface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variable(mut self, name: &str, format: Format) -> Self {
        self.variables.push((Symbol::new(name), format));
        self
    }

    pub fn function(mut self, name: &str, arg: Format, ret: Format) -> Self {
        self.functions.push(FunctionSig {
            name: Symbol::new(name),
            arg,
            ret,
        });
        self
    }

    pub fn event(mut self, name: &str) -> Self {
        self.events.push(Symbol::new(name));
        self
    }

    pub fn variable_format(&self, var: &Symbol) -> Option<&Format> {
        self.variables
            .iter()
            .find(|(name, _)| name == var)
            .map(|(_, f)| f)
    }

    pub fn find_function(&self, func: &Symbol) -> Option<&FunctionSig> {
        self.functions.iter().find(|f| &f.name == func)
    }

    /// Names answered by `getVarList`, descriptors included.
    pub fn variable_names(&self) -> Vec<Symbol> {
        let mut names: Vec<Symbol> = self.variables.iter().map(|(n, _)| n.clone()).collect();
        for descriptor in [sym::VARS, sym::FUNCS, sym::FUNC_SIGS, sym::EVENTS] {
            names.push(Symbol::new(descriptor));
        }
        names
    }

    /// The self-description variables `vars`, `funcs`, `funcSigs` and `events`.
    pub fn descriptor(&self, var: &Symbol) -> Option<Value> {
        match var.name() {
            sym::VARS => Some(Value::Map(
                self.variables
                    .iter()
                    .map(|(n, f)| (Value::Symbol(n.clone()), Value::schema(f.clone())))
                    .collect(),
            )),
            sym::FUNCS => Some(symbol_list(self.functions.iter().map(|f| &f.name))),
            sym::FUNC_SIGS => Some(Value::Map(
                self.functions
                    .iter()
                    .map(|f| {
                        let sig = Value::List(vec![
                            Value::schema(f.arg.clone()),
                            Value::schema(f.ret.clone()),
                        ]);
                        (Value::Symbol(f.name.clone()), sig)
                    })
                    .collect(),
            )),
            sym::EVENTS => Some(symbol_list(self.events.iter())),
            _ => None,
        }
    }
}

fn symbol_list<'a>(symbols: impl Iterator<Item = &'a Symbol>) -> Value {
    Value::List(symbols.cloned().map(Value::Symbol).collect())
}

/// Protocol handling on behalf of one local object.
pub struct LocalDispatcher {
    object: Arc<dyn LocalObject>,
    ont: Arc<Ontology>,
    subscribers: DashMap<Symbol, BTreeSet<ComponentId>>,
}

impl LocalDispatcher {
    pub fn new(object: Arc<dyn LocalObject>, ont: Arc<Ontology>) -> Self {
        Self {
            object,
            ont,
            subscribers: DashMap::new(),
        }
    }

    pub fn object(&self) -> &Arc<dyn LocalObject> {
        &self.object
    }

    /// Components watching `symbol`.
    pub fn subscribers(&self, symbol: &str) -> Vec<ComponentId> {
        self.subscribers
            .get(&Symbol::new(symbol))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn variable_list(&self) -> Value {
        Value::List(
            self.object
                .interface()
                .variable_names()
                .into_iter()
                .map(Value::Symbol)
                .collect(),
        )
    }

    /// Value of a variable cast to its declared type, null if unknown.
    pub fn read(&self, var: &Symbol) -> Value {
        let interface = self.object.interface();
        match self.object.get(var) {
            Some(value) => match interface.variable_format(var) {
                Some(format) => cast_to(&self.ont, &value, format).unwrap_or_else(|e| {
                    warn!(var = %var, error = %e, "SSP local: value doesn't fit declared type");
                    Value::Null
                }),
                None => value,
            },
            None => interface.descriptor(var).unwrap_or(Value::Null),
        }
    }

    /// Handles one request. Returns the answer, if the request asked for one.
    pub async fn dispatch(&self, own_id: ComponentId, message: Message) -> Option<Message> {
        let nack = |reply: Option<ReplyTo>, code: ErrorCode| {
            reply.map(|r| Message::Nack {
                from: own_id,
                tk: r.tk,
                code,
            })
        };
        let answer = |reply: Option<ReplyTo>, body: Value| {
            reply.map(|r| Message::Reply {
                from: own_id,
                tk: r.tk,
                body,
            })
        };

        match message {
            Message::Get { var } => {
                // Plain get carries no reply address.
                debug!(count = var.len(), "SSP local: get without reply address");
                None
            }
            Message::Uget { reply, var } => {
                let values = var.iter().map(|v| self.read(v)).collect();
                answer(reply, Value::List(values))
            }
            Message::GetVarList { reply } => answer(Some(reply), self.variable_list()),
            Message::Call { reply, sym, arg } => {
                let Some(sig) = self.object.interface().find_function(&sym) else {
                    return nack(reply, ErrorCode::UnknownVariable);
                };
                let arg = match cast_to(&self.ont, &arg, &sig.arg) {
                    Ok(arg) => arg,
                    Err(e) => {
                        debug!(func = %sym, error = %e, "SSP local: argument rejected");
                        return nack(reply, ErrorCode::ArgumentError);
                    }
                };
                match self.object.call(&sym, arg).await {
                    Ok(result) => answer(reply, result),
                    Err(code) => {
                        debug!(func = %sym, %code, "SSP local: call failed");
                        nack(reply, code)
                    }
                }
            }
            Message::Set { reply, map } => {
                for (var, value) in map {
                    let Some(format) = self.object.interface().variable_format(&var) else {
                        return nack(reply, ErrorCode::UnknownVariable);
                    };
                    let value = match cast_to(&self.ont, &value, format) {
                        Ok(v) => v,
                        Err(_) => return nack(reply, ErrorCode::ArgumentError),
                    };
                    if let Err(code) = self.object.set(&var, value) {
                        return nack(reply, code);
                    }
                }
                answer(reply, Value::Null)
            }
            Message::Sub { from, sym } => {
                for symbol in sym {
                    if self.subscribers.entry(symbol.clone()).or_default().insert(from) {
                        self.object.subscription_changed(&symbol, from, true);
                    }
                }
                None
            }
            Message::Unsub { from, sym } => {
                for symbol in sym {
                    let removed = self
                        .subscribers
                        .get_mut(&symbol)
                        .map(|mut s| s.remove(&from))
                        .unwrap_or(false);
                    self.subscribers.remove_if(&symbol, |_, s| s.is_empty());
                    if removed {
                        self.object.subscription_changed(&symbol, from, false);
                    }
                }
                None
            }
            other => {
                debug!(message = %other, "SSP local: not a request");
                None
            }
        }
    }

    /// `rep` messages carrying `values` to every subscriber, each limited to
    /// the symbols that subscriber watches.
    pub fn reports(&self, own_id: ComponentId, values: &NameMap) -> Vec<(ComponentId, Message)> {
        let mut per_subscriber: Vec<(ComponentId, NameMap)> = Vec::new();
        for (symbol, value) in values {
            let Some(subs) = self.subscribers.get(symbol) else {
                continue;
            };
            for subscriber in subs.iter() {
                let pos = match per_subscriber.iter().position(|(id, _)| id == subscriber) {
                    Some(pos) => pos,
                    None => {
                        per_subscriber.push((*subscriber, Vec::new()));
                        per_subscriber.len() - 1
                    }
                };
                per_subscriber[pos].1.push((symbol.clone(), value.clone()));
            }
        }
        per_subscriber
            .into_iter()
            .map(|(to, map)| {
                (
                    to,
                    Message::Rep {
                        reports: vec![(own_id, map)],
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssp_wire::protocol_ontology;
    use std::sync::Mutex;

    struct Thermostat {
        interface: Interface,
        target: Mutex<f64>,
        events: Mutex<Vec<(String, ComponentId, bool)>>,
    }

    impl Thermostat {
        fn new() -> Self {
            Self {
                interface: Interface::new()
                    .variable("target", Format::Float)
                    .variable("mode", Format::UInt8)
                    .function("boost", Format::UInt8, Format::Float)
                    .event("overheat"),
                target: Mutex::new(20.0),
                events: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LocalObject for Thermostat {
        fn interface(&self) -> &Interface {
            &self.interface
        }

        fn get(&self, var: &Symbol) -> Option<Value> {
            match var.name() {
                "target" => Some(Value::Float(*self.target.lock().unwrap())),
                "mode" => Some(Value::Int(2)),
                _ => None,
            }
        }

        fn set(&self, var: &Symbol, value: Value) -> Result<(), ErrorCode> {
            match var.name() {
                "target" => {
                    *self.target.lock().unwrap() = value.as_f64().ok_or(ErrorCode::DataError)?;
                    Ok(())
                }
                _ => Err(ErrorCode::Blocked),
            }
        }

        async fn call(&self, _func: &Symbol, arg: Value) -> Result<Value, ErrorCode> {
            let minutes = arg.as_i64().ok_or(ErrorCode::Fail)?;
            if minutes == 0 {
                return Err(ErrorCode::Fail);
            }
            Ok(Value::Float(*self.target.lock().unwrap() + minutes as f64 / 10.0))
        }

        fn subscription_changed(&self, symbol: &Symbol, subscriber: ComponentId, active: bool) {
            self.events
                .lock()
                .unwrap()
                .push((symbol.name().to_string(), subscriber, active));
        }
    }

    fn dispatcher() -> (Arc<Thermostat>, LocalDispatcher) {
        let obj = Arc::new(Thermostat::new());
        let d = LocalDispatcher::new(obj.clone(), protocol_ontology().unwrap());
        (obj, d)
    }

    const REPLY: Option<ReplyTo> = Some(ReplyTo { from: 9, tk: 4 });

    #[tokio::test]
    async fn test_uget_returns_list_with_nulls() {
        let (_, d) = dispatcher();
        let answer = d
            .dispatch(
                3,
                Message::Uget {
                    reply: REPLY,
                    var: vec!["target".into(), "bogus".into()],
                },
            )
            .await
            .unwrap();
        assert_eq!(
            answer,
            Message::Reply {
                from: 3,
                tk: 4,
                body: Value::List(vec![Value::Float(20.0), Value::Null]),
            }
        );
    }

    #[tokio::test]
    async fn test_call_nack_codes() {
        let (_, d) = dispatcher();
        let call = |sym: &str, arg: Value| Message::Call {
            reply: REPLY,
            sym: Symbol::new(sym),
            arg,
        };
        let code = |m: Option<Message>| match m {
            Some(Message::Nack { code, .. }) => code,
            other => panic!("expected nack, got {other:?}"),
        };

        assert_eq!(
            code(d.dispatch(3, call("explode", Value::Null)).await),
            ErrorCode::UnknownVariable
        );
        assert_eq!(
            code(d.dispatch(3, call("boost", Value::from("soon"))).await),
            ErrorCode::ArgumentError
        );
        assert_eq!(
            code(d.dispatch(3, call("boost", Value::Int(0))).await),
            ErrorCode::Fail
        );
        match d.dispatch(3, call("boost", Value::Int(15))).await {
            Some(Message::Reply { body, tk, .. }) => {
                assert_eq!(tk, 4);
                assert!(body.approx_eq(&Value::Float(21.5)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oneway_call_has_no_answer() {
        let (_, d) = dispatcher();
        let call = Message::Call {
            reply: None,
            sym: Symbol::new("explode"),
            arg: Value::Null,
        };
        assert!(d.dispatch(3, call).await.is_none());
    }

    #[tokio::test]
    async fn test_set_checks_types() {
        let (obj, d) = dispatcher();
        let set = |var: &str, value: Value| Message::Set {
            reply: REPLY,
            map: vec![(Symbol::new(var), value)],
        };

        let ok = d.dispatch(3, set("target", Value::Int(23))).await.unwrap();
        assert!(matches!(ok, Message::Reply { body: Value::Null, .. }));
        assert_eq!(*obj.target.lock().unwrap(), 23.0);

        let unknown = d.dispatch(3, set("nope", Value::Int(1))).await.unwrap();
        assert!(matches!(unknown, Message::Nack { code: ErrorCode::UnknownVariable, .. }));
        let bad = d.dispatch(3, set("mode", Value::Int(4000))).await.unwrap();
        assert!(matches!(bad, Message::Nack { code: ErrorCode::ArgumentError, .. }));
        let refused = d.dispatch(3, set("mode", Value::Int(1))).await.unwrap();
        assert!(matches!(refused, Message::Nack { code: ErrorCode::Blocked, .. }));
    }

    #[tokio::test]
    async fn test_subscribers_and_publish() {
        let (obj, d) = dispatcher();
        let sub = |from: ComponentId, syms: &[&str]| Message::Sub {
            from,
            sym: syms.iter().map(|s| Symbol::new(*s)).collect(),
        };
        d.dispatch(1, sub(7, &["target", "mode"])).await;
        d.dispatch(1, sub(8, &["target"])).await;
        d.dispatch(1, sub(8, &["target"])).await;
        assert_eq!(d.subscribers("target"), vec![7, 8]);

        let reports = d.reports(
            1,
            &vec![
                (Symbol::new("target"), Value::Float(22.0)),
                (Symbol::new("mode"), Value::Int(1)),
            ],
        );
        assert_eq!(reports.len(), 2);
        let (to, Message::Rep { reports: to_7 }) = &reports[0] else {
            panic!("expected rep");
        };
        assert_eq!(*to, 7);
        assert_eq!(to_7[0].0, 1);
        assert_eq!(to_7[0].1.len(), 2);
        let (_, Message::Rep { reports: to_8 }) = &reports[1] else {
            panic!("expected rep");
        };
        assert_eq!(to_8[0].1.len(), 1);

        d.dispatch(
            1,
            Message::Unsub {
                from: 8,
                sym: vec!["target".into()],
            },
        )
        .await;
        assert_eq!(d.subscribers("target"), vec![7]);
        assert_eq!(
            *obj.events.lock().unwrap(),
            vec![
                ("target".to_string(), 7, true),
                ("mode".to_string(), 7, true),
                ("target".to_string(), 8, true),
                ("target".to_string(), 8, false),
            ]
        );
    }

    #[test]
    fn test_descriptors() {
        let (_, d) = dispatcher();
        let names = d.variable_list();
        assert_eq!(names.as_list().unwrap().len(), 6);

        let funcs = d.read(&Symbol::new("funcs"));
        assert_eq!(funcs, Value::List(vec![Value::symbol("boost")]));
        let sigs = d.read(&Symbol::new("funcSigs"));
        assert_eq!(
            sigs.get("boost"),
            Some(&Value::List(vec![
                Value::schema(Format::UInt8),
                Value::schema(Format::Float)
            ]))
        );
        let vars = d.read(&Symbol::new("vars"));
        assert_eq!(vars.get("mode"), Some(&Value::schema(Format::UInt8)));
        assert_eq!(
            d.read(&Symbol::new("events")),
            Value::List(vec![Value::symbol("overheat")])
        );
    }
}
