//! Protocol messages.
//!
//! A [`Message`] is the typed form of one `Msg` union branch. Frames carry
//! it as `to` (one byte), the action code, then the branch struct in impBin.

use crate::error::{WireError, WireResult};
use crate::protocol::{ix, message_format};
use ssp_codec::binary::{read_union, write_imp};
use ssp_codec::bytes::{ByteReader, ByteWriter};
use ssp_codec::{Format, Ontology, Symbol, Value};
use ssp_types::constants::{action, SSP_MAGIC_BYTE, SSP_VERSION};
use ssp_types::{ComponentId, ErrorCode};
use std::fmt;

/// Symbol → value pairs, in order.
pub type NameMap = Vec<(Symbol, Value)>;

/// Where the answer to a request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTo {
    pub from: ComponentId,
    pub tk: u8,
}

/// A component's announcement of itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub version: u8,
    pub magic: u8,
    /// Parent link index when forwarded to the central, otherwise 0.
    pub tk: u8,
    pub serial: u32,
    pub id: ComponentId,
    pub parent: ComponentId,
    pub priority: u8,
    pub profiles: u8,
    pub vocabulary: u8,
    pub name: String,
}

impl ComponentInfo {
    pub fn new(serial: u32, id: ComponentId, priority: u8, name: impl Into<String>) -> Self {
        Self {
            version: SSP_VERSION,
            magic: SSP_MAGIC_BYTE,
            tk: 0,
            serial,
            id,
            parent: 0,
            priority,
            profiles: 0,
            vocabulary: 0,
            name: name.into(),
        }
    }
}

/// Address assignment.
///
/// Sent over a link, `tk` is the new parent of the receiver. Sent to a
/// component, `tk` is the index of the link the neighbor hangs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewId {
    pub tk: u8,
    pub id: ComponentId,
    pub priority: u8,
    /// Empty keeps the current name.
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Cinfo(ComponentInfo),
    Newid(NewId),
    Reply {
        from: ComponentId,
        tk: u8,
        body: Value,
    },
    /// Progress signal. Does not release the ticket.
    Ack {
        from: ComponentId,
        tk: u8,
        body: Value,
    },
    Nack {
        from: ComponentId,
        tk: u8,
        code: ErrorCode,
    },
    /// Reports keyed by object id.
    Rep {
        reports: Vec<(u8, NameMap)>,
    },
    Call {
        reply: Option<ReplyTo>,
        sym: Symbol,
        arg: Value,
    },
    Get {
        var: Vec<Symbol>,
    },
    Uget {
        reply: Option<ReplyTo>,
        var: Vec<Symbol>,
    },
    Set {
        reply: Option<ReplyTo>,
        map: NameMap,
    },
    Sub {
        from: ComponentId,
        sym: Vec<Symbol>,
    },
    Unsub {
        from: ComponentId,
        sym: Vec<Symbol>,
    },
    GetVarList {
        reply: ReplyTo,
    },
}

impl Message {
    /// Key of this message in the `Msg` union.
    pub fn action_code(&self) -> u8 {
        let ticketed = |code: u8, reply: &Option<ReplyTo>| match reply {
            Some(_) => code | action::REQUEST_REPLY_BIT,
            None => code,
        };
        match self {
            Self::Cinfo(_) => action::CINFO,
            Self::Newid(_) => action::NEW_ID,
            Self::Reply { .. } => action::REPLY,
            Self::Ack { .. } => action::ACK,
            Self::Nack { .. } => action::NACK,
            Self::Rep { .. } => action::REPORT,
            Self::Call { reply, .. } => ticketed(action::CALL, reply),
            Self::Get { .. } => action::GET,
            Self::Uget { reply, .. } => ticketed(action::UGET, reply),
            Self::Set { reply, .. } => ticketed(action::SET, reply),
            Self::Sub { .. } => action::SUB,
            Self::Unsub { .. } => action::UNSUB,
            Self::GetVarList { .. } => action::GET_VAR_LIST_R,
        }
    }

    /// The `a` symbol of this message.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cinfo(_) => "cinfo",
            Self::Newid(_) => "newid",
            Self::Reply { .. } => "reply",
            Self::Ack { .. } => "ack",
            Self::Nack { .. } => "nack",
            Self::Rep { .. } => "rep",
            Self::Call { .. } => "call",
            Self::Get { .. } => "get",
            Self::Uget { .. } => "uget",
            Self::Set { .. } => "set",
            Self::Sub { .. } => "sub",
            Self::Unsub { .. } => "unsub",
            Self::GetVarList { .. } => "getVarList",
        }
    }

    /// Ticket of a request or an answer.
    pub fn ticket(&self) -> Option<u8> {
        match self {
            Self::Reply { tk, .. } | Self::Ack { tk, .. } | Self::Nack { tk, .. } => Some(*tk),
            _ => self.reply_to().map(|r| r.tk),
        }
    }

    /// Sender address, where the message carries one.
    pub fn from(&self) -> Option<ComponentId> {
        match self {
            Self::Reply { from, .. }
            | Self::Ack { from, .. }
            | Self::Nack { from, .. }
            | Self::Sub { from, .. }
            | Self::Unsub { from, .. } => Some(*from),
            _ => self.reply_to().map(|r| r.from),
        }
    }

    pub fn reply_to(&self) -> Option<ReplyTo> {
        match self {
            Self::Call { reply, .. } | Self::Uget { reply, .. } | Self::Set { reply, .. } => {
                *reply
            }
            Self::GetVarList { reply } => Some(*reply),
            _ => None,
        }
    }

    /// Attaches a reply address. Returns false for messages that can't carry one.
    pub fn set_reply(&mut self, to: ReplyTo) -> bool {
        match self {
            Self::Call { reply, .. } | Self::Uget { reply, .. } | Self::Set { reply, .. } => {
                *reply = Some(to);
                true
            }
            Self::GetVarList { reply } => {
                *reply = to;
                true
            }
            _ => false,
        }
    }

    /// The branch struct as a codec value.
    pub fn to_value(&self) -> Value {
        let mut fields = vec![field("a", Value::symbol(self.name()))];
        let reply = |fields: &mut Vec<(Value, Value)>, reply: &Option<ReplyTo>| {
            if let Some(r) = reply {
                fields.push(field("from", r.from));
                fields.push(field("tk", r.tk));
            }
        };
        match self {
            Self::Cinfo(c) => fields.extend([
                field("ver", c.version),
                field("magicByte", c.magic),
                field("tk", c.tk),
                field("serial", c.serial),
                field("id", c.id),
                field("parent", c.parent),
                field("prio", c.priority),
                field("profiles", c.profiles),
                field("vocabulary", c.vocabulary),
                field("name", c.name.as_str()),
            ]),
            Self::Newid(n) => fields.extend([
                field("tk", n.tk),
                field("id", n.id),
                field("prio", n.priority),
                field("name", n.name.as_str()),
            ]),
            Self::Reply { from, tk, body } | Self::Ack { from, tk, body } => fields.extend([
                field("from", *from),
                field("tk", *tk),
                field("b", body.clone()),
            ]),
            Self::Nack { from, tk, code } => fields.extend([
                field("from", *from),
                field("tk", *tk),
                field("code", code.code()),
            ]),
            Self::Rep { reports } => {
                let map = reports
                    .iter()
                    .map(|(oid, names)| (Value::from(*oid), name_map_value(names)))
                    .collect();
                fields.push(field("map", Value::Map(map)));
            }
            Self::Call { reply: r, sym, arg } => {
                reply(&mut fields, r);
                fields.push(field("sym", sym.clone()));
                fields.push(field("arg", arg.clone()));
            }
            Self::Get { var } => fields.push(field("var", symbol_list_value(var))),
            Self::Uget { reply: r, var } => {
                reply(&mut fields, r);
                fields.push(field("var", symbol_list_value(var)));
            }
            Self::Set { reply: r, map } => {
                reply(&mut fields, r);
                fields.push(field("map", name_map_value(map)));
            }
            Self::Sub { from, sym } | Self::Unsub { from, sym } => fields.extend([
                field("from", *from),
                field("sym", symbol_list_value(sym)),
            ]),
            Self::GetVarList { reply: r } => reply(&mut fields, &Some(*r)),
        }
        Value::Map(fields)
    }

    /// Builds a message from the decoded struct of union branch `code`.
    pub fn from_parts(code: u8, value: &Value) -> WireResult<Self> {
        let f = Fields(value);
        let reply = || -> WireResult<ReplyTo> {
            Ok(ReplyTo {
                from: f.u8("from")?,
                tk: f.u8("tk")?,
            })
        };
        Ok(match code {
            action::CINFO => Self::Cinfo(ComponentInfo {
                version: f.u8("ver")?,
                magic: f.u8("magicByte")?,
                tk: f.u8("tk")?,
                serial: f.u32("serial")?,
                id: f.u8("id")?,
                parent: f.u8("parent")?,
                priority: f.u8("prio")?,
                profiles: f.u8("profiles")?,
                vocabulary: f.u8("vocabulary")?,
                name: f.string("name")?,
            }),
            action::NEW_ID => Self::Newid(NewId {
                tk: f.u8("tk")?,
                id: f.u8("id")?,
                priority: f.u8("prio")?,
                name: f.string("name")?,
            }),
            action::REPLY => Self::Reply {
                from: f.u8("from")?,
                tk: f.u8("tk")?,
                body: f.get("b")?.clone(),
            },
            action::ACK => Self::Ack {
                from: f.u8("from")?,
                tk: f.u8("tk")?,
                body: f.get("b")?.clone(),
            },
            action::NACK => Self::Nack {
                from: f.u8("from")?,
                tk: f.u8("tk")?,
                code: ErrorCode::from_code(f.u8("code")?),
            },
            action::REPORT => {
                let entries = f
                    .get("map")?
                    .as_map()
                    .ok_or_else(|| bad("map", "a map"))?;
                let reports = entries
                    .iter()
                    .map(|(oid, names)| {
                        let oid = oid.as_u8().ok_or_else(|| bad("map", "object id keys"))?;
                        Ok((oid, name_map(names, "map")?))
                    })
                    .collect::<WireResult<_>>()?;
                Self::Rep { reports }
            }
            action::CALL | action::CALL_R => Self::Call {
                reply: (code == action::CALL_R).then(reply).transpose()?,
                sym: f.symbol("sym")?,
                arg: f.get("arg")?.clone(),
            },
            action::GET => Self::Get {
                var: f.symbols("var")?,
            },
            action::UGET | action::UGET_R => Self::Uget {
                reply: (code == action::UGET_R).then(reply).transpose()?,
                var: f.symbols("var")?,
            },
            action::SET | action::SET_R => Self::Set {
                reply: (code == action::SET_R).then(reply).transpose()?,
                map: name_map(f.get("map")?, "map")?,
            },
            action::SUB => Self::Sub {
                from: f.u8("from")?,
                sym: f.symbols("sym")?,
            },
            action::UNSUB => Self::Unsub {
                from: f.u8("from")?,
                sym: f.symbols("sym")?,
            },
            action::GET_VAR_LIST_R => Self::GetVarList { reply: reply()? },
            other => return Err(WireError::UnknownAction(other)),
        })
    }

    /// Encodes `to` plus this message.
    pub fn encode(&self, ont: &Ontology, to: ComponentId) -> WireResult<Vec<u8>> {
        let code = self.action_code();
        let branch = message_format(ont, code)?;
        let mut w = ByteWriter::new();
        w.write_u8(to);
        w.write_u8(code);
        write_imp(ont, &mut w, &self.to_value(), &branch)?;
        Ok(w.into_vec())
    }

    /// Decodes a destination and a message. Trailing bytes are an error.
    pub fn decode(ont: &Ontology, data: &[u8]) -> WireResult<(ComponentId, Self)> {
        let mut r = ByteReader::new(data);
        let to = r.read_u8()?;
        let (key, value) = read_union(ont, &mut r, &Format::Registered(ix::MSGS), &Format::UInt8)?;
        if r.has_more() {
            return Err(WireError::Frame(format!(
                "{} trailing bytes after message",
                r.remaining()
            )));
        }
        let code = key
            .as_u8()
            .ok_or_else(|| WireError::Message(format!("bad action key {key:?}")))?;
        Ok((to, Self::from_parts(code, &value)?))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        if let Some(tk) = self.ticket() {
            write!(f, " tk={tk}")?;
        }
        if let Some(from) = self.from() {
            write!(f, " from={from}")?;
        }
        Ok(())
    }
}

fn field(name: &str, value: impl Into<Value>) -> (Value, Value) {
    (Value::symbol(name), value.into())
}

fn name_map_value(map: &NameMap) -> Value {
    Value::Map(
        map.iter()
            .map(|(k, v)| (Value::Symbol(k.clone()), v.clone()))
            .collect(),
    )
}

fn symbol_list_value(symbols: &[Symbol]) -> Value {
    Value::List(symbols.iter().cloned().map(Value::Symbol).collect())
}

fn bad(name: &str, expected: &str) -> WireError {
    WireError::Message(format!("field {name} must be {expected}"))
}

fn name_map(value: &Value, name: &str) -> WireResult<NameMap> {
    value
        .as_map()
        .ok_or_else(|| bad(name, "a name map"))?
        .iter()
        .map(|(k, v)| match k {
            Value::Symbol(s) => Ok((s.clone(), v.clone())),
            Value::String(s) => Ok((Symbol::new(s), v.clone())),
            _ => Err(bad(name, "a map with symbol keys")),
        })
        .collect()
}

/// Field access on a decoded struct.
struct Fields<'a>(&'a Value);

impl Fields<'_> {
    fn get(&self, name: &str) -> WireResult<&Value> {
        self.0
            .get(name)
            .ok_or_else(|| WireError::Message(format!("missing field {name}")))
    }

    fn u8(&self, name: &str) -> WireResult<u8> {
        self.get(name)?.as_u8().ok_or_else(|| bad(name, "a Uint8"))
    }

    fn u32(&self, name: &str) -> WireResult<u32> {
        self.get(name)?
            .as_i64()
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| bad(name, "a Uint32"))
    }

    fn string(&self, name: &str) -> WireResult<String> {
        match self.get(name)? {
            Value::String(s) => Ok(s.clone()),
            Value::Null => Ok(String::new()),
            _ => Err(bad(name, "a string")),
        }
    }

    fn symbol(&self, name: &str) -> WireResult<Symbol> {
        match self.get(name)? {
            Value::Symbol(s) => Ok(s.clone()),
            Value::String(s) => Ok(Symbol::new(s)),
            _ => Err(bad(name, "a symbol")),
        }
    }

    fn symbols(&self, name: &str) -> WireResult<Vec<Symbol>> {
        self.get(name)?
            .as_list()
            .ok_or_else(|| bad(name, "a symbol list"))?
            .iter()
            .map(|v| match v {
                Value::Symbol(s) => Ok(s.clone()),
                _ => Err(bad(name, "a symbol list")),
            })
            .collect()
    }
}
