//! Protocol message definitions.
//!
//! Every message is a struct whose `a` field is a constant symbol, so the
//! action costs nothing on the wire. `Msg` is a union of those structs keyed
//! by the one-byte action code, and a frame carries `ToMsg`.

use crate::error::{WireError, WireResult};
use ssp_codec::cast::union_options;
use ssp_codec::{Format, Ontology};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Registry indices of the protocol definitions.
pub mod ix {
    use ssp_types::RegIx;

    pub const NAME_MAP: RegIx = 32;
    pub const SYMBOL_LIST: RegIx = 33;
    pub const OID_MAP: RegIx = 34;
    pub const CINFO: RegIx = 35;
    pub const NEWID: RegIx = 36;
    pub const REPLY: RegIx = 37;
    pub const ACK: RegIx = 38;
    pub const NACK: RegIx = 39;
    pub const REP: RegIx = 40;
    pub const CALL: RegIx = 41;
    pub const CALL_R: RegIx = 42;
    pub const GET: RegIx = 43;
    pub const UGET: RegIx = 44;
    pub const UGET_R: RegIx = 45;
    pub const SET: RegIx = 46;
    pub const SET_R: RegIx = 47;
    pub const SUB: RegIx = 48;
    pub const UNSUB: RegIx = 49;
    pub const GET_VAR_LIST_R: RegIx = 50;
    pub const MSGS: RegIx = 51;
    pub const MSG: RegIx = 52;
    pub const TO_MSG: RegIx = 53;
}

/// Symbols of the capability descriptor every component exposes.
pub mod sym {
    pub const VARS: &str = "vars";
    pub const FUNCS: &str = "funcs";
    pub const FUNC_SIGS: &str = "funcSigs";
    pub const EVENTS: &str = "events";
}

pub const PROTOCOL_ONTOLOGY: &str = r#"
# Sparvio Serial Protocol messages
SYM2 vars metadata: SSP_SYM_VARS, Variables
SYM3 funcs metadata: SSP_SYM_FUNCS, Functions
SYM4 funcSigs metadata: SSP_SYM_FUNC_SIGS, Function signatures
SYM5 events metadata: SSP_SYM_EVENTS, Events

REF32 SSP_NAME_MAP NameMap: TypedMap(Symbol, Any)
REF33 SSP_SYMBOL_LIST SymbolList: TypedList(Symbol)
REF34 SSP_OID_MAP OidMap: TypedMap(Uint8, NameMap)

REF35 SSP_MSG_CINFO CInfoMsg: Struct{
    a: cinfo, ver: Uint8, magicByte: Uint8, tk: Uint8, serial: Uint32,
    id: Uint8, parent: Uint8, prio: Uint8, profiles: Uint8, vocabulary: Uint8,
    name: String,
}
# tk is the parent of a link-level newid
REF36 SSP_MSG_NEWID NewidMsg: Struct{a: newid, tk: Uint8, id: Uint8, prio: Uint8, name: String}
REF37 SSP_MSG_REPLY ReplyMsg: Struct{a: reply, from: Uint8, tk: Uint8, b: Any}
REF38 SSP_MSG_ACK AckMsg: Struct{a: ack, from: Uint8, tk: Uint8, b: Any}
REF39 SSP_MSG_NACK NackMsg: Struct{a: nack, from: Uint8, tk: Uint8, code: Uint8}
REF40 SSP_MSG_REP RepMsg: Struct{a: rep, map: OidMap}
REF41 SSP_MSG_CALL CallMsg: Struct{a: call, sym: Symbol, arg: Any}
REF42 SSP_MSG_CALL_R CallMsgR: Struct{a: call, from: Uint8, tk: Uint8, sym: Symbol, arg: Any}
REF43 SSP_MSG_GET GetMsg: Struct{a: get, var: SymbolList}
REF44 SSP_MSG_UGET UGetMsg: Struct{a: uget, var: SymbolList}
REF45 SSP_MSG_UGET_R UGetMsgR: Struct{a: uget, from: Uint8, tk: Uint8, var: SymbolList}
REF46 SSP_MSG_SET SetMsg: Struct{a: set, map: NameMap}
REF47 SSP_MSG_SET_R SetMsgR: Struct{a: set, from: Uint8, tk: Uint8, map: NameMap}
REF48 SSP_MSG_SUB SubMsg: Struct{a: sub, from: Uint8, sym: SymbolList}
REF49 SSP_MSG_UNSUB UnsubMsg: Struct{a: unsub, from: Uint8, sym: SymbolList}
REF50 SSP_MSG_GET_VAR_LIST_R GetVarListMsgR: Struct{a: getVarList, from: Uint8, tk: Uint8}

REF51 SSP_MSGS Msgs: {
    4: CInfoMsg, 5: NewidMsg, 6: ReplyMsg, 7: AckMsg, 8: NackMsg, 11: RepMsg,
    14: CallMsg, 142: CallMsgR, 15: UGetMsg, 143: UGetMsgR, 16: GetMsg,
    17: SetMsg, 145: SetMsgR, 18: SubMsg, 19: UnsubMsg, 154: GetVarListMsgR,
}
REF52 SSP_MSG Msg: Union(Msgs, Uint8)
REF53 SSP_TO_MSG ToMsg: Struct{to: Uint8, msg: Msg}
"#;

static PROTOCOL: OnceLock<Arc<Ontology>> = OnceLock::new();

/// Loads the protocol definitions into `ont`. Loading twice is a no-op.
pub fn install(ont: &Ontology) -> WireResult<()> {
    ont.load_str(PROTOCOL_ONTOLOGY, None)?;
    Ok(())
}

/// Shared ontology holding the protocol definitions on top of the global one.
///
/// Application ontologies should inherit from it.
pub fn protocol_ontology() -> WireResult<Arc<Ontology>> {
    if let Some(ont) = PROTOCOL.get() {
        return Ok(ont.clone());
    }
    let ont = Ontology::inherit(Ontology::global().clone());
    install(&ont)?;
    debug!("Loaded SSP protocol definitions");
    // A racing initializer may win; both hold identical definitions.
    let _ = PROTOCOL.set(Arc::new(ont));
    PROTOCOL
        .get()
        .cloned()
        .ok_or_else(|| WireError::Message("protocol ontology unavailable".into()))
}

/// The message struct for an action code.
pub fn message_format(ont: &Ontology, code: u8) -> WireResult<Format> {
    union_options(ont, &Format::Registered(ix::MSGS))?
        .into_iter()
        .find(|(key, _)| key.as_u8() == Some(code))
        .map(|(_, format)| format)
        .ok_or(WireError::UnknownAction(code))
}
