//! Values hardcoded by the SSP wire format.
//!
//! Every node on a network must agree on these exactly. A node that sees a
//! different version or magic byte reports it instead of tolerating it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a component (modulus [`COMPONENT_MODULUS`]).
pub type ComponentId = u8;

/// Index into the type/constant registry.
pub type RegIx = u8;

/// Protocol version carried in every `cinfo`.
pub const SSP_VERSION: u8 = 3;

/// Magic byte carried in every `cinfo`.
pub const SSP_MAGIC_BYTE: u8 = 0xA6;

/// Address of a component that is not networked.
pub const INVALID_COMPONENT_ID: ComponentId = 0;
/// Address of the central.
pub const CENTRAL_ID: ComponentId = 1;
/// Link-local pseudo-address: "whoever is on the other end of this link".
pub const LINK_ID: ComponentId = 255;
/// Object ids are reduced modulo this value to find the owning component.
pub const COMPONENT_MODULUS: u8 = 128;
/// Highest id the central hands out.
pub const BIGGEST_REGULAR_COMPONENT_ID: ComponentId = 124;

/// Lowest ticket number handed out for RPC correlation.
pub const FIRST_TICKET: u8 = 1;
/// Highest ticket number handed out for RPC correlation.
pub const LAST_TICKET: u8 = 249;

/// Symbol code meaning "the name follows as a length-prefixed string".
pub const SYMBOL_ASCII: u64 = 1;

/// Returns true for ids the central may assign to a regular component.
pub fn is_valid_component_id(id: ComponentId) -> bool {
    id != INVALID_COMPONENT_ID && id != LINK_ID && id <= BIGGEST_REGULAR_COMPONENT_ID
}

/// Reduces an object id to the id of the component that hosts it.
pub fn component_of(object_id: u8) -> ComponentId {
    object_id % COMPONENT_MODULUS
}

/// Message action codes (the key of the message union).
pub mod action {
    /// Set on the request variants that carry `from` and `tk`.
    pub const REQUEST_REPLY_BIT: u8 = 0x80;

    pub const CINFO: u8 = 4;
    pub const NEW_ID: u8 = 5;
    pub const REPLY: u8 = 6;
    pub const ACK: u8 = 7;
    pub const NACK: u8 = 8;
    pub const REPORT: u8 = 11;
    pub const CALL: u8 = 14;
    pub const UGET: u8 = 15;
    pub const GET: u8 = 16;
    pub const SET: u8 = 17;
    pub const SUB: u8 = 18;
    pub const UNSUB: u8 = 19;
    pub const GET_VAR_LIST: u8 = 26;

    pub const CALL_R: u8 = CALL | REQUEST_REPLY_BIT;
    pub const UGET_R: u8 = UGET | REQUEST_REPLY_BIT;
    pub const SET_R: u8 = SET | REQUEST_REPLY_BIT;
    pub const GET_VAR_LIST_R: u8 = GET_VAR_LIST | REQUEST_REPLY_BIT;
}

/// Registry indices of the built-in types and parameterized formats.
pub mod reg {
    use super::RegIx;

    pub const NULL: RegIx = 0;
    pub const BOOL: RegIx = 1;
    pub const UINT8: RegIx = 2;
    pub const UINT16: RegIx = 3;
    pub const INT16: RegIx = 4;
    pub const INT32: RegIx = 5;
    pub const UINT32: RegIx = 6;
    pub const FLOAT: RegIx = 7;
    pub const SYMBOL: RegIx = 8;
    pub const STRING: RegIx = 9;
    pub const BLOB: RegIx = 10;
    pub const SCHEMA: RegIx = 11;

    pub const CONSTANT: RegIx = 12;
    pub const TYPED_MAP: RegIx = 13;
    pub const STRUCT: RegIx = 14;
    pub const TUPLE: RegIx = 15;
    pub const TYPED_LIST: RegIx = 16;
    pub const TYPED_LIST_FIXED: RegIx = 17;
    pub const FIXPOINT: RegIx = 19;
    pub const SCALED: RegIx = 23;
    pub const UNION: RegIx = 250;

    pub const ANY: RegIx = 21;
    pub const MAP: RegIx = 22;
    pub const LIST: RegIx = 25;
    pub const REF: RegIx = 26;

    /// First index available to ontology-defined schemas.
    pub const FIRST_GLOBAL_SCHEMA: RegIx = 32;
}

/// Null sentinels of the fixed-width primitives.
pub mod null {
    pub const BOOL: u8 = 0xFF;
    pub const UINT8: u8 = 0xFF;
    pub const UINT16: u16 = 0xFFFF;
    pub const INT16: i16 = i16::MIN;
    pub const INT32: i32 = i32::MIN;
    pub const UINT32: u32 = u32::MAX;
    pub const FLOAT: f32 = f32::INFINITY;
}

/// Reason code carried in a `nack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Ok,
    Fail,
    OutOfMemory,
    Busy,
    NotDelivered,
    UnknownVariable,
    ArgumentError,
    DataError,
    Blocked,
    UnknownDefinition,
    External,
    Logical,
    UnknownObject,
    TooBig,
    NotSupported,
    TextParse,
    Timeout,
    EndOfData,
    OutOfResources,
    Yield,
    OkPending,
    /// A code this implementation does not know.
    Other(u8),
}

impl ErrorCode {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Fail,
            2 => Self::OutOfMemory,
            3 => Self::Busy,
            4 => Self::NotDelivered,
            5 => Self::UnknownVariable,
            6 => Self::ArgumentError,
            7 => Self::DataError,
            8 => Self::Blocked,
            9 => Self::UnknownDefinition,
            10 => Self::External,
            11 => Self::Logical,
            12 => Self::UnknownObject,
            13 => Self::TooBig,
            14 => Self::NotSupported,
            15 => Self::TextParse,
            16 => Self::Timeout,
            17 => Self::EndOfData,
            18 => Self::OutOfResources,
            127 => Self::Yield,
            128 => Self::OkPending,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Fail => 1,
            Self::OutOfMemory => 2,
            Self::Busy => 3,
            Self::NotDelivered => 4,
            Self::UnknownVariable => 5,
            Self::ArgumentError => 6,
            Self::DataError => 7,
            Self::Blocked => 8,
            Self::UnknownDefinition => 9,
            Self::External => 10,
            Self::Logical => 11,
            Self::UnknownObject => 12,
            Self::TooBig => 13,
            Self::NotSupported => 14,
            Self::TextParse => 15,
            Self::Timeout => 16,
            Self::EndOfData => 17,
            Self::OutOfResources => 18,
            Self::Yield => 127,
            Self::OkPending => 128,
            Self::Other(c) => c,
        }
    }

    /// Human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Fail => "Unspecified failure",
            Self::OutOfMemory => "Out of memory",
            Self::Busy => "Busy",
            Self::NotDelivered => "Not delivered",
            Self::UnknownVariable => "Unknown variable",
            Self::ArgumentError => "Argument error",
            Self::DataError => "Data error (data seems to be corrupted)",
            Self::Blocked => "Blocked (unmet prerequisites)",
            Self::UnknownDefinition => "Unknown definition",
            Self::External => "External error",
            Self::Logical => "Logical error",
            Self::UnknownObject => "Unknown object",
            Self::TooBig => "Too big data",
            Self::NotSupported => "Feature not supported",
            Self::TextParse => "Text parsing error",
            Self::Timeout => "Timeout",
            Self::EndOfData => "End of data",
            Self::OutOfResources => "Out of resources",
            Self::Yield => "Yield",
            Self::OkPending => "OK Pending",
            Self::Other(_) => "?",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.description())
    }
}

/// How much detail SSP-ASCII output carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Values only.
    Minimal,
    /// Values, with type labels where a reader needs them.
    Terse,
    #[default]
    Normal,
    /// Full type annotations on every value.
    Verbose,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_component_ids() {
        assert!(!is_valid_component_id(INVALID_COMPONENT_ID));
        assert!(is_valid_component_id(CENTRAL_ID));
        assert!(is_valid_component_id(BIGGEST_REGULAR_COMPONENT_ID));
        assert!(!is_valid_component_id(125));
        assert!(!is_valid_component_id(LINK_ID));
    }

    #[test]
    fn test_component_of_object() {
        assert_eq!(component_of(3), 3);
        assert_eq!(component_of(128 + 3), 3);
    }

    #[test]
    fn test_request_reply_codes() {
        assert_eq!(action::CALL_R, 142);
        assert_eq!(action::UGET_R, 143);
        assert_eq!(action::SET_R, 145);
        assert_eq!(action::GET_VAR_LIST_R, 154);
    }

    #[test]
    fn test_error_code_mapping() {
        for code in (0..=18).chain([127, 128]) {
            assert_eq!(ErrorCode::from_code(code).code(), code);
        }
        assert_eq!(ErrorCode::from_code(5), ErrorCode::UnknownVariable);
        assert_eq!(ErrorCode::from_code(99), ErrorCode::Other(99));
        assert_eq!(ErrorCode::ArgumentError.to_string(), "6 Argument error");
    }
}
