//! Built-in types and parameterized formats.

use crate::error::{CodecError, CodecResult};
use crate::value::{Symbol, Value};
use ssp_types::constants::reg;
use ssp_types::RegIx;

/// A type: how a value is laid out when its type is implied.
#[derive(Debug, Clone, PartialEq)]
pub enum Format {
    Null,
    Bool,
    UInt8,
    UInt16,
    Int16,
    Int32,
    UInt32,
    Float,
    Symbol,
    String,
    Blob,
    Schema,
    /// A registry index, written as one byte.
    Ref,
    /// Any value, written as expBin.
    Any,
    /// A fixed value; occupies no bytes.
    Constant(Box<Value>),
    TypedMap {
        key: Box<Format>,
        value: Box<Format>,
    },
    /// Ordered named fields.
    Struct(Vec<(Symbol, Format)>),
    Tuple(Vec<Format>),
    /// `count: None` means the length is written before the elements.
    TypedList {
        element: Box<Format>,
        count: Option<u8>,
    },
    Fixpoint {
        signed: bool,
        bits: u8,
        decimals: u8,
    },
    Scaled {
        bits: u8,
        signed: bool,
        scale: f32,
        offset: f32,
    },
    /// Discriminated choice. `options` resolves to a map (key → type) or a
    /// list/tuple of types (index → type).
    Union {
        options: Box<Format>,
        key: Box<Format>,
    },
    /// An ontology entry at this index.
    Registered(RegIx),
}

impl Format {
    /// `Map`: a typed map of anything to anything.
    pub fn any_map() -> Self {
        Self::TypedMap {
            key: Box::new(Self::Any),
            value: Box::new(Self::Any),
        }
    }

    /// `List`: a variable-length list of anything.
    pub fn any_list() -> Self {
        Self::list_of(Self::Any)
    }

    pub fn list_of(element: Format) -> Self {
        Self::TypedList {
            element: Box::new(element),
            count: None,
        }
    }

    pub fn map_of(key: Format, value: Format) -> Self {
        Self::TypedMap {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn constant(value: Value) -> Self {
        Self::Constant(Box::new(value))
    }

    /// Interprets a value in type position: a schema is its format, a
    /// reference names a registered entry, anything else is a constant.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Schema(f) => f.as_ref().clone(),
            Value::Ref(ix) => Self::Registered(*ix),
            other => Self::constant(other.clone()),
        }
    }

    /// Index of a built-in type, without consulting any registry.
    pub fn builtin_reg_ix(&self) -> Option<RegIx> {
        Some(match self {
            Self::Null => reg::NULL,
            Self::Bool => reg::BOOL,
            Self::UInt8 => reg::UINT8,
            Self::UInt16 => reg::UINT16,
            Self::Int16 => reg::INT16,
            Self::Int32 => reg::INT32,
            Self::UInt32 => reg::UINT32,
            Self::Float => reg::FLOAT,
            Self::Symbol => reg::SYMBOL,
            Self::String => reg::STRING,
            Self::Blob => reg::BLOB,
            Self::Schema => reg::SCHEMA,
            Self::Ref => reg::REF,
            Self::Any => reg::ANY,
            Self::Registered(ix) => *ix,
            Self::TypedMap { key, value } if **key == Self::Any && **value == Self::Any => reg::MAP,
            Self::TypedList {
                element,
                count: None,
            } if **element == Self::Any => reg::LIST,
            _ => return None,
        })
    }

    /// The built-in type stored at `ix`, if `ix` names one.
    pub fn builtin(ix: RegIx) -> Option<Self> {
        Some(match ix {
            reg::NULL => Self::Null,
            reg::BOOL => Self::Bool,
            reg::UINT8 => Self::UInt8,
            reg::UINT16 => Self::UInt16,
            reg::INT16 => Self::Int16,
            reg::INT32 => Self::Int32,
            reg::UINT32 => Self::UInt32,
            reg::FLOAT => Self::Float,
            reg::SYMBOL => Self::Symbol,
            reg::STRING => Self::String,
            reg::BLOB => Self::Blob,
            reg::SCHEMA => Self::Schema,
            reg::REF => Self::Ref,
            reg::ANY => Self::Any,
            reg::MAP => Self::any_map(),
            reg::LIST => Self::any_list(),
            _ => return None,
        })
    }

    /// Label of a built-in type.
    pub fn builtin_label(&self) -> Option<&'static str> {
        Some(match self.builtin_reg_ix()? {
            reg::NULL => "Null",
            reg::BOOL => "Bool",
            reg::UINT8 => "Uint8",
            reg::UINT16 => "Uint16",
            reg::INT16 => "Int16",
            reg::INT32 => "Int32",
            reg::UINT32 => "Uint32",
            reg::FLOAT => "Float",
            reg::SYMBOL => "Symbol",
            reg::STRING => "String",
            reg::BLOB => "Blob",
            reg::SCHEMA => "Schema",
            reg::REF => "Ref",
            reg::ANY => "Any",
            reg::MAP => "Map",
            reg::LIST => "List",
            _ => return None,
        })
    }

    /// Integer range of the fixed-width integer types (null included).
    pub fn int_range(&self) -> Option<(i64, i64)> {
        Some(match self {
            Self::UInt8 => (0, u8::MAX as i64),
            Self::UInt16 => (0, u16::MAX as i64),
            Self::Int16 => (i16::MIN as i64, i16::MAX as i64),
            Self::Int32 => (i32::MIN as i64, i32::MAX as i64),
            Self::UInt32 => (0, u32::MAX as i64),
            _ => return None,
        })
    }

    /// The smallest integer type that holds `i`, in wire preference order.
    pub fn infer_int(i: i64) -> Option<Self> {
        [
            Self::UInt8,
            Self::UInt16,
            Self::Int16,
            Self::UInt32,
            Self::Int32,
        ]
        .into_iter()
        .find(|f| matches!(f.int_range(), Some((lo, hi)) if i >= lo && i <= hi))
    }

    /// Whether a value of this type is a single scalar.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            Self::Null
                | Self::Bool
                | Self::UInt8
                | Self::UInt16
                | Self::Int16
                | Self::Int32
                | Self::UInt32
                | Self::Float
                | Self::Symbol
                | Self::String
                | Self::Blob
                | Self::Schema
                | Self::Ref
                | Self::Fixpoint { .. }
                | Self::Scaled { .. }
        )
    }
}

/// Widths a fixpoint or scaled number may have.
pub fn check_bits(bits: u8) -> CodecResult<u8> {
    match bits {
        8 | 16 | 32 => Ok(bits),
        _ => Err(CodecError::BinaryFormat(format!(
            "unsupported number width {bits}"
        ))),
    }
}

/// Raw null sentinel of an N-bit fixpoint or scaled number. `bits` must
/// have passed [`check_bits`].
pub fn raw_null(signed: bool, bits: u8) -> i64 {
    if signed {
        -(1i64 << (bits - 1))
    } else {
        (1i64 << bits) - 1
    }
}

/// Raw range of an N-bit fixpoint or scaled number, sentinel included.
pub fn raw_range(signed: bool, bits: u8) -> (i64, i64) {
    if signed {
        (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
    } else {
        (0, (1i64 << bits) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_round_trip() {
        for ix in [0u8, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 21, 22, 25, 26] {
            let f = Format::builtin(ix).unwrap();
            assert_eq!(f.builtin_reg_ix(), Some(ix));
            assert!(f.builtin_label().is_some());
        }
        assert!(Format::builtin(reg::STRUCT).is_none());
    }

    #[test]
    fn test_infer_int_order() {
        assert_eq!(Format::infer_int(5), Some(Format::UInt8));
        assert_eq!(Format::infer_int(255), Some(Format::UInt8));
        assert_eq!(Format::infer_int(256), Some(Format::UInt16));
        assert_eq!(Format::infer_int(-1), Some(Format::Int16));
        assert_eq!(Format::infer_int(70_000), Some(Format::UInt32));
        assert_eq!(Format::infer_int(-70_000), Some(Format::Int32));
        assert_eq!(Format::infer_int(1 << 40), None);
    }

    #[test]
    fn test_raw_null_sentinels() {
        assert_eq!(raw_null(true, 16), -32768);
        assert_eq!(raw_null(false, 16), 65535);
        assert_eq!(raw_null(false, 8), 255);
        assert_eq!(raw_null(true, 32), i32::MIN as i64);
    }
}
