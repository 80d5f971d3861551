//! The dynamic SSP value model.
//!
//! Integers don't carry their wire width. The width is chosen by the implied
//! type on encode, or inferred as the smallest fitting type for expBin.
//! Structs decode to [`Value::Map`] with symbol keys, tuples to
//! [`Value::List`]. Ordered maps keep their entry order.

use crate::format::Format;
use ssp_types::RegIx;
use std::fmt;
use std::sync::Arc;

/// A named variable, event or enumeration identifier.
///
/// Symbols compare by name. A symbol whose name isn't known is named
/// `SYM<index>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// Name for a symbol known only by index.
    pub fn from_index(index: u64) -> Self {
        Self::new(format!("SYM{index}"))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// The index encoded in a `SYM<n>` name, if this is one.
    pub fn literal_index(&self) -> Option<u64> {
        parse_prefixed_index(&self.0, "SYM")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Parses `<prefix><digits>` such as `SYM12` or `REF40`.
pub(crate) fn parse_prefixed_index(s: &str, prefix: &str) -> Option<u64> {
    let digits = s.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Any SSP value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Symbol(Symbol),
    String(String),
    Blob(Vec<u8>),
    /// Reference to a registry entry.
    Ref(RegIx),
    /// A type used as a value.
    Schema(Box<Format>),
    List(Vec<Value>),
    /// Ordered key/value pairs.
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn symbol(name: &str) -> Self {
        Self::Symbol(Symbol::new(name))
    }

    pub fn schema(format: Format) -> Self {
        Self::Schema(Box::new(format))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        self.as_i64().and_then(|i| u8::try_from(i).ok())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Text of a string or the name of a symbol.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Symbol(s) => Some(s.name()),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Self::Map(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a map entry whose key is a symbol or string named `name`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(name))
            .map(|(_, v)| v)
    }

    /// Looks up a map entry by key, comparing numerically where needed.
    pub fn lookup(&self, key: &Value) -> Option<&Value> {
        match self {
            Self::Map(items) => items
                .iter()
                .find(|(k, _)| k.approx_eq(key))
                .map(|(_, v)| v),
            Self::List(items) => {
                let ix = usize::try_from(key.as_i64()?).ok()?;
                items.get(ix)
            }
            _ => None,
        }
    }

    /// Structural equality where numbers compare by closeness.
    pub fn approx_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(_), _) | (_, Self::Float(_)) => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => is_close(a, b),
                _ => false,
            },
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.approx_eq(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka.approx_eq(kb) && va.approx_eq(vb))
            }
            (Self::Symbol(a), Self::String(b)) | (Self::String(b), Self::Symbol(a)) => {
                a.name() == b
            }
            _ => self == other,
        }
    }
}

/// Closeness at single-precision resolution.
pub fn is_close(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    let diff = (a - b).abs();
    diff <= 1e-9 || diff <= 1e-6 * a.abs().max(b.abs())
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u8> for Value {
    fn from(i: u8) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Self::Symbol(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_literal_index() {
        assert_eq!(Symbol::from_index(12).literal_index(), Some(12));
        assert_eq!(Symbol::new("SYMBOLIC").literal_index(), None);
        assert_eq!(Symbol::new("speed").literal_index(), None);
    }

    #[test]
    fn test_approx_eq_numbers() {
        assert!(Value::Float(0.1 + 0.2).approx_eq(&Value::Float(0.3)));
        assert!(Value::Int(3).approx_eq(&Value::Float(3.0)));
        assert!(!Value::Int(3).approx_eq(&Value::Int(4)));
        assert!(Value::Float(12.34).approx_eq(&Value::Float(12.34f32 as f64)));
    }

    #[test]
    fn test_map_lookup() {
        let map = Value::Map(vec![
            (Value::symbol("a"), Value::Int(1)),
            (Value::Int(4), Value::from("four")),
        ]);
        assert_eq!(map.get("a"), Some(&Value::Int(1)));
        assert_eq!(map.lookup(&Value::Int(4)), Some(&Value::from("four")));
        assert_eq!(map.get("b"), None);
        let list = Value::List(vec![Value::Null, Value::Bool(true)]);
        assert_eq!(list.lookup(&Value::Int(1)), Some(&Value::Bool(true)));
    }
}
