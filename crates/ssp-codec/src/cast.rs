//! Casting dynamic values to a target format.
//!
//! Every encoder goes through here first, so a value that encodes is a
//! value of its format. Structs come out as maps with symbol keys in field
//! order.

use crate::error::{CodecError, CodecResult};
use crate::format::{check_bits, raw_null, raw_range, Format};
use crate::ontology::Ontology;
use crate::value::{Symbol, Value};

/// Cast `value` to `format`, resolving registered types through `ont`.
pub fn cast_to(ont: &Ontology, value: &Value, format: &Format) -> CodecResult<Value> {
    match format {
        Format::Any => Ok(value.clone()),
        Format::Registered(_) => cast_to(ont, value, &ont.resolve(format)?),
        Format::Null => match value {
            Value::Null => Ok(Value::Null),
            _ => Err(mismatch(value, format)),
        },
        Format::Bool => match value {
            Value::Null | Value::Bool(_) => Ok(value.clone()),
            Value::Int(0) => Ok(Value::Bool(false)),
            Value::Int(1) => Ok(Value::Bool(true)),
            _ => Err(mismatch(value, format)),
        },
        Format::UInt8 | Format::UInt16 | Format::Int16 | Format::Int32 | Format::UInt32 => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let i = match value {
                Value::Int(_) | Value::Bool(_) | Value::Float(_) => value.as_i64(),
                _ => None,
            }
            .ok_or_else(|| mismatch(value, format))?;
            let (lo, hi) = format.int_range().unwrap_or((i64::MIN, i64::MAX));
            if i < lo || i > hi {
                return Err(CodecError::Type(format!("{i} is out of range for {format:?}")));
            }
            Ok(Value::Int(i))
        }
        Format::Float => match value {
            Value::Null => Ok(Value::Null),
            _ => value
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| mismatch(value, format)),
        },
        Format::Symbol => match value {
            Value::Symbol(s) => Ok(Value::Symbol(ont.intern_symbol(s.name()))),
            Value::String(s) => Ok(Value::Symbol(ont.intern_symbol(s))),
            _ => Err(mismatch(value, format)),
        },
        Format::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Symbol(s) => Ok(Value::String(s.name().to_string())),
            _ => Err(mismatch(value, format)),
        },
        Format::Blob => match value {
            Value::Blob(_) => Ok(value.clone()),
            Value::String(s) if s.starts_with("0x") => Ok(Value::Blob(hex::decode(&s[2..])?)),
            _ => Err(mismatch(value, format)),
        },
        Format::Schema => match value {
            Value::Schema(_) => Ok(value.clone()),
            Value::Ref(ix) => match ont.resolve(&Format::Registered(*ix))? {
                Format::Constant(_) => Err(CodecError::Type(format!(
                    "registry index {ix} is a constant, not a type"
                ))),
                _ => Ok(Value::schema(Format::Registered(*ix))),
            },
            _ => Err(mismatch(value, format)),
        },
        Format::Ref => match value {
            Value::Ref(_) => Ok(value.clone()),
            Value::Schema(f) => ont.reg_ix_of(f).map(Value::Ref).ok_or_else(|| {
                CodecError::Type(format!("{f:?} has no registry index"))
            }),
            _ => Err(mismatch(value, format)),
        },
        Format::Constant(c) => {
            if value.approx_eq(c) {
                Ok(c.as_ref().clone())
            } else {
                Err(mismatch(value, format))
            }
        }
        Format::TypedMap { key, value: val } => {
            let entries = value.as_map().ok_or_else(|| mismatch(value, format))?;
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                out.push((cast_to(ont, k, key)?, cast_to(ont, v, val)?));
            }
            Ok(Value::Map(out))
        }
        Format::Struct(fields) => cast_struct(ont, value, fields),
        Format::Tuple(members) => {
            let items = value.as_list().ok_or_else(|| mismatch(value, format))?;
            if items.len() != members.len() {
                return Err(CodecError::Type(format!(
                    "tuple needs {} items, got {}",
                    members.len(),
                    items.len()
                )));
            }
            let out = items
                .iter()
                .zip(members)
                .map(|(item, f)| cast_to(ont, item, f))
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(Value::List(out))
        }
        Format::TypedList { element, count } => {
            let items = value.as_list().ok_or_else(|| mismatch(value, format))?;
            if let Some(n) = count {
                if items.len() != usize::from(*n) {
                    return Err(CodecError::Type(format!(
                        "list of fixed size {n} got {} items",
                        items.len()
                    )));
                }
            } else if items.len() > usize::from(u8::MAX) {
                return Err(CodecError::Type(format!(
                    "list of {} items exceeds 255",
                    items.len()
                )));
            }
            let out = items
                .iter()
                .map(|item| cast_to(ont, item, element))
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(Value::List(out))
        }
        Format::Fixpoint {
            signed,
            bits,
            decimals,
        } => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let v = value.as_f64().ok_or_else(|| mismatch(value, format))?;
            fixpoint_to_raw(*signed, *bits, *decimals, v)?;
            Ok(Value::Float(v))
        }
        Format::Scaled {
            bits,
            signed,
            scale,
            offset,
        } => {
            if value.is_null() {
                return Ok(Value::Null);
            }
            let v = value.as_f64().ok_or_else(|| mismatch(value, format))?;
            scaled_to_raw(*signed, *bits, *scale, *offset, v)?;
            Ok(Value::Float(v))
        }
        Format::Union { options, .. } => {
            let (_, branch) = choose_union_branch(ont, value, options)?;
            Ok(branch)
        }
    }
}

fn cast_struct(ont: &Ontology, value: &Value, fields: &[(Symbol, Format)]) -> CodecResult<Value> {
    let mut out = Vec::with_capacity(fields.len());
    match value {
        Value::Map(entries) => {
            for (k, _) in entries {
                let known = k
                    .as_str()
                    .is_some_and(|name| fields.iter().any(|(f, _)| f.name() == name));
                if !known {
                    return Err(CodecError::Type(format!("struct has no field {k:?}")));
                }
            }
            for (name, f) in fields {
                let field_value = match value.get(name.name()) {
                    Some(v) => cast_to(ont, v, f)?,
                    None => match ont.resolve(f)? {
                        Format::Constant(c) => *c,
                        _ => {
                            return Err(CodecError::Type(format!(
                                "struct field {name} is missing"
                            )))
                        }
                    },
                };
                out.push((Value::Symbol(name.clone()), field_value));
            }
        }
        Value::List(items) => {
            let mut items = items.iter();
            let all_given = value.as_list().map(<[Value]>::len) == Some(fields.len());
            for (name, f) in fields {
                let resolved = ont.resolve(f)?;
                let field_value = match (&resolved, all_given) {
                    (Format::Constant(c), false) => c.as_ref().clone(),
                    _ => {
                        let item = items.next().ok_or_else(|| {
                            CodecError::Type(format!("struct field {name} is missing"))
                        })?;
                        cast_to(ont, item, &resolved)?
                    }
                };
                out.push((Value::Symbol(name.clone()), field_value));
            }
            if items.next().is_some() {
                return Err(CodecError::Type("too many struct fields".into()));
            }
        }
        _ => {
            return Err(CodecError::Type(format!(
                "can't cast {value:?} to a struct"
            )))
        }
    }
    Ok(Value::Map(out))
}

/// Options of a union as (key, branch type) pairs.
///
/// Map options use their keys; list and tuple options use their index.
pub fn union_options(ont: &Ontology, options: &Format) -> CodecResult<Vec<(Value, Format)>> {
    match ont.resolve(options)? {
        Format::Constant(c) => match *c {
            Value::Map(entries) => Ok(entries
                .iter()
                .map(|(k, v)| (k.clone(), Format::from_value(v)))
                .collect()),
            Value::List(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), Format::from_value(v)))
                .collect()),
            other => Err(CodecError::Type(format!(
                "union options must be a map or list, got {other:?}"
            ))),
        },
        Format::Tuple(members) => Ok(members
            .into_iter()
            .enumerate()
            .map(|(i, f)| (Value::Int(i as i64), f))
            .collect()),
        other => Err(CodecError::Type(format!(
            "union options must be a constant, got {other:?}"
        ))),
    }
}

/// First union option that `value` casts to: (key, cast value).
pub fn choose_union_branch(
    ont: &Ontology,
    value: &Value,
    options: &Format,
) -> CodecResult<(Value, Value)> {
    for (key, branch) in union_options(ont, options)? {
        if let Ok(cast) = cast_to(ont, value, &branch) {
            return Ok((key, cast));
        }
    }
    Err(CodecError::Type(format!(
        "{value:?} matches no union option"
    )))
}

/// Raw integer of a fixpoint number. The null sentinel is never produced.
pub fn fixpoint_to_raw(signed: bool, bits: u8, decimals: u8, v: f64) -> CodecResult<i64> {
    check_bits(bits)?;
    if !signed && v < 0.0 {
        return Err(CodecError::Type(format!("unsigned fixpoint can't hold {v}")));
    }
    let raw = (v * 10f64.powi(i32::from(decimals))).round();
    check_raw(signed, bits, raw)
}

pub fn fixpoint_from_raw(decimals: u8, raw: i64) -> f64 {
    raw as f64 / 10f64.powi(i32::from(decimals))
}

pub fn scaled_to_raw(signed: bool, bits: u8, scale: f32, offset: f32, v: f64) -> CodecResult<i64> {
    check_bits(bits)?;
    if scale == 0.0 {
        return Err(CodecError::Type("scaled format with zero scale".into()));
    }
    let raw = ((v - f64::from(offset)) / f64::from(scale)).round();
    check_raw(signed, bits, raw)
}

pub fn scaled_from_raw(scale: f32, offset: f32, raw: i64) -> f64 {
    raw as f64 * f64::from(scale) + f64::from(offset)
}

fn check_raw(signed: bool, bits: u8, raw: f64) -> CodecResult<i64> {
    let (lo, hi) = raw_range(signed, bits);
    let null = raw_null(signed, bits);
    if !raw.is_finite() || raw < lo as f64 || raw > hi as f64 || raw as i64 == null {
        return Err(CodecError::Type(format!(
            "{raw} is not representable in {bits} bits"
        )));
    }
    Ok(raw as i64)
}

fn mismatch(value: &Value, format: &Format) -> CodecError {
    CodecError::Type(format!("can't cast {value:?} to {format:?}"))
}
