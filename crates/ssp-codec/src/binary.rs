//! SSP-BIN: impBin, expBin and schemaBin.
//!
//! impBin carries only the payload; the reader must know the type. expBin
//! prefixes the payload with the type's schemaBin. schemaBin is a registry
//! index, followed by inline parameters when the format is parameterized
//! and not itself registered.

use crate::bytes::{ByteReader, ByteWriter};
use crate::cast::{
    cast_to, fixpoint_from_raw, fixpoint_to_raw, scaled_from_raw, scaled_to_raw, union_options,
};
use crate::error::{CodecError, CodecResult};
use crate::format::{check_bits, raw_null, Format};
use crate::ontology::Ontology;
use crate::value::{Symbol, Value};
use ssp_types::constants::{reg, SYMBOL_ASCII};

// -- one-shot helpers ---------------------------------------------------

pub fn encode_imp(ont: &Ontology, value: &Value, format: &Format) -> CodecResult<Vec<u8>> {
    let mut w = ByteWriter::new();
    write_imp(ont, &mut w, value, format)?;
    Ok(w.into_vec())
}

/// Decodes exactly one value; trailing bytes are an error.
pub fn decode_imp(ont: &Ontology, data: &[u8], format: &Format) -> CodecResult<Value> {
    let mut r = ByteReader::new(data);
    let value = read_imp(ont, &mut r, format)?;
    expect_end(&r)?;
    Ok(value)
}

pub fn encode_exp(ont: &Ontology, value: &Value) -> CodecResult<Vec<u8>> {
    let mut w = ByteWriter::new();
    write_exp(ont, &mut w, value)?;
    Ok(w.into_vec())
}

/// expBin with an explicit type instead of the inferred one.
pub fn encode_exp_as(ont: &Ontology, value: &Value, format: &Format) -> CodecResult<Vec<u8>> {
    let mut w = ByteWriter::new();
    write_schema(ont, &mut w, format)?;
    write_imp(ont, &mut w, value, format)?;
    Ok(w.into_vec())
}

pub fn decode_exp(ont: &Ontology, data: &[u8]) -> CodecResult<Value> {
    let mut r = ByteReader::new(data);
    let value = read_exp(ont, &mut r)?;
    expect_end(&r)?;
    Ok(value)
}

pub fn encode_schema(ont: &Ontology, format: &Format) -> CodecResult<Vec<u8>> {
    let mut w = ByteWriter::new();
    write_schema(ont, &mut w, format)?;
    Ok(w.into_vec())
}

pub fn decode_schema(ont: &Ontology, data: &[u8]) -> CodecResult<Format> {
    let mut r = ByteReader::new(data);
    let format = read_schema(ont, &mut r)?;
    expect_end(&r)?;
    Ok(format)
}

fn expect_end(r: &ByteReader<'_>) -> CodecResult<()> {
    if r.has_more() {
        return Err(CodecError::BinaryFormat(format!(
            "{} trailing bytes",
            r.remaining()
        )));
    }
    Ok(())
}

// -- impBin -------------------------------------------------------------

pub fn write_imp(
    ont: &Ontology,
    w: &mut ByteWriter,
    value: &Value,
    format: &Format,
) -> CodecResult<()> {
    match format {
        Format::Registered(_) => write_imp(ont, w, value, &ont.resolve(format)?),
        Format::Any => write_exp(ont, w, value),
        Format::Null => cast_to(ont, value, format).map(|_| ()),
        Format::Constant(_) => cast_to(ont, value, format).map(|_| ()),
        Format::Bool => {
            match cast_to(ont, value, format)? {
                Value::Bool(b) => w.write_u8(u8::from(b)),
                _ => w.write_u8(ssp_types::constants::null::BOOL),
            }
            Ok(())
        }
        Format::UInt8 | Format::UInt16 | Format::Int16 | Format::Int32 | Format::UInt32 => {
            let raw = match cast_to(ont, value, format)? {
                Value::Int(i) => i,
                _ => null_int(format),
            };
            match format {
                Format::UInt8 => w.write_u8(raw as u8),
                Format::UInt16 => w.write_u16(raw as u16),
                Format::Int16 => w.write_i16(raw as i16),
                Format::Int32 => w.write_i32(raw as i32),
                _ => w.write_u32(raw as u32),
            }
            Ok(())
        }
        Format::Float => {
            match cast_to(ont, value, format)? {
                Value::Float(f) => w.write_f32(f as f32),
                _ => w.write_f32(ssp_types::constants::null::FLOAT),
            }
            Ok(())
        }
        Format::Symbol => match cast_to(ont, value, format)? {
            Value::Symbol(s) => write_symbol(ont, w, &s),
            other => Err(CodecError::Type(format!("{other:?} is not a symbol"))),
        },
        Format::String => match cast_to(ont, value, format)? {
            Value::String(s) => w.write_sized(s.as_bytes()),
            other => Err(CodecError::Type(format!("{other:?} is not a string"))),
        },
        Format::Blob => match cast_to(ont, value, format)? {
            Value::Blob(b) => w.write_sized(&b),
            other => Err(CodecError::Type(format!("{other:?} is not a blob"))),
        },
        Format::Schema => match cast_to(ont, value, format)? {
            Value::Schema(f) => write_schema(ont, w, &f),
            other => Err(CodecError::Type(format!("{other:?} is not a schema"))),
        },
        Format::Ref => match cast_to(ont, value, format)? {
            Value::Ref(ix) => {
                w.write_u8(ix);
                Ok(())
            }
            other => Err(CodecError::Type(format!("{other:?} is not a reference"))),
        },
        Format::TypedMap { key, value: val } => {
            let entries = value
                .as_map()
                .ok_or_else(|| CodecError::Type(format!("{value:?} is not a map")))?;
            let n = u8::try_from(entries.len()).map_err(|_| {
                CodecError::Type(format!("map of {} entries exceeds 255", entries.len()))
            })?;
            w.write_u8(n);
            for (k, v) in entries {
                write_imp(ont, w, k, key)?;
                write_imp(ont, w, v, val)?;
            }
            Ok(())
        }
        Format::Struct(fields) => {
            let cast = cast_to(ont, value, format)?;
            for ((_, field_value), (_, field_format)) in cast.as_map().unwrap_or(&[]).iter().zip(fields) {
                write_imp(ont, w, field_value, field_format)?;
            }
            Ok(())
        }
        Format::Tuple(members) => {
            let cast = cast_to(ont, value, format)?;
            for (item, member) in cast.as_list().unwrap_or(&[]).iter().zip(members) {
                write_imp(ont, w, item, member)?;
            }
            Ok(())
        }
        Format::TypedList { element, count } => {
            let items = value
                .as_list()
                .ok_or_else(|| CodecError::Type(format!("{value:?} is not a list")))?;
            match count {
                Some(n) if items.len() != usize::from(*n) => {
                    return Err(CodecError::Type(format!(
                        "list of fixed size {n} got {} items",
                        items.len()
                    )))
                }
                Some(_) => {}
                None => {
                    let n = u8::try_from(items.len()).map_err(|_| {
                        CodecError::Type(format!("list of {} items exceeds 255", items.len()))
                    })?;
                    w.write_u8(n);
                }
            }
            for item in items {
                write_imp(ont, w, item, element)?;
            }
            Ok(())
        }
        Format::Fixpoint {
            signed,
            bits,
            decimals,
        } => {
            let bits = check_bits(*bits)?;
            let raw = match cast_to(ont, value, format)? {
                Value::Float(v) => fixpoint_to_raw(*signed, bits, *decimals, v)?,
                _ => raw_null(*signed, bits),
            };
            write_raw(w, *signed, bits, raw);
            Ok(())
        }
        Format::Scaled {
            bits,
            signed,
            scale,
            offset,
        } => {
            let bits = check_bits(*bits)?;
            let raw = match cast_to(ont, value, format)? {
                Value::Float(v) => scaled_to_raw(*signed, bits, *scale, *offset, v)?,
                _ => raw_null(*signed, bits),
            };
            write_raw(w, *signed, bits, raw);
            Ok(())
        }
        Format::Union { options, key } => {
            for (option_key, branch) in union_options(ont, options)? {
                if let Ok(cast) = cast_to(ont, value, &branch) {
                    write_imp(ont, w, &option_key, key)?;
                    return write_imp(ont, w, &cast, &branch);
                }
            }
            Err(CodecError::Type(format!("{value:?} matches no union option")))
        }
    }
}

pub fn read_imp(ont: &Ontology, r: &mut ByteReader<'_>, format: &Format) -> CodecResult<Value> {
    Ok(match format {
        Format::Registered(_) => return read_imp(ont, r, &ont.resolve(format)?),
        Format::Any => return read_exp(ont, r),
        Format::Null => Value::Null,
        Format::Constant(c) => c.as_ref().clone(),
        Format::Bool => match r.read_u8()? {
            0 => Value::Bool(false),
            ssp_types::constants::null::BOOL => Value::Null,
            _ => Value::Bool(true),
        },
        // Integer sentinels decode as their raw value.
        Format::UInt8 => Value::Int(i64::from(r.read_u8()?)),
        Format::UInt16 => Value::Int(i64::from(r.read_u16()?)),
        Format::Int16 => Value::Int(i64::from(r.read_i16()?)),
        Format::Int32 => Value::Int(i64::from(r.read_i32()?)),
        Format::UInt32 => Value::Int(i64::from(r.read_u32()?)),
        Format::Float => {
            let f = r.read_f32()?;
            if f == ssp_types::constants::null::FLOAT {
                Value::Null
            } else {
                Value::Float(f64::from(f))
            }
        }
        Format::Symbol => Value::Symbol(read_symbol(ont, r)?),
        Format::String => Value::String(utf8(r.read_sized()?)?),
        Format::Blob => Value::Blob(r.read_sized()?),
        Format::Schema => Value::schema(read_schema(ont, r)?),
        Format::Ref => Value::Ref(r.read_u8()?),
        Format::TypedMap { key, value } => {
            let n = r.read_u8()?;
            let mut entries = Vec::with_capacity(usize::from(n));
            for _ in 0..n {
                let k = read_imp(ont, r, key)?;
                let v = read_imp(ont, r, value)?;
                entries.push((k, v));
            }
            Value::Map(entries)
        }
        Format::Struct(fields) => {
            let mut entries = Vec::with_capacity(fields.len());
            for (name, field_format) in fields {
                entries.push((Value::Symbol(name.clone()), read_imp(ont, r, field_format)?));
            }
            Value::Map(entries)
        }
        Format::Tuple(members) => Value::List(
            members
                .iter()
                .map(|m| read_imp(ont, r, m))
                .collect::<CodecResult<_>>()?,
        ),
        Format::TypedList { element, count } => {
            let n = match count {
                Some(n) => *n,
                None => r.read_u8()?,
            };
            let mut items = Vec::with_capacity(usize::from(n));
            for _ in 0..n {
                items.push(read_imp(ont, r, element)?);
            }
            Value::List(items)
        }
        Format::Fixpoint {
            signed,
            bits,
            decimals,
        } => {
            let raw = read_raw(r, *signed, *bits)?;
            if raw == raw_null(*signed, *bits) {
                Value::Null
            } else {
                Value::Float(fixpoint_from_raw(*decimals, raw))
            }
        }
        Format::Scaled {
            bits,
            signed,
            scale,
            offset,
        } => {
            let raw = read_raw(r, *signed, *bits)?;
            if raw == raw_null(*signed, *bits) {
                Value::Null
            } else {
                Value::Float(scaled_from_raw(*scale, *offset, raw))
            }
        }
        Format::Union { options, key } => return read_union(ont, r, options, key).map(|(_, v)| v),
    })
}

/// Reads a union payload: (key, branch value).
pub fn read_union(
    ont: &Ontology,
    r: &mut ByteReader<'_>,
    options: &Format,
    key: &Format,
) -> CodecResult<(Value, Value)> {
    let chosen = read_imp(ont, r, key)?;
    let branch = union_options(ont, options)?
        .into_iter()
        .find(|(k, _)| k.approx_eq(&chosen))
        .map(|(_, f)| f)
        .ok_or_else(|| CodecError::BinaryFormat(format!("union key {chosen:?} is not an option")))?;
    let value = read_imp(ont, r, &branch)?;
    Ok((chosen, value))
}

fn null_int(format: &Format) -> i64 {
    use ssp_types::constants::null;
    match format {
        Format::UInt8 => i64::from(null::UINT8),
        Format::UInt16 => i64::from(null::UINT16),
        Format::Int16 => i64::from(null::INT16),
        Format::Int32 => i64::from(null::INT32),
        _ => i64::from(null::UINT32),
    }
}

fn write_raw(w: &mut ByteWriter, signed: bool, bits: u8, raw: i64) {
    match (signed, bits) {
        (true, 8) => w.write_i8(raw as i8),
        (false, 8) => w.write_u8(raw as u8),
        (true, 16) => w.write_i16(raw as i16),
        (false, 16) => w.write_u16(raw as u16),
        (true, _) => w.write_i32(raw as i32),
        (false, _) => w.write_u32(raw as u32),
    }
}

fn read_raw(r: &mut ByteReader<'_>, signed: bool, bits: u8) -> CodecResult<i64> {
    Ok(match (signed, bits) {
        (true, 8) => i64::from(r.read_i8()?),
        (false, 8) => i64::from(r.read_u8()?),
        (true, 16) => i64::from(r.read_i16()?),
        (false, 16) => i64::from(r.read_u16()?),
        (true, 32) => i64::from(r.read_i32()?),
        (false, 32) => i64::from(r.read_u32()?),
        _ => {
            return Err(CodecError::BinaryFormat(format!(
                "unsupported number width {bits}"
            )))
        }
    })
}

fn utf8(bytes: Vec<u8>) -> CodecResult<String> {
    String::from_utf8(bytes).map_err(|e| CodecError::BinaryFormat(format!("invalid UTF-8: {e}")))
}

// -- symbols ------------------------------------------------------------

/// Agreed index as a varuint, otherwise the literal marker and the name.
pub fn write_symbol(ont: &Ontology, w: &mut ByteWriter, symbol: &Symbol) -> CodecResult<()> {
    match ont.symbol_index(symbol) {
        Some(ix) if ix != SYMBOL_ASCII => {
            w.write_varuint(ix);
            Ok(())
        }
        _ => {
            w.write_varuint(SYMBOL_ASCII);
            w.write_sized(symbol.name().as_bytes())
        }
    }
}

pub fn read_symbol(ont: &Ontology, r: &mut ByteReader<'_>) -> CodecResult<Symbol> {
    let ix = r.read_varuint()?;
    if ix == SYMBOL_ASCII {
        let name = utf8(r.read_sized()?)?;
        return Ok(ont.intern_symbol(&name));
    }
    ont.symbol_from_index(ix)
}

// -- expBin -------------------------------------------------------------

/// The type a value is written as when nothing else is known.
pub fn infer_format(value: &Value) -> CodecResult<Format> {
    Ok(match value {
        Value::Null => Format::Null,
        Value::Bool(_) => Format::Bool,
        Value::Int(i) => Format::infer_int(*i)
            .ok_or_else(|| CodecError::Type(format!("integer {i} fits no wire type")))?,
        Value::Float(_) => Format::Float,
        Value::Symbol(_) => Format::Symbol,
        Value::String(_) => Format::String,
        Value::Blob(_) => Format::Blob,
        Value::Ref(_) => Format::Ref,
        Value::Schema(_) => Format::Schema,
        Value::List(_) => Format::any_list(),
        Value::Map(_) => Format::any_map(),
    })
}

pub fn write_exp(ont: &Ontology, w: &mut ByteWriter, value: &Value) -> CodecResult<()> {
    let format = infer_format(value)?;
    write_schema(ont, w, &format)?;
    write_imp(ont, w, value, &format)
}

pub fn read_exp(ont: &Ontology, r: &mut ByteReader<'_>) -> CodecResult<Value> {
    let format = read_schema(ont, r)?;
    read_imp(ont, r, &format)
}

// -- schemaBin ----------------------------------------------------------

pub fn write_schema(ont: &Ontology, w: &mut ByteWriter, format: &Format) -> CodecResult<()> {
    if let Some(ix) = ont.reg_ix_of(format) {
        w.write_u8(ix);
        return Ok(());
    }
    match format {
        Format::Constant(c) => {
            w.write_u8(reg::CONSTANT);
            write_exp(ont, w, c)
        }
        Format::TypedMap { key, value } => {
            w.write_u8(reg::TYPED_MAP);
            w.write_u8(member_ix(ont, key)?);
            w.write_u8(member_ix(ont, value)?);
            Ok(())
        }
        Format::Struct(fields) => {
            w.write_u8(reg::STRUCT);
            w.write_u8(count_u8(fields.len())?);
            for (name, f) in fields {
                write_symbol(ont, w, name)?;
                w.write_u8(member_ix(ont, f)?);
            }
            Ok(())
        }
        Format::Tuple(members) => {
            w.write_u8(reg::TUPLE);
            w.write_u8(count_u8(members.len())?);
            for m in members {
                w.write_u8(member_ix(ont, m)?);
            }
            Ok(())
        }
        Format::TypedList {
            element,
            count: None,
        } => {
            w.write_u8(reg::TYPED_LIST);
            w.write_u8(member_ix(ont, element)?);
            Ok(())
        }
        Format::TypedList {
            element,
            count: Some(n),
        } => {
            w.write_u8(reg::TYPED_LIST_FIXED);
            w.write_u8(*n);
            w.write_u8(member_ix(ont, element)?);
            Ok(())
        }
        Format::Fixpoint {
            signed,
            bits,
            decimals,
        } => {
            w.write_u8(reg::FIXPOINT);
            w.write_u8(u8::from(*signed));
            w.write_u8(*bits);
            w.write_u8(*decimals);
            Ok(())
        }
        Format::Scaled {
            bits,
            signed,
            scale,
            offset,
        } => {
            w.write_u8(reg::SCALED);
            w.write_u8(*bits);
            w.write_u8(u8::from(*signed));
            w.write_f32(*scale);
            w.write_f32(*offset);
            Ok(())
        }
        Format::Union { options, key } => {
            w.write_u8(reg::UNION);
            w.write_u8(member_ix(ont, options)?);
            w.write_u8(member_ix(ont, key)?);
            Ok(())
        }
        other => Err(CodecError::BinaryFormat(format!(
            "{other:?} has no schema encoding"
        ))),
    }
}

pub fn read_schema(ont: &Ontology, r: &mut ByteReader<'_>) -> CodecResult<Format> {
    let mut ix = r.read_u8()?;
    while ix == reg::ANY && r.has_more() {
        ix = r.read_u8()?;
    }
    Ok(match ix {
        reg::CONSTANT => Format::constant(read_exp(ont, r)?),
        reg::TYPED_MAP => {
            let key = read_member(ont, r)?;
            let value = read_member(ont, r)?;
            Format::map_of(key, value)
        }
        reg::STRUCT => {
            let n = r.read_u8()?;
            let mut fields = Vec::with_capacity(usize::from(n));
            for _ in 0..n {
                let name = read_symbol(ont, r)?;
                fields.push((name, read_member(ont, r)?));
            }
            Format::Struct(fields)
        }
        reg::TUPLE => {
            let n = r.read_u8()?;
            Format::Tuple(
                (0..n)
                    .map(|_| read_member(ont, r))
                    .collect::<CodecResult<_>>()?,
            )
        }
        reg::TYPED_LIST => Format::list_of(read_member(ont, r)?),
        reg::TYPED_LIST_FIXED => {
            let n = r.read_u8()?;
            Format::TypedList {
                element: Box::new(read_member(ont, r)?),
                count: Some(n),
            }
        }
        reg::FIXPOINT => {
            let signed = r.read_u8()? != 0;
            let bits = read_bits(r)?;
            let decimals = r.read_u8()?;
            Format::Fixpoint {
                signed,
                bits,
                decimals,
            }
        }
        reg::SCALED => {
            let bits = read_bits(r)?;
            let signed = r.read_u8()? != 0;
            let scale = r.read_f32()?;
            let offset = r.read_f32()?;
            Format::Scaled {
                bits,
                signed,
                scale,
                offset,
            }
        }
        reg::UNION => {
            let options = read_member(ont, r)?;
            let key = read_member(ont, r)?;
            Format::Union {
                options: Box::new(options),
                key: Box::new(key),
            }
        }
        _ => member_format(ont, ix)?,
    })
}

fn read_bits(r: &mut ByteReader<'_>) -> CodecResult<u8> {
    check_bits(r.read_u8()?)
}

/// Member types are referenced by index only.
fn read_member(ont: &Ontology, r: &mut ByteReader<'_>) -> CodecResult<Format> {
    let ix = r.read_u8()?;
    member_format(ont, ix)
}

fn member_format(ont: &Ontology, ix: u8) -> CodecResult<Format> {
    if is_format_constructor(ix) {
        return Err(CodecError::BinaryFormat(format!(
            "format index {ix} can't be used as a member type"
        )));
    }
    if let Some(builtin) = Format::builtin(ix) {
        return Ok(builtin);
    }
    if ont.entry(ix).is_some() {
        return Ok(Format::Registered(ix));
    }
    Err(CodecError::UnknownRegIx(ix))
}

fn member_ix(ont: &Ontology, format: &Format) -> CodecResult<u8> {
    ont.reg_ix_of(format).ok_or_else(|| {
        CodecError::BinaryFormat(format!("member type {format:?} has no registry index"))
    })
}

fn is_format_constructor(ix: u8) -> bool {
    matches!(
        ix,
        reg::CONSTANT
            | reg::TYPED_MAP
            | reg::STRUCT
            | reg::TUPLE
            | reg::TYPED_LIST
            | reg::TYPED_LIST_FIXED
            | reg::FIXPOINT
            | reg::SCALED
            | reg::UNION
    )
}

fn count_u8(n: usize) -> CodecResult<u8> {
    u8::try_from(n).map_err(|_| CodecError::BinaryFormat(format!("{n} members exceed 255")))
}
