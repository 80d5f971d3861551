//! SSP-ASCII, the textual form of the value model.
//!
//! ```text
//! {speed: 12.5, name: "probe", raw: 0x0102}
//! [1, -2, null, true, REF40]
//! TypedMap(Symbol, Any)    Struct{x: Int16, y: Int16}    Uint16(300)
//! ```
//!
//! Bare tokens resolve against the ontology: built-in type labels become
//! schemas, registered labels become references, anything else becomes a
//! symbol.

use crate::cast::{cast_to, union_options};
use crate::error::{CodecError, CodecResult};
use crate::format::{check_bits, Format};
use crate::ontology::Ontology;
use crate::value::{parse_prefixed_index, Value};
use ssp_types::constants::reg;
use ssp_types::Verbosity;

const BUILTIN_IXS: [u8; 16] = [
    reg::NULL,
    reg::BOOL,
    reg::UINT8,
    reg::UINT16,
    reg::INT16,
    reg::INT32,
    reg::UINT32,
    reg::FLOAT,
    reg::SYMBOL,
    reg::STRING,
    reg::BLOB,
    reg::SCHEMA,
    reg::ANY,
    reg::MAP,
    reg::LIST,
    reg::REF,
];

/// Parse one SSP-ASCII value. Trailing non-whitespace is an error.
pub fn parse_value(ont: &Ontology, text: &str) -> CodecResult<Value> {
    let mut p = Parser::new(ont, text);
    let value = p.value()?;
    p.skip_ws();
    if p.pos < p.src.len() {
        return Err(p.error("unexpected trailing input"));
    }
    Ok(value)
}

/// Parse text in type position.
pub fn parse_format(ont: &Ontology, text: &str) -> CodecResult<Format> {
    parse_value(ont, text).map(|v| Format::from_value(&v))
}

fn builtin_by_label(label: &str) -> Option<Format> {
    BUILTIN_IXS
        .iter()
        .filter_map(|&ix| Format::builtin(ix))
        .find(|f| f.builtin_label() == Some(label))
}

struct Parser<'a> {
    ont: &'a Ontology,
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(ont: &'a Ontology, text: &'a str) -> Self {
        Self {
            ont,
            src: text.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, msg: &str) -> CodecError {
        CodecError::Parse(format!("{msg} at offset {}", self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: u8) -> CodecResult<()> {
        self.skip_ws();
        if self.peek() != Some(c) {
            return Err(self.error(&format!("expected '{}'", c as char)));
        }
        self.pos += 1;
        Ok(())
    }

    /// Consumes `c` if it's next.
    fn eat(&mut self, c: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn value(&mut self) -> CodecResult<Value> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("expected a value")),
            Some(b'{') => {
                self.pos += 1;
                Ok(Value::Map(self.map_body()?))
            }
            Some(b'[') => {
                self.pos += 1;
                Ok(Value::List(self.seq(b']')?))
            }
            Some(b'(') => Err(self.error("a value can't start with '('")),
            Some(q @ (b'"' | b'\'')) => {
                self.pos += 1;
                Ok(Value::String(self.string(q)?))
            }
            Some(b'0') if self.src.get(self.pos + 1) == Some(&b'x') => self.blob(),
            Some(c) if c.is_ascii_digit() || c == b'-' || c == b'.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let ident = self.ident();
                self.labelled(&ident)
            }
            Some(c) => Err(self.error(&format!("unexpected '{}'", c as char))),
        }
    }

    /// Comma separated values up to `close`. A trailing comma is allowed.
    fn seq(&mut self, close: u8) -> CodecResult<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.value()?);
            if !self.eat(b',') {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    fn map_body(&mut self) -> CodecResult<Vec<(Value, Value)>> {
        let mut entries = Vec::new();
        loop {
            if self.eat(b'}') {
                return Ok(entries);
            }
            let key = self.value()?;
            self.expect(b':')?;
            let value = self.value()?;
            entries.push((key, value));
            if !self.eat(b',') {
                self.expect(b'}')?;
                return Ok(entries);
            }
        }
    }

    fn string(&mut self, quote: u8) -> CodecResult<String> {
        let mut out = Vec::new();
        loop {
            let c = self.peek().ok_or_else(|| self.error("unterminated string"))?;
            self.pos += 1;
            match c {
                c if c == quote => break,
                b'\\' => {
                    let e = self.peek().ok_or_else(|| self.error("unterminated escape"))?;
                    self.pos += 1;
                    match e {
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'n' => out.push(b'\n'),
                        b'x' => {
                            let digits = self
                                .src
                                .get(self.pos..self.pos + 2)
                                .ok_or_else(|| self.error("short \\x escape"))?;
                            let byte = hex::decode(digits)
                                .map_err(|_| self.error("bad \\x escape"))?;
                            out.extend(byte);
                            self.pos += 2;
                        }
                        other => out.push(other),
                    }
                }
                c => out.push(c),
            }
        }
        String::from_utf8(out).map_err(|_| self.error("string is not UTF-8"))
    }

    fn blob(&mut self) -> CodecResult<Value> {
        self.pos += 2;
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
            self.pos += 1;
        }
        Ok(Value::Blob(hex::decode(&self.src[start..self.pos])?))
    }

    fn number(&mut self) -> CodecResult<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, b'-' | b'.' | b'e' | b'E' | b'+'))
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .map_err(|_| self.error("bad number"))?;
        if text.contains(['.', 'e', 'E']) {
            return text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| self.error(&format!("bad number {text}")));
        }
        let i: i64 = text
            .parse()
            .map_err(|_| self.error(&format!("bad number {text}")))?;
        if Format::infer_int(i).is_none() {
            return Err(self.error(&format!("{i} is out of range")));
        }
        Ok(Value::Int(i))
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.')
        {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    /// An identifier, optionally followed by `(..)`, `[..]` or `{..}`.
    fn labelled(&mut self, ident: &str) -> CodecResult<Value> {
        // Brackets must follow the label directly.
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let args = self.seq(b')')?;
                self.constructor(ident, args)
            }
            Some(b'[') => {
                self.pos += 1;
                let items = self.seq(b']')?;
                self.typed_list(ident, items)
            }
            Some(b'{') if ident == "Struct" => {
                self.pos += 1;
                let fields = self
                    .map_body()?
                    .into_iter()
                    .map(|(k, v)| {
                        let name = self.ont.intern_symbol(
                            k.as_str()
                                .ok_or_else(|| self.error("struct field names must be symbols"))?,
                        );
                        Ok((name, Format::from_value(&v)))
                    })
                    .collect::<CodecResult<Vec<_>>>()?;
                Ok(Value::schema(Format::Struct(fields)))
            }
            Some(b'{') => {
                self.pos += 1;
                let entries = self.map_body()?;
                let format = self.label_format(ident)?;
                cast_to(self.ont, &Value::Map(entries), &format)
            }
            _ => Ok(self.bare(ident)),
        }
    }

    fn bare(&self, ident: &str) -> Value {
        match ident {
            "null" => return Value::Null,
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Some(f) = builtin_by_label(ident) {
            return Value::schema(f);
        }
        if let Some(ix) = parse_prefixed_index(ident, "REF").and_then(|n| u8::try_from(n).ok()) {
            return Value::Ref(ix);
        }
        if let Some(entry) = self.ont.by_label(ident) {
            return match entry.format() {
                Some(_) => Value::schema(Format::Registered(entry.index)),
                None => Value::Ref(entry.index),
            };
        }
        Value::Symbol(self.ont.intern_symbol(ident))
    }

    /// The format a label names, for `Label(..)`, `Label[..]`, `Label{..}`.
    fn label_format(&self, ident: &str) -> CodecResult<Format> {
        match self.bare(ident) {
            Value::Schema(f) => Ok(*f),
            Value::Ref(ix) => Ok(Format::Registered(ix)),
            _ => Err(self.error(&format!("{ident} is not a type"))),
        }
    }

    fn constructor(&self, ident: &str, args: Vec<Value>) -> CodecResult<Value> {
        let arity = |n: usize| -> CodecResult<()> {
            if args.len() != n {
                return Err(self.error(&format!("{ident} takes {n} arguments")));
            }
            Ok(())
        };
        let f = |i: usize| Format::from_value(&args[i]);
        let format = match ident {
            "TypedMap" => {
                arity(2)?;
                Format::map_of(f(0), f(1))
            }
            "Tuple" => Format::Tuple(args.iter().map(Format::from_value).collect()),
            "TypedList" if args.len() == 1 => Format::list_of(f(0)),
            "TypedList" | "TypedListFixedSize" => {
                arity(2)?;
                Format::TypedList {
                    element: Box::new(f(1)),
                    count: Some(self.u8_arg(&args[0])?),
                }
            }
            "Fixpoint" => {
                arity(3)?;
                Format::Fixpoint {
                    signed: self.bool_arg(&args[0])?,
                    bits: self.bits_arg(&args[1])?,
                    decimals: self.u8_arg(&args[2])?,
                }
            }
            "Scaled" => {
                arity(4)?;
                Format::Scaled {
                    bits: self.bits_arg(&args[0])?,
                    signed: self.bool_arg(&args[1])?,
                    scale: self.f32_arg(&args[2])?,
                    offset: self.f32_arg(&args[3])?,
                }
            }
            "Union" => {
                arity(2)?;
                Format::Union {
                    options: Box::new(f(0)),
                    key: Box::new(f(1)),
                }
            }
            "Const" | "Constant" => {
                arity(1)?;
                Format::constant(args[0].clone())
            }
            "Schema" => {
                arity(1)?;
                f(0)
            }
            _ => {
                let format = self.label_format(ident)?;
                let arg = match args.len() {
                    1 => args[0].clone(),
                    _ => Value::List(args),
                };
                return cast_to(self.ont, &arg, &format);
            }
        };
        Ok(Value::schema(format))
    }

    fn typed_list(&self, ident: &str, items: Vec<Value>) -> CodecResult<Value> {
        let format = self.label_format(ident)?;
        if let Format::Union { options, .. } = self.ont.resolve(&format)? {
            let [key] = items.as_slice() else {
                return Err(self.error("a union branch takes one key"));
            };
            let branch = union_options(self.ont, &options)?
                .into_iter()
                .find(|(k, _)| k.approx_eq(key))
                .map(|(_, f)| f)
                .ok_or_else(|| self.error(&format!("{key:?} is not an option of {ident}")))?;
            return Ok(Value::schema(branch));
        }
        cast_to(self.ont, &Value::List(items), &format)
    }

    fn u8_arg(&self, v: &Value) -> CodecResult<u8> {
        v.as_u8().ok_or_else(|| self.error(&format!("expected a small integer, got {v:?}")))
    }

    fn bits_arg(&self, v: &Value) -> CodecResult<u8> {
        let bits = self.u8_arg(v)?;
        check_bits(bits).map_err(|_| self.error(&format!("unsupported number width {bits}")))
    }

    fn bool_arg(&self, v: &Value) -> CodecResult<bool> {
        match v {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(self.error(&format!("expected a boolean, got {v:?}"))),
        }
    }

    fn f32_arg(&self, v: &Value) -> CodecResult<f32> {
        v.as_f64()
            .map(|x| x as f32)
            .ok_or_else(|| self.error(&format!("expected a number, got {v:?}")))
    }
}

// -- printing -----------------------------------------------------------

/// Render a value as SSP-ASCII.
pub fn to_ascii(ont: &Ontology, value: &Value, verbosity: Verbosity) -> String {
    let mut out = String::new();
    write_value(ont, &mut out, value, verbosity);
    out
}

/// Render a format as SSP-ASCII.
pub fn format_to_ascii(ont: &Ontology, format: &Format) -> String {
    let mut out = String::new();
    write_format(ont, &mut out, format);
    out
}

fn separators(verbosity: Verbosity) -> (&'static str, &'static str) {
    match verbosity {
        Verbosity::Minimal | Verbosity::Terse => (",", ":"),
        Verbosity::Normal | Verbosity::Verbose => (", ", ": "),
    }
}

fn write_value(ont: &Ontology, out: &mut String, value: &Value, verbosity: Verbosity) {
    let (comma, colon) = separators(verbosity);
    let verbose = verbosity == Verbosity::Verbose;
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => match Format::infer_int(*i).and_then(|f| f.builtin_label()) {
            Some(label) if verbose => out.push_str(&format!("{label}({i})")),
            _ => out.push_str(&i.to_string()),
        },
        Value::Float(f) => {
            let text = float_text(*f);
            if verbose && text != "null" {
                out.push_str(&format!("Float({text})"));
            } else {
                out.push_str(&text);
            }
        }
        Value::Symbol(s) => out.push_str(s.name()),
        Value::String(s) => write_quoted(out, s),
        Value::Blob(b) => {
            out.push_str("0x");
            out.push_str(&hex::encode(b));
        }
        Value::Ref(ix) => match ont.label_of(*ix) {
            Some(label) => out.push_str(&label),
            None => out.push_str(&format!("REF{ix}")),
        },
        Value::Schema(f) => write_format(ont, out, f),
        Value::List(items) => {
            if verbose {
                out.push_str("List");
            }
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(comma);
                }
                write_value(ont, out, item, verbosity);
            }
            out.push(']');
        }
        Value::Map(entries) if verbosity == Verbosity::Minimal => {
            out.push('[');
            for (i, (_, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(comma);
                }
                write_value(ont, out, v, verbosity);
            }
            out.push(']');
        }
        Value::Map(entries) => {
            if verbose {
                out.push_str("Map");
            }
            out.push('{');
            for (i, (k, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(comma);
                }
                write_value(ont, out, k, verbosity);
                out.push_str(colon);
                write_value(ont, out, v, verbosity);
            }
            out.push('}');
        }
    }
}

/// Always carries a decimal point so it reads back as a float.
fn float_text(f: f64) -> String {
    if !f.is_finite() {
        return "null".to_string();
    }
    // Values that came off the wire are single precision.
    let text = if f64::from(f as f32) == f {
        (f as f32).to_string()
    } else {
        f.to_string()
    };
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c if (c as u32) < 0x20 || c as u32 == 0x7F => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_format(ont: &Ontology, out: &mut String, format: &Format) {
    if let Some(label) = format.builtin_label() {
        out.push_str(label);
        return;
    }
    let list = |out: &mut String, items: &[&Format]| {
        for (i, f) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_format(ont, out, f);
        }
    };
    match format {
        Format::Registered(ix) => match ont.label_of(*ix) {
            Some(label) => out.push_str(&label),
            None => out.push_str(&format!("REF{ix}")),
        },
        Format::Constant(v) => {
            out.push_str("Const(");
            write_value(ont, out, v, Verbosity::Normal);
            out.push(')');
        }
        Format::TypedMap { key, value } => {
            out.push_str("TypedMap(");
            list(out, &[&**key, &**value]);
            out.push(')');
        }
        Format::Struct(fields) => {
            out.push_str("Struct{");
            for (i, (name, f)) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(name.name());
                out.push_str(": ");
                write_format(ont, out, f);
            }
            out.push('}');
        }
        Format::Tuple(members) => {
            out.push_str("Tuple(");
            list(out, &members.iter().collect::<Vec<_>>());
            out.push(')');
        }
        Format::TypedList { element, count } => {
            out.push_str("TypedList(");
            if let Some(n) = count {
                out.push_str(&format!("{n}, "));
            }
            write_format(ont, out, element);
            out.push(')');
        }
        Format::Fixpoint {
            signed,
            bits,
            decimals,
        } => out.push_str(&format!("Fixpoint({signed}, {bits}, {decimals})")),
        Format::Scaled {
            bits,
            signed,
            scale,
            offset,
        } => out.push_str(&format!(
            "Scaled({bits}, {signed}, {}, {})",
            float_text(f64::from(*scale)),
            float_text(f64::from(*offset))
        )),
        Format::Union { options, key } => {
            out.push_str("Union(");
            list(out, &[&**options, &**key]);
            out.push(')');
        }
        // Built-ins were handled above.
        other => out.push_str(&format!("{other:?}")),
    }
}
