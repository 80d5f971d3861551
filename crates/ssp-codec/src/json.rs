//! Conversion between JSON documents and SSP values.
//!
//! JSON has no symbols, blobs or references, so strings carry them:
//! `0x..` is a blob, `SYM<n>` and known symbol names are symbols, `REF<n>`
//! is a reference, and a string wrapped in double quotes stays a string.

use crate::ascii::format_to_ascii;
use crate::ontology::Ontology;
use crate::value::{parse_prefixed_index, Value};
use serde_json::{Map as JsonMap, Number, Value as Json};

pub fn from_json(ont: &Ontology, json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => from_json_str(ont, s),
        Json::Array(items) => Value::List(items.iter().map(|j| from_json(ont, j)).collect()),
        Json::Object(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| (from_json_str(ont, k), from_json(ont, v)))
                .collect(),
        ),
    }
}

fn from_json_str(ont: &Ontology, s: &str) -> Value {
    if let Some(hex_digits) = s.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(hex_digits) {
            return Value::Blob(bytes);
        }
    }
    if let Some(ix) = parse_prefixed_index(s, "REF").and_then(|n| u8::try_from(n).ok()) {
        return Value::Ref(ix);
    }
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        return Value::String(s[1..s.len() - 1].to_string());
    }
    if parse_prefixed_index(s, "SYM").is_some() || ont.symbol_by_name(s).is_some() {
        return Value::Symbol(ont.intern_symbol(s));
    }
    Value::String(s.to_string())
}

pub fn to_json(ont: &Ontology, value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Symbol(s) => Json::String(s.name().to_string()),
        Value::String(s) => Json::String(to_json_str(ont, s)),
        Value::Blob(b) => Json::String(format!("0x{}", hex::encode(b))),
        Value::Ref(ix) => Json::String(format!("REF{ix}")),
        Value::Schema(f) => Json::String(format_to_ascii(ont, f)),
        Value::List(items) => Json::Array(items.iter().map(|v| to_json(ont, v)).collect()),
        Value::Map(entries) => {
            let mut out = JsonMap::new();
            for (k, v) in entries {
                let key = match to_json(ont, k) {
                    Json::String(s) => s,
                    other => other.to_string(),
                };
                out.insert(key, to_json(ont, v));
            }
            Json::Object(out)
        }
    }
}

/// Quotes strings that would otherwise read back as something else.
fn to_json_str(ont: &Ontology, s: &str) -> String {
    match from_json_str(ont, s) {
        Value::String(ref plain) if plain == s => s.to_string(),
        _ => format!("\"{s}\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolInfo;
    use serde_json::json;

    #[test]
    fn test_string_inference() {
        let ont = Ontology::new();
        ont.add_symbol(SymbolInfo::indexed(200, "speed")).unwrap();
        let v = from_json(
            &ont,
            &json!(["0x0102", "SYM200", "REF40", "speed", "\"speed\"", "hello", 3, 2.5]),
        );
        assert_eq!(
            v,
            Value::List(vec![
                Value::Blob(vec![1, 2]),
                Value::symbol("speed"),
                Value::Ref(40),
                Value::symbol("speed"),
                Value::from("speed"),
                Value::from("hello"),
                Value::Int(3),
                Value::Float(2.5),
            ])
        );
    }

    #[test]
    fn test_to_json_quotes_ambiguous_strings() {
        let ont = Ontology::new();
        ont.add_symbol(SymbolInfo::indexed(200, "speed")).unwrap();
        let v = Value::Map(vec![
            (Value::symbol("speed"), Value::from("speed")),
            (Value::Int(4), Value::Blob(vec![0xFF])),
        ]);
        let j = to_json(&ont, &v);
        assert_eq!(j, json!({"speed": "\"speed\"", "4": "0xff"}));
        assert_eq!(from_json(&ont, &j).get("speed"), Some(&Value::from("speed")));
    }
}
