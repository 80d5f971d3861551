//! Ontology text loader.
//!
//! ```text
//! # comment
//! include common.txt
//! SYM200 speed: SSP_SYM_SPEED, Ground speed, m/s, Speed over ground
//! SYM201 overheat event: SSP_SYM_OVERHEAT, Overheat
//! REF40 SSP_NAME_MAP NameMap: TypedMap(Symbol, Any)
//! ```
//!
//! A `REF` definition may span several lines while its brackets are open.

use crate::ascii::parse_value;
use crate::error::{CodecError, CodecResult};
use crate::ontology::Ontology;
use crate::registry::RegistryEntry;
use crate::symbols::{SymbolCategory, SymbolInfo};
use crate::value::parse_prefixed_index;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

pub fn load_str(ont: &Ontology, text: &str, base_dir: Option<&Path>) -> CodecResult<()> {
    let mut visited = HashSet::new();
    load_text(ont, text, base_dir, &mut visited)
}

pub fn load_file(ont: &Ontology, path: &Path) -> CodecResult<()> {
    let mut visited = HashSet::new();
    load_path(ont, path, &mut visited)
}

fn load_path(ont: &Ontology, path: &Path, visited: &mut HashSet<PathBuf>) -> CodecResult<()> {
    let canonical = path
        .canonicalize()
        .map_err(|e| CodecError::Io(format!("{}: {e}", path.display())))?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }
    let text = std::fs::read_to_string(&canonical)
        .map_err(|e| CodecError::Io(format!("{}: {e}", path.display())))?;
    debug!(path = %canonical.display(), "Loading ontology");
    load_text(ont, &text, canonical.parent(), visited)
}

fn load_text(
    ont: &Ontology,
    text: &str,
    base_dir: Option<&Path>,
    visited: &mut HashSet<PathBuf>,
) -> CodecResult<()> {
    let mut lines = text.lines().enumerate();
    while let Some((n, raw)) = lines.next() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let at_line = |e: CodecError| match e {
            CodecError::Parse(msg) => CodecError::Parse(format!("line {}: {msg}", n + 1)),
            CodecError::Conflict(msg) => CodecError::Conflict(format!("line {}: {msg}", n + 1)),
            other => other,
        };

        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        if keyword == "include" {
            let target = rest.trim();
            let path = match base_dir {
                Some(dir) => dir.join(target),
                None => PathBuf::from(target),
            };
            load_path(ont, &path, visited).map_err(at_line)?;
        } else if keyword == "scope" {
            continue;
        } else if let Some(ix) = parse_prefixed_index(keyword, "SYM") {
            load_symbol(ont, ix, rest).map_err(at_line)?;
        } else if let Some(ix) = parse_prefixed_index(keyword, "REF") {
            let mut definition = rest.to_string();
            while open_brackets(&definition) > 0 {
                let Some((_, more)) = lines.next() else {
                    break;
                };
                definition.push(' ');
                definition.push_str(more.trim());
            }
            load_ref(ont, ix, &definition).map_err(at_line)?;
        } else {
            return Err(at_line(CodecError::Parse(format!(
                "unrecognized line \"{line}\""
            ))));
        }
    }
    Ok(())
}

fn load_symbol(ont: &Ontology, index: u64, rest: &str) -> CodecResult<()> {
    let (head, tail) = rest
        .split_once(':')
        .ok_or_else(|| CodecError::Parse("symbol line needs ':'".into()))?;
    let mut head = head.split_whitespace();
    let name = head
        .next()
        .ok_or_else(|| CodecError::Parse("symbol line needs a name".into()))?;
    let category = match head.next() {
        Some(word) => SymbolCategory::parse(word)
            .ok_or_else(|| CodecError::Parse(format!("unknown symbol category {word}")))?,
        None => SymbolCategory::Variable,
    };

    let mut parts = tail.splitn(4, ',').map(str::trim);
    let non_empty = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);
    let info = SymbolInfo {
        index: Some(index),
        name: name.to_string(),
        category,
        c_name: non_empty(parts.next()),
        long_name: non_empty(parts.next()),
        unit: non_empty(parts.next()),
        doc: non_empty(parts.next()),
    };
    ont.add_symbol(info)
}

fn load_ref(ont: &Ontology, index: u64, rest: &str) -> CodecResult<()> {
    let ix = u8::try_from(index)
        .map_err(|_| CodecError::Parse(format!("registry index {index} exceeds 255")))?;
    let (head, definition) = rest
        .split_once(':')
        .ok_or_else(|| CodecError::Parse("REF line needs ':'".into()))?;
    let mut head = head.split_whitespace();
    let c_name = head
        .next()
        .ok_or_else(|| CodecError::Parse("REF line needs a C name".into()))?;
    let label = head.next();

    let value = parse_value(ont, definition.trim())?;
    let mut entry = RegistryEntry::new(ix, value).with_c_name(c_name);
    if let Some(label) = label {
        entry = entry.with_label(label);
    }
    ont.add_entry(entry)
}

/// Bracket depth at the end of `s`, ignoring quoted text.
fn open_brackets(s: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in s.chars() {
        if let Some(q) = quote {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                c if c == q => quote = None,
                _ => {}
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}
