//! Symbol table: indexed symbols from ontologies, plus symbols first met by
//! name whose index is not yet known.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What a symbol denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolCategory {
    #[default]
    Variable,
    Metadata,
    Event,
}

impl SymbolCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" => Some(Self::Variable),
            "metadata" => Some(Self::Metadata),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

/// Everything known about one symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    /// Wire index, once agreed.
    pub index: Option<u64>,
    pub name: String,
    pub category: SymbolCategory,
    pub unit: Option<String>,
    pub long_name: Option<String>,
    pub doc: Option<String>,
    /// Name of the C define generated for this symbol.
    pub c_name: Option<String>,
}

impl SymbolInfo {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn indexed(index: u64, name: &str) -> Self {
        Self {
            index: Some(index),
            ..Self::named(name)
        }
    }

    /// Copy whatever `other` knows into this entry.
    fn merge(&mut self, other: SymbolInfo) {
        if other.index.is_some() {
            self.index = other.index;
        }
        self.name = other.name;
        if other.category != SymbolCategory::Variable {
            self.category = other.category;
        }
        if other.unit.is_some() {
            self.unit = other.unit;
        }
        if other.long_name.is_some() {
            self.long_name = other.long_name;
        }
        if other.doc.is_some() {
            self.doc = other.doc;
        }
        if other.c_name.is_some() {
            self.c_name = other.c_name;
        }
    }
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    by_index: HashMap<u64, SymbolInfo>,
    name_to_index: HashMap<String, u64>,
    unindexed: HashMap<String, SymbolInfo>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a symbol, merging it into an unindexed entry of the same name.
    pub fn add(&mut self, info: SymbolInfo) -> CodecResult<()> {
        let Some(index) = info.index else {
            self.unindexed.entry(info.name.clone()).or_insert(info);
            return Ok(());
        };
        if let Some(prior) = self.by_index.get(&index) {
            if prior.name != info.name {
                return Err(CodecError::Conflict(format!(
                    "symbol index {index} is already \"{}\", can't redefine as \"{}\"",
                    prior.name, info.name
                )));
            }
        }
        if let Some(&prior_ix) = self.name_to_index.get(&info.name) {
            if prior_ix != index {
                return Err(CodecError::Conflict(format!(
                    "symbol \"{}\" already has index {prior_ix}, not {index}",
                    info.name
                )));
            }
        }
        let merged = match self.unindexed.remove(&info.name) {
            Some(mut prior) => {
                prior.merge(info);
                prior
            }
            None => info,
        };
        self.name_to_index.insert(merged.name.clone(), index);
        self.by_index.insert(index, merged);
        Ok(())
    }

    pub fn by_index(&self, index: u64) -> Option<&SymbolInfo> {
        self.by_index.get(&index)
    }

    /// Accepts both plain names and the `SYM<n>` form.
    pub fn by_name(&self, name: &str) -> Option<&SymbolInfo> {
        if let Some(ix) = crate::value::parse_prefixed_index(name, "SYM") {
            return self.by_index(ix);
        }
        if let Some(ix) = self.name_to_index.get(name) {
            return self.by_index.get(ix);
        }
        self.unindexed.get(name)
    }

    pub fn indexed(&self) -> impl Iterator<Item = &SymbolInfo> {
        self.by_index.values()
    }

    pub fn unindexed_names(&self) -> impl Iterator<Item = &str> {
        self.unindexed.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_index.len() + self.unindexed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unindexed_then_indexed_merges() {
        let mut table = SymbolTable::new();
        let mut first = SymbolInfo::named("speed");
        first.unit = Some("m/s".into());
        table.add(first).unwrap();
        assert_eq!(table.by_name("speed").unwrap().index, None);

        let mut indexed = SymbolInfo::indexed(40, "speed");
        indexed.long_name = Some("Speed".into());
        table.add(indexed).unwrap();

        let info = table.by_name("speed").unwrap();
        assert_eq!(info.index, Some(40));
        assert_eq!(info.unit.as_deref(), Some("m/s"));
        assert_eq!(info.long_name.as_deref(), Some("Speed"));
        assert_eq!(table.by_name("SYM40").unwrap().name, "speed");
        assert_eq!(table.unindexed_names().count(), 0);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_index_conflict() {
        let mut table = SymbolTable::new();
        table.add(SymbolInfo::indexed(5, "a")).unwrap();
        table.add(SymbolInfo::indexed(5, "a")).unwrap();
        assert!(matches!(
            table.add(SymbolInfo::indexed(5, "b")),
            Err(CodecError::Conflict(_))
        ));
        assert!(matches!(
            table.add(SymbolInfo::indexed(6, "a")),
            Err(CodecError::Conflict(_))
        ));
    }
}
