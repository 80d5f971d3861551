//! Registry: integer index → type or constant.
//!
//! Types are stored as [`Value::Schema`]; anything else is a named
//! constant. Entries are append-only: re-adding an index with the same
//! definition is a no-op, a different definition is a conflict.

use crate::error::{CodecError, CodecResult};
use crate::format::Format;
use crate::value::Value;
use ssp_types::RegIx;
use std::collections::HashMap;
use std::sync::Arc;

/// One registry slot.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub index: RegIx,
    pub value: Arc<Value>,
    /// Name used in SSP-ASCII text.
    pub label: Option<String>,
    /// Name of the generated C define.
    pub c_name: Option<String>,
}

impl RegistryEntry {
    pub fn new(index: RegIx, value: Value) -> Self {
        Self {
            index,
            value: Arc::new(value),
            label: None,
            c_name: None,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_c_name(mut self, c_name: &str) -> Self {
        self.c_name = Some(c_name.to_string());
        self
    }

    /// The type stored here, if this entry is a type.
    pub fn format(&self) -> Option<&Format> {
        match self.value.as_ref() {
            Value::Schema(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<RegIx, RegistryEntry>,
    labels: HashMap<String, RegIx>,
    c_names: HashMap<String, RegIx>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: RegistryEntry) -> CodecResult<()> {
        let ix = entry.index;
        if let Some(prior) = self.entries.get(&ix) {
            if prior.value != entry.value {
                return Err(CodecError::Conflict(format!(
                    "registry index {ix} is already defined differently"
                )));
            }
        }
        if let Some(label) = &entry.label {
            match self.labels.get(label) {
                Some(&other) if other != ix => {
                    return Err(CodecError::Conflict(format!(
                        "label {label} already names index {other}"
                    )))
                }
                _ => {}
            }
        }
        if let Some(c_name) = &entry.c_name {
            match self.c_names.get(c_name) {
                Some(&other) if other != ix => {
                    return Err(CodecError::Conflict(format!(
                        "C name {c_name} already names index {other}"
                    )))
                }
                _ => {}
            }
        }

        if let Some(label) = &entry.label {
            self.labels.insert(label.clone(), ix);
        }
        if let Some(c_name) = &entry.c_name {
            self.c_names.insert(c_name.clone(), ix);
        }
        match self.entries.get_mut(&ix) {
            // Identical redefinition may still contribute a label.
            Some(prior) => {
                if prior.label.is_none() {
                    prior.label = entry.label;
                }
                if prior.c_name.is_none() {
                    prior.c_name = entry.c_name;
                }
            }
            None => {
                self.entries.insert(ix, entry);
            }
        }
        Ok(())
    }

    pub fn get(&self, ix: RegIx) -> Option<&RegistryEntry> {
        self.entries.get(&ix)
    }

    pub fn by_label(&self, label: &str) -> Option<&RegistryEntry> {
        self.labels.get(label).and_then(|ix| self.entries.get(ix))
    }

    pub fn by_c_name(&self, c_name: &str) -> Option<&RegistryEntry> {
        self.c_names.get(c_name).and_then(|ix| self.entries.get(ix))
    }

    /// Index of an entry whose definition equals `value`.
    pub fn find(&self, value: &Value) -> Option<RegIx> {
        let mut hits: Vec<RegIx> = self
            .entries
            .values()
            .filter(|e| e.value.as_ref() == value)
            .map(|e| e.index)
            .collect();
        hits.sort_unstable();
        hits.first().copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_map() -> Value {
        Value::schema(Format::map_of(Format::Symbol, Format::Any))
    }

    #[test]
    fn test_identical_redefinition_is_noop() {
        let mut reg = Registry::new();
        reg.add(RegistryEntry::new(40, name_map()).with_label("NameMap"))
            .unwrap();
        reg.add(RegistryEntry::new(40, name_map())).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.by_label("NameMap").unwrap().index, 40);
    }

    #[test]
    fn test_different_redefinition_conflicts() {
        let mut reg = Registry::new();
        reg.add(RegistryEntry::new(40, name_map())).unwrap();
        let other = Value::schema(Format::list_of(Format::Symbol));
        assert!(matches!(
            reg.add(RegistryEntry::new(40, other)),
            Err(CodecError::Conflict(_))
        ));
    }

    #[test]
    fn test_label_and_c_name_must_be_unique() {
        let mut reg = Registry::new();
        reg.add(
            RegistryEntry::new(40, name_map())
                .with_label("NameMap")
                .with_c_name("NAME_MAP"),
        )
        .unwrap();
        let list = Value::schema(Format::list_of(Format::Symbol));
        assert!(reg
            .add(RegistryEntry::new(41, list.clone()).with_label("NameMap"))
            .is_err());
        assert!(reg
            .add(RegistryEntry::new(41, list).with_c_name("NAME_MAP"))
            .is_err());
        assert_eq!(reg.by_c_name("NAME_MAP").unwrap().index, 40);
    }

    #[test]
    fn test_find_by_definition() {
        let mut reg = Registry::new();
        reg.add(RegistryEntry::new(41, name_map())).unwrap();
        reg.add(RegistryEntry::new(40, name_map())).unwrap();
        assert_eq!(reg.find(&name_map()), Some(40));
        assert_eq!(reg.find(&Value::Int(3)), None);
    }
}
