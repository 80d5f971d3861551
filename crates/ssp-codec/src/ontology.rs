//! Ontology: a registry plus a symbol table, optionally layered over a
//! parent ontology.
//!
//! Lookups fall back to the parent; additions always land in the child.
//! [`Ontology::global`] is a process-wide root for callers that don't need
//! isolation. Code that does (tests, multiple networks in one process)
//! builds its own with [`Ontology::inherit`].

use crate::error::{CodecError, CodecResult};
use crate::format::Format;
use crate::registry::{Registry, RegistryEntry};
use crate::symbols::{SymbolCategory, SymbolInfo, SymbolTable};
use crate::value::{Symbol, Value};
use ssp_types::RegIx;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

/// Registered formats may refer to other registered formats; chains longer
/// than this are treated as cycles.
const MAX_RESOLVE_DEPTH: usize = 32;

static GLOBAL: OnceLock<Arc<Ontology>> = OnceLock::new();

#[derive(Debug, Default)]
pub struct Ontology {
    parent: Option<Arc<Ontology>>,
    registry: RwLock<Registry>,
    symbols: RwLock<SymbolTable>,
}

impl Ontology {
    /// An empty root ontology. Built-in types need no registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// A child that sees everything in `parent`.
    pub fn inherit(parent: Arc<Ontology>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// The shared process-wide root.
    pub fn global() -> &'static Arc<Ontology> {
        GLOBAL.get_or_init(|| Arc::new(Ontology::new()))
    }

    pub fn parent(&self) -> Option<&Arc<Ontology>> {
        self.parent.as_ref()
    }

    // -- registry --------------------------------------------------------

    /// Add a registry entry. Conflicts with the parent chain are errors too.
    pub fn add_entry(&self, entry: RegistryEntry) -> CodecResult<()> {
        if let Some(parent) = &self.parent {
            if let Some(prior) = parent.entry(entry.index) {
                if prior.value != entry.value {
                    return Err(CodecError::Conflict(format!(
                        "registry index {} is already defined differently by a parent ontology",
                        entry.index
                    )));
                }
            }
        }
        self.registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add(entry)
    }

    /// Shorthand for registering a type under an index and label.
    pub fn add_format(&self, ix: RegIx, label: &str, format: Format) -> CodecResult<()> {
        self.add_entry(RegistryEntry::new(ix, Value::schema(format)).with_label(label))
    }

    pub fn entry(&self, ix: RegIx) -> Option<RegistryEntry> {
        let own = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(ix)
            .cloned();
        own.or_else(|| self.parent.as_ref().and_then(|p| p.entry(ix)))
    }

    pub fn by_label(&self, label: &str) -> Option<RegistryEntry> {
        let own = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_label(label)
            .cloned();
        own.or_else(|| self.parent.as_ref().and_then(|p| p.by_label(label)))
    }

    pub fn by_c_name(&self, c_name: &str) -> Option<RegistryEntry> {
        let own = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_c_name(c_name)
            .cloned();
        own.or_else(|| self.parent.as_ref().and_then(|p| p.by_c_name(c_name)))
    }

    /// Registry index whose definition equals `value`.
    pub fn find_value(&self, value: &Value) -> Option<RegIx> {
        let own = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .find(value);
        own.or_else(|| self.parent.as_ref().and_then(|p| p.find_value(value)))
    }

    /// Registry index of a format: built-in, a reference, or a registered
    /// structurally equal definition.
    pub fn reg_ix_of(&self, format: &Format) -> Option<RegIx> {
        format
            .builtin_reg_ix()
            .or_else(|| self.find_value(&Value::schema(format.clone())))
    }

    /// Replace a top-level [`Format::Registered`] by its definition.
    ///
    /// A registered constant resolves to [`Format::Constant`].
    pub fn resolve(&self, format: &Format) -> CodecResult<Format> {
        let mut current = format.clone();
        for _ in 0..MAX_RESOLVE_DEPTH {
            let Format::Registered(ix) = current else {
                return Ok(current);
            };
            if let Some(builtin) = Format::builtin(ix) {
                return Ok(builtin);
            }
            let entry = self.entry(ix).ok_or(CodecError::UnknownRegIx(ix))?;
            current = match entry.value.as_ref() {
                Value::Schema(f) => f.as_ref().clone(),
                other => Format::constant(other.clone()),
            };
        }
        Err(CodecError::Type(format!(
            "registry reference chain from {format:?} does not terminate"
        )))
    }

    /// Label of a registered or built-in index.
    pub fn label_of(&self, ix: RegIx) -> Option<String> {
        if let Some(label) = Format::builtin(ix).and_then(|f| f.builtin_label()) {
            return Some(label.to_string());
        }
        self.entry(ix).and_then(|e| e.label)
    }

    // -- symbols ---------------------------------------------------------

    pub fn add_symbol(&self, info: SymbolInfo) -> CodecResult<()> {
        if let (Some(parent), Some(ix)) = (&self.parent, info.index) {
            if let Some(prior) = parent.symbol_by_index(ix) {
                if prior.name != info.name {
                    return Err(CodecError::Conflict(format!(
                        "symbol index {ix} is already \"{}\" in a parent ontology",
                        prior.name
                    )));
                }
            }
        }
        self.symbols
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .add(info)
    }

    pub fn symbol_by_index(&self, index: u64) -> Option<SymbolInfo> {
        let own = self
            .symbols
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_index(index)
            .cloned();
        own.or_else(|| self.parent.as_ref().and_then(|p| p.symbol_by_index(index)))
    }

    /// Looks a symbol up by name or `SYM<n>`.
    pub fn symbol_by_name(&self, name: &str) -> Option<SymbolInfo> {
        let own = self
            .symbols
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_name(name)
            .cloned();
        // An unindexed local entry shouldn't hide an indexed parent entry.
        match own {
            Some(info) if info.index.is_some() => Some(info),
            own => self
                .parent
                .as_ref()
                .and_then(|p| p.symbol_by_name(name))
                .filter(|p| p.index.is_some())
                .or(own),
        }
    }

    /// The symbol for `name`, recording it as unindexed if unknown.
    ///
    /// `SYM<n>` becomes the symbol's real name when index `n` is known.
    pub fn intern_symbol(&self, name: &str) -> Symbol {
        if let Some(info) = self.symbol_by_name(name) {
            return Symbol::new(&info.name);
        }
        if Symbol::new(name).literal_index().is_none() {
            // Unindexed symbols can't conflict.
            let _ = self.add_symbol(SymbolInfo::named(name));
        }
        Symbol::new(name)
    }

    /// Wire index of a symbol, if one is agreed.
    pub fn symbol_index(&self, symbol: &Symbol) -> Option<u64> {
        self.symbol_by_name(symbol.name())
            .and_then(|info| info.index)
            .or_else(|| symbol.literal_index())
    }

    /// Symbol for a wire index. Unknown indices are distinguished errors.
    pub fn symbol_from_index(&self, index: u64) -> CodecResult<Symbol> {
        self.symbol_by_index(index)
            .map(|info| Symbol::new(&info.name))
            .ok_or(CodecError::UnknownSymbol(index))
    }

    /// Indexed symbols of one category, parents included, sorted by index.
    pub fn symbols_of_category(&self, category: SymbolCategory) -> Vec<SymbolInfo> {
        let mut out = self
            .parent
            .as_ref()
            .map(|p| p.symbols_of_category(category))
            .unwrap_or_default();
        out.extend(
            self.symbols
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .indexed()
                .filter(|s| s.category == category)
                .cloned(),
        );
        out.sort_by_key(|s| s.index);
        out
    }

    // -- loading ---------------------------------------------------------

    /// Load ontology text. `include` lines resolve against `base_dir`.
    pub fn load_str(&self, text: &str, base_dir: Option<&Path>) -> CodecResult<()> {
        crate::loader::load_str(self, text, base_dir)
    }

    pub fn load_file(&self, path: &Path) -> CodecResult<()> {
        crate::loader::load_file(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_falls_back_to_parent() {
        let parent = Arc::new(Ontology::new());
        parent
            .add_format(40, "NameMap", Format::map_of(Format::Symbol, Format::Any))
            .unwrap();
        parent.add_symbol(SymbolInfo::indexed(100, "speed")).unwrap();

        let child = Ontology::inherit(parent.clone());
        assert_eq!(child.by_label("NameMap").unwrap().index, 40);
        assert_eq!(child.symbol_by_index(100).unwrap().name, "speed");
        assert_eq!(
            child.reg_ix_of(&Format::map_of(Format::Symbol, Format::Any)),
            Some(40)
        );
        // Redefinition through the child conflicts with the parent.
        assert!(child
            .add_format(40, "Other", Format::list_of(Format::Symbol))
            .is_err());
    }

    #[test]
    fn test_resolve_registered() {
        let ont = Ontology::new();
        ont.add_format(40, "Pair", Format::Tuple(vec![Format::UInt8, Format::UInt8]))
            .unwrap();
        ont.add_format(41, "PairAlias", Format::Registered(40)).unwrap();
        ont.add_entry(RegistryEntry::new(42, Value::Int(7)).with_label("Seven"))
            .unwrap();

        assert_eq!(
            ont.resolve(&Format::Registered(41)).unwrap(),
            Format::Tuple(vec![Format::UInt8, Format::UInt8])
        );
        assert_eq!(
            ont.resolve(&Format::Registered(42)).unwrap(),
            Format::constant(Value::Int(7))
        );
        assert_eq!(ont.resolve(&Format::Registered(2)).unwrap(), Format::UInt8);
        assert_eq!(
            ont.resolve(&Format::Registered(99)),
            Err(CodecError::UnknownRegIx(99))
        );
    }

    #[test]
    fn test_intern_symbol() {
        let ont = Ontology::new();
        ont.add_symbol(SymbolInfo::indexed(300, "altitude")).unwrap();
        assert_eq!(ont.intern_symbol("SYM300").name(), "altitude");
        let fresh = ont.intern_symbol("temperature");
        assert_eq!(fresh.name(), "temperature");
        assert_eq!(ont.symbol_index(&fresh), None);
        assert_eq!(ont.symbol_index(&Symbol::new("altitude")), Some(300));
        assert_eq!(ont.symbol_index(&Symbol::from_index(77)), Some(77));
        assert_eq!(ont.symbol_from_index(77), Err(CodecError::UnknownSymbol(77)));
    }

    #[test]
    fn test_symbols_of_category() {
        let ont = Ontology::new();
        let mut ev = SymbolInfo::indexed(12, "overheat");
        ev.category = SymbolCategory::Event;
        ont.add_symbol(ev).unwrap();
        ont.add_symbol(SymbolInfo::indexed(13, "speed")).unwrap();
        let events = ont.symbols_of_category(SymbolCategory::Event);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "overheat");
    }
}
