//! SSP value codec: the type registry, the symbol table and the three
//! encodings every message body goes through.
//!
//! ## Architecture
//!
//! - **Value** ([`value`]): the dynamic value model (numbers, symbols,
//!   strings, blobs, lists, ordered maps, schemas and registry refs).
//! - **Format** ([`format`]): built-in types and parameterized formats.
//!   Registered formats are referenced by index, never by pointer.
//! - **Ontology** ([`ontology`]): registry plus symbol table, optionally
//!   inheriting from a parent. [`Ontology::global`] carries the built-ins.
//! - **SSP-BIN** ([`binary`]): impBin (type known out of band), expBin
//!   (prefixed with a schema) and schemaBin.
//! - **SSP-ASCII** ([`ascii`]): the textual mirror of the value model.
//! - **Loader** ([`loader`]): ontology text files (`SYM`/`REF` lines).

pub mod ascii;
pub mod binary;
pub mod bytes;
pub mod cast;
pub mod error;
pub mod format;
pub mod json;
pub mod loader;
pub mod ontology;
pub mod registry;
pub mod symbols;
pub mod value;

pub use error::{CodecError, CodecResult};
pub use format::Format;
pub use ontology::Ontology;
pub use symbols::{SymbolCategory, SymbolInfo};
pub use value::{Symbol, Value};
