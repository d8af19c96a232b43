//! Address <-> name resolution for the running process image.
//!
//! The resolver is built from [`ImageModule`] export tables. Modules come from
//! the process memory map, from shared libraries opened at runtime, or are
//! registered directly by an embedder.

pub mod error;
pub mod image;
pub mod resolver;

pub use crate::error::SymbolError;
pub use crate::image::{ExportedSymbol, ImageModule, MappedFile};
pub use crate::resolver::SymbolResolver;
