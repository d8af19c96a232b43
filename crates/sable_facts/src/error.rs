use sable_symbol::SymbolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FactError {
    /// A symbol constant a fact depends on could not be resolved.
    #[error("unresolvable constant in `{function}`: {source}")]
    Symbol {
        function: String,
        #[source]
        source: SymbolError,
    },

    #[error(
        "region {start:#x}+{size:#x} overlaps the region at {existing:#x} with different flags"
    )]
    RegionConflict { start: u64, size: u64, existing: u64 },
}
