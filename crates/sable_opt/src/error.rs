use sable_facts::FactError;
use sable_ir::IrError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptError {
    #[error(transparent)]
    Fact(#[from] FactError),

    /// The pipeline produced IR that no longer verifies.
    #[error("optimizer broke `{function}`: {source}")]
    Verify {
        function: String,
        #[source]
        source: IrError,
    },
}
