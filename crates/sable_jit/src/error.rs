use std::path::PathBuf;

use sable_facts::FactError;
use sable_ir::{ExecError, IrError};
use sable_opt::OptError;
use sable_symbol::SymbolError;
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Error)]
pub enum JitError {
    /// An earlier failure left the target unusable.
    #[error("trace target `{0}` is poisoned by an earlier failure")]
    Poisoned(String),

    #[error("no trace target named `{0}`")]
    UnknownTarget(String),

    #[error("no IR definition for `{0}`")]
    MissingDefinition(String),

    #[error("trace target `{0}` is already registered")]
    DuplicateTarget(String),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Ir(#[from] IrError),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    Fact(#[from] FactError),

    #[error(transparent)]
    Opt(#[from] OptError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("failed to write {}", path.display())]
    Dump {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl JitError {
    /// Wraps the error for a native routine that has to report an `ExecError`.
    pub fn into_exec(self) -> ExecError {
        match self {
            JitError::Exec(err) => err,
            other => ExecError::Other(Box::new(other)),
        }
    }
}
