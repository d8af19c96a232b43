use std::path::PathBuf;

use sable_symbol::SymbolError;
use thiserror::Error;

use crate::entities::Inst;

#[derive(Debug, Error)]
pub enum IrError {
    #[error("invalid IR in `{function}`: {message}")]
    Verify { function: String, message: String },

    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
}

/// Failures while executing IR.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("memory fault: {size} byte access at {address:#x}")]
    Fault { address: u64, size: u32 },

    #[error("no routine at address {0:#x}")]
    UnknownCallee(u64),

    #[error("division by zero")]
    DivisionByZero,

    #[error("assumption at {0} does not hold")]
    AssumptionFailed(Inst),

    #[error("reached unreachable code")]
    Unreachable,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error("native routine failed: {0}")]
    Native(String),

    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}
