//! Turning finished trace IR into an installable routine.

use std::fmt;

use sable_config::TargetTriple;
use sable_ir::{ExecError, Function, Interpreter, IrError, Machine, verify_function};
use sable_symbol::SymbolResolver;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend `{backend}` cannot target {triple}: {reason}")]
    UnsupportedTarget {
        backend: String,
        triple: String,
        reason: String,
    },

    #[error("backend rejected `{function}`")]
    InvalidIr {
        function: String,
        #[source]
        source: IrError,
    },
}

/// What the backend generates code for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescription {
    pub triple: TargetTriple,
    pub pointer_width: u32,
    pub little_endian: bool,
}

impl TargetDescription {
    pub fn from_triple(triple: TargetTriple) -> Self {
        Self {
            pointer_width: triple.pointer_width(),
            little_endian: triple.is_little_endian(),
            triple,
        }
    }

    pub fn host() -> Self {
        Self::from_triple(TargetTriple::host())
    }
}

impl Default for TargetDescription {
    fn default() -> Self {
        Self::host()
    }
}

/// A compiled trace, installed for every later call of its target.
pub struct CompiledRoutine {
    name: String,
    code: Function,
    code_size: usize,
}

impl CompiledRoutine {
    pub fn new(name: impl Into<String>, code: Function, code_size: usize) -> Self {
        Self {
            name: name.into(),
            code,
            code_size,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// The IR the routine was generated from.
    pub fn ir(&self) -> &Function {
        &self.code
    }

    pub fn call(
        &self,
        resolver: &SymbolResolver,
        machine: &mut dyn Machine,
        args: &[u64],
    ) -> Result<u64, ExecError> {
        Interpreter::new(resolver).run(&self.code, machine, args)
    }
}

impl fmt::Debug for CompiledRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoutine")
            .field("name", &self.name)
            .field("code_size", &self.code_size)
            .finish()
    }
}

pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Called once per trace, after the optimizer.
    fn compile(
        &self,
        func: &Function,
        target: &TargetDescription,
    ) -> Result<CompiledRoutine, BackendError>;
}

/// Runs the finished IR directly, without tracing hooks or counters.
#[derive(Debug, Default)]
pub struct ReferenceBackend;

impl Backend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn compile(
        &self,
        func: &Function,
        target: &TargetDescription,
    ) -> Result<CompiledRoutine, BackendError> {
        if target.pointer_width != 8 || !target.little_endian {
            return Err(BackendError::UnsupportedTarget {
                backend: self.name().to_string(),
                triple: target.triple.to_string(),
                reason: "only 64-bit little-endian targets are supported".to_string(),
            });
        }
        verify_function(func).map_err(|source| BackendError::InvalidIr {
            function: func.name.clone(),
            source,
        })?;
        Ok(CompiledRoutine::new(
            func.name.clone(),
            func.clone(),
            func.inst_count(),
        ))
    }
}
