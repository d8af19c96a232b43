//! The tracing JIT: trace targets are interpreted while warming up, calls
//! they make are inlined as they are reached, and the finished trace is
//! optimized and handed to a backend exactly once.

pub mod backend;
pub mod context;
pub mod driver;
pub mod error;
pub mod inliner;
pub mod registry;

pub use crate::backend::{
    Backend, BackendError, CompiledRoutine, ReferenceBackend, TargetDescription,
};
pub use crate::context::JitContext;
pub use crate::driver::{ArgFlags, TargetOptions, TraceState, TraceTarget};
pub use crate::error::JitError;
pub use crate::inliner::{
    CallInliner, DeclineReason, InlineDecision, InlineOutcome, InlinePolicy, InlineState,
};
pub use crate::registry::ModuleRegistry;
