//! sable: a selective tracing JIT over an SSA IR.
//!
//! The crates under `crates/` carry the pieces; this crate re-exports them
//! and hosts the offline optimizer driver behind the `sable` binary.

pub mod offline;

pub use sable_config as config;
pub use sable_facts as facts;
pub use sable_ir as ir;
pub use sable_jit as jit;
pub use sable_metrics as metrics;
pub use sable_opt as opt;
pub use sable_symbol as symbol;

pub use sable_config::JitConfig;
pub use sable_jit::{JitContext, JitError, TargetOptions};
