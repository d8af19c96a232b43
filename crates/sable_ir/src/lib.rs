//! Typed SSA intermediate representation with the utilities the tracing JIT
//! works with: construction, verification, printing, dominance, constant
//! evaluation and interpretation.

pub mod builder;
pub mod dominator_tree;
pub mod entities;
pub mod error;
pub mod eval;
pub mod function;
pub mod instructions;
pub mod interpreter;
pub mod machine;
pub mod module;
pub mod types;
pub mod verifier;
pub mod write;

pub use builder::FunctionBuilder;
pub use dominator_tree::DominatorTree;
pub use entities::{Block, Inst, Value};
pub use error::{ExecError, IrError};
pub use eval::{Evaluator, fold_binary, fold_cast, fold_icmp};
pub use function::{Function, ParamAttrs, ValueData, ValueDef};
pub use instructions::{BinaryOp, CastOp, InstKind, IntCC};
pub use interpreter::{CallAction, CallHook, Interpreter, NoHook};
pub use machine::{Machine, NativeFn, SimulatedMachine};
pub use module::Module;
pub use types::{Signature, Type};
pub use verifier::verify_function;
