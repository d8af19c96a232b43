//! What the passes know about the running process.

use ahash::AHashSet;
use sable_config::{OptimizerConfig, Verbosity};
use sable_facts::{ConstRegions, FactProducers};
use sable_ir::{Evaluator, Function, Value, ValueDef};

/// Addresses of objects whose reference count is never observed.
#[derive(Debug, Clone, Default)]
pub struct Immortals {
    objects: AHashSet<u64>,
}

impl Immortals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: u64) {
        self.objects.insert(address);
    }

    pub fn contains(&self, address: u64) -> bool {
        self.objects.contains(&address)
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[derive(Clone, Copy)]
pub struct OptContext<'a> {
    pub eval: &'a Evaluator<'a>,
    pub producers: &'a FactProducers,
    pub regions: &'a ConstRegions,
    pub immortals: &'a Immortals,
    pub config: &'a OptimizerConfig,
    pub verbosity: Verbosity,
}

impl<'a> OptContext<'a> {
    /// Name of the routine `callee` refers to, if it can be named without
    /// running anything.
    pub fn callee_name(&self, func: &Function, callee: Value) -> Option<String> {
        if let ValueDef::Symbol(name) = func.value_def(callee) {
            return Some(name.clone());
        }
        let address = self.eval.eval_const(func, callee).ok().flatten()?;
        self.eval.resolver().resolve_name(address)
    }

    /// The constant address `value` evaluates to. Unresolvable symbols count
    /// as unknown here.
    pub fn const_address(&self, func: &Function, value: Value) -> Option<u64> {
        self.eval.eval_const(func, value).ok().flatten()
    }
}
