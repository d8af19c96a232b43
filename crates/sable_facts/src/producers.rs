//! Pluggable fact sources.

use std::sync::Arc;

use sable_ir::{Evaluator, Function, InstKind, Value, ValueDef};

use crate::factset::FactSet;

/// Adds runtime-specific knowledge about a value.
///
/// Producers run once per instruction result during derive and once per
/// value during collect. They must only add facts that hold wherever the
/// value is defined.
pub trait FactProducer: Send + Sync {
    fn name(&self) -> &str;

    /// Returns whether `facts` changed.
    fn derive_facts(
        &self,
        func: &Function,
        value: Value,
        facts: &mut FactSet,
        eval: &Evaluator<'_>,
    ) -> bool;
}

#[derive(Clone, Default)]
pub struct FactProducers {
    producers: Vec<Arc<dyn FactProducer>>,
}

impl FactProducers {
    pub fn new() -> Self {
        Self::default()
    }

    /// The producers every pipeline starts with.
    pub fn with_builtins() -> Self {
        let mut producers = Self::new();
        producers.register(Arc::new(NonNullParams));
        producers.register(Arc::new(NoAliasCalls));
        producers
    }

    pub fn register(&mut self, producer: Arc<dyn FactProducer>) {
        self.producers.push(producer);
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.producers.iter().map(|p| p.name()).collect()
    }

    /// Runs every producer on `value`.
    pub fn derive(
        &self,
        func: &Function,
        value: Value,
        facts: &mut FactSet,
        eval: &Evaluator<'_>,
    ) -> bool {
        let mut changed = false;
        for producer in &self.producers {
            changed |= producer.derive_facts(func, value, facts, eval);
        }
        changed
    }
}

/// Parameters marked `nonnull` are nonzero.
pub struct NonNullParams;

impl FactProducer for NonNullParams {
    fn name(&self) -> &str {
        "nonnull-params"
    }

    fn derive_facts(
        &self,
        func: &Function,
        value: Value,
        facts: &mut FactSet,
        _eval: &Evaluator<'_>,
    ) -> bool {
        let ValueDef::Param(index) = func.value_def(value) else {
            return false;
        };
        let nonnull = func
            .param_attrs
            .get(*index as usize)
            .is_some_and(|attrs| attrs.nonnull);
        if !nonnull || facts.root().nonzero {
            return false;
        }
        facts.root_mut().nonzero = true;
        true
    }
}

/// Results of calls marked `noalias` are fresh heap allocations.
pub struct NoAliasCalls;

impl FactProducer for NoAliasCalls {
    fn name(&self) -> &str {
        "noalias-calls"
    }

    fn derive_facts(
        &self,
        func: &Function,
        value: Value,
        facts: &mut FactSet,
        _eval: &Evaluator<'_>,
    ) -> bool {
        let Some(inst) = func.value_inst(value) else {
            return false;
        };
        if !matches!(func.kind(inst), InstKind::Call { noalias: true, .. }) {
            return false;
        }
        if facts.root().heap_alloc {
            return false;
        }
        facts.root_mut().heap_alloc = true;
        true
    }
}
