//! The optimizer pipeline: fact-directed folding, classical cleanup and the
//! runtime-specific passes, run in a fixed schedule over one routine.

pub mod const_loads;
pub mod context;
pub mod counters;
pub mod error;
pub mod exceptions;
pub mod noalias;
pub mod notzero;
pub mod pipeline;
pub mod recursion;
pub mod refcount;
pub mod scalar;

pub use crate::context::{Immortals, OptContext};
pub use crate::counters::PassCounters;
pub use crate::error::OptError;
pub use crate::pipeline::OptimizerPipeline;
pub use crate::recursion::BlockMatcher;
pub use crate::scalar::run_scalar;

#[cfg(test)]
pub(crate) mod testing {
    use sable_config::{OptimizerConfig, Verbosity};
    use sable_facts::{ConstRegions, FactProducers};
    use sable_ir::{Evaluator, Machine};
    use sable_symbol::SymbolResolver;

    use crate::context::{Immortals, OptContext};

    pub struct Fixture {
        pub resolver: SymbolResolver,
        pub producers: FactProducers,
        pub regions: ConstRegions,
        pub immortals: Immortals,
        pub config: OptimizerConfig,
    }

    impl Fixture {
        pub fn new(config: OptimizerConfig) -> Self {
            Self {
                resolver: SymbolResolver::new(),
                producers: FactProducers::with_builtins(),
                regions: ConstRegions::new(),
                immortals: Immortals::new(),
                config,
            }
        }

        pub fn with<R>(
            &self,
            machine: Option<&dyn Machine>,
            f: impl FnOnce(&OptContext<'_>) -> R,
        ) -> R {
            let eval = match machine {
                Some(machine) => Evaluator::with_machine(&self.resolver, machine),
                None => Evaluator::new(&self.resolver),
            };
            let ctx = OptContext {
                eval: &eval,
                producers: &self.producers,
                regions: &self.regions,
                immortals: &self.immortals,
                config: &self.config,
                verbosity: Verbosity::Silent,
            };
            f(&ctx)
        }
    }
}
