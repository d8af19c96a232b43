//! The pass schedule.

use sable_facts::FactEngine;
use sable_ir::{Function, verify_function};
use tracing::{debug, info};

use crate::const_loads::fold_const_loads;
use crate::context::OptContext;
use crate::counters::PassCounters;
use crate::error::OptError;
use crate::exceptions::remove_exception_checks;
use crate::noalias::annotate_noalias;
use crate::notzero::insert_notzero_assumes;
use crate::recursion::remove_recursion_checks;
use crate::refcount::remove_immortal_refcounts;
use crate::scalar::run_scalar;

/// Runs `rounds` rounds of annotation, fact-directed folding, scalar cleanup
/// and the runtime-specific passes. A round that changes nothing ends the
/// schedule early.
pub struct OptimizerPipeline<'a> {
    ctx: OptContext<'a>,
}

impl<'a> OptimizerPipeline<'a> {
    pub fn new(ctx: OptContext<'a>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &OptContext<'a> {
        &self.ctx
    }

    pub fn run(&self, func: &mut Function) -> Result<PassCounters, OptError> {
        let mut counters = PassCounters::default();
        if func.is_declaration() {
            return Ok(counters);
        }

        let ctx = &self.ctx;
        let config = ctx.config;
        let engine =
            FactEngine::new(ctx.eval, ctx.producers, ctx.regions).with_verbosity(ctx.verbosity);

        for round in 0..config.rounds {
            let mut pass = PassCounters {
                calls_marked_noalias: annotate_noalias(func, ctx),
                const_loads_folded: fold_const_loads(func, ctx),
                notzero_assumes: insert_notzero_assumes(func, ctx),
                ..PassCounters::default()
            };

            let applied = engine.run(func, config.fact_rounds)?;
            pass.compares_folded = applied.compares_folded as u64;
            pass.loads_forwarded = applied.loads_replaced as u64;

            pass += run_scalar(func, config.scalar_rounds);

            pass.exception_checks_removed = remove_exception_checks(func, ctx);
            pass.recursion_pairs_removed = remove_recursion_checks(func, ctx);
            pass.refcount_stores_removed = remove_immortal_refcounts(func, ctx);
            if pass.exception_checks_removed
                + pass.recursion_pairs_removed
                + pass.refcount_stores_removed
                > 0
            {
                // Clean up the checks' now-dead conditions and side exits.
                pass += run_scalar(func, config.scalar_rounds);
            }

            debug!(function = %func.name, round, changes = pass.total(), "optimizer round");
            counters += pass;
            if pass.total() == 0 {
                break;
            }
        }

        verify_function(func).map_err(|source| OptError::Verify {
            function: func.name.clone(),
            source,
        })?;

        if ctx.verbosity.stats() {
            for (name, value) in counters.to_pairs() {
                info!(function = %func.name, counter = %name, value, "optimizer stats");
            }
        }
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use sable_config::OptimizerConfig;
    use sable_ir::{
        FunctionBuilder, Interpreter, IntCC, Signature, SimulatedMachine, Type,
    };

    #[test]
    fn test_declaration_is_skipped() {
        let fixture = Fixture::new(OptimizerConfig::default());
        let mut func = Function::new("decl", Signature::new(vec![Type::Ptr], Type::I64));
        let counters = fixture
            .with(None, |ctx| OptimizerPipeline::new(*ctx).run(&mut func))
            .unwrap();
        assert_eq!(counters, PassCounters::default());
    }

    #[test]
    fn test_malloc_result_never_equals_static_object() {
        let mut machine = SimulatedMachine::new();
        machine.define_native("malloc", |m, args| Ok(m.alloc(args[0], 8)));
        let marker = machine.define_data("marker", &[0; 8]);
        let fixture = Fixture::new(OptimizerConfig::default());
        fixture.resolver.register_module(machine.exports());

        let sig = Signature::new(vec![], Type::I64);
        let mut func = Function::new("fresh", sig);
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        let same = b.create_block();
        let other = b.create_block();
        b.switch_to_block(entry);
        let malloc = b.symbol("malloc");
        let size = b.iconst(Type::I64, 16);
        let call = b.call(malloc, vec![size], Signature::new(vec![Type::I64], Type::Ptr));
        let object = b.inst_result(call).unwrap();
        let known = b.iconst(Type::Ptr, marker);
        let is_marker = b.icmp(IntCC::Eq, object, known);
        b.branch(is_marker, same, other);
        b.switch_to_block(same);
        let one = b.iconst(Type::I64, 1);
        b.ret(Some(one));
        b.switch_to_block(other);
        let two = b.iconst(Type::I64, 2);
        b.ret(Some(two));

        let counters = fixture
            .with(Some(&machine), |ctx| {
                OptimizerPipeline::new(*ctx).run(&mut func)
            })
            .unwrap();
        assert_eq!(counters.calls_marked_noalias, 1);
        assert_eq!(counters.compares_folded, 1);
        assert_eq!(counters.branches_folded, 1);
        assert_eq!(counters.blocks_removed, 1);
        assert_eq!(func.layout.len(), 2);

        let result = Interpreter::new(&fixture.resolver)
            .run(&func, &mut machine, &[])
            .unwrap();
        assert_eq!(result, 2);
    }
}
