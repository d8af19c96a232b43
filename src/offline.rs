//! Running the optimizer over IR loaded from disk, outside any trace.

use std::path::Path;

use anyhow::{Context, Result};
use sable_config::JitConfig;
use sable_facts::{ConstRegions, FactProducers};
use sable_ir::{Evaluator, Function, Module};
use sable_opt::{Immortals, OptContext, OptimizerPipeline, PassCounters};
use sable_symbol::SymbolResolver;
use tracing::{info, warn};

/// One optimized function and what the pipeline did to it.
#[derive(Debug, Clone)]
pub struct OptimizedFunction {
    pub function: Function,
    pub counters: PassCounters,
    pub insts_before: usize,
}

/// The symbols of the running process, or an empty table when the image
/// cannot be scanned.
pub fn process_resolver() -> SymbolResolver {
    SymbolResolver::from_process().unwrap_or_else(|err| {
        warn!("symbols of the running process are unavailable: {err}");
        SymbolResolver::new()
    })
}

/// Loads `path` and optimizes the function named `function`.
pub fn optimize_file(
    path: &Path,
    function: &str,
    config: &JitConfig,
    resolver: &SymbolResolver,
) -> Result<OptimizedFunction> {
    let module =
        Module::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    let func = module
        .function(function)
        .with_context(|| format!("no function `{function}` in {}", path.display()))?
        .clone();
    optimize_function(func, config, resolver)
}

pub fn optimize_function(
    mut func: Function,
    config: &JitConfig,
    resolver: &SymbolResolver,
) -> Result<OptimizedFunction> {
    let insts_before = func.inst_count();
    let eval = Evaluator::new(resolver);
    let producers = FactProducers::with_builtins();
    let regions = ConstRegions::new();
    let immortals = Immortals::new();
    let ctx = OptContext {
        eval: &eval,
        producers: &producers,
        regions: &regions,
        immortals: &immortals,
        config: &config.optimizer,
        verbosity: config.verbosity,
    };
    let counters = OptimizerPipeline::new(ctx)
        .run(&mut func)
        .with_context(|| format!("optimizing `{}`", func.name))?;
    if config.verbosity.stats() {
        info!(
            name = %func.name,
            insts_before,
            insts_after = func.inst_count(),
            "optimized"
        );
    }
    Ok(OptimizedFunction {
        function: func,
        counters,
        insts_before,
    })
}
