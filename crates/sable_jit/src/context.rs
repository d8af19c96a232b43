//! Everything the driver shares across trace targets.

use std::path::Path;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use sable_config::JitConfig;
use sable_facts::{ConstRegions, FactProducer, FactProducers};
use sable_ir::{Module, SimulatedMachine};
use sable_metrics::{CompilationProfiler, JitStats};
use sable_opt::Immortals;
use sable_symbol::{ImageModule, SymbolResolver};
use tracing::debug;

use crate::backend::{Backend, CompiledRoutine, ReferenceBackend, TargetDescription};
use crate::driver::{TargetOptions, TraceTarget};
use crate::error::JitError;
use crate::inliner::InlinePolicy;
use crate::registry::ModuleRegistry;

/// Suffix of the export name a trampoline is installed under.
pub const TRAMPOLINE_SUFFIX: &str = ".trampoline";

pub struct JitContext {
    config: JitConfig,
    resolver: Arc<SymbolResolver>,
    registry: ModuleRegistry,
    policy: InlinePolicy,
    pub(crate) producers: RwLock<FactProducers>,
    pub(crate) regions: RwLock<ConstRegions>,
    pub(crate) immortals: RwLock<Immortals>,
    backend: Box<dyn Backend>,
    target_desc: TargetDescription,
    targets: RwLock<AHashMap<String, Arc<TraceTarget>>>,
    trampolines: RwLock<AHashSet<u64>>,
    /// Every routine ever compiled. Never shrinks.
    code: RwLock<Vec<Arc<CompiledRoutine>>>,
    stats: JitStats,
    profiler: CompilationProfiler,
}

impl JitContext {
    /// A context compiling with the reference backend for the host.
    pub fn new(config: JitConfig, resolver: Arc<SymbolResolver>) -> Self {
        let policy = InlinePolicy::from_config(&config.trace);
        Self {
            config,
            resolver,
            registry: ModuleRegistry::new(),
            policy,
            producers: RwLock::new(FactProducers::with_builtins()),
            regions: RwLock::new(ConstRegions::new()),
            immortals: RwLock::new(Immortals::new()),
            backend: Box::new(ReferenceBackend),
            target_desc: TargetDescription::host(),
            targets: RwLock::new(AHashMap::new()),
            trampolines: RwLock::new(AHashSet::new()),
            code: RwLock::new(Vec::new()),
            stats: JitStats::new(),
            profiler: CompilationProfiler::new(),
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn Backend>, target: TargetDescription) -> Self {
        self.backend = backend;
        self.target_desc = target;
        self
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn resolver(&self) -> &SymbolResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &InlinePolicy {
        &self.policy
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn target_description(&self) -> &TargetDescription {
        &self.target_desc
    }

    pub fn stats(&self) -> &JitStats {
        &self.stats
    }

    pub fn profiler(&self) -> &CompilationProfiler {
        &self.profiler
    }

    pub fn register_module(&self, module: Module) -> usize {
        self.registry.register_module(module)
    }

    /// Registers every `.json` module under `dir`.
    pub fn load_modules(&self, dir: &Path) -> Result<usize, JitError> {
        Ok(self.registry.load_dir(dir)?)
    }

    pub fn register_producer(&self, producer: Arc<dyn FactProducer>) {
        self.producers.write().register(producer);
    }

    /// Declares `[start, start + size)` as memory with the given fact flags.
    pub fn register_const_region(&self, start: u64, size: u64, flags: u8) -> Result<(), JitError> {
        self.regions.write().add(start, size, flags)?;
        Ok(())
    }

    pub fn register_immortal(&self, address: u64) {
        self.immortals.write().register(address);
    }

    /// Makes `name` a trace target. It needs an IR definition and an
    /// uncompiled implementation the resolver can find.
    pub fn register_target(
        &self,
        name: &str,
        options: TargetOptions,
    ) -> Result<Arc<TraceTarget>, JitError> {
        let definition = self
            .registry
            .definition(name)
            .ok_or_else(|| JitError::MissingDefinition(name.to_string()))?;
        let original = self.resolver.resolve_address(name)?;

        let mut targets = self.targets.write();
        if targets.contains_key(name) {
            return Err(JitError::DuplicateTarget(name.to_string()));
        }
        let warmup = options.warmup.unwrap_or(self.config.trace.warmup);
        let target = Arc::new(TraceTarget::new(
            (*definition).clone(),
            original,
            warmup,
            options.arg_flags,
        ));
        targets.insert(name.to_string(), Arc::clone(&target));
        debug!(name, original, warmup, "registered trace target");
        Ok(target)
    }

    pub fn target(&self, name: &str) -> Option<Arc<TraceTarget>> {
        self.targets.read().get(name).cloned()
    }

    pub fn targets(&self) -> Vec<Arc<TraceTarget>> {
        let mut targets: Vec<_> = self.targets.read().values().cloned().collect();
        targets.sort_by(|a, b| a.name().cmp(b.name()));
        targets
    }

    /// Defines a native routine that calls `name` through the driver and
    /// returns its address. The inliner never splices trampolines.
    pub fn install_trampoline(
        self: &Arc<Self>,
        machine: &mut SimulatedMachine,
        name: &str,
    ) -> Result<u64, JitError> {
        if self.target(name).is_none() {
            return Err(JitError::UnknownTarget(name.to_string()));
        }
        let ctx = Arc::clone(self);
        let target = name.to_string();
        let export = format!("{name}{TRAMPOLINE_SUFFIX}");
        let address = machine.define_native(&export, move |machine, args| {
            ctx.invoke(&target, machine, args)
                .map_err(JitError::into_exec)
        });
        self.trampolines.write().insert(address);
        self.resolver
            .register_module(ImageModule::new(format!("trampoline:{name}")).with_symbol(export, address));
        Ok(address)
    }

    pub fn trampolines(&self) -> Vec<u64> {
        self.trampolines.read().iter().copied().collect()
    }

    pub(crate) fn install(&self, routine: Arc<CompiledRoutine>) {
        self.code.write().push(routine);
    }

    pub fn compiled_routines(&self) -> Vec<Arc<CompiledRoutine>> {
        self.code.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_facts::IS_CONST;
    use sable_ir::{Function, Signature, Type};

    #[test]
    fn test_target_needs_definition_and_address() {
        let mut machine = SimulatedMachine::new();
        machine.define_native("native_only", |_, _| Ok(0));
        let resolver = Arc::new(SymbolResolver::new());
        resolver.register_module(machine.exports());
        let ctx = JitContext::new(JitConfig::default(), resolver);

        assert!(matches!(
            ctx.register_target("native_only", TargetOptions::default()),
            Err(JitError::MissingDefinition(_))
        ));

        let mut module = Module::new("lib");
        let mut ir_only = Function::new("ir_only", Signature::new(vec![], Type::I64));
        let entry = ir_only.create_block();
        let zero = ir_only.iconst(Type::I64, 0);
        ir_only.append_inst(
            entry,
            sable_ir::InstKind::Return { value: Some(zero) },
            Type::Void,
        );
        module.push(ir_only);
        ctx.register_module(module);
        assert!(matches!(
            ctx.register_target("ir_only", TargetOptions::default()),
            Err(JitError::Symbol(_))
        ));
    }

    #[test]
    fn test_duplicate_target_and_const_regions() {
        let mut machine = SimulatedMachine::new();
        machine.define_native("f", |_, _| Ok(0));
        let resolver = Arc::new(SymbolResolver::new());
        resolver.register_module(machine.exports());
        let ctx = JitContext::new(JitConfig::default(), resolver);

        let mut func = Function::new("f", Signature::new(vec![], Type::I64));
        let entry = func.create_block();
        let zero = func.iconst(Type::I64, 0);
        func.append_inst(
            entry,
            sable_ir::InstKind::Return { value: Some(zero) },
            Type::Void,
        );
        let mut module = Module::new("lib");
        module.push(func);
        ctx.register_module(module);

        let target = ctx.register_target("f", TargetOptions::default()).unwrap();
        assert_eq!(target.remaining_warmup(), 100);
        assert!(matches!(
            ctx.register_target("f", TargetOptions::default()),
            Err(JitError::DuplicateTarget(_))
        ));

        ctx.register_const_region(0x1000, 16, IS_CONST).unwrap();
        assert!(ctx.regions.read().is_const(0x1000, 8));
        ctx.register_immortal(0x5000);
        assert!(ctx.immortals.read().contains(0x5000));
    }
}
