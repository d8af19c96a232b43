//! Per-target dispatch: interpret while warming up, then compile once and
//! call the compiled routine from then on.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use sable_ir::{
    Evaluator, Function, InstKind, Interpreter, IntCC, Machine, ParamAttrs, Type,
};
use sable_metrics::CompilationEvent;
use sable_opt::{OptContext, OptimizerPipeline};
use tracing::{debug, error, info, warn};
use utils::{Profiler, Stopwatch};

use crate::backend::CompiledRoutine;
use crate::context::JitContext;
use crate::error::JitError;
use crate::inliner::{CallInliner, InlineState};

/// What the caller promises about one argument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArgFlags {
    /// The argument is never null.
    pub non_null: bool,
    /// Every call passes the value seen on the first call.
    pub invariant: bool,
}

impl ArgFlags {
    pub fn non_null() -> Self {
        Self {
            non_null: true,
            invariant: false,
        }
    }

    pub fn invariant() -> Self {
        Self {
            non_null: false,
            invariant: true,
        }
    }
}

/// Registration options of a trace target.
#[derive(Debug, Clone, Default)]
pub struct TargetOptions {
    /// Interpreted calls before compiling. Falls back to the configured warmup.
    pub warmup: Option<i64>,
    pub arg_flags: Vec<ArgFlags>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Cold,
    Interpreting,
    Compiled,
    Poisoned,
}

impl fmt::Display for TraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TraceState::Cold => "cold",
            TraceState::Interpreting => "interpreting",
            TraceState::Compiled => "compiled",
            TraceState::Poisoned => "poisoned",
        };
        f.write_str(name)
    }
}

/// The traced IR and the inliner bookkeeping that belongs to it.
struct TracedIr {
    func: Function,
    inline: InlineState,
}

/// A routine whose calls go through the driver.
pub struct TraceTarget {
    name: String,
    /// Address of the uncompiled implementation.
    original: u64,
    arg_flags: Vec<ArgFlags>,
    /// Inlining rewrites the IR in place on every interpreted call.
    trace: Mutex<TracedIr>,
    warmup: AtomicI64,
    compiled: OnceCell<Arc<CompiledRoutine>>,
    reentrant: AtomicBool,
    flags_applied: AtomicBool,
    compiling: AtomicBool,
    poisoned: AtomicBool,
}

impl TraceTarget {
    pub(crate) fn new(
        ir: Function,
        original: u64,
        warmup: i64,
        arg_flags: Vec<ArgFlags>,
    ) -> Self {
        Self {
            name: ir.name.clone(),
            original,
            arg_flags,
            trace: Mutex::new(TracedIr {
                func: ir,
                inline: InlineState::default(),
            }),
            warmup: AtomicI64::new(warmup),
            compiled: OnceCell::new(),
            reentrant: AtomicBool::new(false),
            flags_applied: AtomicBool::new(false),
            compiling: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn original(&self) -> u64 {
        self.original
    }

    pub fn arity(&self) -> usize {
        self.trace.lock().func.sig.params.len()
    }

    pub fn arg_flags(&self) -> &[ArgFlags] {
        &self.arg_flags
    }

    /// Interpreted calls left before compiling. May go negative.
    pub fn remaining_warmup(&self) -> i64 {
        self.warmup.load(Ordering::Acquire)
    }

    pub fn compiled(&self) -> Option<&Arc<CompiledRoutine>> {
        self.compiled.get()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub fn state(&self) -> TraceState {
        if self.is_poisoned() {
            TraceState::Poisoned
        } else if self.is_compiled() {
            TraceState::Compiled
        } else if self.reentrant.load(Ordering::Acquire) {
            TraceState::Interpreting
        } else {
            TraceState::Cold
        }
    }

    /// A copy of the traced IR as it stands.
    pub fn ir_snapshot(&self) -> Function {
        self.trace.lock().func.clone()
    }

    fn decrement(&self) -> i64 {
        self.warmup.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

impl fmt::Debug for TraceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceTarget")
            .field("name", &self.name)
            .field("original", &self.original)
            .field("warmup", &self.remaining_warmup())
            .field("state", &self.state())
            .finish()
    }
}

impl JitContext {
    /// Calls the target `name` with `args`.
    pub fn invoke(
        &self,
        name: &str,
        machine: &mut dyn Machine,
        args: &[u64],
    ) -> Result<u64, JitError> {
        let target = self
            .target(name)
            .ok_or_else(|| JitError::UnknownTarget(name.to_string()))?;
        if target.is_poisoned() {
            return Err(JitError::Poisoned(target.name.clone()));
        }

        if let Some(routine) = target.compiled() {
            self.stats().record_compiled_call(&target.name);
            return Ok(routine.call(self.resolver(), machine, args)?);
        }

        if target.reentrant.swap(true, Ordering::AcqRel) {
            self.stats().record_reentrant(&target.name);
            target.decrement();
            debug!(name = %target.name, "reentrant call runs the original");
            return Ok(machine.call(target.original, args)?);
        }

        let result = self.interpret(&target, machine, args);
        target.reentrant.store(false, Ordering::Release);
        let value = result.map_err(|err| self.poison(&target, err))?;
        self.stats().record_interpreted(&target.name);

        let remaining = target.decrement();
        if remaining <= 0 && !target.compiling.swap(true, Ordering::AcqRel) {
            self.compile(&target, &*machine)
                .map_err(|err| self.poison(&target, err))?;
        }
        Ok(value)
    }

    fn interpret(
        &self,
        target: &TraceTarget,
        machine: &mut dyn Machine,
        args: &[u64],
    ) -> Result<u64, JitError> {
        let config = self.config();
        let mut trace = target.trace.lock();
        let TracedIr { func, inline } = &mut *trace;
        if !target.flags_applied.swap(true, Ordering::AcqRel) {
            apply_arg_flags(func, &target.arg_flags, args);
        }

        let mut inliner = CallInliner::new(
            self.resolver(),
            self.registry(),
            self.policy(),
            &config.trace,
        )
        .with_trampolines(self.trampolines())
        .with_verbosity(config.verbosity)
        .with_state(std::mem::take(inline));
        let result = Interpreter::new(self.resolver()).run_traced(func, &mut inliner, machine, args);

        let (state, decisions) = inliner.into_parts();
        *inline = state;
        for decision in &decisions {
            self.stats()
                .record_inline(&target.name, decision.outcome.is_inlined());
        }
        Ok(result?)
    }

    fn compile(&self, target: &TraceTarget, machine: &dyn Machine) -> Result<(), JitError> {
        let config = self.config();
        let stopwatch = Stopwatch::start_new();
        let mut profiler = Profiler::new();
        let mut code = target.trace.lock().func.clone();
        let insts_before = code.inst_count();
        if config.verbosity.ir() {
            info!("trace `{}` before optimization:\n{code}", target.name);
        }

        let counters = profiler.record_phase("optimize", || {
            let eval = Evaluator::with_machine(self.resolver(), machine);
            let producers = self.producers.read();
            let regions = self.regions.read();
            let immortals = self.immortals.read();
            let ctx = OptContext {
                eval: &eval,
                producers: &producers,
                regions: &regions,
                immortals: &immortals,
                config: &config.optimizer,
                verbosity: config.verbosity,
            };
            OptimizerPipeline::new(ctx).run(&mut code)
        })?;
        if config.verbosity.ir() {
            info!("trace `{}` after optimization:\n{code}", target.name);
        }

        if let Some(dir) = &config.trace.dump_dir {
            dump_ir(dir, &code)?;
        }

        let routine = profiler.record_phase("backend", || {
            self.backend().compile(&code, self.target_description())
        })?;
        let routine = Arc::new(routine);
        self.install(Arc::clone(&routine));
        if target.compiled.set(Arc::clone(&routine)).is_err() {
            warn!(name = %target.name, "trace compiled twice");
        }

        let mut event = CompilationEvent::new(target.name.clone(), stopwatch.elapsed());
        event.phases = profiler.into_pairs();
        event.insts_before = insts_before;
        event.insts_after = code.inst_count();
        event.code_size = routine.code_size();
        event.pass_counters = counters.to_pairs();
        if config.verbosity.stats() {
            info!(
                name = %target.name,
                duration_us = event.duration.as_micros() as u64,
                insts_before,
                insts_after = event.insts_after,
                code_size = event.code_size,
                "compiled trace"
            );
        }
        self.profiler().record_compilation(event);
        Ok(())
    }

    fn poison(&self, target: &TraceTarget, err: JitError) -> JitError {
        target.poisoned.store(true, Ordering::Release);
        error!(name = %target.name, "trace target poisoned: {err}");
        err
    }
}

/// Marks non-null parameters and pins invariant ones to the values of the
/// first call.
fn apply_arg_flags(func: &mut Function, flags: &[ArgFlags], args: &[u64]) {
    let Some(entry) = func.entry_block() else {
        return;
    };
    if func.param_attrs.len() < func.params.len() {
        func.param_attrs
            .resize(func.params.len(), ParamAttrs::default());
    }

    let mut at = func.phis(entry).len();
    for (index, flags) in flags.iter().enumerate() {
        let (Some(&param), Some(&observed)) = (func.params.get(index), args.get(index)) else {
            continue;
        };
        if flags.non_null {
            func.param_attrs[index].nonnull = true;
        }
        if flags.invariant {
            let ty = func.value_type(param);
            let expected = func.iconst(ty, observed);
            let cmp = func.insert_inst(
                entry,
                at,
                InstKind::Icmp {
                    cc: IntCC::Eq,
                    lhs: param,
                    rhs: expected,
                },
                Type::I1,
            );
            let Some(cond) = func.inst_result(cmp) else {
                continue;
            };
            func.insert_inst(entry, at + 1, InstKind::Assume { cond }, Type::Void);
            at += 2;
        }
    }
}

/// Writes `trace.<name>.ir` and `trace.<name>.json` into `dir`.
fn dump_ir(dir: &Path, func: &Function) -> Result<(), JitError> {
    let dump_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| JitError::Dump { path, source }
    };
    fs::create_dir_all(dir).map_err(dump_err(dir))?;

    let text = dir.join(format!("trace.{}.ir", func.name));
    fs::write(&text, func.to_string()).map_err(dump_err(&text))?;

    let json_path = dir.join(format!("trace.{}.json", func.name));
    let json = serde_json::to_string_pretty(func)
        .map_err(|err| dump_err(&json_path)(io::Error::other(err)))?;
    fs::write(&json_path, json).map_err(dump_err(&json_path))?;
    debug!(dir = %dir.display(), name = %func.name, "dumped trace IR");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::JitContext;
    use sable_config::JitConfig;
    use sable_ir::{
        BinaryOp, Block, ExecError, FunctionBuilder, Module, Signature, SimulatedMachine,
    };
    use sable_symbol::SymbolResolver;

    fn square() -> Function {
        let mut func = Function::new("square", Signature::new(vec![Type::I64], Type::I64));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        let sq = b.binary(BinaryOp::Mul, x, x);
        b.ret(Some(sq));
        func
    }

    /// fact(n) = n == 0 ? 1 : n * fact(n - 1)
    fn fact() -> Function {
        let mut func = Function::new("fact", Signature::new(vec![Type::I64], Type::I64));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        let base = b.create_block();
        let step = b.create_block();
        b.switch_to_block(entry);
        let n = b.param(0);
        let zero = b.iconst(Type::I64, 0);
        let done = b.icmp(IntCC::Eq, n, zero);
        b.branch(done, base, step);
        b.switch_to_block(base);
        let one = b.iconst(Type::I64, 1);
        b.ret(Some(one));
        b.switch_to_block(step);
        let one = b.iconst(Type::I64, 1);
        let prev = b.binary(BinaryOp::Sub, n, one);
        let callee = b.symbol("fact");
        let call = b.call(callee, vec![prev], Signature::new(vec![Type::I64], Type::I64));
        let rest = b.inst_result(call).unwrap();
        let product = b.binary(BinaryOp::Mul, n, rest);
        b.ret(Some(product));
        func
    }

    /// checked(x) traps on 0 and returns x otherwise.
    fn checked() -> Function {
        let mut func = Function::new("checked", Signature::new(vec![Type::I64], Type::I64));
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        let trap = b.create_block();
        let ok = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        let zero = b.iconst(Type::I64, 0);
        let is_zero = b.icmp(IntCC::Eq, x, zero);
        b.branch(is_zero, trap, ok);
        b.switch_to_block(trap);
        b.unreachable();
        b.switch_to_block(ok);
        b.ret(Some(x));
        func
    }

    fn setup(config: JitConfig) -> (JitContext, SimulatedMachine) {
        let mut machine = SimulatedMachine::new();
        machine.define_native("square", |_, args| Ok(args[0] * args[0]));
        machine.define_native("fact", |_, args| Ok((1..=args[0]).product()));
        machine.define_native("checked", |_, args| Ok(args[0]));
        let resolver = Arc::new(SymbolResolver::new());
        resolver.register_module(machine.exports());

        let ctx = JitContext::new(config, resolver);
        let mut module = Module::new("lib");
        module.push(square());
        module.push(fact());
        module.push(checked());
        ctx.register_module(module);
        (ctx, machine)
    }

    fn with_warmup(warmup: i64) -> TargetOptions {
        TargetOptions {
            warmup: Some(warmup),
            ..TargetOptions::default()
        }
    }

    #[test]
    fn test_compiles_on_the_call_that_ends_warmup() {
        let (ctx, mut machine) = setup(JitConfig::default());
        let target = ctx.register_target("square", with_warmup(3)).unwrap();

        for call in 1..=5u64 {
            assert_eq!(ctx.invoke("square", &mut machine, &[call]).unwrap(), call * call);
            assert_eq!(target.is_compiled(), call >= 3, "after call {call}");
        }
        let counters = ctx.stats().get("square");
        assert_eq!(counters.interpreted, 3);
        assert_eq!(counters.compiled, 2);
        assert_eq!(target.state(), TraceState::Compiled);
        assert_eq!(ctx.compiled_routines().len(), 1);

        let event = ctx.profiler().last_event("square").unwrap();
        let phases: Vec<&str> = event.phases.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(phases, ["optimize", "backend"]);
    }

    #[test]
    fn test_recursion_in_one_call_counts_once() {
        let (ctx, mut machine) = setup(JitConfig::default());
        let target = ctx.register_target("fact", with_warmup(10)).unwrap();

        assert_eq!(ctx.invoke("fact", &mut machine, &[5]).unwrap(), 120);
        assert_eq!(target.remaining_warmup(), 9);
        assert_eq!(ctx.stats().get("fact").interpreted, 1);
        assert_eq!(ctx.stats().get("fact").inlined, 5);

        // The inlined copies stay in the trace.
        assert_eq!(ctx.invoke("fact", &mut machine, &[3]).unwrap(), 6);
        assert_eq!(ctx.stats().get("fact").inlined, 5);
    }

    #[test]
    fn test_reentrant_call_runs_original() {
        let (ctx, mut machine) = setup(JitConfig::default());
        let ctx = Arc::new(ctx);
        ctx.register_target("square", with_warmup(100)).unwrap();
        let trampoline = ctx.install_trampoline(&mut machine, "square").unwrap();

        // outer(x) = square through the trampoline, from inside a traced square
        let bounce = machine.define_native("bounce", move |machine, args| {
            machine.call(trampoline, args)
        });
        let outer = {
            let mut func =
                Function::new("square", Signature::new(vec![Type::I64], Type::I64));
            let mut b = FunctionBuilder::new(&mut func);
            let entry = b.create_block();
            b.switch_to_block(entry);
            let x = b.param(0);
            let callee = b.iconst(Type::Ptr, bounce);
            let call = b.call(callee, vec![x], Signature::new(vec![Type::I64], Type::I64));
            let inner = b.inst_result(call).unwrap();
            let one = b.iconst(Type::I64, 1);
            let sum = b.binary(BinaryOp::Add, inner, one);
            b.ret(Some(sum));
            func
        };
        ctx.target("square").unwrap().trace.lock().func = outer;

        let result = machine.call(trampoline, &[6]).unwrap();
        assert_eq!(result, 37);
        let counters = ctx.stats().get("square");
        assert_eq!((counters.interpreted, counters.reentrant), (1, 1));
        assert_eq!(ctx.target("square").unwrap().remaining_warmup(), 98);
    }

    #[test]
    fn test_failure_poisons_target() {
        let (ctx, mut machine) = setup(JitConfig::default());
        ctx.register_target("checked", with_warmup(10)).unwrap();

        let err = ctx.invoke("checked", &mut machine, &[0]).unwrap_err();
        assert!(matches!(err, JitError::Exec(ExecError::Unreachable)));
        let err = ctx.invoke("checked", &mut machine, &[1]).unwrap_err();
        assert!(matches!(err, JitError::Poisoned(_)));
        assert_eq!(ctx.target("checked").unwrap().state(), TraceState::Poisoned);
        assert!(matches!(
            ctx.invoke("missing", &mut machine, &[1]),
            Err(JitError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_first_run_applies_arg_flags() {
        let (ctx, mut machine) = setup(JitConfig::default());
        let options = TargetOptions {
            warmup: Some(10),
            arg_flags: vec![ArgFlags::invariant()],
        };
        let target = ctx.register_target("square", options).unwrap();
        assert_eq!(ctx.invoke("square", &mut machine, &[7]).unwrap(), 49);

        let ir = target.ir_snapshot();
        let entry: Block = ir.entry_block().unwrap();
        assert!(
            ir.block_insts(entry)
                .iter()
                .any(|inst| matches!(ir.kind(*inst), InstKind::Assume { .. }))
        );
        assert_eq!(ctx.invoke("square", &mut machine, &[7]).unwrap(), 49);

        let err = ctx.invoke("square", &mut machine, &[8]).unwrap_err();
        assert!(matches!(
            err,
            JitError::Exec(ExecError::AssumptionFailed(_))
        ));
    }

    #[test]
    fn test_non_null_flag_marks_parameter() {
        let mut func = square();
        apply_arg_flags(&mut func, &[ArgFlags::non_null()], &[9]);
        assert!(func.param_attrs[0].nonnull);
        assert_eq!(func.inst_count(), 2);
    }

    #[test]
    fn test_dump_writes_text_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = JitConfig::default();
        config.trace.dump_dir = Some(dir.path().join("dumps"));
        let (ctx, mut machine) = setup(config);
        ctx.register_target("square", with_warmup(1)).unwrap();

        ctx.invoke("square", &mut machine, &[4]).unwrap();
        let text = fs::read_to_string(dir.path().join("dumps/trace.square.ir")).unwrap();
        assert!(text.contains("square"));
        let json = fs::read_to_string(dir.path().join("dumps/trace.square.json")).unwrap();
        let decoded: Function = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.name, "square");
    }
}
