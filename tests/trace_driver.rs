//! End-to-end behavior of trace targets called through trampolines.

use std::sync::Arc;

use sable::ir::{
    BinaryOp, Function, FunctionBuilder, InstKind, IntCC, Machine, Module, Signature,
    SimulatedMachine, Type,
};
use sable::jit::{InlineOutcome, TraceState};
use sable::symbol::SymbolResolver;
use sable::{JitConfig, JitContext, TargetOptions};

fn unary(name: &str) -> Function {
    Function::new(name, Signature::new(vec![Type::I64], Type::I64))
}

/// clamp(x) = x < 10 ? x : 10
fn clamp() -> Function {
    let mut func = unary("clamp");
    let mut b = FunctionBuilder::new(&mut func);
    let entry = b.create_block();
    let small = b.create_block();
    let big = b.create_block();
    b.switch_to_block(entry);
    let x = b.param(0);
    let ten = b.iconst(Type::I64, 10);
    let is_small = b.icmp(IntCC::Ult, x, ten);
    b.branch(is_small, small, big);
    b.switch_to_block(small);
    b.ret(Some(x));
    b.switch_to_block(big);
    b.ret(Some(ten));
    func
}

/// inc(x) = x + 1
fn inc() -> Function {
    let mut func = unary("inc");
    let mut b = FunctionBuilder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let x = b.param(0);
    let one = b.iconst(Type::I64, 1);
    let sum = b.binary(BinaryOp::Add, x, one);
    b.ret(Some(sum));
    func
}

/// apply(f, x) = f(x) * 2
fn apply() -> Function {
    let mut func = Function::new("apply", Signature::new(vec![Type::Ptr, Type::I64], Type::I64));
    let mut b = FunctionBuilder::new(&mut func);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let f = b.param(0);
    let x = b.param(1);
    let call = b.call(f, vec![x], Signature::new(vec![Type::I64], Type::I64));
    let result = b.inst_result(call).unwrap();
    let doubled = b.binary(BinaryOp::Add, result, result);
    b.ret(Some(doubled));
    func
}

struct Process {
    ctx: Arc<JitContext>,
    machine: SimulatedMachine,
    inc: u64,
    dec: u64,
}

fn process(config: JitConfig) -> Process {
    let mut machine = SimulatedMachine::new();
    machine.define_native("clamp", |_, args| Ok(args[0].min(10)));
    let inc_addr = machine.define_native("inc", |_, args| Ok(args[0] + 1));
    let dec = machine.define_native("dec", |_, args| Ok(args[0] - 1));
    machine.define_native("apply", |machine, args| {
        let once = machine.call(args[0], &args[1..2])?;
        Ok(once * 2)
    });
    let resolver = Arc::new(SymbolResolver::new());
    resolver.register_module(machine.exports());

    let ctx = JitContext::new(config, resolver);
    let mut module = Module::new("program");
    module.push(clamp());
    module.push(inc());
    module.push(apply());
    ctx.register_module(module);
    Process {
        ctx: Arc::new(ctx),
        machine,
        inc: inc_addr,
        dec,
    }
}

fn warmup(calls: i64) -> TargetOptions {
    TargetOptions {
        warmup: Some(calls),
        ..TargetOptions::default()
    }
}

#[test]
fn test_trampoline_calls_warm_up_then_compile() {
    let Process {
        ctx, mut machine, ..
    } = process(JitConfig::default());
    let target = ctx.register_target("clamp", warmup(3)).unwrap();
    let trampoline = ctx.install_trampoline(&mut machine, "clamp").unwrap();
    assert_eq!(target.state(), TraceState::Cold);

    let inputs = [4u64, 40, 7, 70, 1];
    for (call, x) in inputs.iter().enumerate() {
        assert_eq!(machine.call(trampoline, &[*x]).unwrap(), (*x).min(10));
        assert_eq!(target.is_compiled(), call + 1 >= 3, "after call {}", call + 1);
    }
    let counters = ctx.stats().get("clamp");
    assert_eq!(counters.interpreted, 3);
    assert_eq!(counters.compiled, 2);
    assert_eq!(counters.reentrant, 0);

    // Both arms ran while tracing; the first call's arm stays hot.
    let routine = target.compiled().unwrap();
    let code = routine.ir();
    let weights: Vec<_> = code
        .layout_insts()
        .into_iter()
        .filter_map(|inst| match code.kind(inst) {
            InstKind::Branch { weights, .. } => Some(*weights),
            _ => None,
        })
        .collect();
    assert_eq!(weights, [Some([1000, 1])]);
}

#[test]
fn test_branch_profile_reaches_compiled_code() {
    let Process {
        ctx, mut machine, ..
    } = process(JitConfig::default());
    let target = ctx.register_target("clamp", warmup(2)).unwrap();
    ctx.invoke("clamp", &mut machine, &[50]).unwrap();
    ctx.invoke("clamp", &mut machine, &[60]).unwrap();

    let code = target.compiled().unwrap().ir();
    let entry = code.entry_block().unwrap();
    let InstKind::Branch { weights, .. } = code.kind(code.terminator(entry).unwrap()) else {
        panic!("clamp lost its branch");
    };
    assert_eq!(*weights, Some([1, 1000]));
}

#[test]
fn test_pointer_call_is_guarded_in_compiled_code() {
    let mut config = JitConfig::default();
    config.trace.guard_weights = [900, 3];
    let Process {
        ctx,
        mut machine,
        inc,
        dec,
    } = process(config);
    let target = ctx.register_target("apply", warmup(1)).unwrap();

    assert_eq!(ctx.invoke("apply", &mut machine, &[inc, 20]).unwrap(), 42);
    assert!(target.is_compiled());

    let code = target.compiled().unwrap().ir();
    let guard = code
        .layout_insts()
        .into_iter()
        .find_map(|inst| match code.kind(inst) {
            InstKind::Branch { weights, .. } => Some(*weights),
            _ => None,
        });
    assert_eq!(guard, Some(Some([900, 3])));

    // The same pointer runs the inlined body, another one the kept call.
    assert_eq!(ctx.invoke("apply", &mut machine, &[inc, 1]).unwrap(), 4);
    assert_eq!(ctx.invoke("apply", &mut machine, &[dec, 5]).unwrap(), 8);
    assert_eq!(ctx.stats().get("apply").inlined, 1);
}

#[test]
fn test_inliner_decisions_respect_policy() {
    let mut config = JitConfig::default();
    config.trace.do_not_trace = vec!["inc".to_string()];
    let Process {
        ctx,
        mut machine,
        inc,
        ..
    } = process(config);
    ctx.register_target("apply", warmup(5)).unwrap();
    assert_eq!(ctx.invoke("apply", &mut machine, &[inc, 20]).unwrap(), 42);

    let counters = ctx.stats().get("apply");
    assert_eq!((counters.inlined, counters.declined), (0, 1));
    let ir = ctx.target("apply").unwrap().ir_snapshot();
    let calls = ir
        .layout_insts()
        .into_iter()
        .filter(|inst| matches!(ir.kind(*inst), InstKind::Call { .. }))
        .count();
    assert_eq!(calls, 1);
    assert!(!InlineOutcome::Declined(sable::jit::DeclineReason::Policy).is_inlined());
}

#[test]
fn test_compilation_is_profiled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = JitConfig::default();
    config.trace.dump_dir = Some(dir.path().to_path_buf());
    let Process {
        ctx, mut machine, ..
    } = process(config);
    ctx.register_target("clamp", warmup(1)).unwrap();
    ctx.invoke("clamp", &mut machine, &[3]).unwrap();

    let event = ctx.profiler().last_event("clamp").unwrap();
    assert_eq!(event.insts_after, event.code_size);
    assert!(event.insts_before >= event.insts_after);
    assert!(dir.path().join("trace.clamp.ir").exists());
    assert!(dir.path().join("trace.clamp.json").exists());
    assert_eq!(ctx.compiled_routines().len(), 1);
}
