//! Recursion-depth bookkeeping around calls that cannot recurse disappears
//! from optimized code without changing results.

use sable::JitConfig;
use sable::ir::{
    BinaryOp, Function, FunctionBuilder, InstKind, IntCC, Interpreter, Machine, Signature,
    SimulatedMachine, Type,
};
use sable::offline::optimize_function;
use sable::symbol::SymbolResolver;

/// walk(x): depth += 1 (overflow handler past 1000), r = callee(x),
/// depth -= 1 (reload when negative), return r.
fn walk(callee: &str) -> Function {
    let sig = Signature::new(vec![Type::I64], Type::I64);
    let mut func = Function::new("walk", sig);
    let mut b = FunctionBuilder::new(&mut func);
    let entry = b.create_block();
    let overflow = b.create_block();
    let body = b.create_block();
    let underflow = b.create_block();
    let done = b.create_block();
    let x = b.param(0);
    let depth = b.symbol("depth");
    let one = b.iconst(Type::I64, 1);

    b.switch_to_block(entry);
    let current = b.load(Type::I64, depth);
    let entered = b.binary(BinaryOp::Add, current, one);
    b.store(depth, entered);
    let limit = b.iconst(Type::I64, 1000);
    let too_deep = b.icmp(IntCC::Sgt, entered, limit);
    b.branch(too_deep, overflow, body);

    b.switch_to_block(overflow);
    let handler = b.symbol("overflow_handler");
    b.call(handler, vec![], Signature::new(vec![], Type::Void));
    b.ret(Some(x));

    b.switch_to_block(body);
    let target = b.symbol(callee);
    let call = b.call(target, vec![x], Signature::new(vec![Type::I64], Type::I64));
    let result = b.inst_result(call).unwrap();
    let before = b.load(Type::I64, depth);
    let left = b.binary(BinaryOp::Sub, before, one);
    b.store(depth, left);
    let zero = b.iconst(Type::I64, 0);
    let negative = b.icmp(IntCC::Slt, left, zero);
    b.branch(negative, underflow, done);

    b.switch_to_block(underflow);
    let reloaded = b.load(Type::I64, depth);
    b.ret(Some(reloaded));

    b.switch_to_block(done);
    b.ret(Some(result));
    func
}

fn config() -> JitConfig {
    let mut config = JitConfig::default();
    config.optimizer.recursion_depth_symbol = Some("depth".to_string());
    config.optimizer.recursion_overflow_handler = Some("overflow_handler".to_string());
    config.optimizer.recursion_safe_calls = vec!["double".to_string()];
    config
}

struct Runtime {
    machine: SimulatedMachine,
    resolver: SymbolResolver,
    depth: u64,
}

fn runtime() -> Runtime {
    let mut machine = SimulatedMachine::new();
    let depth = machine.define_data("depth", &0u64.to_le_bytes());
    machine.define_native("overflow_handler", |_, _| Ok(0));
    machine.define_native("double", |_, args| Ok(args[0] * 2));
    machine.define_native("convert", |_, args| Ok(args[0] + 7));
    let resolver = SymbolResolver::new();
    resolver.register_module(machine.exports());
    Runtime {
        machine,
        resolver,
        depth,
    }
}

fn count(func: &Function, matches: impl Fn(&InstKind) -> bool) -> usize {
    func.layout_insts()
        .into_iter()
        .filter(|inst| matches(func.kind(*inst)))
        .count()
}

#[test]
fn test_pair_around_safe_call_is_removed() {
    let Runtime {
        mut machine,
        resolver,
        depth,
    } = runtime();
    let original = walk("double");
    let expected = Interpreter::new(&resolver)
        .run(&original, &mut machine, &[21])
        .unwrap();
    assert_eq!(expected, 42);
    assert_eq!(machine.peek(depth, 8), Some(0));

    let optimized = optimize_function(original, &config(), &resolver).unwrap();
    assert_eq!(optimized.counters.recursion_pairs_removed, 1);
    let func = &optimized.function;
    assert_eq!(count(func, |kind| matches!(kind, InstKind::Store { .. })), 0);
    assert_eq!(count(func, |kind| matches!(kind, InstKind::Branch { .. })), 0);
    assert!(func.inst_count() < optimized.insts_before);

    let result = Interpreter::new(&resolver)
        .run(func, &mut machine, &[21])
        .unwrap();
    assert_eq!(result, expected);
    assert_eq!(machine.peek(depth, 8), Some(0));
}

#[test]
fn test_pair_around_unlisted_call_survives() {
    let Runtime {
        mut machine,
        resolver,
        depth,
    } = runtime();
    let optimized = optimize_function(walk("convert"), &config(), &resolver).unwrap();
    assert_eq!(optimized.counters.recursion_pairs_removed, 0);
    let func = &optimized.function;
    assert_eq!(count(func, |kind| matches!(kind, InstKind::Store { .. })), 2);

    let result = Interpreter::new(&resolver)
        .run(func, &mut machine, &[5])
        .unwrap();
    assert_eq!(result, 12);
    assert_eq!(machine.peek(depth, 8), Some(0));
}

#[test]
fn test_checks_kept_without_configured_runtime_symbols() {
    let Runtime { resolver, .. } = runtime();
    let optimized = optimize_function(walk("double"), &JitConfig::default(), &resolver).unwrap();
    assert_eq!(optimized.counters.recursion_pairs_removed, 0);
    assert_eq!(
        count(&optimized.function, |kind| matches!(kind, InstKind::Store { .. })),
        2
    );
}
