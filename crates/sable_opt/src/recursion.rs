//! Recursion-check pairing.
//!
//! The runtime guards recursive entry points with
//!
//! ```text
//! store depth, load depth + 1   ; enter, overflow branch to the handler
//! ...
//! store depth, load depth - 1   ; leave, underflow branch to a reload
//! ```
//!
//! When the two blocks always execute in strict alternation and nothing that
//! runs between them can recurse, the pair has no observable effect and is
//! removed.

use ahash::AHashSet;
use sable_ir::{BinaryOp, Block, Function, Inst, InstKind, Value};
use tracing::{info, trace};

use crate::context::OptContext;
use crate::refcount::loads_from;

/// One side of a recursion check: the depth update and the branch after it.
#[derive(Debug, Clone, Copy)]
struct DepthCheck {
    store: Inst,
    branch: Inst,
    /// Handler block for an enter, reload block for a leave.
    side_exit: Block,
    fallthrough: Block,
}

impl DepthCheck {
    fn block(&self, func: &Function) -> Option<Block> {
        func.inst_block(self.store)
    }
}

/// Answers ordering questions about pairs of blocks.
pub struct BlockMatcher {
    entry: Option<Block>,
    exits: Vec<Block>,
}

impl BlockMatcher {
    pub fn new(func: &Function) -> Self {
        let exits = func
            .layout
            .iter()
            .copied()
            .filter(|block| {
                func.successors(*block).is_empty()
                    && func
                        .terminator(*block)
                        .is_some_and(|term| !matches!(func.kind(term), InstKind::Unreachable))
            })
            .collect();
        Self {
            entry: func.entry_block(),
            exits,
        }
    }

    /// Whether every execution runs `a` and `b` in `(ab)*` order, ignoring
    /// paths through `avoid`.
    pub fn blocks_are_matched(
        &self,
        func: &Function,
        a: Block,
        b: Block,
        avoid: Option<Block>,
    ) -> bool {
        let mut b_starts = vec![b];
        b_starts.extend(self.entry);
        let mut a_targets = self.exits.clone();
        a_targets.push(a);

        let mut without_a = vec![a];
        let mut without_b = vec![b];
        without_a.extend(avoid);
        without_b.extend(avoid);

        !can_reach(func, &b_starts, &[b], &without_a)
            && !can_reach(func, &[a], &a_targets, &without_b)
    }

    /// Instructions that may run after `a` and before `b`.
    pub fn instructions_between(
        func: &Function,
        a: Inst,
        b: Inst,
        avoid: Option<Block>,
    ) -> Vec<Inst> {
        let (Some(a_block), Some(b_block)) = (func.inst_block(a), func.inst_block(b)) else {
            return Vec::new();
        };
        let mut between: Vec<Inst> = func
            .block_insts(a_block)
            .iter()
            .skip_while(|inst| **inst != a)
            .skip(1)
            .copied()
            .collect();
        between.extend(
            func.block_insts(b_block)
                .iter()
                .take_while(|inst| **inst != b)
                .copied(),
        );

        let mut visited: AHashSet<Block> = [a_block, b_block].into_iter().collect();
        visited.extend(avoid);
        let mut queue: Vec<Block> = Vec::new();
        let mut push_successors = |block: Block, queue: &mut Vec<Block>| {
            for succ in func.successors(block) {
                if visited.insert(succ) {
                    queue.push(succ);
                }
            }
        };
        push_successors(a_block, &mut queue);
        while let Some(block) = queue.pop() {
            push_successors(block, &mut queue);
            between.extend(func.block_insts(block).iter().copied());
        }
        between
    }
}

/// Whether some block in `to` is reachable through at least one edge from a
/// block in `from`, never passing through `without`.
fn can_reach(func: &Function, from: &[Block], to: &[Block], without: &[Block]) -> bool {
    let mut reached: AHashSet<Block> = AHashSet::new();
    let mut queue: Vec<Block> = from
        .iter()
        .copied()
        .filter(|block| !without.contains(block))
        .collect();
    while let Some(block) = queue.pop() {
        for succ in func.successors(block) {
            if without.contains(&succ) || reached.contains(&succ) {
                continue;
            }
            if to.contains(&succ) {
                return true;
            }
            reached.insert(succ);
            queue.push(succ);
        }
    }
    false
}

pub fn remove_recursion_checks(func: &mut Function, ctx: &OptContext<'_>) -> u64 {
    let (Some(depth), Some(handler)) = (
        ctx.config.recursion_depth_symbol.as_deref(),
        ctx.config.recursion_overflow_handler.as_deref(),
    ) else {
        return 0;
    };
    let depth_address = ctx.eval.resolver().resolve_address(depth).ok();
    let is_depth = |func: &Function, ptr: Value| {
        func.symbol_name(ptr) == Some(depth)
            || depth_address.is_some_and(|address| ctx.const_address(func, ptr) == Some(address))
    };

    let mut enters = Vec::new();
    let mut leaves = Vec::new();
    for inst in func.layout_insts() {
        let InstKind::Store { ptr, value, .. } = func.kind(inst) else {
            continue;
        };
        if !is_depth(func, *ptr) {
            continue;
        }
        match depth_delta(func, *ptr, *value) {
            Some(1) => {
                if let Some(check) = depth_check(func, inst, |func, first| {
                    matches!(func.kind(first), InstKind::Call { callee, .. }
                        if ctx.callee_name(func, *callee).as_deref() == Some(handler))
                }) {
                    trace!(function = %func.name, inst = %inst, "found recursion enter");
                    enters.push(check);
                }
            }
            Some(-1) => {
                if let Some(check) = depth_check(func, inst, |func, first| {
                    matches!(func.kind(first), InstKind::Load { .. })
                }) {
                    trace!(function = %func.name, inst = %inst, "found recursion leave");
                    leaves.push(check);
                }
            }
            _ => {}
        }
    }
    if enters.is_empty() || leaves.is_empty() {
        return 0;
    }

    let matcher = BlockMatcher::new(func);
    let mut pairs = Vec::new();
    let mut leave_used = vec![false; leaves.len()];
    for enter in &enters {
        let Some(enter_block) = enter.block(func) else {
            continue;
        };
        for (index, leave) in leaves.iter().enumerate() {
            if leave_used[index] {
                continue;
            }
            let Some(leave_block) = leave.block(func) else {
                continue;
            };
            if enter_block == leave_block
                || !matcher.blocks_are_matched(func, enter_block, leave_block, Some(enter.side_exit))
            {
                continue;
            }
            let between = BlockMatcher::instructions_between(
                func,
                enter.store,
                leave.store,
                Some(enter.side_exit),
            );
            if let Some(blocker) = between.iter().find(|inst| needs_guard(func, ctx, **inst)) {
                if ctx.verbosity.interpreting() {
                    trace!(function = %func.name, inst = %blocker, "call needs its recursion guard");
                }
                continue;
            }
            leave_used[index] = true;
            pairs.push((*enter, *leave));
            break;
        }
    }

    for (enter, leave) in &pairs {
        remove_check(func, enter);
        remove_check(func, leave);
        if ctx.verbosity.ir() {
            info!(function = %func.name, enter = %enter.store, leave = %leave.store, "removed recursion check pair");
        }
    }
    pairs.len() as u64
}

/// `+1` or `-1` when `value` is `load ptr` adjusted by one.
fn depth_delta(func: &Function, ptr: Value, value: Value) -> Option<i64> {
    let inst = func.value_inst(value)?;
    let InstKind::Binary { op, lhs, rhs } = func.kind(inst) else {
        return None;
    };
    if !loads_from(func, *lhs, ptr) {
        return None;
    }
    let step = func.value_type(*rhs).sign_extend(func.const_bits(*rhs)?);
    match (op, step) {
        (BinaryOp::Add, 1) | (BinaryOp::Sub, -1) => Some(1),
        (BinaryOp::Add, -1) | (BinaryOp::Sub, 1) => Some(-1),
        _ => None,
    }
}

fn depth_check(
    func: &Function,
    store: Inst,
    side_exit_matches: impl Fn(&Function, Inst) -> bool,
) -> Option<DepthCheck> {
    let branch = func.terminator(func.inst_block(store)?)?;
    let InstKind::Branch {
        then_dest,
        else_dest,
        ..
    } = func.kind(branch)
    else {
        return None;
    };
    if then_dest == else_dest {
        return None;
    }
    let first = func.first_non_phi(*then_dest)?;
    side_exit_matches(func, first).then_some(DepthCheck {
        store,
        branch,
        side_exit: *then_dest,
        fallthrough: *else_dest,
    })
}

fn needs_guard(func: &Function, ctx: &OptContext<'_>, inst: Inst) -> bool {
    let InstKind::Call { callee, .. } = func.kind(inst) else {
        return false;
    };
    match ctx.callee_name(func, *callee) {
        Some(name) => name == func.name || !ctx.config.recursion_safe_calls.contains(&name),
        None => true,
    }
}

fn remove_check(func: &mut Function, check: &DepthCheck) {
    let Some(block) = func.inst_block(check.branch) else {
        return;
    };
    func.remove_inst(check.store);
    func.remove_phi_incoming(check.side_exit, block);
    func.replace_kind(
        check.branch,
        InstKind::Jump {
            dest: check.fallthrough,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ir::{FunctionBuilder, Signature, Type};

    /// entry -> (a -> b)* -> exit, with `side` leaving from `a`.
    fn looped() -> (Function, [Block; 5]) {
        let sig = Signature::new(vec![Type::I1], Type::Void);
        let mut func = Function::new("f", sig);
        let mut bld = FunctionBuilder::new(&mut func);
        let entry = bld.create_block();
        let a = bld.create_block();
        let side = bld.create_block();
        let b = bld.create_block();
        let exit = bld.create_block();
        let cond = bld.param(0);

        bld.switch_to_block(entry);
        bld.jump(a);
        bld.switch_to_block(a);
        bld.branch(cond, side, b);
        bld.switch_to_block(side);
        bld.ret(None);
        bld.switch_to_block(b);
        bld.branch(cond, a, exit);
        bld.switch_to_block(exit);
        bld.ret(None);
        (func, [entry, a, side, b, exit])
    }

    #[test]
    fn test_alternating_blocks_match_when_side_exit_ignored() {
        let (func, [_, a, side, b, _]) = looped();
        let matcher = BlockMatcher::new(&func);
        assert!(matcher.blocks_are_matched(&func, a, b, Some(side)));
        assert!(!matcher.blocks_are_matched(&func, a, b, None));
        assert!(!matcher.blocks_are_matched(&func, b, a, Some(side)));
    }

    #[test]
    fn test_instructions_between_skips_avoided_block() {
        let (func, [_, a, side, b, _]) = looped();
        let a_term = func.terminator(a).unwrap();
        let b_term = func.terminator(b).unwrap();
        let between = BlockMatcher::instructions_between(&func, a_term, b_term, Some(side));
        assert!(between.is_empty());

        let between = BlockMatcher::instructions_between(&func, a_term, b_term, None);
        assert_eq!(between, func.block_insts(side).to_vec());
    }

    fn guarded(inner_call: &str) -> Function {
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
        let too_deep = b.icmp(sable_ir::IntCC::Sgt, entered, limit);
        b.branch(too_deep, overflow, body);

        b.switch_to_block(overflow);
        let handler = b.symbol("overflow_handler");
        b.call(handler, vec![], Signature::new(vec![], Type::Void));
        b.ret(Some(x));

        b.switch_to_block(body);
        let callee = b.symbol(inner_call);
        let call = b.call(callee, vec![x], Signature::new(vec![Type::I64], Type::I64));
        let result = b.inst_result(call).unwrap();
        let before = b.load(Type::I64, depth);
        let left = b.binary(BinaryOp::Sub, before, one);
        b.store(depth, left);
        let zero = b.iconst(Type::I64, 0);
        let negative = b.icmp(sable_ir::IntCC::Slt, left, zero);
        b.branch(negative, underflow, done);

        b.switch_to_block(underflow);
        let reloaded = b.load(Type::I64, depth);
        b.ret(Some(reloaded));

        b.switch_to_block(done);
        b.ret(Some(result));
        func
    }

    fn recursion_config() -> sable_config::OptimizerConfig {
        sable_config::OptimizerConfig {
            recursion_depth_symbol: Some("depth".to_string()),
            recursion_overflow_handler: Some("overflow_handler".to_string()),
            recursion_safe_calls: vec!["double".to_string()],
            ..sable_config::OptimizerConfig::default()
        }
    }

    #[test]
    fn test_pair_around_safe_call_is_removed() {
        let fixture = crate::testing::Fixture::new(recursion_config());
        let mut func = guarded("double");
        let removed = fixture.with(None, |ctx| remove_recursion_checks(&mut func, ctx));
        assert_eq!(removed, 1);
        let stores = func
            .layout_insts()
            .into_iter()
            .filter(|inst| matches!(func.kind(*inst), InstKind::Store { .. }))
            .count();
        assert_eq!(stores, 0);
        let entry = func.entry_block().unwrap();
        assert!(matches!(
            func.kind(func.terminator(entry).unwrap()),
            InstKind::Jump { .. }
        ));
    }

    #[test]
    fn test_unlisted_or_self_call_keeps_pair() {
        let fixture = crate::testing::Fixture::new(recursion_config());
        for callee in ["convert", "walk"] {
            let mut func = guarded(callee);
            let removed = fixture.with(None, |ctx| remove_recursion_checks(&mut func, ctx));
            assert_eq!(removed, 0, "{callee}");
        }
    }
}
