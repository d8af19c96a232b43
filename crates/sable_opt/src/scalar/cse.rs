//! Common subexpression elimination over the dominator tree.

use ahash::AHashMap;
use sable_ir::{
    BinaryOp, Block, CastOp, DominatorTree, Function, Inst, InstKind, IntCC, Type, Value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ExprKey {
    Binary(BinaryOp, Value, Value, Type),
    Icmp(IntCC, Value, Value),
    Cast(CastOp, Value, Type),
    Select(Value, Value, Value),
    Gep(Value, i64),
    GepIndexed(Value, Value, i64),
}

fn expr_key(func: &Function, inst: Inst) -> Option<ExprKey> {
    let ty = func.value_type(func.inst_result(inst)?);
    Some(match func.kind(inst) {
        InstKind::Binary { op, lhs, rhs } => {
            let (lhs, rhs) = if op.is_commutative() && rhs < lhs {
                (*rhs, *lhs)
            } else {
                (*lhs, *rhs)
            };
            ExprKey::Binary(*op, lhs, rhs, ty)
        }
        InstKind::Icmp { cc, lhs, rhs } => {
            if rhs < lhs {
                ExprKey::Icmp(cc.swapped(), *rhs, *lhs)
            } else {
                ExprKey::Icmp(*cc, *lhs, *rhs)
            }
        }
        InstKind::Cast { op, arg } => ExprKey::Cast(*op, *arg, ty),
        InstKind::Select {
            cond,
            if_true,
            if_false,
        } => ExprKey::Select(*cond, *if_true, *if_false),
        InstKind::Gep { base, offset } => ExprKey::Gep(*base, *offset),
        InstKind::GepIndexed { base, index, scale } => ExprKey::GepIndexed(*base, *index, *scale),
        _ => return None,
    })
}

enum Visit {
    Enter(Block),
    /// Leave a scope, dropping every key recorded since it was entered.
    Exit(usize),
}

/// Replaces a pure instruction with an identical one that dominates it.
pub fn eliminate_common_subexpressions(func: &mut Function) -> u64 {
    let Some(entry) = func.entry_block() else {
        return 0;
    };
    let domtree = DominatorTree::with_function(func);
    let mut available: AHashMap<ExprKey, Value> = AHashMap::new();
    let mut log: Vec<ExprKey> = Vec::new();
    let mut removed = 0;

    let mut stack = vec![Visit::Enter(entry)];
    while let Some(visit) = stack.pop() {
        let block = match visit {
            Visit::Enter(block) => block,
            Visit::Exit(depth) => {
                for key in log.drain(depth..) {
                    available.remove(&key);
                }
                continue;
            }
        };
        stack.push(Visit::Exit(log.len()));

        for inst in func.block_insts(block).to_vec() {
            let Some(key) = expr_key(func, inst) else {
                continue;
            };
            let Some(result) = func.inst_result(inst) else {
                continue;
            };
            match available.get(&key) {
                Some(existing) => {
                    let existing = *existing;
                    func.replace_all_uses(result, existing);
                    func.remove_inst(inst);
                    removed += 1;
                }
                None => {
                    available.insert(key, result);
                    log.push(key);
                }
            }
        }

        for child in domtree.children(block).iter().rev() {
            stack.push(Visit::Enter(*child));
        }
    }
    removed
}
