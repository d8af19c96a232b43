//! Constant and copy propagation, constant branch folding and unreachable
//! block removal.

use ahash::AHashSet;
use sable_ir::{
    BinaryOp, Block, Function, Inst, InstKind, Type, Value, fold_binary, fold_cast, fold_icmp,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConstPropStats {
    pub simplified: u64,
    pub branches_folded: u64,
    pub blocks_removed: u64,
}

pub fn propagate_constants(func: &mut Function) -> ConstPropStats {
    let mut stats = ConstPropStats::default();
    for inst in func.layout_insts() {
        if !func.is_placed(inst) {
            continue;
        }
        if func.kind(inst).is_terminator() {
            if fold_terminator(func, inst) {
                stats.branches_folded += 1;
            }
            continue;
        }
        let Some(result) = func.inst_result(inst) else {
            continue;
        };
        if let Some(replacement) = simplify(func, inst, result) {
            if replacement != result {
                func.replace_all_uses(result, replacement);
                func.remove_inst(inst);
                stats.simplified += 1;
            }
        }
    }
    stats.blocks_removed = remove_unreachable_blocks(func);
    stats
}

/// A value that computes the same thing as `result`, if one is obvious.
fn simplify(func: &mut Function, inst: Inst, result: Value) -> Option<Value> {
    let ty = func.value_type(result);
    match func.kind(inst).clone() {
        InstKind::Binary { op, lhs, rhs } => {
            if let (Some(l), Some(r)) = (func.const_bits(lhs), func.const_bits(rhs)) {
                let bits = fold_binary(op, ty, l, r)?;
                return Some(func.iconst(ty, bits));
            }
            if ty == Type::F64 {
                return None;
            }
            let rhs_bits = func.const_bits(rhs);
            let lhs_bits = func.const_bits(lhs);
            match (op, lhs_bits, rhs_bits) {
                (
                    BinaryOp::Add
                    | BinaryOp::Sub
                    | BinaryOp::Or
                    | BinaryOp::Xor
                    | BinaryOp::Shl
                    | BinaryOp::LShr
                    | BinaryOp::AShr,
                    _,
                    Some(0),
                ) => Some(lhs),
                (BinaryOp::Add | BinaryOp::Or | BinaryOp::Xor, Some(0), _) => Some(rhs),
                (BinaryOp::Mul | BinaryOp::UDiv | BinaryOp::SDiv, _, Some(1)) => Some(lhs),
                (BinaryOp::Mul, Some(1), _) => Some(rhs),
                (BinaryOp::Mul | BinaryOp::And, _, Some(0))
                | (BinaryOp::Mul | BinaryOp::And, Some(0), _) => Some(func.iconst(ty, 0)),
                (BinaryOp::Sub | BinaryOp::Xor, _, _) if lhs == rhs => Some(func.iconst(ty, 0)),
                (BinaryOp::And | BinaryOp::Or, _, _) if lhs == rhs => Some(lhs),
                _ => None,
            }
        }
        InstKind::Icmp { cc, lhs, rhs } => {
            if lhs == rhs {
                return Some(func.iconst(Type::I1, u64::from(cc.is_true_when_equal())));
            }
            let (l, r) = (func.const_bits(lhs)?, func.const_bits(rhs)?);
            let operand_ty = func.value_type(lhs);
            let bit = fold_icmp(cc, operand_ty, l, r);
            Some(func.iconst(Type::I1, u64::from(bit)))
        }
        InstKind::Cast { op, arg } => {
            let from = func.value_type(arg);
            if from == ty && op.is_reinterpret() {
                return Some(arg);
            }
            let bits = func.const_bits(arg)?;
            Some(func.iconst(ty, fold_cast(op, from, ty, bits)))
        }
        InstKind::Select {
            cond,
            if_true,
            if_false,
        } => {
            if if_true == if_false {
                return Some(if_true);
            }
            match func.const_bits(cond)? {
                0 => Some(if_false),
                _ => Some(if_true),
            }
        }
        InstKind::Gep { base, offset: 0 } => Some(base),
        InstKind::Phi { incoming } => {
            let mut distinct = incoming
                .iter()
                .map(|(_, value)| *value)
                .filter(|value| *value != result);
            let first = distinct.next()?;
            distinct.all(|value| value == first).then_some(first)
        }
        _ => None,
    }
}

/// Turns branches with a known outcome into jumps.
fn fold_terminator(func: &mut Function, inst: Inst) -> bool {
    let Some(block) = func.inst_block(inst) else {
        return false;
    };
    let (taken, successors) = match func.kind(inst) {
        InstKind::Branch {
            cond,
            then_dest,
            else_dest,
            ..
        } => {
            let taken = if then_dest == else_dest {
                *then_dest
            } else {
                match func.const_bits(*cond) {
                    Some(0) => *else_dest,
                    Some(_) => *then_dest,
                    None => return false,
                }
            };
            (taken, vec![*then_dest, *else_dest])
        }
        InstKind::Switch {
            value,
            cases,
            default,
            ..
        } => {
            let Some(bits) = func.const_bits(*value) else {
                return false;
            };
            let taken = cases
                .iter()
                .find(|(case, _)| *case == bits)
                .map_or(*default, |(_, dest)| *dest);
            let mut successors = vec![*default];
            successors.extend(cases.iter().map(|(_, dest)| *dest));
            (taken, successors)
        }
        _ => return false,
    };

    let dropped: AHashSet<Block> = successors.into_iter().filter(|b| *b != taken).collect();
    for succ in dropped {
        func.remove_phi_incoming(succ, block);
    }
    func.replace_kind(inst, InstKind::Jump { dest: taken });
    true
}

/// Removes blocks the entry block cannot reach.
pub fn remove_unreachable_blocks(func: &mut Function) -> u64 {
    let Some(entry) = func.entry_block() else {
        return 0;
    };
    let mut reachable = AHashSet::new();
    let mut stack = vec![entry];
    while let Some(block) = stack.pop() {
        if !reachable.insert(block) {
            continue;
        }
        stack.extend(func.successors(block));
    }

    let unreachable: Vec<Block> = func
        .layout
        .iter()
        .copied()
        .filter(|block| !reachable.contains(block))
        .collect();
    for block in &unreachable {
        func.remove_block(*block);
    }
    unreachable.len() as u64
}
