//! Dead code elimination.

use ahash::AHashMap;
use sable_ir::{Function, Inst, InstKind, Value};

/// Whether `inst` can be deleted once its result is unused.
pub fn is_removable(func: &Function, inst: Inst) -> bool {
    match func.kind(inst) {
        InstKind::Binary { op, rhs, .. } => {
            !op.can_trap() || func.const_bits(*rhs).is_some_and(|bits| bits != 0)
        }
        InstKind::Load { volatile, .. } => !volatile,
        InstKind::Icmp { .. }
        | InstKind::Cast { .. }
        | InstKind::Select { .. }
        | InstKind::Gep { .. }
        | InstKind::GepIndexed { .. }
        | InstKind::Phi { .. } => true,
        _ => false,
    }
}

pub fn eliminate_dead_code(func: &mut Function) -> u64 {
    let mut uses: AHashMap<Value, usize> = AHashMap::new();
    for inst in func.layout_insts() {
        for operand in func.kind(inst).operands() {
            *uses.entry(operand).or_default() += 1;
        }
    }

    let mut removed = 0;
    loop {
        let mut changed = false;
        for inst in func.layout_insts().into_iter().rev() {
            let Some(result) = func.inst_result(inst) else {
                continue;
            };
            if uses.get(&result).copied().unwrap_or(0) > 0 || !is_removable(func, inst) {
                continue;
            }
            for operand in func.kind(inst).operands() {
                if let Some(count) = uses.get_mut(&operand) {
                    *count = count.saturating_sub(1);
                }
            }
            func.remove_inst(inst);
            removed += 1;
            changed = true;
        }
        if !changed {
            return removed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ir::{BinaryOp, FunctionBuilder, Signature, Type};

    #[test]
    fn test_removes_chains_but_keeps_effects() {
        let sig = Signature::new(vec![Type::I64, Type::Ptr], Type::Void);
        let mut func = Function::new("f", sig);
        let mut b = FunctionBuilder::new(&mut func);
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.param(0);
        let ptr = b.param(1);
        let one = b.iconst(Type::I64, 1);
        let a = b.binary(BinaryOp::Add, x, one);
        b.binary(BinaryOp::Mul, a, a);
        let zero = b.iconst(Type::I64, 0);
        b.binary(BinaryOp::UDiv, x, zero);
        b.store(ptr, x);
        b.ret(None);

        assert_eq!(eliminate_dead_code(&mut func), 2);
        // div, store, ret
        assert_eq!(func.inst_count(), 3);
    }
}
